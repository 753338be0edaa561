//! Graphviz output of the graph reachable from a term.
//!
//! It only reads the tape, so it can run between or after backward passes.

use std::{collections::BTreeSet, io::Write};

use crate::tape::{Op, TapeNode, TapeTerm};

pub struct DotBuilder<'a> {
    term: TapeTerm<'a>,
    show_values: bool,
    vertical: bool,
    highlights: Option<u32>,
}

impl<'a> DotBuilder<'a> {
    pub(crate) fn new(term: TapeTerm<'a>) -> Self {
        Self {
            term,
            show_values: true,
            vertical: false,
            highlights: None,
        }
    }

    /// Print the value and the gradient of each node in its label.
    pub fn show_values(mut self, v: bool) -> Self {
        self.show_values = v;
        self
    }

    /// Lay out the graph top to bottom instead of left to right.
    pub fn vertical(mut self, v: bool) -> Self {
        self.vertical = v;
        self
    }

    /// Fill the node at the given index with a color.
    pub fn highlights(mut self, idx: u32) -> Self {
        self.highlights = Some(idx);
        self
    }

    /// Write graphviz dot file to the given writer.
    pub fn dot(self, writer: &mut impl Write) -> std::io::Result<()> {
        let nodes = self.term.tape().nodes();
        let reachable = reachable(&nodes, self.term.idx());
        let rankdir = if self.vertical { "TB" } else { "LR" };
        writeln!(writer, "digraph G {{\nrankdir=\"{rankdir}\";")?;
        for &id in &reachable {
            let node = &nodes[id as usize];
            let color = if self.highlights == Some(id) {
                " style=filled fillcolor=\"#ff7f7f\""
            } else {
                ""
            };
            if self.show_values {
                writeln!(
                    writer,
                    "a{id} [label=\"{} \\ndata:{}, grad:{}\" shape=record{color}];",
                    escape(node.name()),
                    node.value(),
                    node.grad()
                )?;
            } else {
                writeln!(
                    writer,
                    "a{id} [label=\"{}\" shape=record{color}];",
                    escape(node.name())
                )?;
            }
            if node.op() != Op::Leaf {
                writeln!(writer, "a{id}op [label=\"{}\"];", node.op())?;
                writeln!(writer, "a{id}op -> a{id};")?;
                for pid in node.operands() {
                    writeln!(writer, "a{pid} -> a{id}op;")?;
                }
            }
        }
        writeln!(writer, "}}")?;
        Ok(())
    }
}

/// Indices of the nodes reachable from `root`, each one only once.
fn reachable(nodes: &[TapeNode], root: u32) -> BTreeSet<u32> {
    let mut visited = BTreeSet::new();
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        if visited.insert(id) {
            stack.extend_from_slice(nodes[id as usize].operands());
        }
    }
    visited
}

fn escape(name: &str) -> String {
    name.replace('"', "\\\"")
        .replace('<', "\\<")
        .replace('>', "\\>")
        .replace('{', "\\{")
        .replace('}', "\\}")
        .replace('|', "\\|")
}

#[cfg(test)]
use crate::Tape;

#[test]
fn test_dot_diamond() {
    let tape = Tape::new();
    let a = tape.term("a", 2.);
    let b = a * a;
    let c = b + a;
    c.backward().unwrap();

    let mut out = vec![];
    c.dot_builder().dot(&mut out).unwrap();
    let out = String::from_utf8(out).unwrap();
    assert!(out.starts_with("digraph G {\nrankdir=\"LR\";\n"));
    assert!(out.contains("a0 [label=\"a \\ndata:2, grad:5\" shape=record];"));
    assert!(out.contains("a2op [label=\"+\"];"));
    // `a` is shared by both operations but is declared once
    assert_eq!(out.matches("a0 [").count(), 1);
    assert_eq!(out.matches("a0 -> a1op;").count(), 2);
    assert!(out.ends_with("}\n"));
}

#[test]
fn test_dot_options() {
    let tape = Tape::new();
    let x = tape.term("x", 0.5);
    let y = x.tanh();
    let unused = tape.term("unused", 1.);

    let mut out = vec![];
    y.dot_builder()
        .show_values(false)
        .vertical(true)
        .highlights(x.idx())
        .dot(&mut out)
        .unwrap();
    let out = String::from_utf8(out).unwrap();
    assert!(out.contains("rankdir=\"TB\";"));
    assert!(out.contains("a0 [label=\"x\" shape=record style=filled fillcolor=\"#ff7f7f\"];"));
    assert!(out.contains("a1op [label=\"tanh\"];"));
    assert!(!out.contains(&format!("a{} ", unused.idx())));
    assert_eq!(y.grad(), 0.);
}

#[test]
fn test_dot_write_error() {
    struct Broken;
    impl Write for Broken {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    let tape = Tape::new();
    let x = tape.term("x", 1.);
    let err = x.exp().dot_builder().dot(&mut Broken).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);
}
