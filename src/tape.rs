//! Implementation of shared memory arena for the terms, aka a tape.
//! See https://rufflewind.com/2016-12-30/reverse-mode-automatic-differentiation
//!
//! Every node is pushed onto a [`Tape`] exactly once and refers to its operands by
//! index, so an operand always has a smaller index than any node using it.
//!
//! Gradients accumulate: each [`TapeTerm::backward`] call adds the derivatives of
//! one pass onto whatever the nodes already hold. Call [`Tape::zero_grad`] (or
//! [`TapeTerm::zero_grad`]) between passes if you need fresh gradients.

use std::cell::{Ref, RefCell};
use std::fmt::{Debug, Display};

use log::{debug, trace};

use crate::{dot::DotBuilder, error::GraphError};

#[derive(Default, Debug)]
pub struct Tape {
    nodes: RefCell<Vec<TapeNode>>,
}

/// The operation that produced a node, which selects its derivative rule.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    /// A user supplied variable or constant without operands.
    Leaf,
    Add,
    Mul,
    /// Power with the right operand as a constant exponent.
    Pow,
    Exp,
    Tanh,
}

impl Op {
    /// Number of operands a node of this kind refers to.
    pub fn arity(&self) -> usize {
        match self {
            Op::Leaf => 0,
            Op::Exp | Op::Tanh => 1,
            Op::Add | Op::Mul | Op::Pow => 2,
        }
    }
}

impl Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Op::Leaf => "leaf",
            Op::Add => "+",
            Op::Mul => "*",
            Op::Pow => "^",
            Op::Exp => "exp",
            Op::Tanh => "tanh",
        };
        write!(f, "{s}")
    }
}

#[derive(Clone, Debug)]
pub struct TapeNode {
    name: String,
    op: Op,
    operands: [u32; 2],
    data: f64,
    grad: f64,
}

impl TapeNode {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn op(&self) -> Op {
        self.op
    }

    /// The forward value, fixed at construction.
    pub fn value(&self) -> f64 {
        self.data
    }

    pub fn grad(&self) -> f64 {
        self.grad
    }

    /// Indices of the operands on the owning tape, in order.
    pub fn operands(&self) -> &[u32] {
        &self.operands[..self.op.arity()]
    }
}

/// A handle to a node on a [`Tape`].
///
/// It is `Copy`, so expressions can reuse a term any number of times without
/// cloning anything; the node itself stays on the tape.
#[derive(Copy, Clone)]
pub struct TapeTerm<'a> {
    tape: &'a Tape,
    idx: u32,
}

impl Tape {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a leaf variable with a name.
    pub fn term<'a>(&'a self, name: impl Into<String>, init: f64) -> TapeTerm<'a> {
        self.push(name.into(), Op::Leaf, [0, 0], init)
    }

    /// Create a leaf labeled with its own value.
    pub fn constant(&self, value: f64) -> TapeTerm<'_> {
        self.term(format!("{value}"), value)
    }

    pub fn len(&self) -> usize {
        self.nodes.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.borrow().is_empty()
    }

    /// Read-only snapshot of all nodes, indexed by [`TapeTerm::idx`].
    ///
    /// The returned guard must be dropped before building new terms or running
    /// a backward pass on this tape.
    pub fn nodes(&self) -> Ref<'_, [TapeNode]> {
        Ref::map(self.nodes.borrow(), |nodes| nodes.as_slice())
    }

    /// Reset the gradient of every node on the tape.
    pub fn zero_grad(&self) {
        let mut nodes = self.nodes.borrow_mut();
        for node in nodes.iter_mut() {
            node.grad = 0.;
        }
        debug!("zero_grad: cleared {} nodes", nodes.len());
    }

    fn push(&self, name: String, op: Op, operands: [u32; 2], data: f64) -> TapeTerm<'_> {
        let mut nodes = self.nodes.borrow_mut();
        let idx = nodes.len();
        nodes.push(TapeNode {
            name,
            op,
            operands,
            data,
            grad: 0.,
        });
        TapeTerm {
            tape: self,
            idx: idx as u32,
        }
    }
}

impl<'a> TapeTerm<'a> {
    pub fn tape(&self) -> &'a Tape {
        self.tape
    }

    /// Index of the node on its tape, unique for the tape's lifetime.
    pub fn idx(&self) -> u32 {
        self.idx
    }

    pub fn name(&self) -> String {
        self.tape.nodes.borrow()[self.idx as usize].name.clone()
    }

    pub fn op(&self) -> Op {
        self.tape.nodes.borrow()[self.idx as usize].op
    }

    pub fn value(&self) -> f64 {
        self.tape.nodes.borrow()[self.idx as usize].data
    }

    pub fn grad(&self) -> f64 {
        self.tape.nodes.borrow()[self.idx as usize].grad
    }

    pub fn try_add(self, rhs: Self) -> Result<Self, GraphError> {
        self.check_tape(&rhs, "+")?;
        Ok(self.add_unchecked(rhs))
    }

    pub fn try_sub(self, rhs: Self) -> Result<Self, GraphError> {
        self.check_tape(&rhs, "-")?;
        let name = format!("({} - {})", self.name(), rhs.name());
        let neg = rhs.mul_unchecked(self.tape.constant(-1.));
        Ok(self.binary(neg, Op::Add, name, |lhs, rhs| lhs + rhs))
    }

    pub fn try_mul(self, rhs: Self) -> Result<Self, GraphError> {
        self.check_tape(&rhs, "*")?;
        Ok(self.mul_unchecked(rhs))
    }

    pub fn try_div(self, rhs: Self) -> Result<Self, GraphError> {
        self.check_tape(&rhs, "/")?;
        let name = format!("{} / {}", self.operand_name(), rhs.operand_name());
        let inv = rhs.pow_unchecked(self.tape.constant(-1.));
        Ok(self.binary(inv, Op::Mul, name, |lhs, rhs| lhs * rhs))
    }

    /// Raise to the power of `exponent`. The exponent is treated as a constant
    /// and receives no gradient.
    pub fn try_pow(self, exponent: Self) -> Result<Self, GraphError> {
        self.check_tape(&exponent, "^")?;
        Ok(self.pow_unchecked(exponent))
    }

    pub fn pow(self, exponent: Self) -> Self {
        self.try_pow(exponent).unwrap_or_else(|e| panic!("{e}"))
    }

    pub fn powf(self, exponent: f64) -> Self {
        self.pow_unchecked(self.tape.constant(exponent))
    }

    pub fn exp(self) -> Self {
        self.unary(Op::Exp, f64::exp)
    }

    pub fn tanh(self) -> Self {
        self.unary(Op::Tanh, f64::tanh)
    }

    fn check_tape(&self, rhs: &Self, op: &str) -> Result<(), GraphError> {
        if std::ptr::eq(self.tape, rhs.tape) {
            Ok(())
        } else {
            Err(GraphError::InvalidOperand(format!(
                "cannot apply `{op}` to {} and {} from different tapes",
                self.name(),
                rhs.name()
            )))
        }
    }

    /// The label to embed in a product or power. Sums already carry their own
    /// parentheses.
    fn operand_name(&self) -> String {
        let nodes = self.tape.nodes.borrow();
        let node = &nodes[self.idx as usize];
        match node.op {
            Op::Mul | Op::Pow => format!("({})", node.name),
            _ => node.name.clone(),
        }
    }

    fn add_unchecked(self, rhs: Self) -> Self {
        let name = format!("({} + {})", self.name(), rhs.name());
        self.binary(rhs, Op::Add, name, |lhs, rhs| lhs + rhs)
    }

    fn mul_unchecked(self, rhs: Self) -> Self {
        let name = format!("{} * {}", self.operand_name(), rhs.operand_name());
        self.binary(rhs, Op::Mul, name, |lhs, rhs| lhs * rhs)
    }

    fn pow_unchecked(self, exponent: Self) -> Self {
        let name = format!("{}^{}", self.operand_name(), exponent.operand_name());
        self.binary(exponent, Op::Pow, name, f64::powf)
    }

    fn binary(self, rhs: Self, op: Op, name: String, f: fn(f64, f64) -> f64) -> Self {
        let data = {
            let nodes = self.tape.nodes.borrow();
            f(nodes[self.idx as usize].data, nodes[rhs.idx as usize].data)
        };
        self.tape.push(name, op, [self.idx, rhs.idx], data)
    }

    fn unary(self, op: Op, f: fn(f64) -> f64) -> Self {
        let (name, data) = {
            let nodes = self.tape.nodes.borrow();
            let node = &nodes[self.idx as usize];
            (format!("{op}({})", node.name), f(node.data))
        };
        self.tape.push(name, op, [self.idx, 0], data)
    }

    /// Nodes reachable from this term, every node after all of its operands.
    /// [`Self::backward`] walks this order in reverse.
    pub fn topo_order(&self) -> Result<Vec<u32>, GraphError> {
        let nodes = self.tape.nodes.borrow();
        topo_order(&nodes, self.idx)
    }

    /// Accumulate the derivatives of this term into every node reachable from it.
    ///
    /// The term itself gets a gradient of 1. Every other reachable node gets the
    /// derivative of this term with respect to it added to its current gradient,
    /// so running it twice without [`Tape::zero_grad`] doubles them.
    pub fn backward(&self) -> Result<(), GraphError> {
        let mut nodes = self.tape.nodes.borrow_mut();
        let order = topo_order(&nodes, self.idx)?;
        debug!(
            "backward from {}: {} reachable nodes",
            nodes[self.idx as usize].name,
            order.len()
        );

        let mut grads = vec![0.; nodes.len()];
        grads[self.idx as usize] = 1.;
        for &idx in order.iter().rev() {
            propagate(&nodes, &mut grads, idx);
        }

        for &idx in &order {
            let node = &mut nodes[idx as usize];
            if idx == self.idx {
                node.grad = 1.;
            } else {
                node.grad += grads[idx as usize];
            }
        }
        Ok(())
    }

    /// Reset the gradient of the nodes reachable from this term only.
    pub fn zero_grad(&self) -> Result<(), GraphError> {
        let mut nodes = self.tape.nodes.borrow_mut();
        let order = topo_order(&nodes, self.idx)?;
        for &idx in &order {
            nodes[idx as usize].grad = 0.;
        }
        debug!("zero_grad: cleared {} nodes", order.len());
        Ok(())
    }

    pub fn dot_builder(self) -> DotBuilder<'a> {
        DotBuilder::new(self)
    }
}

impl<'a> Debug for TapeTerm<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let nodes = self.tape.nodes.borrow();
        let node = &nodes[self.idx as usize];
        f.debug_struct("TapeTerm")
            .field("idx", &self.idx)
            .field("name", &node.name)
            .field("value", &node.data)
            .field("grad", &node.grad)
            .finish()
    }
}

/// Depth-first post-order over the operands, with an explicit stack so that long
/// chains do not exhaust the call stack.
fn topo_order(nodes: &[TapeNode], root: u32) -> Result<Vec<u32>, GraphError> {
    let mut visited = vec![false; nodes.len()];
    let mut order = vec![];
    // The flag tells whether the operands of the node were already pushed.
    let mut stack = vec![(root, false)];
    while let Some((idx, expanded)) = stack.pop() {
        if expanded {
            order.push(idx);
            continue;
        }
        if visited[idx as usize] {
            continue;
        }
        visited[idx as usize] = true;
        stack.push((idx, true));
        for &operand in nodes[idx as usize].operands().iter().rev() {
            if idx <= operand {
                return Err(GraphError::CyclicGraphDetected { node: idx, operand });
            }
            if !visited[operand as usize] {
                stack.push((operand, false));
            }
        }
    }
    Ok(order)
}

/// Distribute the gradient of the node at `idx` to its operands.
fn propagate(nodes: &[TapeNode], grads: &mut [f64], idx: u32) {
    let node = &nodes[idx as usize];
    let grad = grads[idx as usize];
    let [lhs, rhs] = node.operands.map(|i| i as usize);
    match node.op {
        Op::Leaf => return,
        Op::Add => {
            grads[lhs] += grad;
            grads[rhs] += grad;
        }
        Op::Mul => {
            grads[lhs] += nodes[rhs].data * grad;
            grads[rhs] += nodes[lhs].data * grad;
        }
        Op::Pow => {
            let (base, exponent) = (nodes[lhs].data, nodes[rhs].data);
            grads[lhs] += exponent * base.powf(exponent - 1.) * grad;
        }
        Op::Exp => grads[lhs] += node.data * grad,
        Op::Tanh => grads[lhs] += (1. - node.data * node.data) * grad,
    }
    trace!("propagate {} ({}): grad {grad}", node.name, node.op);
}

macro_rules! impl_binary_op {
    ($trait:ident, $method:ident, $checked:ident) => {
        impl<'a> std::ops::$trait for TapeTerm<'a> {
            type Output = Self;
            fn $method(self, rhs: Self) -> Self::Output {
                self.$checked(rhs).unwrap_or_else(|e| panic!("{e}"))
            }
        }

        impl<'a> std::ops::$trait<f64> for TapeTerm<'a> {
            type Output = Self;
            fn $method(self, rhs: f64) -> Self::Output {
                std::ops::$trait::$method(self, self.tape.constant(rhs))
            }
        }

        impl<'a> std::ops::$trait<TapeTerm<'a>> for f64 {
            type Output = TapeTerm<'a>;
            fn $method(self, rhs: TapeTerm<'a>) -> Self::Output {
                std::ops::$trait::$method(rhs.tape.constant(self), rhs)
            }
        }
    };
}

impl_binary_op!(Add, add, try_add);
impl_binary_op!(Sub, sub, try_sub);
impl_binary_op!(Mul, mul, try_mul);
impl_binary_op!(Div, div, try_div);

impl<'a> std::ops::Neg for TapeTerm<'a> {
    type Output = Self;
    fn neg(self) -> Self::Output {
        let name = format!("-{}", self.operand_name());
        self.binary(self.tape.constant(-1.), Op::Mul, name, |lhs, rhs| lhs * rhs)
    }
}

#[test]
fn test_add() {
    let tape = Tape::new();
    let a = tape.term("a", -1.5);
    let b = tape.term("b", 4.);
    let c = a + b;
    c.backward().unwrap();
    assert_eq!(c.value(), 2.5);
    assert_eq!(a.grad(), 1.);
    assert_eq!(b.grad(), 1.);
    assert_eq!(c.name(), "(a + b)");
}

#[test]
fn test_mul() {
    let tape = Tape::new();
    let a = tape.term("a", 3.);
    let b = tape.term("b", 4.);
    let c = a * b;
    c.backward().unwrap();
    assert_eq!(c.value(), 12.);
    assert_eq!(a.grad(), 4.);
    assert_eq!(b.grad(), 3.);
    assert_eq!(c.name(), "a * b");
}

#[test]
fn test_diamond() {
    let tape = Tape::new();
    let a = tape.term("a", 2.);
    let b = a * a;
    let c = b + a;
    assert_eq!(b.value(), 4.);
    assert_eq!(c.value(), 6.);
    c.backward().unwrap();
    assert_eq!(a.grad(), 5.);
    assert_eq!(b.grad(), 1.);
    assert_eq!(c.grad(), 1.);
}

#[test]
fn test_topo_order() {
    let tape = Tape::new();
    let a = tape.term("a", 2.);
    let b = a * a;
    let c = b + a;
    let order = c.topo_order().unwrap();
    assert_eq!(order, vec![a.idx(), b.idx(), c.idx()]);
}

#[test]
fn test_topo_order_skips_unreachable() {
    let tape = Tape::new();
    let a = tape.term("a", 1.);
    let b = tape.term("b", 2.);
    let _unused = a * b;
    let c = a.exp();
    assert_eq!(c.topo_order().unwrap(), vec![a.idx(), c.idx()]);
}

#[test]
fn test_pow() {
    let tape = Tape::new();
    let x = tape.term("x", 2.);
    let y = x.powf(3.);
    assert_eq!(y.value(), 8.);
    assert_eq!(y.name(), "x^3");
    y.backward().unwrap();
    assert_eq!(x.grad(), 12.);
}

#[test]
fn test_pow_exponent_has_no_grad() {
    let tape = Tape::new();
    let x = tape.term("x", 3.);
    let k = tape.term("k", 2.);
    let y = x.pow(k);
    y.backward().unwrap();
    assert_eq!(y.value(), 9.);
    assert_eq!(x.grad(), 6.);
    assert_eq!(k.grad(), 0.);
}

#[test]
fn test_tanh() {
    let tape = Tape::new();
    let x = tape.term("x", 0.);
    let y = x.tanh();
    y.backward().unwrap();
    assert_eq!(y.value(), 0.);
    assert_eq!(x.grad(), 1.);
    assert_eq!(y.name(), "tanh(x)");
}

#[test]
fn test_exp() {
    let tape = Tape::new();
    let x = tape.term("x", 0.);
    let y = x.exp();
    y.backward().unwrap();
    assert_eq!(y.value(), 1.);
    assert_eq!(x.grad(), 1.);
}

#[test]
fn test_sub_div_neg() {
    let tape = Tape::new();
    let a = tape.term("a", 6.);
    let b = tape.term("b", 2.);
    let sub = a - b;
    let div = a / b;
    let neg = -a;
    assert_eq!(sub.value(), 4.);
    assert_eq!(div.value(), 3.);
    assert_eq!(neg.value(), -6.);
    assert_eq!(sub.name(), "(a - b)");
    assert_eq!(div.name(), "a / b");
    assert_eq!(neg.name(), "-a");

    div.backward().unwrap();
    assert_eq!(a.grad(), 0.5);
    assert_eq!(b.grad(), -1.5);
}

#[test]
fn test_compound_labels() {
    let tape = Tape::new();
    let a = tape.term("a", 8.);
    let b = tape.term("b", 2.);
    let c = tape.term("c", 2.);
    let div = a / (b * c);
    assert_eq!(div.name(), "a / (b * c)");
    assert_eq!(div.value(), 2.);
    let sq = (a * b).powf(2.);
    assert_eq!(sq.name(), "(a * b)^2");
    assert_eq!(sq.value(), 256.);
    assert_eq!((-(a * b)).name(), "-(a * b)");
    assert_eq!((a / b * c).name(), "(a / b) * c");
    assert_eq!((a * (b - c)).name(), "a * (b - c)");
}

#[test]
fn test_constant_label() {
    let tape = Tape::new();
    let x = tape.term("x", 1.5);
    let y = 2. * x + 1.;
    assert_eq!(y.name(), "(2 * x + 1)");
    assert_eq!(y.value(), 4.);
}

#[test]
fn test_different_tapes() {
    let tape1 = Tape::new();
    let tape2 = Tape::new();
    let a = tape1.term("a", 1.);
    let b = tape2.term("b", 2.);
    assert!(matches!(a.try_add(b), Err(GraphError::InvalidOperand(_))));
    assert!(matches!(a.try_div(b), Err(GraphError::InvalidOperand(_))));
    for (res, op) in [
        (a.try_add(b), "`+`"),
        (a.try_sub(b), "`-`"),
        (a.try_mul(b), "`*`"),
        (a.try_div(b), "`/`"),
        (a.try_pow(b), "`^`"),
    ] {
        let err = res.unwrap_err().to_string();
        assert!(err.contains(op), "{err}");
    }
    assert_eq!(tape1.len(), 1);
    assert_eq!(tape2.len(), 1);
}

#[test]
fn test_corrupted_tape() {
    let tape = Tape::new();
    let a = tape.term("a", 1.);
    let b = a.exp();
    tape.nodes.borrow_mut()[a.idx() as usize] = TapeNode {
        name: "a".to_string(),
        op: Op::Exp,
        operands: [b.idx(), 0],
        data: 1.,
        grad: 0.,
    };
    assert_eq!(
        b.backward(),
        Err(GraphError::CyclicGraphDetected {
            node: a.idx(),
            operand: b.idx()
        })
    );
    assert_eq!(b.grad(), 0.);
}

#[test]
fn test_long_chain() {
    let tape = Tape::new();
    let x = tape.term("x", 1.);
    let mut y = x;
    for _ in 0..2_000 {
        y = y + x;
    }
    y.backward().unwrap();
    assert_eq!(x.grad(), 2_001.);
}
