use std::{error::Error, io::Write};

use scalargrad::Tape;

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    run(&mut std::io::stdout())
}

/// Differentiate the diamond `a * a + a` and write the results followed by the graph.
fn run(out: &mut impl Write) -> Result<(), Box<dyn Error>> {
    let tape = Tape::new();
    let a = tape.term("a", 2.);
    let b = a * a;
    let c = b + a;
    c.backward()?;

    writeln!(out, "c = {}", c.value())?;
    writeln!(out, "dc/da = {}", a.grad())?;
    c.dot_builder().dot(out)?;
    Ok(())
}

#[test]
fn test_run() {
    let mut out = vec![];
    run(&mut out).unwrap();
    let out = String::from_utf8(out).unwrap();
    assert!(out.starts_with("c = 6\ndc/da = 5\ndigraph G {"));
}

#[test]
fn test_run_write_error() {
    struct Broken;
    impl Write for Broken {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
    assert!(run(&mut Broken).is_err());
}
