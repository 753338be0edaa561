//! A single neuron with two inputs and a tanh activation.

use scalargrad::Tape;

fn main() {
    env_logger::init();

    let tape = Tape::new();
    let x1 = tape.term("x1", 2.);
    let x2 = tape.term("x2", 0.);
    let w1 = tape.term("w1", -3.);
    let w2 = tape.term("w2", 1.);
    let b = tape.term("b", 6.881_373_587_019_543);
    let n = x1 * w1 + x2 * w2 + b;
    let o = n.tanh();

    o.backward().unwrap();
    println!("o = {}", o.value());
    for (name, term) in [("x1", x1), ("w1", w1), ("x2", x2), ("w2", w2), ("b", b)] {
        println!("do/d{name} = {}", term.grad());
    }
    o.dot_builder()
        .vertical(true)
        .dot(&mut std::io::stdout())
        .unwrap();
}
