//! Dependency graph in diamond shape. It uses the same term twice, so the derivative should add up.

use scalargrad::Tape;

fn main() {
    env_logger::init();

    let tape = Tape::new();
    let a = tape.term("a", 1.);
    let a2 = -a;
    let b = tape.term("b", 3.);
    let c = tape.term("c", 5.);
    let ab = a2 + b;
    let ac = a2 + c;
    let abac = ab + ac;

    abac.backward().unwrap();

    // One dot file per node, in the order the backward pass visits them
    for (i, idx) in abac.topo_order().unwrap().into_iter().rev().enumerate() {
        let mut file =
            std::io::BufWriter::new(std::fs::File::create(format!("dot{i}.dot")).unwrap());
        abac.dot_builder()
            .show_values(true)
            .highlights(idx)
            .dot(&mut file)
            .unwrap();
    }

    println!("abac: {}", abac.grad());
    println!("a: {}", a.grad());
    println!("b: {}", b.grad());
    println!("c: {}", c.grad());
    abac.dot_builder()
        .show_values(true)
        .dot(&mut std::io::stdout())
        .unwrap();
}
