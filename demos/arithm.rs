use scalargrad::Tape;

fn main() {
    let tape = Tape::new();
    let a = tape.term("a", 123.);
    let b = tape.term("b", 321.);
    let c = tape.term("c", 42.);
    let ab = a + b;
    let abc = ab * c;
    println!("a + b = {}", ab.value());
    println!("(a + b) * c = {}", abc.value());

    abc.backward().unwrap();
    println!("d((a + b) * c) / da = {}", a.grad());
    println!("d((a + b) * c) / db = {}", b.grad());
    println!("d((a + b) * c) / dc = {}", c.grad());

    let d = tape.term("d", 2.);
    let abcd = abc / d;
    tape.zero_grad();
    abcd.backward().unwrap();
    println!("d((a + b) * c / d) / dc = {}", c.grad());

    let exp_abcd = (abcd / 1e4).exp();
    tape.zero_grad();
    exp_abcd.backward().unwrap();
    println!("d(exp((a + b) * c / d / 1e4)) / dc = {}", c.grad());

    exp_abcd.dot_builder().dot(&mut std::io::stdout()).unwrap();
}
