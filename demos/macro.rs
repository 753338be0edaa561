use scalargrad::Tape;
use scalargrad_macro::scalargrad;

fn main() {
    let tape = Tape::new();
    scalargrad! { tape;
        let x = 123.;
        let result = 2. * x + 321.;
    }
    println!("f(x): {}", result.value());
    result.backward().unwrap();
    println!("df/dx: {}", x.grad());
    result.dot_builder().dot(&mut std::io::stdout()).unwrap();
}
