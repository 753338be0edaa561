use scalargrad::{Op, Tape};
use scalargrad_macro::scalargrad;

#[test]
fn macro_diamond() {
    let tape = Tape::new();
    scalargrad! { tape;
        let a = 2.;
        let b = a * a;
        let c = b + a;
    }
    c.backward().unwrap();
    assert_eq!(c.value(), 6.);
    assert_eq!(a.grad(), 5.);
    assert_eq!(a.name(), "a");
    assert_eq!(b.name(), "a * a");
}

#[test]
fn macro_functions() {
    let tape = Tape::new();
    scalargrad! { tape;
        let x = 2.;
        let y = powf(x, 3) - 2. * x;
        let z = tanh(x - x) + exp(-(x - x));
    }
    y.backward().unwrap();
    z.backward().unwrap();
    assert_eq!(y.value(), 4.);
    assert_eq!(z.value(), 1.);
    // dy/dx = 3x^2 - 2, dz/dx = 0
    assert_eq!(x.grad(), 10.);
}

#[test]
fn macro_negative_literal() {
    let tape = Tape::new();
    scalargrad! { tape;
        let y = -2.;
        let z = y * y;
    }
    assert_eq!(y.name(), "y");
    assert_eq!(y.op(), Op::Leaf);
    assert_eq!(y.value(), -2.);
    z.backward().unwrap();
    assert_eq!(y.grad(), -4.);
    assert_eq!(tape.len(), 2);
}
