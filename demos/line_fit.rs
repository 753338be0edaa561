//! Least squares fitting of a line using gradient descent.
//!
//! Forward values are fixed once a term is built, so every step records a fresh tape.

use scalargrad::{Tape, TapeTerm};

const RATE: f64 = 0.01;

fn truth(x: f64) -> f64 {
    1.5 * x - 0.7
}

fn loss<'a>(tape: &'a Tape, a: TapeTerm<'a>, b: TapeTerm<'a>, samples: &[f64]) -> TapeTerm<'a> {
    samples
        .iter()
        .map(|&x| {
            let y = tape.constant(truth(x));
            (a * x + b - y).powf(2.)
        })
        .reduce(|acc, e| acc + e)
        .unwrap_or_else(|| tape.constant(0.))
}

fn main() {
    env_logger::init();

    let samples: Vec<_> = (-20..20).map(|i| i as f64 / 10.).collect();
    let (mut a_val, mut b_val) = (0., 0.);

    for i in 0..200 {
        let tape = Tape::new();
        let a = tape.term("a", a_val);
        let b = tape.term("b", b_val);
        let loss = loss(&tape, a, b, &samples);
        loss.backward().unwrap();
        a_val -= RATE * a.grad();
        b_val -= RATE * b.grad();
        if i % 20 == 0 {
            println!("i: {i}, a: {a_val}, b: {b_val}, loss: {}", loss.value());
        }
    }
    println!("a: {a_val}, b: {b_val}");
}
