use approx::assert_abs_diff_eq;
use scalargrad::{GraphError, Op, Tape, TapeTerm};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// `a` feeds `b` twice and `c` once, so its gradient has to add up over every path.
fn diamond(tape: &Tape) -> (TapeTerm, TapeTerm, TapeTerm) {
    let a = tape.term("a", 2.);
    let b = a * a;
    let c = b + a;
    (a, b, c)
}

#[test]
fn diamond_shared_operand() {
    init_logger();
    let tape = Tape::new();
    let (a, b, c) = diamond(&tape);
    assert_eq!(b.value(), 4.);
    assert_eq!(c.value(), 6.);

    c.backward().unwrap();
    assert_eq!(a.grad(), 5.);
}

#[test]
fn wide_diamond() {
    init_logger();
    let tape = Tape::new();
    let a = tape.term("a", 1.);
    let b = tape.term("b", 3.);
    let c = tape.term("c", 5.);
    let ab = a + b;
    let ac = a + c;
    let abac = ab + ac;

    abac.backward().unwrap();
    assert_eq!(a.grad(), 2.);
    assert_eq!(b.grad(), 1.);
    assert_eq!(c.grad(), 1.);
}

#[test]
fn shared_subexpression_below_two_parents() {
    init_logger();
    let tape = Tape::new();
    let x = tape.term("x", 3.);
    let s = x * x;
    let y = s * s + s.exp();
    y.backward().unwrap();
    // y = x^4 + exp(x^2), dy/dx = 4x^3 + 2x exp(x^2)
    let expected = 4. * 27. + 6. * 9f64.exp();
    assert_abs_diff_eq!(x.grad(), expected, epsilon = 1e-6 * expected);
}

#[test]
fn repeated_backward_accumulates() {
    init_logger();
    let tape = Tape::new();
    let (a, b, c) = diamond(&tape);

    c.backward().unwrap();
    let first = (a.grad(), b.grad());
    c.backward().unwrap();
    assert_eq!(a.grad(), 2. * first.0);
    assert_eq!(b.grad(), 2. * first.1);
    assert_eq!(c.grad(), 1.);
}

#[test]
fn backward_from_another_root_accumulates() {
    init_logger();
    let tape = Tape::new();
    let (a, b, c) = diamond(&tape);

    c.backward().unwrap();
    b.backward().unwrap();
    // 5 from c, then db/da = 4 from b
    assert_eq!(a.grad(), 9.);
    // a root is set to 1, not added to
    assert_eq!(b.grad(), 1.);
    assert_eq!(c.grad(), 1.);
}

#[test]
fn zero_grad_resets() {
    init_logger();
    let tape = Tape::new();
    let (a, _, c) = diamond(&tape);

    c.backward().unwrap();
    tape.zero_grad();
    assert!(tape.nodes().iter().all(|node| node.grad() == 0.));
    c.backward().unwrap();
    assert_eq!(a.grad(), 5.);
}

#[test]
fn zero_grad_reachable_only() {
    init_logger();
    let tape = Tape::new();
    let x = tape.term("x", 1.);
    let y = tape.term("y", 2.);
    let fx = x * 3.;
    let fy = y * 4.;
    fx.backward().unwrap();
    fy.backward().unwrap();

    fx.zero_grad().unwrap();
    assert_eq!(x.grad(), 0.);
    assert_eq!(y.grad(), 4.);
}

#[test]
fn forward_values_are_not_touched() {
    init_logger();
    let tape = Tape::new();
    let x = tape.term("x", 0.5);
    let w = tape.term("w", -3.);
    let y = (x * w + 1.).tanh() / x - w.powf(2.);
    let values: Vec<_> = tape.nodes().iter().map(|node| node.value()).collect();

    for _ in 0..3 {
        y.backward().unwrap();
    }
    let after: Vec<_> = tape.nodes().iter().map(|node| node.value()).collect();
    assert_eq!(values, after);
}

#[test]
fn unreachable_nodes_keep_grad() {
    init_logger();
    let tape = Tape::new();
    let x = tape.term("x", 2.);
    let other = tape.term("other", 7.);
    let z = other * other;
    let y = x.exp();

    y.backward().unwrap();
    assert_eq!(other.grad(), 0.);
    assert_eq!(z.grad(), 0.);
    assert_abs_diff_eq!(x.grad(), 2f64.exp());
}

#[test]
fn neuron() {
    init_logger();
    let tape = Tape::new();
    let x1 = tape.term("x1", 2.);
    let x2 = tape.term("x2", 0.);
    let w1 = tape.term("w1", -3.);
    let w2 = tape.term("w2", 1.);
    let b = tape.term("b", 6.881_373_587_019_543_2);
    let n = x1 * w1 + x2 * w2 + b;
    let o = n.tanh();
    o.backward().unwrap();

    assert_abs_diff_eq!(o.value(), std::f64::consts::FRAC_1_SQRT_2, epsilon = 1e-12);
    assert_abs_diff_eq!(n.grad(), 0.5, epsilon = 1e-12);
    assert_abs_diff_eq!(x1.grad(), -1.5, epsilon = 1e-12);
    assert_abs_diff_eq!(w1.grad(), 1., epsilon = 1e-12);
    assert_abs_diff_eq!(x2.grad(), 0.5, epsilon = 1e-12);
    assert_abs_diff_eq!(w2.grad(), 0., epsilon = 1e-12);
}

#[test]
fn tanh_through_exp_matches_tanh() {
    init_logger();
    let tape = Tape::new();
    let x = tape.term("x", 0.7);
    let e = (2. * x).exp();
    let y = (e - 1.) / (e + 1.);
    y.backward().unwrap();

    let expected = 1. - 0.7f64.tanh().powi(2);
    assert_abs_diff_eq!(y.value(), 0.7f64.tanh(), epsilon = 1e-12);
    assert_abs_diff_eq!(x.grad(), expected, epsilon = 1e-12);
}

#[test]
fn float_edge_cases_propagate() {
    init_logger();
    let tape = Tape::new();
    let x = tape.term("x", 0.);
    let y = 1. / x;
    assert!(y.value().is_infinite());
    let z = tape.term("z", -8.).powf(1. / 3.);
    assert!(z.value().is_nan());
    y.backward().unwrap();
    assert!(!x.grad().is_finite());
}

#[test]
fn node_snapshot() {
    let tape = Tape::new();
    let (a, b, c) = diamond(&tape);
    assert_eq!(tape.len(), 3);
    let nodes = tape.nodes();
    assert_eq!(nodes[a.idx() as usize].op(), Op::Leaf);
    assert!(nodes[a.idx() as usize].operands().is_empty());
    assert_eq!(nodes[b.idx() as usize].operands(), &[a.idx(), a.idx()]);
    assert_eq!(nodes[c.idx() as usize].op(), Op::Add);
    assert_eq!(nodes[c.idx() as usize].name(), "(a * a + a)");
}

#[test]
fn mixing_tapes_is_invalid() {
    let tape1 = Tape::new();
    let tape2 = Tape::new();
    let a = tape1.term("a", 1.);
    let b = tape2.term("b", 1.);
    let err = a.try_mul(b).unwrap_err();
    assert!(matches!(err, GraphError::InvalidOperand(_)));
    assert!(a.try_pow(b).is_err());
    assert!(a.try_sub(b).is_err());
}

#[test]
#[should_panic(expected = "Invalid operand")]
fn mixing_tapes_with_operator_panics() {
    let tape1 = Tape::new();
    let tape2 = Tape::new();
    let a = tape1.term("a", 1.);
    let b = tape2.term("b", 1.);
    let _ = a + b;
}
