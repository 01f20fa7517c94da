use approx::assert_relative_eq;
use expression::parser::{MAX_DEPTH, MAX_TOKENS};
use expression::{ArithmeticEvaluator, Evaluate, ExpressionContext, ExpressionError};

#[test]
fn evaluates_plain_arithmetic_with_empty_buffer() {
    let ev = ArithmeticEvaluator::new();
    assert_eq!(ev.evaluate("", "2+3"), Some(5.0));
    assert_eq!(ev.evaluate("", "  7 "), Some(7.0));
}

#[test]
fn buffer_assignments_are_visible_in_order() {
    let ev = ArithmeticEvaluator::new();
    let buffer = "width = 20\nheight = width / 4; depth = height * 2";
    assert_eq!(ev.evaluate(buffer, "width + height + depth"), Some(35.0));
}

#[test]
fn broken_binding_is_skipped_not_fatal() {
    let ev = ArithmeticEvaluator::new();
    let buffer = "a = 1\nb = (2 +\nc = a + 1";
    let vars = ev.bindings(buffer);
    assert_eq!(vars.get("a"), Some(&1.0));
    assert!(!vars.contains_key("b"));
    assert_eq!(vars.get("c"), Some(&2.0));
}

#[test]
fn functions_and_constants() {
    let ev = ArithmeticEvaluator::new();
    assert_relative_eq!(ev.evaluate("", "sin(pi / 2)").unwrap(), 1.0, epsilon = 1e-12);
    assert_eq!(ev.evaluate("", "max(1, 7, 3)"), Some(7.0));
    assert_eq!(ev.evaluate("", "pow(2, 10)"), Some(1024.0));
}

#[test]
fn failures_return_none() {
    let ev = ArithmeticEvaluator::new();
    assert_eq!(ev.evaluate("", "undefined_var * 2"), None);
    assert_eq!(ev.evaluate("", "1 / 0"), None);
    assert_eq!(ev.evaluate("", "abc("), None);
    assert!(matches!(
        ev.try_evaluate("", "foo(1)"),
        Err(ExpressionError::UnknownFunction { .. })
    ));
}

#[test]
fn context_owns_buffer() {
    let ev = ArithmeticEvaluator::new();
    let mut ctx = ExpressionContext::new("x = 3");
    assert_eq!(ctx.evaluate(&ev, "x * x"), Some(9.0));
    ctx.set_buffer("x = 4");
    assert_eq!(ctx.evaluate(&ev, "x * x"), Some(16.0));
}

#[test]
fn deep_nesting_is_an_error_not_a_crash() {
    let ev = ArithmeticEvaluator::new();
    let nested = |n: usize| format!("{}1{}", "(".repeat(n), ")".repeat(n));
    assert_eq!(ev.evaluate("", &nested(100)), Some(1.0));

    let deep = nested(200_000);
    assert_eq!(ev.evaluate("", &deep), None);
    assert!(matches!(
        ev.try_evaluate("", &deep),
        Err(ExpressionError::TooLong { .. })
    ));
    assert!(matches!(
        ev.try_evaluate("", &nested(MAX_DEPTH + 1)),
        Err(ExpressionError::TooDeep { limit: MAX_DEPTH })
    ));
    assert!(matches!(
        ev.try_evaluate("", &format!("{}2", "-".repeat(MAX_DEPTH + 1))),
        Err(ExpressionError::TooDeep { .. })
    ));
}

#[test]
fn long_operator_chains_are_bounded() {
    let ev = ArithmeticEvaluator::new();
    let chain = |n: usize| vec!["1"; n].join("+");
    assert_eq!(ev.evaluate("", &chain(1000)), Some(1000.0));
    assert!(matches!(
        ev.try_evaluate("", &chain(MAX_TOKENS)),
        Err(ExpressionError::TooLong { .. })
    ));
}
