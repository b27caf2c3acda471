// Math functions: max, min, abs, round, floor, ceil, sqrt, pow
// Arity is checked at parse time; these only compute.

use crate::parser::Function;

pub(crate) fn apply(function: Function, args: &[f64]) -> f64 {
    match function {
        Function::Max => args.iter().copied().fold(f64::NEG_INFINITY, |a, b| nan_or(a, b, f64::max)),
        Function::Min => args.iter().copied().fold(f64::INFINITY, |a, b| nan_or(a, b, f64::min)),
        Function::Abs => unary(args, f64::abs),
        // Half-way cases round toward positive infinity: round(-2.5) == -2
        Function::Round => unary(args, round_half_up),
        Function::Floor => unary(args, f64::floor),
        Function::Ceil => unary(args, f64::ceil),
        Function::Sqrt => unary(args, f64::sqrt),
        Function::Pow => match args {
            [base, exponent] => base.powf(*exponent),
            _ => f64::NAN,
        },
    }
}

// f64::max/min drop a NaN operand; a NaN argument must poison the result.
fn nan_or(a: f64, b: f64, pick: fn(f64, f64) -> f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else {
        pick(a, b)
    }
}

// `x - floor(x)` is exact, unlike `x + 0.5` which rounds up just below one half.
fn round_half_up(x: f64) -> f64 {
    let floor = x.floor();
    if x - floor >= 0.5 {
        floor + 1.0
    } else {
        floor
    }
}

fn unary(args: &[f64], f: impl Fn(f64) -> f64) -> f64 {
    match args {
        [x] => f(*x),
        _ => f64::NAN,
    }
}
