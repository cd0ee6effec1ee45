//! Flat arithmetic expression evaluation.
//!
//! An expression is a left-to-right sequence of integer operands separated
//! by `+ - * /`, with `*` and `/` binding tighter than `+` and `-`.
//! Evaluation uses machine integer (wrapping `i64`) semantics and
//! truncating division.

use std::fmt;

use tracing::debug;

/// Reply token emitted for a request expression that failed to evaluate.
///
/// Keeps the reply token count equal to the request token count, so the
/// peer can still pair replies with its requests.
pub const ERROR_SENTINEL: &str = "ERR";

/// Errors from evaluating a single expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalError {
    /// Not an alternating operand/operator sequence.
    Malformed,
    /// A `/` with a zero divisor.
    DivisionByZero,
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::Malformed => write!(f, "malformed expression"),
            EvalError::DivisionByZero => write!(f, "division by zero"),
        }
    }
}

impl std::error::Error for EvalError {}

/// Evaluate one flat expression.
///
/// Two passes: the first collapses `*`/`/` pairs left-to-right in place,
/// preserving the relative order of the remaining operators; the second
/// folds `+`/`-` over what is left. ASCII whitespace between tokens is
/// accepted, matching stream extraction in the usual C/C++ tooling this
/// protocol originated with.
pub fn evaluate(expr: &str) -> Result<i64, EvalError> {
    let bytes = expr.as_bytes();
    let mut pos = 0;

    let mut nums = vec![parse_operand(bytes, &mut pos)?];
    let mut ops: Vec<u8> = Vec::new();

    loop {
        skip_ws(bytes, &mut pos);
        let op = match bytes.get(pos) {
            Some(&b) => b,
            None => break,
        };
        if !matches!(op, b'+' | b'-' | b'*' | b'/') {
            return Err(EvalError::Malformed);
        }
        pos += 1;
        nums.push(parse_operand(bytes, &mut pos)?);
        ops.push(op);
    }

    // Pass 1: collapse * and / left-to-right. The right operand is always
    // an original operand, never a collapsed result.
    let mut i = 0;
    while i < ops.len() {
        match ops[i] {
            b'*' => {
                nums[i] = nums[i].wrapping_mul(nums[i + 1]);
                nums.remove(i + 1);
                ops.remove(i);
            }
            b'/' => {
                if nums[i + 1] == 0 {
                    return Err(EvalError::DivisionByZero);
                }
                nums[i] = nums[i].wrapping_div(nums[i + 1]);
                nums.remove(i + 1);
                ops.remove(i);
            }
            _ => i += 1,
        }
    }

    // Pass 2: fold + and -.
    let mut result = nums[0];
    for (i, op) in ops.iter().enumerate() {
        result = match op {
            b'+' => result.wrapping_add(nums[i + 1]),
            _ => result.wrapping_sub(nums[i + 1]),
        };
    }
    Ok(result)
}

/// Compute the reply for one accumulated request.
///
/// Each whitespace-separated expression yields one reply token, in input
/// order: the decimal result on success, [`ERROR_SENTINEL`] on failure.
pub fn respond(request: &str) -> String {
    let mut out = String::new();
    for token in request.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        match evaluate(token) {
            Ok(value) => out.push_str(&value.to_string()),
            Err(e) => {
                debug!(token, error = %e, "expression failed to evaluate");
                out.push_str(ERROR_SENTINEL);
            }
        }
    }
    out
}

fn skip_ws(bytes: &[u8], pos: &mut usize) {
    while matches!(bytes.get(*pos), Some(b) if b.is_ascii_whitespace()) {
        *pos += 1;
    }
}

/// Parse an optionally signed decimal integer, advancing `pos` past it.
fn parse_operand(bytes: &[u8], pos: &mut usize) -> Result<i64, EvalError> {
    skip_ws(bytes, pos);
    let negative = match bytes.get(*pos) {
        Some(b'-') => {
            *pos += 1;
            true
        }
        Some(b'+') => {
            *pos += 1;
            false
        }
        _ => false,
    };

    let start = *pos;
    let mut value: i64 = 0;
    while let Some(&b) = bytes.get(*pos) {
        if !b.is_ascii_digit() {
            break;
        }
        value = value.wrapping_mul(10).wrapping_add(i64::from(b - b'0'));
        *pos += 1;
    }
    if *pos == start {
        return Err(EvalError::Malformed);
    }
    Ok(if negative { value.wrapping_neg() } else { value })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_operand() {
        assert_eq!(evaluate("42"), Ok(42));
        assert_eq!(evaluate("-7"), Ok(-7));
        assert_eq!(evaluate("+7"), Ok(7));
    }

    #[test]
    fn test_precedence() {
        assert_eq!(evaluate("2+2"), Ok(4));
        assert_eq!(evaluate("2+3*4"), Ok(14));
        assert_eq!(evaluate("2*3+4"), Ok(10));
        assert_eq!(evaluate("1-2*3"), Ok(-5));
        assert_eq!(evaluate("10*10"), Ok(100));
        assert_eq!(evaluate("2+3*4-6/2"), Ok(11));
    }

    #[test]
    fn test_truncating_division() {
        assert_eq!(evaluate("7/2"), Ok(3));
        assert_eq!(evaluate("-7/2"), Ok(-3));
        assert_eq!(evaluate("7/-2"), Ok(-3));
        assert_eq!(evaluate("1/2"), Ok(0));
    }

    #[test]
    fn test_division_by_zero() {
        assert_eq!(evaluate("10/0"), Err(EvalError::DivisionByZero));
        assert_eq!(evaluate("1+10/0"), Err(EvalError::DivisionByZero));
        // Zero divisor only matters for division.
        assert_eq!(evaluate("10*0"), Ok(0));
    }

    #[test]
    fn test_malformed() {
        assert_eq!(evaluate(""), Err(EvalError::Malformed));
        assert_eq!(evaluate("abc"), Err(EvalError::Malformed));
        assert_eq!(evaluate("1+"), Err(EvalError::Malformed));
        assert_eq!(evaluate("1%2"), Err(EvalError::Malformed));
        assert_eq!(evaluate("+"), Err(EvalError::Malformed));
    }

    #[test]
    fn test_interior_whitespace() {
        // Stream-extraction style: whitespace between tokens is fine.
        assert_eq!(evaluate("1 + 2 * 3"), Ok(7));
    }

    #[test]
    fn test_double_sign() {
        // Operator then a signed operand, as stream extraction parses it.
        assert_eq!(evaluate("1--2"), Ok(3));
        assert_eq!(evaluate("1+-2"), Ok(-1));
    }

    #[test]
    fn test_left_to_right_collapse_order() {
        // 100/10/5 must be (100/10)/5 = 2, not 100/(10/5).
        assert_eq!(evaluate("100/10/5"), Ok(2));
        assert_eq!(evaluate("2*3*4"), Ok(24));
    }

    #[test]
    fn test_respond_batch() {
        assert_eq!(respond("2+2 10*10 7/2"), "4 100 3");
        assert_eq!(respond("5"), "5");
        assert_eq!(respond(""), "");
    }

    #[test]
    fn test_respond_error_sentinel_keeps_positions() {
        assert_eq!(respond("2+2 nope 7/0 1+1"), "4 ERR ERR 2");
    }

    #[test]
    fn test_matches_reference_evaluator() {
        // Independent precedence-respecting evaluation over generated
        // expressions with nonzero operands.
        use crate::gen::ExprGenerator;

        let mut generator = ExprGenerator::new(Some(7));
        for _ in 0..200 {
            let expr = generator.expression(6);
            let got = evaluate(&expr).unwrap();
            let want = reference_eval(&expr);
            assert_eq!(got, want, "expr: {expr}");
        }
    }

    /// Precedence-climbing reference evaluator used only to cross-check
    /// the two-pass implementation.
    fn reference_eval(expr: &str) -> i64 {
        let mut tokens = tokenize(expr);
        tokens.reverse(); // pop() from the front
        let mut acc = reference_term(&mut tokens);
        while let Some(op) = tokens.pop() {
            let rhs = reference_term(&mut tokens);
            acc = if op == '+' {
                acc.wrapping_add(rhs)
            } else {
                acc.wrapping_sub(rhs)
            };
        }
        acc
    }

    fn reference_term(tokens: &mut Vec<char>) -> i64 {
        let mut acc = pop_num(tokens);
        while matches!(tokens.last(), Some('*') | Some('/')) {
            let op = tokens.pop().unwrap();
            let rhs = pop_num(tokens);
            acc = if op == '*' {
                acc.wrapping_mul(rhs)
            } else {
                acc / rhs
            };
        }
        acc
    }

    fn pop_num(tokens: &mut Vec<char>) -> i64 {
        let mut digits = String::new();
        while matches!(tokens.last(), Some(c) if c.is_ascii_digit()) {
            digits.push(tokens.pop().unwrap());
        }
        digits.parse().unwrap()
    }

    fn tokenize(expr: &str) -> Vec<char> {
        expr.chars().filter(|c| !c.is_whitespace()).collect()
    }

    #[test]
    fn test_reference_evaluator_sanity() {
        assert_eq!(reference_eval("2+3*4"), 14);
        assert_eq!(reference_eval("100/10/5"), 2);
    }
}
