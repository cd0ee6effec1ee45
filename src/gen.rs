//! Random expression generation for the client role.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const OPERATORS: [char; 4] = ['+', '-', '*', '/'];

/// Generates flat arithmetic expressions with operands in `1..=100`.
///
/// Operands are never zero, and the right-hand side of every `/` in the
/// evaluator's collapse pass is always an original operand, so generated
/// expressions cannot divide by zero.
pub struct ExprGenerator {
    rng: StdRng,
}

impl ExprGenerator {
    /// Seeded generators replay the same expression stream; without a seed
    /// the OS supplies entropy.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self { rng }
    }

    /// One expression with `operands` operands.
    pub fn expression(&mut self, operands: usize) -> String {
        let mut out = String::new();
        for i in 0..operands {
            let num: i64 = self.rng.random_range(1..=100);
            out.push_str(&num.to_string());
            if i + 1 < operands {
                out.push(OPERATORS[self.rng.random_range(0..OPERATORS.len())]);
            }
        }
        out
    }

    /// A batch of `1..=max_exprs` expressions joined by single spaces,
    /// forming one connection's request.
    pub fn batch(&mut self, operands: usize, max_exprs: usize) -> String {
        let count = self.rng.random_range(1..=max_exprs.max(1));
        let exprs: Vec<String> = (0..count).map(|_| self.expression(operands)).collect();
        exprs.join(" ")
    }
}
