//! Arithmetic problem generation, parameterized by difficulty.
//!
//! | difficulty | operand max | operators      |
//! |------------|-------------|----------------|
//! | easy       | 10          | + -            |
//! | medium     | 20          | + - ×          |
//! | hard       | 100         | + - × ÷        |
//!
//! Division is built backwards (divisor and quotient in 1..=10) so the
//! expected answer is always a whole number.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;

use crate::domain::Difficulty;

/// Tolerance when comparing a submitted answer to the expected one.
pub const ANSWER_EPSILON: f64 = 0.001;

const DIVISION_MAX: u32 = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
}

impl Operator {
    pub fn symbol(self) -> char {
        match self {
            Operator::Add => '+',
            Operator::Sub => '-',
            Operator::Mul => '×',
            Operator::Div => '÷',
        }
    }

    fn apply(self, a: u32, b: u32) -> f64 {
        let (a, b) = (a as f64, b as f64);
        match self {
            Operator::Add => a + b,
            Operator::Sub => a - b,
            Operator::Mul => a * b,
            Operator::Div => a / b,
        }
    }
}

/// Operand ceiling and allowed operators for a difficulty.
pub fn parameters(difficulty: Difficulty) -> (u32, &'static [Operator]) {
    match difficulty {
        Difficulty::Easy => (10, &[Operator::Add, Operator::Sub]),
        Difficulty::Medium => (20, &[Operator::Add, Operator::Sub, Operator::Mul]),
        Difficulty::Hard => (100, &[Operator::Add, Operator::Sub, Operator::Mul, Operator::Div]),
    }
}

/// One question. Immutable: a new one is generated after every correct answer.
#[derive(Clone, Debug, PartialEq)]
pub struct Problem {
    a: u32,
    op: Operator,
    b: u32,
    expected_answer: f64,
}

impl Problem {
    pub fn generate<R: Rng + ?Sized>(difficulty: Difficulty, rng: &mut R) -> Self {
        let (max, ops) = parameters(difficulty);
        let op = *ops.choose(rng).unwrap_or(&Operator::Add);
        let (a, b) = match op {
            Operator::Div => {
                let b = rng.gen_range(1..=DIVISION_MAX);
                let k = rng.gen_range(1..=DIVISION_MAX);
                (b * k, b)
            }
            _ => (rng.gen_range(1..=max), rng.gen_range(1..=max)),
        };
        Self::from_parts(a, op, b)
    }

    fn from_parts(a: u32, op: Operator, b: u32) -> Self {
        Self {
            a,
            op,
            b,
            expected_answer: op.apply(a, b),
        }
    }

    /// Rendered as "a op b = ?".
    pub fn question(&self) -> String {
        format!("{} {} {} = ?", self.a, self.op.symbol(), self.b)
    }

    pub fn expected_answer(&self) -> f64 {
        self.expected_answer
    }

    #[cfg(test)]
    pub fn operands(&self) -> (u32, u32) {
        (self.a, self.b)
    }

    #[cfg(test)]
    pub fn operator(&self) -> Operator {
        self.op
    }

    pub fn is_correct(&self, value: f64) -> bool {
        (value - self.expected_answer).abs() < ANSWER_EPSILON
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn easy_problems_stay_in_range() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..500 {
            let p = Problem::generate(Difficulty::Easy, &mut rng);
            let (a, b) = p.operands();
            assert!((1..=10).contains(&a) && (1..=10).contains(&b), "{}", p.question());
            assert!(matches!(p.operator(), Operator::Add | Operator::Sub));
        }
    }

    #[test]
    fn medium_never_divides() {
        let mut rng = StdRng::seed_from_u64(2);
        for _ in 0..500 {
            let p = Problem::generate(Difficulty::Medium, &mut rng);
            let (a, b) = p.operands();
            assert_ne!(p.operator(), Operator::Div);
            assert!(a <= 20 && b <= 20);
        }
    }

    #[test]
    fn hard_division_is_integral_and_positive() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut seen_div = 0;
        for _ in 0..2000 {
            let p = Problem::generate(Difficulty::Hard, &mut rng);
            if p.operator() == Operator::Div {
                seen_div += 1;
                let q = p.expected_answer();
                assert_eq!(q.fract(), 0.0, "{}", p.question());
                assert!(q >= 1.0 && q <= 10.0);
                assert!(p.operands().1 <= 10);
            }
        }
        assert!(seen_div > 0);
    }

    #[test]
    fn question_format_and_grading() {
        let p = Problem::from_parts(12, Operator::Mul, 3);
        assert_eq!(p.question(), "12 × 3 = ?");
        assert!(p.is_correct(36.0));
        assert!(p.is_correct(36.0005));
        assert!(!p.is_correct(36.01));
        assert!(Problem::from_parts(3, Operator::Sub, 9).is_correct(-6.0));
    }
}
