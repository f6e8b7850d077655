//! Challenge state machine: the dismissal session opened when an alarm fires.
//!
//! ```text
//!                 correct (solved < required)
//!               ┌────────────────────────────┐
//!               ▼                            │
//!  start ──► AwaitingAnswer ─────────────────┘
//!               │   ▲
//!     incorrect │   │ (same problem, no count change)
//!               └───┘
//!               │
//!               │ correct (solved == required)
//!               ▼
//!            Complete
//! ```

use rand::Rng;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::{AlarmId, Difficulty};
use crate::problem::Problem;
use crate::util::parse_answer;

/// Problems to solve before an alarm is dismissed.
pub const REQUIRED_SOLVES: u32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeState {
    AwaitingAnswer,
    Complete,
}

/// Result of grading one answer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerOutcome {
    /// Counted; a fresh problem is now current.
    Correct,
    /// Not counted; the same problem stays current.
    Wrong,
    /// The last required problem was solved.
    Complete,
}

#[derive(Debug)]
pub struct Challenge {
    alarm_id: AlarmId,
    session_id: Uuid,
    difficulty: Difficulty,
    solved_count: u32,
    required_count: u32,
    current_problem: Option<Problem>,
    state: ChallengeState,
}

/// What clients get to see of a challenge. The expected answer stays server-side.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeView {
    pub alarm_id: AlarmId,
    pub session_id: Uuid,
    pub difficulty: Difficulty,
    pub question: Option<String>,
    pub solved_count: u32,
    pub required_count: u32,
    pub state: ChallengeState,
}

impl Challenge {
    /// Open a session and generate its first problem.
    pub fn start<R: Rng + ?Sized>(
        alarm_id: AlarmId,
        difficulty: Difficulty,
        required_count: u32,
        rng: &mut R,
    ) -> Self {
        let mut challenge = Self {
            alarm_id,
            session_id: Uuid::new_v4(),
            difficulty,
            solved_count: 0,
            required_count: required_count.max(1),
            current_problem: None,
            state: ChallengeState::AwaitingAnswer,
        };
        challenge.current_problem = Some(Problem::generate(difficulty, rng));
        challenge
    }

    #[cfg(test)]
    pub fn solved_count(&self) -> u32 {
        self.solved_count
    }

    #[cfg(test)]
    pub fn required_count(&self) -> u32 {
        self.required_count
    }

    #[cfg(test)]
    pub fn state(&self) -> ChallengeState {
        self.state
    }

    #[cfg(test)]
    pub fn current_problem(&self) -> Option<&Problem> {
        self.current_problem.as_ref()
    }

    /// Grade a raw answer as typed by the user. Non-numeric input is a wrong answer.
    pub fn submit_answer<R: Rng + ?Sized>(&mut self, raw: &str, rng: &mut R) -> AnswerOutcome {
        match parse_answer(raw) {
            Some(value) => self.submit_value(value, rng),
            None => AnswerOutcome::Wrong,
        }
    }

    pub fn submit_value<R: Rng + ?Sized>(&mut self, value: f64, rng: &mut R) -> AnswerOutcome {
        if self.state == ChallengeState::Complete {
            return AnswerOutcome::Complete;
        }
        let correct = self
            .current_problem
            .as_ref()
            .map(|p| p.is_correct(value))
            .unwrap_or(false);
        if !correct {
            return AnswerOutcome::Wrong;
        }

        self.solved_count += 1;
        if self.solved_count >= self.required_count {
            self.state = ChallengeState::Complete;
            self.current_problem = None;
            return AnswerOutcome::Complete;
        }
        self.current_problem = Some(Problem::generate(self.difficulty, rng));
        AnswerOutcome::Correct
    }

    pub fn view(&self) -> ChallengeView {
        ChallengeView {
            alarm_id: self.alarm_id,
            session_id: self.session_id,
            difficulty: self.difficulty,
            question: self.current_problem.as_ref().map(|p| p.question()),
            solved_count: self.solved_count,
            required_count: self.required_count,
            state: self.state,
        }
    }
}
