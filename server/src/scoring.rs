//! Round scoring.
//!
//! Scoring is an extension point: the coordinator asks a [`ScoringPolicy`]
//! for the points of every recorded guess when a round is revealed.
//! [`StandardScoring`] awards points for correct attributions, with a larger
//! bonus for unmasking the house decoy.

use std::fmt;

use crate::types::{Author, PlayerId};

/// Points for correctly naming a member as the author of their message.
pub const DEFAULT_CORRECT_POINTS: i64 = 2;

/// Points for correctly identifying the house decoy.
pub const DEFAULT_HOUSE_POINTS: i64 = 5;

/// Everything a policy may consider when scoring one guess.
#[derive(Debug, Clone, Copy)]
pub struct GuessContext<'a> {
    pub guesser: &'a PlayerId,
    pub actual: &'a Author,
    pub guessed: &'a Author,
    pub correct: bool,
}

/// Computes the points awarded for a guess at reveal time.
pub trait ScoringPolicy: Send + Sync + fmt::Debug {
    /// Points for the guess described by `ctx`. Forfeited guesses are never
    /// passed to the policy and always score zero.
    fn points(&self, ctx: &GuessContext<'_>) -> i64;
}

/// Fixed points for correct guesses, zero otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StandardScoring {
    pub correct_points: i64,
    pub house_points: i64,
}

impl Default for StandardScoring {
    fn default() -> Self {
        Self {
            correct_points: DEFAULT_CORRECT_POINTS,
            house_points: DEFAULT_HOUSE_POINTS,
        }
    }
}

impl ScoringPolicy for StandardScoring {
    fn points(&self, ctx: &GuessContext<'_>) -> i64 {
        match (ctx.correct, ctx.actual) {
            (false, _) => 0,
            (true, Author::House) => self.house_points,
            (true, Author::Member(_)) => self.correct_points,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score(actual: &Author, guessed: &Author) -> i64 {
        let guesser = PlayerId::from("guesser");
        StandardScoring::default().points(&GuessContext {
            guesser: &guesser,
            actual,
            guessed,
            correct: actual == guessed,
        })
    }

    #[test]
    fn correct_member_guess_scores_default_points() {
        let author = Author::Member(PlayerId::from("alice"));
        assert_eq!(score(&author, &author), DEFAULT_CORRECT_POINTS);
    }

    #[test]
    fn wrong_guess_scores_nothing() {
        let actual = Author::Member(PlayerId::from("alice"));
        let guessed = Author::Member(PlayerId::from("bob"));
        assert_eq!(score(&actual, &guessed), 0);
    }

    #[test]
    fn catching_the_house_scores_bonus() {
        assert_eq!(score(&Author::House, &Author::House), DEFAULT_HOUSE_POINTS);
    }

    #[test]
    fn blaming_the_house_for_a_member_message_scores_nothing() {
        let actual = Author::Member(PlayerId::from("alice"));
        assert_eq!(score(&actual, &Author::House), 0);
    }
}
