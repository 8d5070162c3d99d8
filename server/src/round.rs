//! A single round: message collection, guessing and reveal.
//!
//! The participant set is fixed when the round is created. A participant is
//! done collecting once they have submitted their quota or forfeited, and
//! done guessing once they have guessed or forfeited. Participants whose
//! only candidate messages are their own are exempt from guessing.
//!
//! Every author, the house included, gets a fresh alias per round. Messages
//! are presented under their author's alias; which member holds which alias
//! stays inside the round until reveal.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::scoring::{GuessContext, ScoringPolicy};
use crate::types::{
    AnonymousMessage, Author, GuessResult, MessageId, PlayerId, RevealedMessage, HOUSE_DISPLAY_NAME,
};

/// Names aliases are drawn from. Rounds with more authors than names reuse
/// them with a numeric suffix.
pub const ALIAS_NAMES: [&str; 16] = [
    "Amber Fox",
    "Blue Heron",
    "Copper Owl",
    "Dusty Moth",
    "Emerald Newt",
    "Frosty Hare",
    "Golden Lynx",
    "Hazel Wren",
    "Indigo Crab",
    "Jade Gecko",
    "Lilac Otter",
    "Misty Raven",
    "Olive Badger",
    "Pearl Swan",
    "Rusty Stoat",
    "Silver Eel",
];

/// A submitted message. The author stays inside the round until reveal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub author: Author,
    pub content: String,
    pub submitted_at: DateTime<Utc>,
}

/// A guess as recorded; correctness is only computed at reveal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Guess {
    pub guesser: PlayerId,
    pub message_id: MessageId,
    pub guessed_author: Author,
    pub guessed_at: DateTime<Utc>,
}

/// Scored outcome of a round, before it is merged into member totals.
#[derive(Debug, Clone)]
pub(crate) struct RoundOutcome {
    pub messages: Vec<RevealedMessage>,
    pub guesses: Vec<GuessResult>,
    pub deltas: BTreeMap<PlayerId, i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Round {
    number: u32,
    participants: Vec<PlayerId>,
    /// Submission order.
    messages: Vec<Message>,
    /// Presentation order as indices into `messages`; empty until guessing opens.
    order: Vec<usize>,
    guesses: Vec<Guess>,
    forfeited_submissions: BTreeSet<PlayerId>,
    forfeited_guesses: BTreeSet<PlayerId>,
    /// Fixed when guessing opens.
    required_guessers: BTreeSet<PlayerId>,
    guessing_open: bool,
    #[serde(default)]
    aliases: BTreeMap<PlayerId, String>,
    #[serde(default)]
    house_alias: String,
}

impl Round {
    pub(crate) fn new(number: u32, participants: Vec<PlayerId>) -> Self {
        let mut rng = StdRng::from_rng(&mut rand::rng());
        let mut pool = draw_aliases(participants.len() + 1, &mut rng);
        let house_alias = pool.pop().unwrap_or_default();
        let aliases = participants.iter().cloned().zip(pool).collect();

        Self {
            number,
            participants,
            messages: Vec::new(),
            order: Vec::new(),
            guesses: Vec::new(),
            forfeited_submissions: BTreeSet::new(),
            forfeited_guesses: BTreeSet::new(),
            required_guessers: BTreeSet::new(),
            guessing_open: false,
            aliases,
            house_alias,
        }
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn participants(&self) -> &[PlayerId] {
        &self.participants
    }

    /// The alias `author` goes by this round. Non-participants have none.
    pub fn alias_of(&self, author: &Author) -> Option<&str> {
        match author {
            Author::Member(id) => self.aliases.get(id).map(String::as_str),
            Author::House => Some(self.house_alias.as_str()),
        }
    }

    fn alias_or_default(&self, author: &Author) -> String {
        self.alias_of(author).unwrap_or_default().to_string()
    }

    pub fn is_participant(&self, player_id: &PlayerId) -> bool {
        self.participants.contains(player_id)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn guesses(&self) -> &[Guess] {
        &self.guesses
    }

    pub fn message(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    pub fn submissions_by(&self, player_id: &PlayerId) -> usize {
        self.messages
            .iter()
            .filter(|m| m.author.member() == Some(player_id))
            .count()
    }

    pub fn messages_by(&self, player_id: &PlayerId) -> Vec<MessageId> {
        self.messages
            .iter()
            .filter(|m| m.author.member() == Some(player_id))
            .map(|m| m.id)
            .collect()
    }

    pub fn has_house_message(&self) -> bool {
        self.messages.iter().any(|m| m.author.is_house())
    }

    pub fn has_forfeited_submission(&self, player_id: &PlayerId) -> bool {
        self.forfeited_submissions.contains(player_id)
    }

    pub fn has_forfeited_guess(&self, player_id: &PlayerId) -> bool {
        self.forfeited_guesses.contains(player_id)
    }

    pub fn has_guessed(&self, player_id: &PlayerId) -> bool {
        self.guesses.iter().any(|g| &g.guesser == player_id)
    }

    fn submission_done(&self, player_id: &PlayerId, quota: usize) -> bool {
        self.forfeited_submissions.contains(player_id) || self.submissions_by(player_id) >= quota
    }

    /// Participants who finished submitting without forfeiting, and the
    /// number of participants still expected to do so.
    pub fn submission_progress(&self, quota: usize) -> (usize, usize) {
        let required = self
            .participants
            .iter()
            .filter(|p| !self.forfeited_submissions.contains(*p))
            .count();
        let submitted = self
            .participants
            .iter()
            .filter(|p| {
                !self.forfeited_submissions.contains(*p) && self.submissions_by(p) >= quota
            })
            .count();
        (submitted, required)
    }

    pub fn submission_complete(&self, quota: usize) -> bool {
        self.participants
            .iter()
            .all(|p| self.submission_done(p, quota))
    }

    /// Guesses received, and the number of guesses still expected in total.
    pub fn guess_progress(&self) -> (usize, usize) {
        let required = self
            .required_guessers
            .iter()
            .filter(|p| !self.forfeited_guesses.contains(*p))
            .count();
        (self.guesses.len(), required)
    }

    pub fn guessing_complete(&self) -> bool {
        self.required_guessers
            .iter()
            .all(|p| self.forfeited_guesses.contains(p) || self.has_guessed(p))
    }

    pub(crate) fn add_message(
        &mut self,
        author: Author,
        content: String,
        now: DateTime<Utc>,
    ) -> MessageId {
        let id = MessageId::new();
        self.messages.push(Message {
            id,
            author,
            content,
            submitted_at: now,
        });
        id
    }

    pub(crate) fn add_guess(
        &mut self,
        guesser: PlayerId,
        message_id: MessageId,
        guessed_author: Author,
        now: DateTime<Utc>,
    ) {
        self.guesses.push(Guess {
            guesser,
            message_id,
            guessed_author,
            guessed_at: now,
        });
    }

    /// Closes collection: draws a fresh permutation from a generator seeded
    /// for this round only, and fixes the set of required guessers.
    pub(crate) fn open_guessing(&mut self) -> Vec<AnonymousMessage> {
        let mut rng = StdRng::from_rng(&mut rand::rng());
        let mut order: Vec<usize> = (0..self.messages.len()).collect();
        order.shuffle(&mut rng);
        self.order = order;
        self.guessing_open = true;

        self.required_guessers = self
            .participants
            .iter()
            .filter(|p| !self.forfeited_guesses.contains(*p))
            .filter(|p| self.messages.iter().any(|m| m.author.member() != Some(*p)))
            .cloned()
            .collect();

        self.anonymized()
    }

    /// Messages in presentation order, without authors.
    pub fn anonymized(&self) -> Vec<AnonymousMessage> {
        self.order
            .iter()
            .enumerate()
            .filter_map(|(position, &index)| {
                self.messages.get(index).map(|m| AnonymousMessage {
                    message_id: m.id,
                    position,
                    alias: self.alias_or_default(&m.author),
                    content: m.content.clone(),
                })
            })
            .collect()
    }

    /// Forfeits every outstanding obligation of `player_id` for this round.
    ///
    /// Returns `true` if anything was outstanding.
    pub(crate) fn forfeit_all(&mut self, player_id: &PlayerId, quota: usize) -> bool {
        if !self.is_participant(player_id) {
            return false;
        }
        if self.guessing_open {
            if self.required_guessers.contains(player_id) && !self.has_guessed(player_id) {
                return self.forfeited_guesses.insert(player_id.clone());
            }
            return false;
        }
        let mut forfeited = false;
        if !self.submission_done(player_id, quota) {
            forfeited |= self.forfeited_submissions.insert(player_id.clone());
        }
        forfeited |= self.forfeited_guesses.insert(player_id.clone());
        forfeited
    }

    /// Forfeits every outstanding submission. Returns the number forfeited.
    pub(crate) fn forfeit_pending_submissions(&mut self, quota: usize) -> usize {
        let pending: Vec<PlayerId> = self
            .participants
            .iter()
            .filter(|p| !self.submission_done(p, quota))
            .cloned()
            .collect();
        let count = pending.len();
        self.forfeited_submissions.extend(pending);
        count
    }

    /// Forfeits every outstanding guess. Returns the number forfeited.
    pub(crate) fn forfeit_pending_guesses(&mut self) -> usize {
        let pending: Vec<PlayerId> = self
            .required_guessers
            .iter()
            .filter(|p| !self.forfeited_guesses.contains(*p) && !self.has_guessed(p))
            .cloned()
            .collect();
        let count = pending.len();
        self.forfeited_guesses.extend(pending);
        count
    }

    /// Attributes every message and scores every guess.
    pub(crate) fn score(
        &self,
        policy: &dyn ScoringPolicy,
        names: &HashMap<PlayerId, String>,
    ) -> RoundOutcome {
        let messages = self
            .order
            .iter()
            .enumerate()
            .filter_map(|(position, &index)| self.messages.get(index).map(|m| (position, m)))
            .map(|(position, m)| RevealedMessage {
                message_id: m.id,
                position,
                content: m.content.clone(),
                author_name: match &m.author {
                    Author::Member(id) => names
                        .get(id)
                        .cloned()
                        .unwrap_or_else(|| id.to_string()),
                    Author::House => HOUSE_DISPLAY_NAME.to_string(),
                },
                author_alias: self.alias_or_default(&m.author),
                author: m.author.clone(),
                submitted_at: m.submitted_at,
            })
            .collect();

        let mut deltas: BTreeMap<PlayerId, i64> = self
            .participants
            .iter()
            .map(|p| (p.clone(), 0))
            .collect();
        let mut guesses = Vec::new();

        for participant in &self.participants {
            if let Some(guess) = self.guesses.iter().find(|g| &g.guesser == participant) {
                let actual = self.message(&guess.message_id).map(|m| &m.author);
                let (correct, points) = match actual {
                    Some(actual) => {
                        let correct = actual == &guess.guessed_author;
                        let points = policy.points(&GuessContext {
                            guesser: participant,
                            actual,
                            guessed: &guess.guessed_author,
                            correct,
                        });
                        (correct, points)
                    }
                    None => (false, 0),
                };
                *deltas.entry(participant.clone()).or_insert(0) += points;
                guesses.push(GuessResult {
                    guesser: participant.clone(),
                    message_id: Some(guess.message_id),
                    guessed_author: Some(guess.guessed_author.clone()),
                    correct,
                    forfeited: false,
                    points,
                });
            } else if self.forfeited_guesses.contains(participant) {
                guesses.push(GuessResult {
                    guesser: participant.clone(),
                    message_id: None,
                    guessed_author: None,
                    correct: false,
                    forfeited: true,
                    points: 0,
                });
            }
        }

        RoundOutcome {
            messages,
            guesses,
            deltas,
        }
    }
}

/// `count` distinct aliases in random order.
fn draw_aliases(count: usize, rng: &mut impl Rng) -> Vec<String> {
    let mut pool: Vec<String> = (0..count)
        .map(|i| {
            let name = ALIAS_NAMES[i % ALIAS_NAMES.len()];
            match i / ALIAS_NAMES.len() {
                0 => name.to_string(),
                lap => format!("{name} {}", lap + 1),
            }
        })
        .collect();
    pool.shuffle(rng);
    pool
}
