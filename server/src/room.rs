//! Authoritative state of one room.
//!
//! A [`Room`] owns its members, its current [`Round`] and the archive of
//! revealed rounds. Every mutating method validates first and mutates
//! second, so a rejected operation leaves the room untouched. Accepted
//! operations return the event payloads they produced; the coordinator
//! stamps them with sequence numbers and publishes them once the room lock
//! has been released.
//!
//! # Phases
//!
//! ```text
//! Lobby -> Collecting -> Guessing -> Revealed -> (Collecting | Closed)
//! ```
//!
//! Collecting and Guessing advance automatically once every participant has
//! acted or forfeited. Everything else is an explicit host action.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::GameError;
use crate::round::Round;
use crate::scoring::ScoringPolicy;
use crate::types::{
    Author, ConnectionStatus, EventPayload, Identity, MemberView, MessageId, Phase, PlayerId,
    RoomConfig, RoomEvent, RoomId, RoomView, RoundSummary, RoundView, ScoreDelta, Standing,
};

/// Value of an accepted operation plus the events it emitted.
#[derive(Debug)]
pub(crate) struct Outcome<T> {
    pub value: T,
    pub events: Vec<EventPayload>,
}

impl<T> Outcome<T> {
    fn new(value: T, events: Vec<EventPayload>) -> Self {
        Self { value, events }
    }
}

/// A room member. The alias a member plays under is drawn per round and
/// kept by the round, see [`Room::alias_of`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub player_id: PlayerId,
    pub display_name: String,
    pub status: ConnectionStatus,
    pub score: i64,
    pub is_ready: bool,
    pub joined_at: DateTime<Utc>,
}

/// A room and everything it owns. Serializable as a persistence snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    id: RoomId,
    config: RoomConfig,
    created_at: DateTime<Utc>,
    /// Join order; player ids are unique.
    members: Vec<Member>,
    host: Option<PlayerId>,
    phase: Phase,
    round_number: u32,
    current: Option<Round>,
    history: Vec<RoundSummary>,
    empty_since: Option<DateTime<Utc>>,
    next_sequence: u64,
    revision: u64,
}

impl Room {
    /// Creates an empty room in the lobby.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::InvalidConfig`] if `config` fails validation.
    pub fn new(id: RoomId, config: RoomConfig, now: DateTime<Utc>) -> Result<Self, GameError> {
        config.validate()?;
        Ok(Self {
            id,
            config,
            created_at: now,
            members: Vec::new(),
            host: None,
            phase: Phase::Lobby,
            round_number: 0,
            current: None,
            history: Vec::new(),
            empty_since: Some(now),
            next_sequence: 0,
            revision: 0,
        })
    }

    pub fn id(&self) -> RoomId {
        self.id
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn round_number(&self) -> u32 {
        self.round_number
    }

    pub fn host(&self) -> Option<&PlayerId> {
        self.host.as_ref()
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn member(&self, player_id: &PlayerId) -> Option<&Member> {
        self.members.iter().find(|m| &m.player_id == player_id)
    }

    pub fn current_round(&self) -> Option<&Round> {
        self.current.as_ref()
    }

    /// The alias `player_id` goes by in the current round.
    pub fn alias_of(&self, player_id: &PlayerId) -> Option<&str> {
        self.current
            .as_ref()
            .and_then(|round| round.alias_of(&Author::Member(player_id.clone())))
    }

    /// Summaries of every revealed round, oldest first.
    pub fn history(&self) -> &[RoundSummary] {
        &self.history
    }

    pub fn empty_since(&self) -> Option<DateTime<Utc>> {
        self.empty_since
    }

    /// Monotonic counter bumped by every accepted mutation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn connected_count(&self) -> usize {
        self.members
            .iter()
            .filter(|m| m.status == ConnectionStatus::Connected)
            .count()
    }

    /// Members ordered by score, highest first; ties keep join order.
    pub fn standings(&self) -> Vec<Standing> {
        let mut standings: Vec<Standing> = self
            .members
            .iter()
            .map(|m| Standing {
                player_id: m.player_id.clone(),
                display_name: m.display_name.clone(),
                score: m.score,
            })
            .collect();
        standings.sort_by(|a, b| b.score.cmp(&a.score));
        standings
    }

    /// Returns `true` once the room has had no connected member for `timeout`.
    pub fn is_abandoned(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        if self.phase == Phase::Closed {
            return false;
        }
        let Some(since) = self.empty_since else {
            return false;
        };
        TimeDelta::from_std(timeout)
            .map(|limit| now.signed_duration_since(since) >= limit)
            .unwrap_or(false)
    }

    /// Read-only view for `viewer`. Authors stay hidden until reveal.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::NotMember`] if `viewer` is not a member.
    pub fn view(&self, viewer: &PlayerId) -> Result<RoomView, GameError> {
        self.require_member(viewer)?;
        let quota = self.config.messages_per_member;

        let current = self.current.as_ref().map(|round| {
            let (submitted, required_submissions) = round.submission_progress(quota);
            let (guesses, required_guesses) = round.guess_progress();
            let messages = match self.phase {
                Phase::Guessing | Phase::Revealed => round.anonymized(),
                _ => Vec::new(),
            };
            let summary = match self.phase {
                Phase::Revealed => self
                    .history
                    .iter()
                    .rev()
                    .find(|s| s.round == round.number())
                    .cloned(),
                _ => None,
            };
            RoundView {
                round: round.number(),
                participants: round.participants().to_vec(),
                submitted,
                required_submissions,
                guesses,
                required_guesses,
                messages,
                own_messages: round.messages_by(viewer),
                own_alias: round
                    .alias_of(&Author::Member(viewer.clone()))
                    .map(str::to_string),
                has_guessed: round.has_guessed(viewer),
                forfeited: round.has_forfeited_submission(viewer)
                    || round.has_forfeited_guess(viewer),
                summary,
            }
        });

        Ok(RoomView {
            room_id: self.id,
            phase: self.phase,
            round: self.round_number,
            rounds_total: self.config.rounds,
            host: self.host.clone(),
            members: self.members.iter().map(|m| self.member_view(m)).collect(),
            current,
        })
    }

    /// Stamps payloads with this room's next sequence numbers.
    pub(crate) fn seal(&mut self, payloads: Vec<EventPayload>, now: DateTime<Utc>) -> Vec<RoomEvent> {
        payloads
            .into_iter()
            .map(|payload| {
                let sequence = self.next_sequence;
                self.next_sequence += 1;
                RoomEvent {
                    room_id: self.id,
                    sequence,
                    timestamp: now,
                    payload,
                }
            })
            .collect()
    }

    pub(crate) fn join(
        &mut self,
        identity: Identity,
        now: DateTime<Utc>,
    ) -> Result<Outcome<MemberView>, GameError> {
        self.ensure_open("join_room")?;

        if let Some(index) = self.member_index(&identity.player_id) {
            if self.members[index].status == ConnectionStatus::Connected {
                return Err(GameError::AlreadyJoined(identity.player_id));
            }
            let member = &mut self.members[index];
            member.status = ConnectionStatus::Connected;
            member.display_name = identity.display_name;
            self.on_connected(&identity.player_id);

            let view = self.member_view(&self.members[index]);
            return Ok(Outcome::new(
                view.clone(),
                vec![EventPayload::MemberJoined {
                    member: view,
                    reconnected: true,
                }],
            ));
        }

        if self.members.len() >= self.config.max_players {
            return Err(GameError::RoomFull {
                max_players: self.config.max_players,
            });
        }

        self.members.push(Member {
            player_id: identity.player_id.clone(),
            display_name: identity.display_name,
            status: ConnectionStatus::Connected,
            score: 0,
            is_ready: false,
            joined_at: now,
        });
        self.on_connected(&identity.player_id);

        let view = self.member_view(&self.members[self.members.len() - 1]);
        Ok(Outcome::new(
            view.clone(),
            vec![EventPayload::MemberJoined {
                member: view,
                reconnected: false,
            }],
        ))
    }

    pub(crate) fn leave(
        &mut self,
        player_id: &PlayerId,
        policy: &dyn ScoringPolicy,
        now: DateTime<Utc>,
    ) -> Result<Outcome<()>, GameError> {
        self.ensure_open("leave_room")?;
        let index = self
            .member_index(player_id)
            .ok_or_else(|| GameError::NotMember(player_id.clone()))?;
        if self.members[index].status == ConnectionStatus::Disconnected {
            return Err(GameError::AlreadyLeft(player_id.clone()));
        }

        let quota = self.config.messages_per_member;
        let (forfeited, removed) = if self.phase.is_round_active() {
            let forfeited = self
                .current
                .as_mut()
                .is_some_and(|round| round.forfeit_all(player_id, quota));
            let member = &mut self.members[index];
            member.status = ConnectionStatus::Disconnected;
            member.is_ready = false;
            (forfeited, false)
        } else {
            self.members.remove(index);
            (false, true)
        };

        let new_host = if self.host.as_ref() == Some(player_id) {
            self.host = self
                .members
                .iter()
                .find(|m| m.status == ConnectionStatus::Connected)
                .map(|m| m.player_id.clone());
            self.host.clone()
        } else {
            None
        };

        if self.connected_count() == 0 {
            self.empty_since = Some(now);
        }
        self.touch();

        let mut events = vec![EventPayload::MemberLeft {
            player_id: player_id.clone(),
            forfeited,
            removed,
            new_host,
        }];
        events.extend(self.advance(policy));
        Ok(Outcome::new((), events))
    }

    pub(crate) fn set_ready(
        &mut self,
        player_id: &PlayerId,
        ready: bool,
    ) -> Result<Outcome<()>, GameError> {
        self.ensure_open("set_ready")?;
        if !matches!(self.phase, Phase::Lobby | Phase::Revealed) {
            return Err(GameError::phase("set_ready", self.phase));
        }
        let index = self
            .member_index(player_id)
            .ok_or_else(|| GameError::NotMember(player_id.clone()))?;
        if self.members[index].status == ConnectionStatus::Disconnected {
            return Err(GameError::AlreadyLeft(player_id.clone()));
        }

        self.members[index].is_ready = ready;
        self.touch();
        Ok(Outcome::new(
            (),
            vec![EventPayload::ReadyChanged {
                player_id: player_id.clone(),
                ready,
            }],
        ))
    }

    pub(crate) fn start_round(&mut self, caller: &PlayerId) -> Result<Outcome<u32>, GameError> {
        self.ensure_open("start_round")?;
        if !matches!(self.phase, Phase::Lobby | Phase::Revealed) {
            return Err(GameError::phase("start_round", self.phase));
        }
        self.require_host(caller, "start a round")?;
        if self.round_number >= self.config.rounds {
            return Err(GameError::GameOver {
                rounds: self.config.rounds,
            });
        }
        let connected = self.connected_count();
        if connected < self.config.min_players {
            return Err(GameError::InsufficientPlayers {
                required: self.config.min_players,
                connected,
            });
        }
        if self.config.require_ready {
            let waiting = self
                .members
                .iter()
                .filter(|m| m.status == ConnectionStatus::Connected && !m.is_ready)
                .count();
            if waiting > 0 {
                return Err(GameError::PlayersNotReady { waiting });
            }
        }

        self.members
            .retain(|m| m.status == ConnectionStatus::Connected);
        for member in &mut self.members {
            member.is_ready = false;
        }
        let participants: Vec<PlayerId> = self.members.iter().map(|m| m.player_id.clone()).collect();

        self.round_number += 1;
        self.current = Some(Round::new(self.round_number, participants.clone()));
        self.phase = Phase::Collecting;
        self.touch();

        debug!(
            room_id = %self.id,
            round = self.round_number,
            participants = participants.len(),
            "Round started"
        );

        Ok(Outcome::new(
            self.round_number,
            vec![EventPayload::RoundStarted {
                round: self.round_number,
                participants,
            }],
        ))
    }

    pub(crate) fn submit_message(
        &mut self,
        player_id: &PlayerId,
        content: String,
        policy: &dyn ScoringPolicy,
        now: DateTime<Utc>,
    ) -> Result<Outcome<MessageId>, GameError> {
        const OPERATION: &str = "submit_message";
        self.ensure_open(OPERATION)?;
        if self.phase != Phase::Collecting {
            return Err(GameError::phase(OPERATION, self.phase));
        }
        self.require_member(player_id)?;
        let quota = self.config.messages_per_member;
        let round = self.round(OPERATION)?;
        if !round.is_participant(player_id) {
            return Err(GameError::NotParticipant(player_id.clone()));
        }
        if round.has_forfeited_submission(player_id) {
            return Err(GameError::Forfeited(player_id.clone()));
        }
        if round.submissions_by(player_id) >= quota {
            return Err(GameError::DuplicateSubmission);
        }
        validate_content(&content, self.config.max_message_len)?;

        let round = self.round_mut(OPERATION)?;
        let message_id = round.add_message(Author::Member(player_id.clone()), content, now);
        let (submitted, required) = round.submission_progress(quota);
        let number = round.number();
        self.touch();

        let mut events = vec![EventPayload::SubmissionReceived {
            round: number,
            submitted,
            required,
        }];
        events.extend(self.advance(policy));
        Ok(Outcome::new(message_id, events))
    }

    pub(crate) fn inject_decoy(
        &mut self,
        caller: &PlayerId,
        content: String,
        now: DateTime<Utc>,
    ) -> Result<Outcome<MessageId>, GameError> {
        const OPERATION: &str = "inject_decoy";
        self.ensure_open(OPERATION)?;
        if self.phase != Phase::Collecting {
            return Err(GameError::phase(OPERATION, self.phase));
        }
        self.require_host(caller, "inject a decoy")?;
        if self.round(OPERATION)?.has_house_message() {
            return Err(GameError::DuplicateSubmission);
        }
        validate_content(&content, self.config.max_message_len)?;

        let message_id = self
            .round_mut(OPERATION)?
            .add_message(Author::House, content, now);
        self.touch();
        Ok(Outcome::new(message_id, Vec::new()))
    }

    pub(crate) fn submit_guess(
        &mut self,
        player_id: &PlayerId,
        message_id: MessageId,
        guessed_author: Author,
        policy: &dyn ScoringPolicy,
        now: DateTime<Utc>,
    ) -> Result<Outcome<()>, GameError> {
        const OPERATION: &str = "submit_guess";
        self.ensure_open(OPERATION)?;
        if self.phase != Phase::Guessing {
            return Err(GameError::phase(OPERATION, self.phase));
        }
        self.require_member(player_id)?;
        let round = self.round(OPERATION)?;
        if !round.is_participant(player_id) {
            return Err(GameError::NotParticipant(player_id.clone()));
        }
        if round.has_forfeited_guess(player_id) {
            return Err(GameError::Forfeited(player_id.clone()));
        }
        if round.has_guessed(player_id) {
            return Err(GameError::DuplicateGuess);
        }
        let message = round
            .message(&message_id)
            .ok_or(GameError::MessageNotFound(message_id))?;
        if message.author.member() == Some(player_id) {
            return Err(GameError::SelfGuessNotAllowed);
        }
        if let Author::Member(suspect) = &guessed_author {
            if !round.is_participant(suspect) {
                return Err(GameError::UnknownAuthor(suspect.clone()));
            }
        }

        let round = self.round_mut(OPERATION)?;
        round.add_guess(player_id.clone(), message_id, guessed_author, now);
        let (guesses, required) = round.guess_progress();
        let number = round.number();
        self.touch();

        let mut events = vec![EventPayload::GuessReceived {
            round: number,
            guesses,
            required,
        }];
        events.extend(self.advance(policy));
        Ok(Outcome::new((), events))
    }

    /// Forfeits every outstanding obligation of the current phase.
    pub(crate) fn forfeit_outstanding(
        &mut self,
        policy: &dyn ScoringPolicy,
    ) -> Result<Outcome<usize>, GameError> {
        const OPERATION: &str = "forfeit_outstanding";
        self.ensure_open(OPERATION)?;
        let quota = self.config.messages_per_member;
        let forfeited = match self.phase {
            Phase::Collecting => self.round_mut(OPERATION)?.forfeit_pending_submissions(quota),
            Phase::Guessing => self.round_mut(OPERATION)?.forfeit_pending_guesses(),
            phase => return Err(GameError::phase(OPERATION, phase)),
        };
        if forfeited > 0 {
            self.touch();
        }
        let events = self.advance(policy);
        Ok(Outcome::new(forfeited, events))
    }

    pub(crate) fn close(&mut self, caller: &PlayerId) -> Result<Outcome<Vec<Standing>>, GameError> {
        self.ensure_open("close_room")?;
        self.require_host(caller, "close the room")?;
        Ok(self.shut())
    }

    /// Closes the room without a host, for the empty-room reaper.
    pub(crate) fn expire(&mut self) -> Result<Outcome<Vec<Standing>>, GameError> {
        self.ensure_open("expire")?;
        Ok(self.shut())
    }

    /// Marks everyone disconnected after a restore. Nothing is forfeited, so
    /// members can reconnect and carry on; the first to return becomes host.
    pub(crate) fn suspend(&mut self, now: DateTime<Utc>) {
        for member in &mut self.members {
            member.status = ConnectionStatus::Disconnected;
            member.is_ready = false;
        }
        self.host = None;
        self.empty_since = Some(now);
        self.touch();
    }

    fn shut(&mut self) -> Outcome<Vec<Standing>> {
        self.phase = Phase::Closed;
        self.touch();
        let standings = self.standings();
        Outcome::new(
            standings.clone(),
            vec![EventPayload::RoomClosed { standings }],
        )
    }

    /// Applies automatic transitions until the room settles.
    fn advance(&mut self, policy: &dyn ScoringPolicy) -> Vec<EventPayload> {
        let mut events = Vec::new();
        let quota = self.config.messages_per_member;

        loop {
            let (collected, guessed) = match &self.current {
                Some(round) => (round.submission_complete(quota), round.guessing_complete()),
                None => break,
            };

            match self.phase {
                Phase::Collecting if collected => {
                    let Some(round) = self.current.as_mut() else {
                        break;
                    };
                    let messages = round.open_guessing();
                    let number = round.number();
                    self.phase = Phase::Guessing;
                    debug!(
                        room_id = %self.id,
                        round = number,
                        messages = messages.len(),
                        "Collecting complete, guessing opened"
                    );
                    events.push(EventPayload::PhaseChanged {
                        round: number,
                        phase: Phase::Guessing,
                        messages,
                    });
                }
                Phase::Guessing if guessed => {
                    if let Some(summary) = self.reveal(policy) {
                        events.push(EventPayload::RoundRevealed { summary });
                    }
                    break;
                }
                _ => break,
            }
        }

        events
    }

    fn reveal(&mut self, policy: &dyn ScoringPolicy) -> Option<RoundSummary> {
        let names: HashMap<PlayerId, String> = self
            .members
            .iter()
            .map(|m| (m.player_id.clone(), m.display_name.clone()))
            .collect();
        let round = self.current.as_ref()?;
        let number = round.number();
        let outcome = round.score(policy, &names);

        let mut score_deltas = Vec::with_capacity(outcome.deltas.len());
        for (player_id, delta) in outcome.deltas {
            let total = match self.members.iter_mut().find(|m| m.player_id == player_id) {
                Some(member) => {
                    member.score += delta;
                    member.score
                }
                None => delta,
            };
            score_deltas.push(ScoreDelta {
                player_id,
                delta,
                total,
            });
        }

        let summary = RoundSummary {
            round: number,
            messages: outcome.messages,
            guesses: outcome.guesses,
            score_deltas,
            standings: self.standings(),
        };
        self.phase = Phase::Revealed;
        self.history.push(summary.clone());

        debug!(room_id = %self.id, round = number, "Round revealed");
        Some(summary)
    }

    fn on_connected(&mut self, player_id: &PlayerId) {
        if self.host.is_none() {
            self.host = Some(player_id.clone());
        }
        self.empty_since = None;
        self.touch();
    }

    fn touch(&mut self) {
        self.revision += 1;
    }

    fn ensure_open(&self, operation: &'static str) -> Result<(), GameError> {
        if self.phase == Phase::Closed {
            return Err(GameError::phase(operation, Phase::Closed));
        }
        Ok(())
    }

    fn member_index(&self, player_id: &PlayerId) -> Option<usize> {
        self.members.iter().position(|m| &m.player_id == player_id)
    }

    fn require_member(&self, player_id: &PlayerId) -> Result<&Member, GameError> {
        self.member(player_id)
            .ok_or_else(|| GameError::NotMember(player_id.clone()))
    }

    fn require_host(&self, caller: &PlayerId, action: &'static str) -> Result<(), GameError> {
        if self.host.as_ref() != Some(caller) {
            return Err(GameError::NotAuthorized(action));
        }
        Ok(())
    }

    fn round(&self, operation: &'static str) -> Result<&Round, GameError> {
        self.current
            .as_ref()
            .ok_or(GameError::phase(operation, self.phase))
    }

    fn round_mut(&mut self, operation: &'static str) -> Result<&mut Round, GameError> {
        let phase = self.phase;
        self.current
            .as_mut()
            .ok_or(GameError::phase(operation, phase))
    }

    fn member_view(&self, member: &Member) -> MemberView {
        MemberView {
            player_id: member.player_id.clone(),
            display_name: member.display_name.clone(),
            status: member.status,
            score: member.score,
            is_ready: member.is_ready,
            is_host: self.host.as_ref() == Some(&member.player_id),
        }
    }
}

fn validate_content(content: &str, max_len: usize) -> Result<(), GameError> {
    if content.trim().is_empty() {
        return Err(GameError::EmptyMessage);
    }
    if content.chars().count() > max_len {
        return Err(GameError::MessageTooLong { max: max_len });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::scoring::StandardScoring;

    const POLICY: StandardScoring = StandardScoring {
        correct_points: 2,
        house_points: 5,
    };

    fn pid(name: &str) -> PlayerId {
        PlayerId::from(name)
    }

    fn room_with(config: RoomConfig, names: &[&str]) -> Room {
        let mut room = Room::new(RoomId::new(), config, Utc::now()).expect("valid config");
        for name in names {
            room.join(Identity::new(*name, name.to_uppercase()), Utc::now())
                .expect("join");
        }
        room
    }

    fn collecting_room(names: &[&str]) -> Room {
        let mut room = room_with(RoomConfig::default().with_players(2, 6), names);
        room.start_round(&pid(names[0])).expect("start");
        room
    }

    fn submit_all(room: &mut Room, names: &[&str]) -> Vec<EventPayload> {
        let mut events = Vec::new();
        for name in names {
            let outcome = room
                .submit_message(&pid(name), format!("secret of {name}"), &POLICY, Utc::now())
                .expect("submit");
            events.extend(outcome.events);
        }
        events
    }

    fn author_of(room: &Room, message_id: MessageId) -> Author {
        room.current_round()
            .and_then(|r| r.message(&message_id))
            .map(|m| m.author.clone())
            .expect("message exists")
    }

    /// A message not written by `name`.
    fn other_message(room: &Room, name: &str) -> MessageId {
        room.current_round()
            .expect("round")
            .messages()
            .iter()
            .find(|m| m.author.member() != Some(&pid(name)))
            .map(|m| m.id)
            .expect("other message")
    }

    #[test]
    fn first_member_becomes_host() {
        let room = room_with(RoomConfig::default(), &["alice", "bob"]);
        assert_eq!(room.host(), Some(&pid("alice")));
        assert!(room.empty_since().is_none());
    }

    #[test]
    fn join_rejects_duplicates_and_overflow() {
        let mut room = room_with(RoomConfig::default().with_players(1, 2), &["a", "b"]);

        let err = room.join(Identity::new("a", "A"), Utc::now()).unwrap_err();
        assert_eq!(err, GameError::AlreadyJoined(pid("a")));

        let err = room.join(Identity::new("c", "C"), Utc::now()).unwrap_err();
        assert_eq!(err, GameError::RoomFull { max_players: 2 });
        assert_eq!(room.members().len(), 2);
    }

    #[test]
    fn start_round_checks_phase_host_and_players() {
        let mut room = room_with(RoomConfig::default().with_players(3, 6), &["a", "b"]);

        assert_eq!(
            room.start_round(&pid("b")).unwrap_err(),
            GameError::NotAuthorized("start a round")
        );
        assert_eq!(
            room.start_round(&pid("a")).unwrap_err(),
            GameError::InsufficientPlayers {
                required: 3,
                connected: 2
            }
        );

        room.join(Identity::new("c", "C"), Utc::now()).expect("join");
        assert_eq!(room.start_round(&pid("a")).expect("start").value, 1);
        assert_eq!(room.phase(), Phase::Collecting);

        let err = room.start_round(&pid("a")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Phase);
    }

    #[test]
    fn require_ready_blocks_until_everyone_is_ready() {
        let config = RoomConfig::default()
            .with_players(2, 4)
            .with_require_ready(true);
        let mut room = room_with(config, &["a", "b"]);

        room.set_ready(&pid("a"), true).expect("ready");
        assert_eq!(
            room.start_round(&pid("a")).unwrap_err(),
            GameError::PlayersNotReady { waiting: 1 }
        );

        room.set_ready(&pid("b"), true).expect("ready");
        room.start_round(&pid("a")).expect("start");
        assert!(room.members().iter().all(|m| !m.is_ready));
    }

    #[test]
    fn collecting_auto_advances_with_anonymized_messages() {
        let names = ["a", "b", "c"];
        let mut room = collecting_room(&names);

        let events = submit_all(&mut room, &names);
        assert_eq!(room.phase(), Phase::Guessing);

        let phase_changed = events
            .iter()
            .find_map(|e| match e {
                EventPayload::PhaseChanged { messages, phase, .. } => Some((messages, *phase)),
                _ => None,
            })
            .expect("phase change emitted");
        assert_eq!(phase_changed.1, Phase::Guessing);
        assert_eq!(phase_changed.0.len(), 3);

        let json = serde_json::to_string(&events).expect("serialize");
        assert!(!json.contains("author"));
    }

    #[test]
    fn duplicate_submission_rejected_without_side_effects() {
        let mut room = collecting_room(&["a", "b", "c"]);
        room.submit_message(&pid("a"), "first".into(), &POLICY, Utc::now())
            .expect("submit");

        let before = room.clone();
        let err = room
            .submit_message(&pid("a"), "second".into(), &POLICY, Utc::now())
            .unwrap_err();
        assert_eq!(err, GameError::DuplicateSubmission);
        assert_eq!(room, before);
    }

    #[test]
    fn blank_and_oversized_messages_rejected() {
        let config = RoomConfig::default()
            .with_players(2, 4)
            .with_max_message_len(5);
        let mut room = room_with(config, &["a", "b"]);
        room.start_round(&pid("a")).expect("start");

        assert_eq!(
            room.submit_message(&pid("a"), "   \n".into(), &POLICY, Utc::now())
                .unwrap_err(),
            GameError::EmptyMessage
        );
        assert_eq!(
            room.submit_message(&pid("a"), "toolong".into(), &POLICY, Utc::now())
                .unwrap_err(),
            GameError::MessageTooLong { max: 5 }
        );
    }

    #[test]
    fn message_quota_is_configurable() {
        let config = RoomConfig::default()
            .with_players(2, 4)
            .with_messages_per_member(2);
        let mut room = room_with(config, &["a", "b"]);
        room.start_round(&pid("a")).expect("start");

        submit_all(&mut room, &["a", "b"]);
        assert_eq!(room.phase(), Phase::Collecting);
        submit_all(&mut room, &["a", "b"]);
        assert_eq!(room.phase(), Phase::Guessing);
        assert_eq!(room.current_round().map(|r| r.messages().len()), Some(4));
    }

    #[test]
    fn late_joiner_waits_for_next_round() {
        let mut room = collecting_room(&["a", "b"]);
        room.join(Identity::new("late", "Late"), Utc::now())
            .expect("join");

        let err = room
            .submit_message(&pid("late"), "hi".into(), &POLICY, Utc::now())
            .unwrap_err();
        assert_eq!(err, GameError::NotParticipant(pid("late")));

        submit_all(&mut room, &["a", "b"]);
        assert_eq!(room.phase(), Phase::Guessing);
    }

    #[test]
    fn self_guess_and_unknown_author_rejected() {
        let names = ["a", "b", "c"];
        let mut room = collecting_room(&names);
        let own = room
            .submit_message(&pid("a"), "mine".into(), &POLICY, Utc::now())
            .expect("submit")
            .value;
        submit_all(&mut room, &["b", "c"]);

        let err = room
            .submit_guess(&pid("a"), own, Author::Member(pid("b")), &POLICY, Utc::now())
            .unwrap_err();
        assert_eq!(err, GameError::SelfGuessNotAllowed);

        let target = other_message(&room, "a");
        let err = room
            .submit_guess(&pid("a"), target, Author::Member(pid("zed")), &POLICY, Utc::now())
            .unwrap_err();
        assert_eq!(err, GameError::UnknownAuthor(pid("zed")));

        let err = room
            .submit_guess(&pid("a"), MessageId::new(), Author::Member(pid("b")), &POLICY, Utc::now())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn guessing_auto_advances_and_scores() {
        let names = ["a", "b", "c"];
        let mut room = collecting_room(&names);
        submit_all(&mut room, &names);

        // a guesses correctly, b and c guess wrong.
        let target_a = other_message(&room, "a");
        let truth = author_of(&room, target_a);
        room.submit_guess(&pid("a"), target_a, truth, &POLICY, Utc::now())
            .expect("guess");

        let target_b = other_message(&room, "b");
        let truth_b = author_of(&room, target_b);
        let wrong_b = if truth_b == Author::Member(pid("a")) { pid("c") } else { pid("a") };
        room.submit_guess(&pid("b"), target_b, Author::Member(wrong_b), &POLICY, Utc::now())
            .expect("guess");

        let err = room
            .submit_guess(&pid("b"), target_b, Author::Member(pid("a")), &POLICY, Utc::now())
            .unwrap_err();
        assert_eq!(err, GameError::DuplicateGuess);

        let target_c = other_message(&room, "c");
        let truth_c = author_of(&room, target_c);
        let wrong_c = if truth_c == Author::Member(pid("a")) { pid("b") } else { pid("a") };
        let outcome = room
            .submit_guess(&pid("c"), target_c, Author::Member(wrong_c), &POLICY, Utc::now())
            .expect("guess");

        assert_eq!(room.phase(), Phase::Revealed);
        let summary = outcome
            .events
            .iter()
            .find_map(|e| match e {
                EventPayload::RoundRevealed { summary } => Some(summary),
                _ => None,
            })
            .expect("revealed");

        assert_eq!(summary.delta_for(&pid("a")), Some(2));
        assert_eq!(summary.delta_for(&pid("b")), Some(0));
        assert_eq!(summary.delta_for(&pid("c")), Some(0));
        assert!(summary.guess_of(&pid("a")).is_some_and(|g| g.correct));
        assert_eq!(summary.messages.len(), 3);
        assert_eq!(room.member(&pid("a")).map(|m| m.score), Some(2));
        assert_eq!(room.standings()[0].player_id, pid("a"));
        assert_eq!(room.history().len(), 1);
    }

    #[test]
    fn leaving_during_guessing_forfeits_and_unblocks() {
        let names = ["a", "b", "c"];
        let mut room = collecting_room(&names);
        submit_all(&mut room, &names);

        for name in ["a", "b"] {
            let target = other_message(&room, name);
            let truth = author_of(&room, target);
            room.submit_guess(&pid(name), target, truth, &POLICY, Utc::now())
                .expect("guess");
        }
        assert_eq!(room.phase(), Phase::Guessing);

        let outcome = room.leave(&pid("c"), &POLICY, Utc::now()).expect("leave");
        assert_eq!(room.phase(), Phase::Revealed);
        assert!(matches!(
            outcome.events[0],
            EventPayload::MemberLeft { forfeited: true, removed: false, .. }
        ));

        let summary = room.history().last().expect("summary");
        let c = summary.guess_of(&pid("c")).expect("forfeit recorded");
        assert!(c.forfeited);
        assert!(!c.correct);
        assert_eq!(summary.delta_for(&pid("c")), Some(0));
    }

    #[test]
    fn leaving_during_collecting_cascades_to_reveal_when_nothing_left() {
        let mut room = collecting_room(&["a", "b"]);
        room.submit_message(&pid("a"), "only".into(), &POLICY, Utc::now())
            .expect("submit");

        // b leaves without submitting: a only sees their own message, so
        // there is nothing left to guess and the round reveals at once.
        room.leave(&pid("b"), &POLICY, Utc::now()).expect("leave");
        assert_eq!(room.phase(), Phase::Revealed);
        assert_eq!(room.host(), Some(&pid("a")));
    }

    #[test]
    fn host_passes_on_and_disconnected_members_are_pruned() {
        let mut room = collecting_room(&["a", "b", "c"]);
        let outcome = room.leave(&pid("a"), &POLICY, Utc::now()).expect("leave");
        assert!(matches!(
            &outcome.events[0],
            EventPayload::MemberLeft { new_host: Some(host), .. } if host == &pid("b")
        ));
        assert_eq!(room.members().len(), 3);

        submit_all(&mut room, &["b", "c"]);
        room.forfeit_outstanding(&POLICY).expect("timeout");
        assert_eq!(room.phase(), Phase::Revealed);

        room.start_round(&pid("b")).expect("next round");
        assert_eq!(room.members().len(), 2);
        assert!(room.member(&pid("a")).is_none());
    }

    #[test]
    fn leave_outside_round_removes_member() {
        let mut room = room_with(RoomConfig::default(), &["a", "b"]);
        let outcome = room.leave(&pid("b"), &POLICY, Utc::now()).expect("leave");
        assert!(matches!(
            outcome.events[0],
            EventPayload::MemberLeft { removed: true, .. }
        ));
        assert!(room.member(&pid("b")).is_none());

        room.leave(&pid("a"), &POLICY, Utc::now()).expect("leave");
        assert!(room.host().is_none());
        assert!(room.empty_since().is_some());
    }

    #[test]
    fn rejoin_reconnects_without_lifting_forfeit() {
        let mut room = collecting_room(&["a", "b", "c"]);
        room.leave(&pid("c"), &POLICY, Utc::now()).expect("leave");

        let outcome = room
            .join(Identity::new("c", "C again"), Utc::now())
            .expect("rejoin");
        assert!(matches!(
            outcome.events[0],
            EventPayload::MemberJoined { reconnected: true, .. }
        ));
        assert_eq!(outcome.value.display_name, "C again");

        let err = room
            .submit_message(&pid("c"), "late".into(), &POLICY, Utc::now())
            .unwrap_err();
        assert_eq!(err, GameError::Forfeited(pid("c")));
    }

    #[test]
    fn decoy_is_host_only_and_scores_bonus() {
        let names = ["a", "b"];
        let mut room = collecting_room(&names);

        assert_eq!(
            room.inject_decoy(&pid("b"), "fake".into(), Utc::now())
                .unwrap_err(),
            GameError::NotAuthorized("inject a decoy")
        );
        let decoy = room
            .inject_decoy(&pid("a"), "I once ate a whole cake".into(), Utc::now())
            .expect("decoy")
            .value;
        assert_eq!(
            room.inject_decoy(&pid("a"), "again".into(), Utc::now())
                .unwrap_err(),
            GameError::DuplicateSubmission
        );

        submit_all(&mut room, &names);
        assert_eq!(room.phase(), Phase::Guessing);

        room.submit_guess(&pid("a"), decoy, Author::House, &POLICY, Utc::now())
            .expect("guess");
        room.submit_guess(&pid("b"), decoy, Author::Member(pid("a")), &POLICY, Utc::now())
            .expect("guess");

        let summary = room.history().last().expect("revealed");
        assert_eq!(summary.delta_for(&pid("a")), Some(5));
        assert_eq!(summary.delta_for(&pid("b")), Some(0));
    }

    #[test]
    fn game_over_after_configured_rounds() {
        let config = RoomConfig::default().with_players(2, 4).with_rounds(1);
        let mut room = room_with(config, &["a", "b"]);
        room.start_round(&pid("a")).expect("start");
        room.forfeit_outstanding(&POLICY).expect("timeout");
        assert_eq!(room.phase(), Phase::Revealed);

        assert_eq!(
            room.start_round(&pid("a")).unwrap_err(),
            GameError::GameOver { rounds: 1 }
        );
    }

    #[test]
    fn closed_room_rejects_everything() {
        let mut room = room_with(RoomConfig::default(), &["a"]);
        assert_eq!(
            room.close(&pid("x")).unwrap_err(),
            GameError::NotAuthorized("close the room")
        );
        room.close(&pid("a")).expect("close");
        assert_eq!(room.phase(), Phase::Closed);

        let err = room.join(Identity::new("b", "B"), Utc::now()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Phase);
        assert!(room.close(&pid("a")).is_err());
        assert!(!room.is_abandoned(Utc::now(), Duration::ZERO));
    }

    #[test]
    fn view_hides_authors_until_reveal() {
        let names = ["a", "b", "c"];
        let mut room = collecting_room(&names);
        submit_all(&mut room, &names);

        let view = room.view(&pid("a")).expect("view");
        let current = view.current.expect("round view");
        assert_eq!(current.messages.len(), 3);
        assert_eq!(current.own_messages.len(), 1);
        assert!(current.summary.is_none());

        let json = serde_json::to_string(&room.view(&pid("b")).expect("view")).expect("json");
        assert!(!json.contains("author"));

        assert_eq!(
            room.view(&pid("stranger")).unwrap_err(),
            GameError::NotMember(pid("stranger"))
        );
    }

    #[test]
    fn late_joiner_has_no_alias_until_next_round() {
        let mut room = collecting_room(&["a", "b"]);
        room.join(Identity::new("late", "Late"), Utc::now())
            .expect("late join");

        assert!(room.alias_of(&pid("a")).is_some());
        assert!(room.alias_of(&pid("late")).is_none());
        let view = room.view(&pid("late")).expect("view");
        assert!(view.current.expect("round view").own_alias.is_none());
    }

    #[test]
    fn seal_numbers_events_consecutively() {
        let mut room = room_with(RoomConfig::default(), &[]);
        let now = Utc::now();
        let first = room.seal(
            vec![EventPayload::ReadyChanged {
                player_id: pid("a"),
                ready: true,
            }],
            now,
        );
        let second = room.seal(
            vec![
                EventPayload::ReadyChanged {
                    player_id: pid("a"),
                    ready: false,
                },
                EventPayload::RoomClosed {
                    standings: Vec::new(),
                },
            ],
            now,
        );
        assert_eq!(first[0].sequence, 0);
        assert_eq!(second[0].sequence, 1);
        assert_eq!(second[1].sequence, 2);
    }

    #[test]
    fn abandoned_after_timeout() {
        let created = Utc::now();
        let room = Room::new(RoomId::new(), RoomConfig::default(), created).expect("room");
        assert!(room.is_abandoned(created + TimeDelta::seconds(10), Duration::from_secs(5)));
        assert!(!room.is_abandoned(created + TimeDelta::seconds(1), Duration::from_secs(5)));
    }

    #[test]
    fn suspended_room_resumes_on_reconnect() {
        let mut room = collecting_room(&["a", "b"]);
        room.submit_message(&pid("a"), "kept".into(), &POLICY, Utc::now())
            .expect("submit");

        room.suspend(Utc::now());
        assert_eq!(room.connected_count(), 0);
        assert!(room.host().is_none());

        room.join(Identity::new("b", "B"), Utc::now()).expect("rejoin");
        assert_eq!(room.host(), Some(&pid("b")));
        room.submit_message(&pid("b"), "still open".into(), &POLICY, Utc::now())
            .expect("obligations survive a restore");
        assert_eq!(room.phase(), Phase::Guessing);
    }

    #[test]
    fn room_snapshot_roundtrips_through_json() {
        let names = ["a", "b", "c"];
        let mut room = collecting_room(&names);
        submit_all(&mut room, &names);

        let json = serde_json::to_string(&room).expect("serialize");
        let restored: Room = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(restored, room);
    }
}
