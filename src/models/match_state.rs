use std::collections::HashSet;
use std::time::{Duration, Instant};

use log::{debug, info};
use uuid::Uuid;

use crate::game::rules::{RulesEngine, TerminalKind, STARTING_FEN};
use crate::models::clock::{ClockEngine, TimeControl};
use crate::models::messages::{GameOverReason, MovePayload, ServerEvent, Side};

/// Live outbound binding for one participant. The implementation is
/// expected to queue without blocking; per-recipient ordering must be
/// preserved.
pub trait ConnectionHandle: Send {
    fn push(&self, event: &ServerEvent);
}

/// Join refused: the requested side is already taken (disconnected slots
/// resume through `reconnect`, never `join`) or both slots are occupied.
#[derive(Debug, thiserror::Error)]
#[error("match is full")]
pub struct RoomFullError;

/// Identity of one concrete socket binding. Each join or reconnect
/// issues a fresh token; a teardown carrying a superseded token is
/// ignored, so a stale socket closing late cannot unbind the connection
/// that replaced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingToken(u64);

/// Lifecycle phase of one match. Rematch-pending is `Terminal` with at
/// least one rematch vote recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    WaitingForOpponent,
    InProgress,
    Terminal,
}

/// Persistent per-side record, distinct from the transient connection
/// bound to it. Created once when the participant joins; only the
/// connection binding mutates afterwards.
pub struct ParticipantSlot {
    pub id: Uuid,
    pub side: Side,
    connection: Option<Box<dyn ConnectionHandle>>,
    pub connected: bool,
    binding: u64,
}

/// Canonical record of one match: the single source of truth both
/// participants converge on. All operations against one `MatchState` are
/// serialized by the caller (the registry hands it out behind a mutex).
pub struct MatchState {
    id: String,
    slots: Vec<ParticipantSlot>,
    position: String,
    side_to_move: Side,
    phase: Phase,
    started: bool,
    clock: ClockEngine,
    rematch_votes: HashSet<Uuid>,
    abandoned_since: Option<Instant>,
    next_binding: u64,
}

impl MatchState {
    pub fn new(id: String, control: TimeControl) -> Self {
        MatchState {
            id,
            slots: Vec::with_capacity(2),
            position: STARTING_FEN.to_string(),
            side_to_move: Side::White,
            phase: Phase::WaitingForOpponent,
            started: false,
            clock: ClockEngine::new(control),
            rematch_votes: HashSet::new(),
            // Counts as abandoned until somebody joins, so matches that
            // are created and never connected to get swept too.
            abandoned_since: Some(Instant::now()),
            next_binding: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn started(&self) -> bool {
        self.started
    }

    pub fn position(&self) -> &str {
        &self.position
    }

    pub fn side_to_move(&self) -> Side {
        self.side_to_move
    }

    pub fn time_control(&self) -> TimeControl {
        self.clock.control()
    }

    pub fn rematch_vote_count(&self) -> usize {
        self.rematch_votes.len()
    }

    pub fn participant(&self, side: Side) -> Option<&ParticipantSlot> {
        self.slots.iter().find(|s| s.side == side)
    }

    /// How long both slots have been simultaneously disconnected.
    pub fn abandoned_for(&self, now: Instant) -> Option<Duration> {
        self.abandoned_since.map(|since| now.duration_since(since))
    }

    /// Allocates the slot for `side` and binds the connection. The new
    /// participant id is the reconnection credential; the caller unicasts
    /// it and then invokes `try_start`. The returned token identifies
    /// this binding for the eventual `disconnect`.
    pub fn join(
        &mut self,
        side: Side,
        connection: Box<dyn ConnectionHandle>,
    ) -> Result<(Uuid, BindingToken), RoomFullError> {
        if self.slots.len() >= 2 || self.slots.iter().any(|s| s.side == side) {
            return Err(RoomFullError);
        }
        let id = Uuid::new_v4();
        self.next_binding += 1;
        self.slots.push(ParticipantSlot {
            id,
            side,
            connection: Some(connection),
            connected: true,
            binding: self.next_binding,
        });
        self.abandoned_since = None;
        info!("match {}: {:?} joined as {}", self.id, side, id);
        Ok((id, BindingToken(self.next_binding)))
    }

    /// Starts the first segment once both slots are filled. Broadcasts
    /// the snapshot, the opponent-joined notice and the game start, in
    /// that order. Safe to call after every join; a running or finished
    /// segment is never restarted from here.
    pub fn try_start(&mut self) -> bool {
        if self.phase != Phase::WaitingForOpponent || self.slots.len() != 2 {
            return false;
        }
        self.begin_segment();
        self.broadcast(&self.snapshot());
        self.broadcast(&ServerEvent::OpponentJoined);
        self.broadcast(&self.game_start_event());
        info!("match {}: started", self.id);
        true
    }

    /// Rebinds a disconnected participant. Returns `None` for an unknown
    /// credential (the caller closes the connection). The rejoiner gets a
    /// full snapshot; the other side is notified. The fresh token
    /// supersedes the previous binding, so the old socket's late teardown
    /// becomes a no-op.
    pub fn reconnect(
        &mut self,
        participant_id: Uuid,
        connection: Box<dyn ConnectionHandle>,
    ) -> Option<BindingToken> {
        let snapshot = self.snapshot();
        let next = self.next_binding + 1;
        let slot = self.slots.iter_mut().find(|s| s.id == participant_id)?;
        connection.push(&snapshot);
        slot.connection = Some(connection);
        slot.connected = true;
        slot.binding = next;
        self.next_binding = next;
        self.abandoned_since = None;
        info!("match {}: {} reconnected", self.id, participant_id);
        self.send_to_other(participant_id, &ServerEvent::OpponentReconnected);
        Some(BindingToken(next))
    }

    /// Marks the slot disconnected, provided `token` still identifies the
    /// bound socket; a teardown from a socket that was already replaced
    /// by a reconnect is ignored. The match keeps running and clocks keep
    /// counting; removal is the registry sweep's job.
    pub fn disconnect(&mut self, participant_id: Uuid, token: BindingToken, now: Instant) {
        let Some(slot) = self.slots.iter_mut().find(|s| s.id == participant_id) else {
            return;
        };
        if slot.binding != token.0 {
            debug!(
                "match {}: ignoring superseded teardown for {}",
                self.id, participant_id
            );
            return;
        }
        slot.connection = None;
        slot.connected = false;
        info!("match {}: {} disconnected", self.id, participant_id);
        if self.slots.iter().all(|s| !s.connected) {
            self.abandoned_since.get_or_insert(now);
        }
        self.broadcast(&self.snapshot());
    }

    /// Applies a move for the given participant. Out-of-turn, unknown or
    /// rule-rejected moves are dropped without any broadcast, which keeps
    /// duplicate and stale client sends harmless.
    pub fn apply_move(
        &mut self,
        participant_id: Uuid,
        mv: MovePayload,
        rules: &dyn RulesEngine,
        now: Instant,
    ) {
        if self.phase != Phase::InProgress {
            return;
        }
        let Some(slot) = self.slots.iter().find(|s| s.id == participant_id) else {
            return;
        };
        let mover = slot.side;
        if mover != self.side_to_move {
            debug!("match {}: dropping out-of-turn move from {:?}", self.id, mover);
            return;
        }
        let Some(verdict) = rules.apply(&self.position, &mv) else {
            debug!("match {}: rules rejected {} -> {}", self.id, mv.from, mv.to);
            return;
        };

        self.position = verdict.fen;
        self.side_to_move = verdict.side_to_move;
        self.send_to_other(participant_id, &ServerEvent::OpponentMove { mv });

        // The mover pays for its own elapsed time.
        if !self.time_control().is_unlimited {
            if let Some(winner) = self.clock.record_elapsed(mover, now) {
                self.finish(Some(winner), GameOverReason::Timeout);
            }
            self.broadcast(&self.snapshot());
        }

        match verdict.terminal {
            Some(TerminalKind::Checkmate) => self.finish(Some(mover), GameOverReason::Checkmate),
            Some(TerminalKind::Draw) => self.finish(None, GameOverReason::Draw),
            None => {}
        }
    }

    /// Honors a client-declared timeout while the match is in progress.
    /// The claim is receiver-trusted: either side's report is accepted at
    /// face value.
    pub fn handle_timeout(&mut self, winner: Side) {
        if self.phase != Phase::InProgress {
            return;
        }
        self.finish(Some(winner), GameOverReason::Timeout);
    }

    /// Records a rematch vote. A lone offer is relayed to the other side;
    /// the second vote restarts the match. Votes are a set, so repeated
    /// offers from one participant collapse.
    pub fn offer_rematch(&mut self, participant_id: Uuid) {
        if self.phase != Phase::Terminal || !self.is_participant(participant_id) {
            return;
        }
        self.rematch_votes.insert(participant_id);
        if self.rematch_votes.len() == 2 {
            self.restart();
        } else {
            self.send_to_other(
                participant_id,
                &ServerEvent::RematchOffer {
                    offer_id: participant_id,
                },
            );
        }
    }

    pub fn accept_rematch(&mut self, participant_id: Uuid) {
        if self.phase != Phase::Terminal || !self.is_participant(participant_id) {
            return;
        }
        self.rematch_votes.insert(participant_id);
        if self.rematch_votes.len() == 2 {
            self.send_to_other(participant_id, &ServerEvent::RematchAccepted);
            self.restart();
        }
    }

    /// Authoritative state snapshot for broadcast or unicast.
    pub fn snapshot(&self) -> ServerEvent {
        ServerEvent::GameState {
            started: self.started,
            fen: self.position.clone(),
            turn: self.side_to_move,
            white_time: self.clock.remaining(Side::White),
            black_time: self.clock.remaining(Side::Black),
        }
    }

    pub fn unicast(&self, participant_id: Uuid, event: &ServerEvent) {
        for slot in &self.slots {
            if slot.id == participant_id {
                if let Some(conn) = &slot.connection {
                    conn.push(event);
                }
            }
        }
    }

    fn is_participant(&self, participant_id: Uuid) -> bool {
        self.slots.iter().any(|s| s.id == participant_id)
    }

    fn game_start_event(&self) -> ServerEvent {
        ServerEvent::GameStart {
            fen: self.position.clone(),
            turn: self.side_to_move,
            time_control: self.time_control(),
        }
    }

    /// Resets the canonical state for a fresh segment.
    fn begin_segment(&mut self) {
        self.position = STARTING_FEN.to_string();
        self.side_to_move = Side::White;
        self.clock.reset();
        self.rematch_votes.clear();
        self.phase = Phase::InProgress;
        self.started = true;
    }

    /// Starts a new segment after a completed rematch vote.
    fn restart(&mut self) {
        self.begin_segment();
        self.broadcast(&self.snapshot());
        self.broadcast(&self.game_start_event());
        info!("match {}: rematch started", self.id);
    }

    fn finish(&mut self, winner: Option<Side>, reason: GameOverReason) {
        if self.phase == Phase::Terminal {
            return;
        }
        self.phase = Phase::Terminal;
        self.started = false;
        info!("match {}: over, winner {:?} ({:?})", self.id, winner, reason);
        self.broadcast(&ServerEvent::GameOver { winner, reason });
    }

    fn broadcast(&self, event: &ServerEvent) {
        for slot in &self.slots {
            if let Some(conn) = &slot.connection {
                conn.push(event);
            }
        }
    }

    fn send_to_other(&self, participant_id: Uuid, event: &ServerEvent) {
        for slot in &self.slots {
            if slot.id != participant_id {
                if let Some(conn) = &slot.connection {
                    conn.push(event);
                }
            }
        }
    }
}
