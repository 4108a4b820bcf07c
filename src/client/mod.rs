//! Client-side mirror of the match state. Rendering and transport stay
//! outside; this module tracks position, turn and clocks from pushed
//! events, predicts clock ticks between authoritative corrections, and
//! turns user intent into outbound requests.

use log::{info, warn};
use std::sync::Arc;
use uuid::Uuid;

use crate::game::rules::{RulesEngine, TerminalKind, STARTING_FEN};
use crate::models::clock::TimeControl;
use crate::models::messages::{ClientEvent, GameOverReason, MovePayload, ServerEvent, Side};

/// Outbound dispatch abstraction. The transport behind it is expected to
/// queue or reconnect on its own; sends are fire-and-forget.
pub trait EventSink {
    fn send(&self, event: ClientEvent);
}

/// Move-search collaborator driving the non-human side. Requests are
/// asynchronous; the answer comes back through
/// [`ClientSyncState::apply_search_move`].
pub trait SearchEngine {
    fn request_move(&self, fen: &str);
}

/// Mode-specific behavior, chosen at construction instead of subtyping
/// the session.
pub trait ModeStrategy {
    fn on_session_start(&mut self, _fen: &str, _turn: Side) {}
    fn on_move_accepted(&mut self, _mv: &MovePayload, _fen: &str, _turn: Side) {}
    /// Whether moves are applied to the local board immediately. False in
    /// multiplayer, where the server echo drives the mirror and no
    /// rollback logic is needed.
    fn applies_locally(&self) -> bool {
        false
    }
    fn supports_undo(&self) -> bool {
        false
    }
    fn supports_hint(&self) -> bool {
        false
    }
    fn request_hint(&mut self, _fen: &str) {}
}

/// Two-party mode: moves are forwarded to the server and the mirror waits
/// for the authoritative echo.
pub struct Multiplayer;

impl ModeStrategy for Multiplayer {}

/// Engine mode: moves apply locally and each new position is fed to the
/// search collaborator when it is the engine's turn.
pub struct SinglePlayer<S: SearchEngine> {
    pub search: S,
    pub engine_side: Side,
}

impl<S: SearchEngine> ModeStrategy for SinglePlayer<S> {
    fn on_session_start(&mut self, fen: &str, turn: Side) {
        if turn == self.engine_side {
            self.search.request_move(fen);
        }
    }

    fn on_move_accepted(&mut self, _mv: &MovePayload, fen: &str, turn: Side) {
        if turn == self.engine_side {
            self.search.request_move(fen);
        }
    }

    fn applies_locally(&self) -> bool {
        true
    }

    fn supports_undo(&self) -> bool {
        true
    }

    fn supports_hint(&self) -> bool {
        true
    }

    fn request_hint(&mut self, fen: &str) {
        self.search.request_move(fen);
    }
}

/// Local mirror of one match session. Authoritative pushes overwrite the
/// mirrored values outright; there is no client-side conflict resolution.
pub struct ClientSyncState {
    my_side: Side,
    position: String,
    turn: Side,
    started: bool,
    game_over: Option<(Option<Side>, GameOverReason)>,
    opponent_connected: bool,
    credential: Option<Uuid>,
    rematch_offer: Option<Uuid>,
    time_control: Option<TimeControl>,
    white_time: Option<u64>,
    black_time: Option<u64>,
    /// Pre-move (fen, turn) pairs, kept only when moves apply locally.
    history: Vec<(String, Side)>,
    mode: Box<dyn ModeStrategy>,
    sink: Box<dyn EventSink>,
    rules: Arc<dyn RulesEngine>,
}

impl ClientSyncState {
    pub fn new(
        my_side: Side,
        mode: Box<dyn ModeStrategy>,
        sink: Box<dyn EventSink>,
        rules: Arc<dyn RulesEngine>,
    ) -> Self {
        ClientSyncState {
            my_side,
            position: STARTING_FEN.to_string(),
            turn: Side::White,
            started: false,
            game_over: None,
            opponent_connected: false,
            credential: None,
            rematch_offer: None,
            time_control: None,
            white_time: None,
            black_time: None,
            history: Vec::new(),
            mode,
            sink,
            rules,
        }
    }

    pub fn my_side(&self) -> Side {
        self.my_side
    }

    pub fn position(&self) -> &str {
        &self.position
    }

    pub fn turn(&self) -> Side {
        self.turn
    }

    pub fn started(&self) -> bool {
        self.started
    }

    pub fn game_over(&self) -> Option<(Option<Side>, GameOverReason)> {
        self.game_over
    }

    pub fn opponent_connected(&self) -> bool {
        self.opponent_connected
    }

    /// Reconnection credential issued by the server on join. The embedder
    /// persists it (with a bounded expiry) for later reconnects.
    pub fn credential(&self) -> Option<Uuid> {
        self.credential
    }

    pub fn rematch_offer(&self) -> Option<Uuid> {
        self.rematch_offer
    }

    pub fn time_control(&self) -> Option<TimeControl> {
        self.time_control
    }

    pub fn time_remaining(&self, side: Side) -> Option<u64> {
        match side {
            Side::White => self.white_time,
            Side::Black => self.black_time,
        }
    }

    /// Submits a move. In multiplayer this is fire-and-forget: the board
    /// only advances on the server's echo. In single-player the move
    /// applies locally and the search collaborator is fed the new
    /// position.
    pub fn submit_move(&mut self, mv: MovePayload) {
        if self.mode.applies_locally() {
            self.apply_local(mv);
        } else {
            self.sink.send(ClientEvent::Move { mv });
        }
    }

    /// Accepts the search collaborator's asynchronous answer.
    pub fn apply_search_move(&mut self, mv: MovePayload) {
        if !self.mode.applies_locally() {
            warn!("dropping search move outside single-player mode");
            return;
        }
        self.apply_local(mv);
    }

    /// Takes back the last two plies (the player's move and the engine's
    /// reply). Single-player only.
    pub fn undo_move(&mut self) {
        if !self.mode.supports_undo() {
            info!("undo is not available in this mode");
            return;
        }
        for _ in 0..2 {
            if let Some((fen, turn)) = self.history.pop() {
                self.position = fen;
                self.turn = turn;
            }
        }
        self.game_over = None;
    }

    pub fn request_hint(&mut self) {
        if !self.mode.supports_hint() {
            info!("hints are not available in this mode");
            return;
        }
        let fen = self.position.clone();
        self.mode.request_hint(&fen);
    }

    pub fn offer_rematch(&self) {
        self.sink.send(ClientEvent::OfferRematch);
    }

    pub fn accept_rematch(&self) {
        self.sink.send(ClientEvent::AcceptRematch);
    }

    /// One optimistic clock tick for the side to move, called once per
    /// second between authoritative pushes. When a clock empties, a
    /// single timeout claim is sent; the server's `gameOver` push settles
    /// the outcome.
    pub fn tick_second(&mut self) {
        if !self.started || self.game_over.is_some() {
            return;
        }
        let remaining = match self.turn {
            Side::White => &mut self.white_time,
            Side::Black => &mut self.black_time,
        };
        let Some(ms) = remaining else {
            return;
        };
        if *ms == 0 {
            return;
        }
        *ms = ms.saturating_sub(1_000);
        if *ms == 0 {
            let flagged = self.turn;
            self.sink.send(ClientEvent::GameOver {
                reason: GameOverReason::Timeout,
                winner: flagged.opposite(),
            });
        }
    }

    /// Reconciles an authoritative push. Server state always wins: local
    /// values are overwritten outright.
    pub fn apply(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Connected { player_id } => self.credential = Some(player_id),
            ServerEvent::OpponentJoined | ServerEvent::OpponentReconnected => {
                self.opponent_connected = true;
            }
            ServerEvent::GameStart {
                fen,
                turn,
                time_control,
            } => {
                self.started = true;
                self.game_over = None;
                self.rematch_offer = None;
                self.position = fen;
                self.turn = turn;
                self.white_time = (!time_control.is_unlimited).then_some(time_control.initial);
                self.black_time = self.white_time;
                self.time_control = Some(time_control);
                self.history.clear();
                let fen = self.position.clone();
                self.mode.on_session_start(&fen, turn);
            }
            ServerEvent::GameState {
                started,
                fen,
                turn,
                white_time,
                black_time,
            } => {
                self.started = started;
                self.position = fen;
                self.turn = turn;
                self.white_time = white_time;
                self.black_time = black_time;
            }
            ServerEvent::OpponentMove { mv } => {
                // Advance the mirror so the board does not wait for the
                // next snapshot; a snapshot corrects any divergence.
                match self.rules.apply(&self.position, &mv) {
                    Some(verdict) => {
                        self.position = verdict.fen;
                        self.turn = verdict.side_to_move;
                    }
                    None => warn!("opponent move does not fit the mirrored position"),
                }
            }
            ServerEvent::GameOver { winner, reason } => {
                self.started = false;
                self.game_over = Some((winner, reason));
            }
            ServerEvent::RematchOffer { offer_id } => self.rematch_offer = Some(offer_id),
            ServerEvent::RematchAccepted => self.rematch_offer = None,
        }
    }

    fn apply_local(&mut self, mv: MovePayload) {
        let Some(verdict) = self.rules.apply(&self.position, &mv) else {
            warn!("rejected local move {} -> {}", mv.from, mv.to);
            return;
        };
        self.history.push((self.position.clone(), self.turn));
        self.position = verdict.fen;
        self.turn = verdict.side_to_move;
        match verdict.terminal {
            Some(TerminalKind::Checkmate) => {
                self.game_over = Some((Some(self.turn.opposite()), GameOverReason::Checkmate));
            }
            Some(TerminalKind::Draw) => {
                self.game_over = Some((None, GameOverReason::Draw));
            }
            None => {}
        }
        let fen = self.position.clone();
        self.mode.on_move_accepted(&mv, &fen, self.turn);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::rules::ChessRules;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink(Arc<Mutex<Vec<ClientEvent>>>);

    impl RecordingSink {
        fn handle(&self) -> Arc<Mutex<Vec<ClientEvent>>> {
            Arc::clone(&self.0)
        }
    }

    impl EventSink for RecordingSink {
        fn send(&self, event: ClientEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    impl SearchEngine for Arc<Mutex<Vec<String>>> {
        fn request_move(&self, fen: &str) {
            self.lock().unwrap().push(fen.to_string());
        }
    }

    fn mv(from: &str, to: &str) -> MovePayload {
        MovePayload {
            from: from.into(),
            to: to.into(),
            promotion: None,
        }
    }

    fn multiplayer_client() -> (ClientSyncState, Arc<Mutex<Vec<ClientEvent>>>) {
        let sink = RecordingSink::default();
        let sent = sink.handle();
        let client = ClientSyncState::new(
            Side::White,
            Box::new(Multiplayer),
            Box::new(sink),
            Arc::new(ChessRules),
        );
        (client, sent)
    }

    fn one_minute_start() -> ServerEvent {
        ServerEvent::GameStart {
            fen: STARTING_FEN.into(),
            turn: Side::White,
            time_control: TimeControl::from_selection(1).unwrap(),
        }
    }

    #[test]
    fn multiplayer_moves_are_fire_and_forget() {
        let (mut client, sent) = multiplayer_client();
        client.apply(one_minute_start());
        client.submit_move(mv("e2", "e4"));
        // The local board waits for the server echo.
        assert_eq!(client.position(), STARTING_FEN);
        assert_eq!(
            sent.lock().unwrap().as_slice(),
            &[ClientEvent::Move { mv: mv("e2", "e4") }]
        );
    }

    #[test]
    fn opponent_move_advances_the_mirror() {
        let (mut client, _) = multiplayer_client();
        client.apply(one_minute_start());
        client.apply(ServerEvent::OpponentMove { mv: mv("e2", "e4") });
        assert_eq!(client.turn(), Side::Black);
        assert!(client.position().contains("4P3"));
    }

    #[test]
    fn authoritative_snapshot_overwrites_local_values() {
        let (mut client, _) = multiplayer_client();
        client.apply(one_minute_start());
        client.tick_second();
        client.tick_second();
        assert_eq!(client.time_remaining(Side::White), Some(58_000));

        client.apply(ServerEvent::GameState {
            started: true,
            fen: "8/8/8/8/8/8/8/K1k5 w - - 0 1".into(),
            turn: Side::Black,
            white_time: Some(41_000),
            black_time: Some(59_000),
        });
        assert_eq!(client.position(), "8/8/8/8/8/8/8/K1k5 w - - 0 1");
        assert_eq!(client.turn(), Side::Black);
        assert_eq!(client.time_remaining(Side::White), Some(41_000));
    }

    #[test]
    fn empty_clock_emits_a_single_timeout_claim() {
        let (mut client, sent) = multiplayer_client();
        client.apply(one_minute_start());
        client.apply(ServerEvent::GameState {
            started: true,
            fen: STARTING_FEN.into(),
            turn: Side::White,
            white_time: Some(1_000),
            black_time: Some(30_000),
        });
        client.tick_second();
        client.tick_second();
        client.tick_second();
        let sent = sent.lock().unwrap();
        assert_eq!(
            sent.as_slice(),
            &[ClientEvent::GameOver {
                reason: GameOverReason::Timeout,
                winner: Side::Black,
            }]
        );
    }

    #[test]
    fn untimed_sessions_never_tick() {
        let (mut client, sent) = multiplayer_client();
        client.apply(ServerEvent::GameStart {
            fen: STARTING_FEN.into(),
            turn: Side::White,
            time_control: TimeControl::from_selection(0).unwrap(),
        });
        client.tick_second();
        assert_eq!(client.time_remaining(Side::White), None);
        assert!(sent.lock().unwrap().is_empty());
    }

    #[test]
    fn game_over_push_settles_the_outcome() {
        let (mut client, _) = multiplayer_client();
        client.apply(one_minute_start());
        client.apply(ServerEvent::GameOver {
            winner: Some(Side::Black),
            reason: GameOverReason::Timeout,
        });
        assert!(!client.started());
        assert_eq!(
            client.game_over(),
            Some((Some(Side::Black), GameOverReason::Timeout))
        );
        // Terminal mirrors stop predicting.
        client.tick_second();
        assert_eq!(client.time_remaining(Side::White), Some(60_000));
    }

    #[test]
    fn single_player_applies_locally_and_feeds_the_search() {
        let requested: Arc<Mutex<Vec<String>>> = Arc::default();
        let mode = SinglePlayer {
            search: Arc::clone(&requested),
            engine_side: Side::Black,
        };
        let mut client = ClientSyncState::new(
            Side::White,
            Box::new(mode),
            Box::new(RecordingSink::default()),
            Arc::new(ChessRules),
        );
        client.apply(ServerEvent::GameStart {
            fen: STARTING_FEN.into(),
            turn: Side::White,
            time_control: TimeControl::from_selection(0).unwrap(),
        });
        // White to move: no search request yet.
        assert!(requested.lock().unwrap().is_empty());

        client.submit_move(mv("e2", "e4"));
        assert_eq!(client.turn(), Side::Black);
        assert_eq!(requested.lock().unwrap().len(), 1);

        client.apply_search_move(mv("e7", "e5"));
        assert_eq!(client.turn(), Side::White);
        assert_eq!(requested.lock().unwrap().len(), 1);
    }

    #[test]
    fn undo_takes_back_two_plies_in_single_player_only() {
        let requested: Arc<Mutex<Vec<String>>> = Arc::default();
        let mode = SinglePlayer {
            search: Arc::clone(&requested),
            engine_side: Side::Black,
        };
        let mut client = ClientSyncState::new(
            Side::White,
            Box::new(mode),
            Box::new(RecordingSink::default()),
            Arc::new(ChessRules),
        );
        client.apply(ServerEvent::GameStart {
            fen: STARTING_FEN.into(),
            turn: Side::White,
            time_control: TimeControl::from_selection(0).unwrap(),
        });
        client.submit_move(mv("e2", "e4"));
        client.apply_search_move(mv("e7", "e5"));
        client.undo_move();
        assert_eq!(client.position(), STARTING_FEN);
        assert_eq!(client.turn(), Side::White);

        let (mut multiplayer, _) = multiplayer_client();
        multiplayer.apply(one_minute_start());
        multiplayer.apply(ServerEvent::OpponentMove { mv: mv("e2", "e4") });
        let mirrored = multiplayer.position().to_string();
        multiplayer.undo_move();
        assert_eq!(multiplayer.position(), mirrored);
    }
}
