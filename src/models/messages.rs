use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::clock::TimeControl;

/// One of the two match participants, fixed for the life of the match.
/// White is the first mover.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    White,
    Black,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::White => Side::Black,
            Side::Black => Side::White,
        }
    }
}

/// A move in coordinate notation, e.g. "e2" to "e4", with an optional
/// promotion piece ("q", "r", "b" or "n").
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MovePayload {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promotion: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GameOverReason {
    Checkmate,
    Draw,
    Timeout,
}

/// Events sent by a participant to the server.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientEvent {
    Move {
        #[serde(rename = "move")]
        mv: MovePayload,
    },
    OfferRematch,
    AcceptRematch,
    /// Client-declared game end. Only timeout claims are honored.
    GameOver {
        reason: GameOverReason,
        winner: Side,
    },
}

/// Events pushed by the server to one or both participants.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Unicast on a successful join; the client keeps the id for
    /// reconnection.
    #[serde(rename_all = "camelCase")]
    Connected { player_id: Uuid },
    OpponentJoined,
    OpponentReconnected,
    #[serde(rename_all = "camelCase")]
    GameStart {
        fen: String,
        turn: Side,
        time_control: TimeControl,
    },
    /// Authoritative snapshot; clock fields are absent for untimed
    /// matches, in milliseconds otherwise.
    #[serde(rename_all = "camelCase")]
    GameState {
        started: bool,
        fen: String,
        turn: Side,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        white_time: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        black_time: Option<u64>,
    },
    OpponentMove {
        #[serde(rename = "move")]
        mv: MovePayload,
    },
    #[serde(rename_all = "camelCase")]
    GameOver {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        winner: Option<Side>,
        reason: GameOverReason,
    },
    #[serde(rename_all = "camelCase")]
    RematchOffer { offer_id: Uuid },
    RematchAccepted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_events_use_wire_tags() {
        let event: ClientEvent =
            serde_json::from_str(r#"{"type":"move","move":{"from":"e2","to":"e4"}}"#).unwrap();
        assert_eq!(
            event,
            ClientEvent::Move {
                mv: MovePayload {
                    from: "e2".into(),
                    to: "e4".into(),
                    promotion: None,
                }
            }
        );

        let claim: ClientEvent =
            serde_json::from_str(r#"{"type":"gameOver","reason":"timeout","winner":"black"}"#)
                .unwrap();
        assert_eq!(
            claim,
            ClientEvent::GameOver {
                reason: GameOverReason::Timeout,
                winner: Side::Black,
            }
        );
    }

    #[test]
    fn snapshot_omits_clocks_for_untimed_matches() {
        let event = ServerEvent::GameState {
            started: true,
            fen: "8/8/8/8/8/8/8/8 w - - 0 1".into(),
            turn: Side::White,
            white_time: None,
            black_time: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"gameState""#));
        assert!(!json.contains("whiteTime"));

        let back: ServerEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn unknown_tags_are_rejected() {
        assert!(serde_json::from_str::<ClientEvent>(r#"{"type":"undo"}"#).is_err());
    }
}
