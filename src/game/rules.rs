use std::str::FromStr;

use chess::{Board, BoardStatus, ChessMove, Color, Piece, Square};

use crate::models::messages::{MovePayload, Side};

pub const STARTING_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Terminal condition produced by a move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalKind {
    /// The mover delivered mate.
    Checkmate,
    /// Stalemate or a dead position.
    Draw,
}

/// Outcome of a legal move applied to a position.
#[derive(Debug, Clone, PartialEq)]
pub struct MoveVerdict {
    pub fen: String,
    pub side_to_move: Side,
    pub terminal: Option<TerminalKind>,
}

/// Board-rules collaborator. The session core never interprets positions
/// itself: it hands a FEN and a candidate move to this trait and relays
/// the verdict. `None` means the move was rejected.
pub trait RulesEngine: Send + Sync {
    fn apply(&self, fen: &str, mv: &MovePayload) -> Option<MoveVerdict>;
}

/// `RulesEngine` backed by the `chess` crate.
#[derive(Default)]
pub struct ChessRules;

impl RulesEngine for ChessRules {
    fn apply(&self, fen: &str, mv: &MovePayload) -> Option<MoveVerdict> {
        let board = Board::from_str(fen).ok()?;
        let from = Square::from_str(&mv.from.to_lowercase()).ok()?;
        let to = Square::from_str(&mv.to.to_lowercase()).ok()?;
        let promotion = match mv.promotion.as_deref() {
            None => None,
            Some("q") => Some(Piece::Queen),
            Some("r") => Some(Piece::Rook),
            Some("b") => Some(Piece::Bishop),
            Some("n") => Some(Piece::Knight),
            Some(_) => return None,
        };

        let candidate = ChessMove::new(from, to, promotion);
        if !board.legal(candidate) {
            return None;
        }

        let next = board.make_move_new(candidate);
        let side_to_move = match next.side_to_move() {
            Color::White => Side::White,
            Color::Black => Side::Black,
        };
        let terminal = match next.status() {
            BoardStatus::Checkmate => Some(TerminalKind::Checkmate),
            BoardStatus::Stalemate => Some(TerminalKind::Draw),
            BoardStatus::Ongoing => {
                if has_insufficient_material(&next) {
                    Some(TerminalKind::Draw)
                } else {
                    None
                }
            }
        };

        Some(MoveVerdict {
            fen: next.to_string(),
            side_to_move,
            terminal,
        })
    }
}

/// Detects dead positions: bare kings, king plus a single minor piece, or
/// single bishops on same-colored squares.
pub fn has_insufficient_material(board: &Board) -> bool {
    let mut minors = [0u32; 2];
    let mut heavy_or_pawn = [0u32; 2];
    let mut bishop_parity = [None::<usize>; 2];

    for square in chess::ALL_SQUARES {
        let Some(piece) = board.piece_on(square) else {
            continue;
        };
        let idx = match board.color_on(square) {
            Some(Color::White) => 0,
            _ => 1,
        };
        match piece {
            Piece::Knight => minors[idx] += 1,
            Piece::Bishop => {
                minors[idx] += 1;
                bishop_parity[idx] =
                    Some((square.get_rank().to_index() + square.get_file().to_index()) % 2);
            }
            Piece::Rook | Piece::Queen | Piece::Pawn => heavy_or_pawn[idx] += 1,
            Piece::King => {}
        }
    }

    if heavy_or_pawn != [0, 0] {
        return false;
    }
    match (minors[0], minors[1]) {
        (0, 0) | (1, 0) | (0, 1) => true,
        (1, 1) => {
            matches!((bishop_parity[0], bishop_parity[1]), (Some(a), Some(b)) if a == b)
        }
        _ => false,
    }
}
