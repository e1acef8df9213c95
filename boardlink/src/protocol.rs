//! Line protocol spoken with the board controller.
//!
//! Inbound `FEN:<position>` asks for a move; the reply is `MOVE:<uci>\n`.
//! Any other non-empty line is reported and otherwise ignored.

use cozy_chess::{Board, Move};
use engine::uci::format_uci_move;

/// Tag prefixing a position sent by the board.
pub const FEN_TAG: &str = "FEN:";

/// Tag prefixing a move sent back to the board.
pub const MOVE_TAG: &str = "MOVE:";

/// A complete, non-empty line received from the board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Text after `FEN:`, trimmed. Not yet validated.
    Position(String),
    Other(String),
}

/// Classify a raw line. Returns `None` for blank lines.
pub fn parse_line(line: &str) -> Option<Inbound> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    match line.strip_prefix(FEN_TAG) {
        Some(fen) => Some(Inbound::Position(fen.trim().to_string())),
        None => Some(Inbound::Other(line.to_string())),
    }
}

/// Values for the FEN fields after the piece placement, used when the
/// board sends a truncated FEN: side to move, castling, en passant, clocks.
const FEN_FIELD_DEFAULTS: [&str; 5] = ["w", "-", "-", "0", "1"];

/// Parse a FEN string into a Board
///
/// Only the piece placement is required. Missing trailing fields take the
/// values in [`FEN_FIELD_DEFAULTS`], and fields may be separated by any run
/// of whitespace.
pub fn parse_position(fen: &str) -> Result<Board, FenError> {
    let mut fields: Vec<&str> = fen.split_whitespace().collect();
    if fields.is_empty() {
        return Err(FenError::Empty);
    }
    if fields.len() > FEN_FIELD_DEFAULTS.len() + 1 {
        return Err(FenError::InvalidFormat(fen.to_string()));
    }

    fields.extend(&FEN_FIELD_DEFAULTS[fields.len() - 1..]);
    fields
        .join(" ")
        .parse()
        .map_err(|_| FenError::InvalidFormat(fen.to_string()))
}

/// Build the command that reports `mv` to the board.
pub fn format_move_command(mv: &Move) -> String {
    format!("{}{}\n", MOVE_TAG, format_uci_move(mv))
}

#[derive(Debug, thiserror::Error)]
pub enum FenError {
    #[error("empty FEN")]
    Empty,
    #[error("invalid FEN: {0}")]
    InvalidFormat(String),
}
