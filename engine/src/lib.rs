pub mod stockfish;
pub mod uci;

pub use stockfish::{find_stockfish_path, EngineConfig, UciEngine};
pub use uci::{UciError, UciMessage};

use async_trait::async_trait;
use cozy_chess::{Board, Move};

/// Something that can be asked for a move in a given position.
///
/// Implemented by [`UciEngine`]; tests substitute in-memory fakes.
#[async_trait]
pub trait MoveEngine: Send {
    /// Search `board` under `params` and report the engine's choice.
    async fn best_move(&mut self, board: &Board, params: &GoParams)
        -> Result<SearchOutcome, UciError>;

    /// Ask the engine to exit and release the process.
    async fn quit(&mut self) -> Result<(), UciError>;
}

/// Parameters for the "go" command
#[derive(Debug, Clone, Default)]
pub struct GoParams {
    pub movetime: Option<u64>, // Move time in milliseconds
    pub depth: Option<u8>,     // Search depth
}

impl GoParams {
    pub fn movetime(ms: u64) -> Self {
        Self {
            movetime: Some(ms),
            depth: None,
        }
    }
}

/// Result of a single search.
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    /// `None` when the engine reports `bestmove (none)`, e.g. in mate or stalemate.
    pub best_move: Option<Move>,
    pub ponder: Option<Move>,
    /// Last `info` line seen before `bestmove`.
    pub info: Option<EngineInfo>,
}

/// Engine analysis information
#[derive(Debug, Clone, Default)]
pub struct EngineInfo {
    pub depth: Option<u8>,
    pub seldepth: Option<u8>,
    pub time_ms: Option<u64>,
    pub nodes: Option<u64>,
    pub score: Option<Score>,
    pub pv: Vec<Move>, // Principal variation
    pub multipv: Option<u8>,
    pub currmove: Option<Move>,
    pub hashfull: Option<u16>,
    pub nps: Option<u64>,
}

#[derive(Debug, Clone)]
pub enum Score {
    Centipawns(i32),
    Mate(i8), // Negative for being mated
}

impl std::fmt::Display for Score {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Score::Centipawns(cp) => write!(f, "cp {}", cp),
            Score::Mate(n) => write!(f, "mate {}", n),
        }
    }
}
