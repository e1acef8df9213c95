//! The bridge's control loop.
//!
//! A [`Controller`] owns the serial link, the engine and the pending line
//! buffer. It polls the link, dispatches every complete line in order and
//! answers each valid position with the engine's move. Errors inside a line
//! are logged and the loop moves on; only a failed serial read ends it.

use std::future::Future;

use engine::uci::format_uci_move;
use engine::{GoParams, MoveEngine};

use crate::config::LoopSettings;
use crate::error::{BridgeError, BridgeResult};
use crate::line_buffer::LineBuffer;
use crate::protocol::{self, Inbound};
use crate::serial::SerialLink;

/// What happened to a single dispatched line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    Blank,
    Ignored,
    InvalidPosition,
    NoMove,
    EngineFailed,
    /// The move was computed; `delivered` is false if writing it back failed.
    MoveSent { uci: String, delivered: bool },
}

pub struct Controller<L: SerialLink, E: MoveEngine> {
    link: L,
    engine: E,
    buffer: LineBuffer,
    settings: LoopSettings,
    read_buf: Vec<u8>,
}

impl<L: SerialLink, E: MoveEngine> Controller<L, E> {
    pub fn new(link: L, engine: E, settings: LoopSettings) -> Self {
        let read_buf = vec![0u8; settings.read_chunk.max(1)];
        Self {
            link,
            engine,
            buffer: LineBuffer::new(),
            settings,
            read_buf,
        }
    }

    /// Poll until `shutdown` resolves or the serial link fails.
    ///
    /// Resources are not released here; call [`Controller::shutdown`] afterwards
    /// whatever this returns.
    pub async fn run<S>(&mut self, shutdown: S) -> BridgeResult<()>
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut relayed = 0usize;
        let mut last_move = None;

        let result = loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => break Ok(()),

                result = self.poll_once() => match result {
                    Ok(outcomes) => {
                        for outcome in outcomes {
                            if let LineOutcome::MoveSent { uci, delivered: true } = outcome {
                                relayed += 1;
                                last_move = Some(uci);
                            }
                        }
                    }
                    Err(e) => break Err(e),
                },
            }

            tokio::select! {
                biased;

                _ = &mut shutdown => break Ok(()),

                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        };

        if result.is_ok() {
            tracing::info!("Shutdown requested");
        }
        tracing::info!(
            "Relayed {} moves to the board (last: {})",
            relayed,
            last_move.as_deref().unwrap_or("none")
        );
        result
    }

    /// One bounded read followed by dispatch of every complete line.
    pub async fn poll_once(&mut self) -> BridgeResult<Vec<LineOutcome>> {
        let read = tokio::time::timeout(
            self.settings.read_timeout,
            self.link.read_chunk(&mut self.read_buf),
        )
        .await;

        let n = match read {
            Err(_) => return Ok(Vec::new()),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::TimedOut => return Ok(Vec::new()),
            Ok(Err(e)) => {
                tracing::error!("Serial read failed: {}", e);
                return Err(BridgeError::SerialRead(e));
            }
            Ok(Ok(n)) => n,
        };

        if n == 0 {
            return Ok(Vec::new());
        }
        tracing::trace!("Read {} bytes from serial", n);
        self.buffer.push(&self.read_buf[..n]);

        let mut outcomes = Vec::new();
        while let Some(line) = self.buffer.next_line() {
            outcomes.push(self.dispatch_line(&line).await);
        }
        Ok(outcomes)
    }

    /// Handle one complete line. Never fails; problems are logged.
    pub async fn dispatch_line(&mut self, line: &str) -> LineOutcome {
        let fen = match protocol::parse_line(line) {
            None => return LineOutcome::Blank,
            Some(Inbound::Other(text)) => {
                tracing::info!("Ignored line: {}", text);
                return LineOutcome::Ignored;
            }
            Some(Inbound::Position(fen)) => fen,
        };

        let board = match protocol::parse_position(&fen) {
            Ok(board) => board,
            Err(e) => {
                tracing::warn!("Invalid FEN received: {:?}: {}", fen, e);
                return LineOutcome::InvalidPosition;
            }
        };

        let params = GoParams::movetime(self.settings.move_time_ms);
        let outcome = match self.engine.best_move(&board, &params).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("Engine error: {}", e);
                return LineOutcome::EngineFailed;
            }
        };

        let Some(mv) = outcome.best_move else {
            tracing::warn!("Engine returned no move for {}", fen);
            return LineOutcome::NoMove;
        };

        if let Some(info) = &outcome.info {
            tracing::debug!(
                depth = ?info.depth,
                seldepth = ?info.seldepth,
                multipv = ?info.multipv,
                score = %info.score.as_ref().map(ToString::to_string).unwrap_or_default(),
                nodes = ?info.nodes,
                nps = ?info.nps,
                time_ms = ?info.time_ms,
                hashfull = ?info.hashfull,
                currmove = %info.currmove.as_ref().map(format_uci_move).unwrap_or_default(),
                pv = %info.pv.iter().map(format_uci_move).collect::<Vec<_>>().join(" "),
                "Search finished"
            );
        }

        let uci = format_uci_move(&mv);
        let command = protocol::format_move_command(&mv);
        let delivered = match self.link.write_line(&command).await {
            Ok(()) => {
                tracing::info!("Sent to board: {}", command.trim_end());
                true
            }
            Err(e) => {
                tracing::error!("Failed to send {} to board: {}", command.trim_end(), e);
                false
            }
        };

        LineOutcome::MoveSent { uci, delivered }
    }

    /// Quit the engine and close the serial link.
    ///
    /// Consumes the controller, so each resource is released exactly once.
    pub async fn shutdown(mut self) {
        tracing::info!("Shutting down");

        if let Err(e) = self.engine.quit().await {
            tracing::warn!("Engine did not quit cleanly: {}", e);
        }

        if let Err(e) = self.link.close().await {
            tracing::warn!("Failed to close serial port: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cozy_chess::Board;
    use engine::uci::parse_uci_move;
    use engine::{EngineInfo, Score, SearchOutcome, UciError};
    use std::collections::VecDeque;
    use std::io;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

    #[derive(Default)]
    struct LinkLog {
        written: Vec<String>,
        closes: usize,
    }

    /// Serves scripted reads, then reports nothing available.
    struct FakeLink {
        reads: VecDeque<io::Result<Vec<u8>>>,
        log: Arc<Mutex<LinkLog>>,
        fail_writes: bool,
    }

    impl FakeLink {
        fn new(reads: &[&[u8]]) -> (Self, Arc<Mutex<LinkLog>>) {
            let log = Arc::new(Mutex::new(LinkLog::default()));
            let link = Self {
                reads: reads.iter().map(|r| Ok(r.to_vec())).collect(),
                log: log.clone(),
                fail_writes: false,
            };
            (link, log)
        }
    }

    #[async_trait]
    impl SerialLink for FakeLink {
        async fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.reads.pop_front() {
                Some(Ok(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                Some(Err(e)) => Err(e),
                None => Ok(0),
            }
        }

        async fn write_line(&mut self, line: &str) -> io::Result<()> {
            if self.fail_writes {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"));
            }
            self.log.lock().unwrap().written.push(line.to_string());
            Ok(())
        }

        async fn close(&mut self) -> io::Result<()> {
            self.log.lock().unwrap().closes += 1;
            Ok(())
        }
    }

    #[derive(Default)]
    struct EngineLog {
        positions: Vec<String>,
        movetimes: Vec<Option<u64>>,
        quits: usize,
    }

    enum Reply {
        Move(&'static str),
        NoMove,
        Fail,
    }

    struct FakeEngine {
        reply: Reply,
        log: Arc<Mutex<EngineLog>>,
    }

    impl FakeEngine {
        fn new(reply: Reply) -> (Self, Arc<Mutex<EngineLog>>) {
            let log = Arc::new(Mutex::new(EngineLog::default()));
            (
                Self {
                    reply,
                    log: log.clone(),
                },
                log,
            )
        }
    }

    #[async_trait]
    impl MoveEngine for FakeEngine {
        async fn best_move(
            &mut self,
            board: &Board,
            params: &GoParams,
        ) -> Result<SearchOutcome, UciError> {
            {
                let mut log = self.log.lock().unwrap();
                log.positions.push(board.to_string());
                log.movetimes.push(params.movetime);
            }
            match self.reply {
                Reply::Move(text) => {
                    let mv = parse_uci_move(text)?;
                    Ok(SearchOutcome {
                        best_move: Some(mv),
                        ponder: None,
                        info: Some(EngineInfo {
                            depth: Some(8),
                            score: Some(Score::Centipawns(24)),
                            currmove: Some(mv),
                            pv: vec![mv],
                            ..Default::default()
                        }),
                    })
                }
                Reply::NoMove => Ok(SearchOutcome::default()),
                Reply::Fail => Err(UciError::EngineExited),
            }
        }

        async fn quit(&mut self) -> Result<(), UciError> {
            self.log.lock().unwrap().quits += 1;
            Ok(())
        }
    }

    fn fast_settings() -> LoopSettings {
        LoopSettings {
            read_timeout: Duration::from_millis(20),
            poll_interval: Duration::from_millis(1),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_valid_line_processed_and_junk_skipped() {
        let input = format!("FEN:{}\nJUNK\n", START_FEN);
        let (link, link_log) = FakeLink::new(&[input.as_bytes()]);
        let (engine, engine_log) = FakeEngine::new(Reply::Move("e2e4"));
        let mut controller = Controller::new(link, engine, fast_settings());

        let outcomes = controller.poll_once().await.unwrap();

        assert_eq!(
            outcomes,
            vec![
                LineOutcome::MoveSent {
                    uci: "e2e4".to_string(),
                    delivered: true
                },
                LineOutcome::Ignored,
            ]
        );
        assert_eq!(engine_log.lock().unwrap().positions.len(), 1);
        assert_eq!(link_log.lock().unwrap().written, vec!["MOVE:e2e4\n"]);
    }

    #[tokio::test]
    async fn test_split_read_is_reassembled() {
        let tail = format!("N:{}\n", START_FEN);
        let (link, link_log) = FakeLink::new(&[b"FE", tail.as_bytes()]);
        let (engine, engine_log) = FakeEngine::new(Reply::Move("g1f3"));
        let mut controller = Controller::new(link, engine, fast_settings());

        assert!(controller.poll_once().await.unwrap().is_empty());
        assert!(engine_log.lock().unwrap().positions.is_empty());

        let outcomes = controller.poll_once().await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(engine_log.lock().unwrap().positions.len(), 1);
        assert_eq!(link_log.lock().unwrap().written, vec!["MOVE:g1f3\n"]);
    }

    #[tokio::test]
    async fn test_invalid_position_is_contained() {
        let (link, link_log) = FakeLink::new(&[b"FEN:this is not chess\nFEN:\n"]);
        let (engine, engine_log) = FakeEngine::new(Reply::Move("e2e4"));
        let mut controller = Controller::new(link, engine, fast_settings());

        let outcomes = controller.poll_once().await.unwrap();

        assert_eq!(
            outcomes,
            vec![LineOutcome::InvalidPosition, LineOutcome::InvalidPosition]
        );
        assert!(engine_log.lock().unwrap().positions.is_empty());
        assert!(link_log.lock().unwrap().written.is_empty());
    }

    #[tokio::test]
    async fn test_start_position_yields_exactly_one_move_line() {
        let (link, link_log) = FakeLink::new(&[]);
        let (engine, engine_log) = FakeEngine::new(Reply::Move("e2e4"));
        let mut controller = Controller::new(link, engine, fast_settings());

        let outcome = controller
            .dispatch_line(&format!("FEN:{}\r", START_FEN))
            .await;

        assert!(matches!(outcome, LineOutcome::MoveSent { delivered: true, .. }));
        let written = link_log.lock().unwrap().written.clone();
        assert_eq!(written.len(), 1);
        let line = &written[0];
        assert!(line.starts_with("MOVE:"));
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        assert_eq!(engine_log.lock().unwrap().movetimes, vec![Some(1000)]);
    }

    #[tokio::test]
    async fn test_truncated_fen_from_board_is_answered() {
        let (link, link_log) =
            FakeLink::new(&[b"FEN:rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w\n"]);
        let (engine, engine_log) = FakeEngine::new(Reply::Move("e2e4"));
        let mut controller = Controller::new(link, engine, fast_settings());

        let outcomes = controller.poll_once().await.unwrap();

        assert_eq!(
            outcomes,
            vec![LineOutcome::MoveSent {
                uci: "e2e4".to_string(),
                delivered: true
            }]
        );
        assert_eq!(engine_log.lock().unwrap().positions.len(), 1);
        assert_eq!(link_log.lock().unwrap().written, vec!["MOVE:e2e4\n"]);
    }

    #[tokio::test]
    async fn test_engine_without_move_sends_nothing() {
        let (link, link_log) = FakeLink::new(&[]);
        let (engine, _) = FakeEngine::new(Reply::NoMove);
        let mut controller = Controller::new(link, engine, fast_settings());

        let outcome = controller.dispatch_line(&format!("FEN:{}", START_FEN)).await;

        assert_eq!(outcome, LineOutcome::NoMove);
        assert!(link_log.lock().unwrap().written.is_empty());
    }

    #[tokio::test]
    async fn test_engine_error_does_not_stop_processing() {
        let input = format!("FEN:{}\nFEN:{}\n", START_FEN, START_FEN);
        let (link, _) = FakeLink::new(&[input.as_bytes()]);
        let (engine, engine_log) = FakeEngine::new(Reply::Fail);
        let mut controller = Controller::new(link, engine, fast_settings());

        let outcomes = controller.poll_once().await.unwrap();

        assert_eq!(
            outcomes,
            vec![LineOutcome::EngineFailed, LineOutcome::EngineFailed]
        );
        assert_eq!(engine_log.lock().unwrap().positions.len(), 2);
    }

    #[tokio::test]
    async fn test_write_failure_is_not_fatal() {
        let (mut link, _) = FakeLink::new(&[]);
        link.fail_writes = true;
        let (engine, _) = FakeEngine::new(Reply::Move("e2e4"));
        let mut controller = Controller::new(link, engine, fast_settings());

        let outcome = controller.dispatch_line(&format!("FEN:{}", START_FEN)).await;

        assert_eq!(
            outcome,
            LineOutcome::MoveSent {
                uci: "e2e4".to_string(),
                delivered: false
            }
        );
    }

    #[tokio::test]
    async fn test_blank_lines_are_skipped() {
        let (link, _) = FakeLink::new(&[b"\n  \r\n"]);
        let (engine, engine_log) = FakeEngine::new(Reply::Move("e2e4"));
        let mut controller = Controller::new(link, engine, fast_settings());

        let outcomes = controller.poll_once().await.unwrap();

        assert_eq!(outcomes, vec![LineOutcome::Blank, LineOutcome::Blank]);
        assert!(engine_log.lock().unwrap().positions.is_empty());
    }

    #[tokio::test]
    async fn test_interrupt_releases_resources_once() {
        let input = format!("FEN:{}\n", START_FEN);
        let (link, link_log) = FakeLink::new(&[input.as_bytes()]);
        let (engine, engine_log) = FakeEngine::new(Reply::Move("e2e4"));
        let mut controller = Controller::new(link, engine, fast_settings());

        let (interrupt_tx, interrupt_rx) = tokio::sync::oneshot::channel::<()>();
        let interrupt = async move {
            let _ = interrupt_rx.await;
        };
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = interrupt_tx.send(());
        });

        controller.run(interrupt).await.unwrap();
        controller.shutdown().await;

        assert_eq!(link_log.lock().unwrap().closes, 1);
        assert_eq!(engine_log.lock().unwrap().quits, 1);
        assert_eq!(link_log.lock().unwrap().written, vec!["MOVE:e2e4\n"]);
    }

    #[tokio::test]
    async fn test_read_failure_ends_loop_and_cleanup_still_runs() {
        let (mut link, link_log) = FakeLink::new(&[]);
        link.reads
            .push_back(Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged")));
        let (engine, engine_log) = FakeEngine::new(Reply::Move("e2e4"));
        let mut controller = Controller::new(link, engine, fast_settings());

        let result = controller.run(std::future::pending()).await;
        controller.shutdown().await;

        assert!(matches!(result, Err(BridgeError::SerialRead(_))));
        assert_eq!(link_log.lock().unwrap().closes, 1);
        assert_eq!(engine_log.lock().unwrap().quits, 1);
    }
}
