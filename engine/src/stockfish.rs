use crate::uci::{format_uci_move, parse_uci_message, UciMessage};
use crate::{EngineInfo, GoParams, MoveEngine, SearchOutcome, UciError};
use async_trait::async_trait;
use cozy_chess::Board;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::mpsc;

/// Fallback move time when [`GoParams`] sets neither movetime nor depth.
const DEFAULT_MOVETIME_MS: u64 = 1000;

/// Upper bound for a depth-limited search.
const DEPTH_SEARCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Configuration for launching and tuning a UCI engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Engine executable. `None` looks Stockfish up with [`find_stockfish_path`].
    pub path: Option<PathBuf>,
    pub args: Vec<String>,
    pub skill_level: Option<u8>,
    pub threads: Option<u32>,
    pub hash_mb: Option<u32>,
    /// How long to wait for `uciok` / `readyok`.
    pub handshake_timeout: Duration,
    /// Slack on top of movetime before `stop` is sent, and again after it.
    pub search_grace: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            path: None,
            args: Vec::new(),
            skill_level: None,
            threads: None,
            hash_mb: None,
            handshake_timeout: Duration::from_secs(10),
            search_grace: Duration::from_secs(5),
        }
    }
}

/// A UCI engine running as a child process.
///
/// Commands are written straight to stdin; a reader task parses stdout and
/// forwards every recognised message over a channel. The channel closing
/// means the engine's stdout hit EOF.
pub struct UciEngine {
    process: Child,
    stdin: ChildStdin,
    messages: mpsc::Receiver<UciMessage>,
    name: Option<String>,
    config: EngineConfig,
}

impl UciEngine {
    /// Spawn the engine and complete the UCI handshake.
    #[tracing::instrument(level = "info")]
    pub async fn spawn(config: EngineConfig) -> Result<Self, UciError> {
        let path = match &config.path {
            Some(path) => path.clone(),
            None => find_stockfish_path().ok_or(UciError::EngineNotFound)?,
        };
        tracing::info!("Launching engine at {:?}", path);

        let mut process = tokio::process::Command::new(&path)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| UciError::Spawn {
                path: path.clone(),
                source,
            })?;

        let stdin = process.stdin.take().ok_or(UciError::NoStdin)?;
        let stdout = process.stdout.take().ok_or(UciError::NoStdout)?;

        let (message_tx, messages) = mpsc::channel::<UciMessage>(64);
        tokio::spawn(read_output_loop(BufReader::new(stdout), message_tx));

        let mut engine = Self {
            process,
            stdin,
            messages,
            name: None,
            config,
        };

        engine.send_command("uci").await?;
        let handshake_timeout = engine.config.handshake_timeout;
        let mut name = None;
        engine
            .recv_until("uciok", handshake_timeout, |msg| match msg {
                UciMessage::Id { name: key, value } if key == "name" => {
                    name = Some(value);
                    None
                }
                UciMessage::UciOk => Some(()),
                _ => None,
            })
            .await?;
        engine.name = name;
        tracing::debug!("Received uciok from {:?}", engine.name);

        engine.apply_options().await?;
        engine.sync_ready().await?;

        tracing::info!(
            "Engine ready: {}",
            engine.name.as_deref().unwrap_or("<unnamed>")
        );
        Ok(engine)
    }

    /// Engine name from `id name`, if it sent one.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    async fn apply_options(&mut self) -> Result<(), UciError> {
        if let Some(threads) = self.config.threads {
            let threads = threads.clamp(1, 16);
            tracing::info!("Setting Threads to {}", threads);
            self.set_option("Threads", &threads.to_string()).await?;
        }

        if let Some(hash_mb) = self.config.hash_mb {
            let hash_mb = hash_mb.clamp(1, 2048);
            tracing::info!("Setting Hash to {} MB", hash_mb);
            self.set_option("Hash", &hash_mb.to_string()).await?;
        }

        if let Some(level) = self.config.skill_level {
            let level = level.min(20);
            tracing::info!("Setting skill level to {}", level);
            self.set_option("Skill Level", &level.to_string()).await?;
        }

        Ok(())
    }

    async fn set_option(&mut self, name: &str, value: &str) -> Result<(), UciError> {
        self.send_command(&format!("setoption name {} value {}", name, value))
            .await
    }

    /// `isready` / `readyok` round trip. Also drains anything stale.
    async fn sync_ready(&mut self) -> Result<(), UciError> {
        self.send_command("isready").await?;
        let timeout = self.config.handshake_timeout;
        self.recv_until("readyok", timeout, |msg| {
            matches!(msg, UciMessage::ReadyOk).then_some(())
        })
        .await
    }

    async fn send_command(&mut self, cmd: &str) -> Result<(), UciError> {
        tracing::trace!("UCI >> {}", cmd);
        self.stdin.write_all(cmd.as_bytes()).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }

    /// Feed incoming messages to `f` until it yields a value.
    async fn recv_until<T, F>(
        &mut self,
        what: &'static str,
        timeout: Duration,
        mut f: F,
    ) -> Result<T, UciError>
    where
        F: FnMut(UciMessage) -> Option<T>,
    {
        let messages = &mut self.messages;
        let wait = async {
            while let Some(msg) = messages.recv().await {
                if let Some(value) = f(msg) {
                    return Ok(value);
                }
            }
            Err(UciError::EngineExited)
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("Timed out after {:?} waiting for {}", timeout, what);
                Err(UciError::Timeout(what, timeout))
            }
        }
    }

    /// Wait for `bestmove`, keeping the latest `info` line.
    async fn collect_search(
        &mut self,
        timeout: Duration,
        last_info: &mut Option<EngineInfo>,
    ) -> Result<SearchOutcome, UciError> {
        let (best_move, ponder) = self
            .recv_until("bestmove", timeout, |msg| match msg {
                UciMessage::Info(info) => {
                    if info.depth.is_some() || info.score.is_some() {
                        *last_info = Some(info);
                    }
                    None
                }
                UciMessage::BestMove { mv, ponder } => Some((mv, ponder)),
                _ => None,
            })
            .await?;

        Ok(SearchOutcome {
            best_move,
            ponder,
            info: last_info.take(),
        })
    }
}

#[async_trait]
impl MoveEngine for UciEngine {
    #[tracing::instrument(level = "debug", skip(self, board))]
    async fn best_move(
        &mut self,
        board: &Board,
        params: &GoParams,
    ) -> Result<SearchOutcome, UciError> {
        self.sync_ready().await?;

        let fen = board.to_string();
        tracing::debug!("Setting position: FEN={}", fen);
        self.send_command(&format!("position fen {}", fen)).await?;

        let (go_cmd, budget) = match (params.movetime, params.depth) {
            (Some(movetime), _) => (
                format!("go movetime {}", movetime),
                Duration::from_millis(movetime),
            ),
            (None, Some(depth)) => (format!("go depth {}", depth), DEPTH_SEARCH_TIMEOUT),
            (None, None) => (
                format!("go movetime {}", DEFAULT_MOVETIME_MS),
                Duration::from_millis(DEFAULT_MOVETIME_MS),
            ),
        };
        tracing::debug!("Starting engine calculation: {}", go_cmd);
        self.send_command(&go_cmd).await?;

        let grace = self.config.search_grace;
        let mut last_info = None;
        let first_attempt = self.collect_search(budget + grace, &mut last_info).await;
        match first_attempt {
            Err(UciError::Timeout(..)) => {
                tracing::warn!("Engine overran its budget, sending stop");
                self.send_command("stop").await?;
                self.collect_search(grace, &mut last_info).await
            }
            result => result,
        }
    }

    async fn quit(&mut self) -> Result<(), UciError> {
        tracing::info!("Sending quit command to engine");
        if let Err(e) = self.send_command("quit").await {
            tracing::debug!("Engine stdin already closed: {}", e);
        }

        let waited = tokio::time::timeout(Duration::from_secs(1), self.process.wait()).await;
        match waited {
            Ok(Ok(status)) => {
                tracing::debug!("Engine exited with {}", status);
                Ok(())
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                tracing::warn!("Engine did not exit after quit, killing it");
                self.process.kill().await?;
                Ok(())
            }
        }
    }
}

async fn read_output_loop(mut reader: BufReader<ChildStdout>, tx: mpsc::Sender<UciMessage>) {
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                tracing::debug!("Engine stdout EOF");
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                tracing::trace!("UCI << {}", trimmed);
                match parse_uci_message(trimmed) {
                    Ok(msg) => {
                        if let UciMessage::BestMove { mv: Some(mv), .. } = &msg {
                            tracing::debug!("Received bestmove {}", format_uci_move(mv));
                        }
                        if tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::trace!("Skipping engine output: {}", e),
                }
            }
            Err(e) => {
                tracing::error!("Error reading from engine stdout: {}", e);
                break;
            }
        }
    }
}

/// Find Stockfish executable in common locations, then on `PATH`.
pub fn find_stockfish_path() -> Option<PathBuf> {
    let known = [
        "/usr/local/bin/stockfish",
        "/usr/bin/stockfish",
        "/opt/homebrew/bin/stockfish",
        "/usr/games/stockfish",
    ];

    if let Some(path) = known.iter().map(Path::new).find(|p| p.is_file()) {
        return Some(path.to_path_buf());
    }

    let search_path = std::env::var_os("PATH")?;
    std::env::split_paths(&search_path)
        .map(|dir| dir.join("stockfish"))
        .find(|candidate| candidate.is_file())
}
