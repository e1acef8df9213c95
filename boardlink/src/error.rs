//! Error types for the bridge

use engine::UciError;
use thiserror::Error;

pub type BridgeResult<T> = Result<T, BridgeError>;

#[derive(Error, Debug)]
pub enum BridgeError {
    /// The serial device could not be opened.
    #[error("failed to open serial port {port}: {source}")]
    SerialOpen {
        port: String,
        #[source]
        source: tokio_serial::Error,
    },

    /// The engine could not be launched or did not complete its handshake.
    #[error("failed to start engine: {0}")]
    EngineLaunch(#[source] UciError),

    /// Reading from the serial line failed while running.
    #[error("serial read failed: {0}")]
    SerialRead(#[source] std::io::Error),
}
