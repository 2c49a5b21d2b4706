//! Errors raised while a pipeline processes a connection.
//!
//! Every variant is local to one connection. The server logs it and keeps
//! accepting; sibling connections never observe it.

use std::io;

/// Pipeline and connection errors
#[derive(Debug)]
pub enum PipelineError {
    /// Bytes piled up past the frame limit without a delimiter.
    FrameTooLong { length: usize, max: usize },
    /// Malformed HTTP framing. No recovery mid-stream.
    ProtocolDecode(String),
    /// Underlying read/write failure.
    Transport(io::Error),
    /// An inbound unit fell off the end of the chain under strict routing.
    Unrouted { kind: &'static str },
    /// A unit other than raw bytes reached the transport.
    UnencodableMessage { kind: &'static str },
    /// Structural mutation after traffic started.
    Sealed,
    /// No stage is registered under this name.
    StageNotFound(String),
    /// A stage with this name is already registered.
    DuplicateStage(String),
    /// Response body compression failed.
    Compression(io::Error),
}

impl PipelineError {
    /// Whether the connection must be torn down after this error.
    ///
    /// Structural errors happen while wiring a pipeline, before any
    /// connection traffic exists.
    pub fn is_connection_fatal(&self) -> bool {
        !matches!(
            self,
            PipelineError::Sealed
                | PipelineError::StageNotFound(_)
                | PipelineError::DuplicateStage(_)
        )
    }
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::FrameTooLong { length, max } => {
                write!(f, "frame length {length} exceeds {max}")
            }
            PipelineError::ProtocolDecode(msg) => write!(f, "protocol decode error: {msg}"),
            PipelineError::Transport(e) => write!(f, "transport error: {e}"),
            PipelineError::Unrouted { kind } => {
                write!(f, "inbound {kind} reached the end of the pipeline unconsumed")
            }
            PipelineError::UnencodableMessage { kind } => {
                write!(f, "outbound {kind} reached the transport without being encoded")
            }
            PipelineError::Sealed => write!(f, "pipeline is sealed; stages can no longer change"),
            PipelineError::StageNotFound(name) => write!(f, "no stage named '{name}'"),
            PipelineError::DuplicateStage(name) => {
                write!(f, "a stage named '{name}' is already registered")
            }
            PipelineError::Compression(e) => write!(f, "compression failed: {e}"),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Transport(e) | PipelineError::Compression(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for PipelineError {
    fn from(e: io::Error) -> Self {
        PipelineError::Transport(e)
    }
}
