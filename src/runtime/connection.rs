//! Connection driver.
//!
//! Owns one transport and one pipeline. Each read is fed into the pipeline
//! as a single `Bytes` unit; every transmit the pipeline produces is written
//! and flushed before the next read.

use crate::runtime::error::PipelineError;
use crate::runtime::message::{Message, Transmit};
use crate::runtime::pipeline::Pipeline;
use bytes::BytesMut;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

/// Read buffer size
const BUFFER_SIZE: usize = 16 * 1024;

/// Why a connection ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed its side.
    PeerClosed,
    /// A stage asked for the connection to be closed.
    Requested,
    /// No data arrived within the idle timeout.
    IdleTimeout,
}

pub struct Connection<S> {
    stream: S,
    pipeline: Pipeline,
    buffer: BytesMut,
    idle_timeout: Option<Duration>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, pipeline: Pipeline) -> Self {
        Self {
            stream,
            pipeline,
            buffer: BytesMut::with_capacity(BUFFER_SIZE),
            idle_timeout: None,
        }
    }

    /// Close the connection after `timeout` without inbound data.
    /// `None` disables the timeout.
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Drive the connection until it closes.
    ///
    /// The pipeline is released on every exit path. On error, transmits not
    /// yet written are dropped.
    pub async fn run(mut self) -> Result<CloseReason, PipelineError> {
        self.pipeline.seal();
        let result = self.serve().await;
        self.pipeline.fire_inactive();
        result
    }

    async fn serve(&mut self) -> Result<CloseReason, PipelineError> {
        loop {
            self.buffer.reserve(BUFFER_SIZE);

            let n = match self.idle_timeout {
                Some(limit) => {
                    match tokio::time::timeout(limit, self.stream.read_buf(&mut self.buffer)).await
                    {
                        Ok(result) => result?,
                        Err(_) => {
                            debug!(timeout_ms = limit.as_millis() as u64, "Idle timeout");
                            self.stream.shutdown().await?;
                            return Ok(CloseReason::IdleTimeout);
                        }
                    }
                }
                None => self.stream.read_buf(&mut self.buffer).await?,
            };

            if n == 0 {
                trace!("Connection closed by peer");
                return Ok(CloseReason::PeerClosed);
            }

            let data = self.buffer.split().freeze();
            trace!(len = data.len(), "Read");
            self.pipeline.fire_inbound(Message::Bytes(data))?;

            if self.write_transmits().await? {
                return Ok(CloseReason::Requested);
            }
        }
    }

    /// Write everything the pipeline queued. Returns true once a close
    /// marker has been honoured.
    async fn write_transmits(&mut self) -> Result<bool, PipelineError> {
        let transmits = self.pipeline.drain_transmits();
        if transmits.is_empty() {
            return Ok(false);
        }

        for transmit in transmits {
            match transmit {
                Transmit::Data(data) => self.stream.write_all(&data).await?,
                Transmit::Close => {
                    self.stream.flush().await?;
                    self.stream.shutdown().await?;
                    debug!("Connection closed after flush");
                    return Ok(true);
                }
            }
        }
        self.stream.flush().await?;
        Ok(false)
    }
}
