//! Delimiter-based frame decoder.

use crate::runtime::{Message, PipelineError, StageContext};
use bytes::{Buf, Bytes, BytesMut};
use tracing::trace;

/// Splits an arbitrarily chunked byte stream into delimiter-bounded frames.
///
/// Bytes accumulate until a delimiter shows up, so a delimiter split across
/// two reads is still found. When several delimiters are configured, the one
/// producing the shortest frame wins.
#[derive(Debug)]
pub struct FrameDecoder {
    delimiters: Vec<Bytes>,
    max_frame_length: usize,
    strip_delimiter: bool,
    collapse_delimiters: bool,
    buffer: BytesMut,
    /// Last emitted frame ended on a delimiter; used by collapse mode.
    after_delimiter: bool,
}

impl FrameDecoder {
    /// Create a decoder for a single delimiter.
    ///
    /// # Panics
    /// Panics if the delimiter is empty.
    pub fn new(delimiter: impl Into<Bytes>, max_frame_length: usize) -> Self {
        Self::with_delimiters(vec![delimiter.into()], max_frame_length)
    }

    /// Create a decoder matching any of several delimiters.
    ///
    /// # Panics
    /// Panics if no delimiter is given or one of them is empty.
    pub fn with_delimiters(delimiters: Vec<Bytes>, max_frame_length: usize) -> Self {
        assert!(!delimiters.is_empty(), "at least one delimiter is required");
        assert!(
            delimiters.iter().all(|d| !d.is_empty()),
            "delimiters must not be empty"
        );

        Self {
            delimiters,
            max_frame_length,
            strip_delimiter: true,
            collapse_delimiters: false,
            buffer: BytesMut::new(),
            after_delimiter: false,
        }
    }

    /// Keep or strip the delimiter from emitted frames (default: strip).
    pub fn strip_delimiter(mut self, strip: bool) -> Self {
        self.strip_delimiter = strip;
        self
    }

    /// Absorb runs of adjacent delimiters instead of emitting empty frames
    /// between them (default: off).
    pub fn collapse_delimiters(mut self, collapse: bool) -> Self {
        self.collapse_delimiters = collapse;
        self
    }

    /// Bytes waiting for a delimiter.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Append newly arrived bytes and return every complete frame.
    ///
    /// On [`PipelineError::FrameTooLong`] the offending bytes are discarded.
    pub fn decode(&mut self, input: &[u8]) -> Result<Vec<Bytes>, PipelineError> {
        self.buffer.extend_from_slice(input);

        let mut frames = Vec::new();
        while let Some(frame) = self.decode_one()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Drop buffered bytes. Returns how many were discarded.
    pub fn release(&mut self) -> usize {
        let discarded = self.buffer.len();
        self.buffer.clear();
        self.after_delimiter = false;
        discarded
    }

    pub(crate) fn on_inbound(
        &mut self,
        ctx: &mut StageContext,
        message: Message,
    ) -> Result<(), PipelineError> {
        match message {
            Message::Bytes(data) => {
                let frames = self.decode(&data)?;
                trace!(
                    frames = frames.len(),
                    buffered = self.buffer.len(),
                    "Decoded frames"
                );
                for frame in frames {
                    ctx.forward(Message::Frame(frame));
                }
            }
            other => ctx.forward(other),
        }
        Ok(())
    }

    fn decode_one(&mut self) -> Result<Option<Bytes>, PipelineError> {
        if self.collapse_delimiters && self.after_delimiter && !self.skip_delimiter_run() {
            return Ok(None);
        }

        let found = self
            .delimiters
            .iter()
            .filter_map(|d| find_subsequence(&self.buffer, d).map(|pos| (pos, d.len())))
            .min_by_key(|&(pos, _)| pos);

        match found {
            Some((pos, delimiter_len)) => {
                if pos > self.max_frame_length {
                    self.buffer.advance(pos + delimiter_len);
                    return Err(PipelineError::FrameTooLong {
                        length: pos,
                        max: self.max_frame_length,
                    });
                }

                let frame = if self.strip_delimiter {
                    let frame = self.buffer.split_to(pos).freeze();
                    self.buffer.advance(delimiter_len);
                    frame
                } else {
                    self.buffer.split_to(pos + delimiter_len).freeze()
                };
                self.after_delimiter = true;
                Ok(Some(frame))
            }
            None if self.buffer.len() > self.max_frame_length => {
                let length = self.buffer.len();
                self.buffer.clear();
                Err(PipelineError::FrameTooLong {
                    length,
                    max: self.max_frame_length,
                })
            }
            None => Ok(None),
        }
    }

    /// Consume delimiters at the head of the buffer.
    ///
    /// Returns false while the head could still be the start of a delimiter,
    /// in which case decoding waits for more bytes.
    fn skip_delimiter_run(&mut self) -> bool {
        loop {
            let leading = self
                .delimiters
                .iter()
                .find(|d| self.buffer.starts_with(d))
                .map(|d| d.len());
            match leading {
                Some(len) => self.buffer.advance(len),
                None => break,
            }
        }

        if self.buffer.is_empty()
            || self
                .delimiters
                .iter()
                .any(|d| d.len() > self.buffer.len() && d.starts_with(&self.buffer))
        {
            return false;
        }

        self.after_delimiter = false;
        true
    }
}

/// Find the first occurrence of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
