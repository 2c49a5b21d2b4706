//! HTTP/1.1 server codec.
//!
//! Inbound, wire bytes become a stream of [`HttpObject`] fragments: one
//! `Head`, zero or more `Content` chunks, then `Last`. Outbound, a
//! [`FullResponse`] is serialized to wire bytes.

use super::message::{Headers, HttpObject, RequestHead, Version};
use crate::runtime::{Message, PipelineError, StageContext};
use bytes::{Buf, BytesMut};
use tracing::trace;

/// Longest accepted request line.
pub const MAX_INITIAL_LINE_LENGTH: usize = 4096;

/// Largest accepted header block (excluding the request line).
pub const MAX_HEADER_SIZE: usize = 8192;

/// Largest body chunk emitted as a single `Content` fragment.
pub const MAX_CHUNK_SIZE: usize = 8192;

/// Maximum number of request headers
const MAX_HEADERS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    /// Waiting for a complete request line and header block.
    ReadHead,
    /// Fixed-length body, bytes still expected.
    ReadFixed(u64),
    /// Waiting for a chunk-size line.
    ReadChunkSize,
    /// Inside chunk data, bytes still expected.
    ReadChunk(usize),
    /// Waiting for the CRLF after chunk data.
    ReadChunkDelimiter,
    /// Reading trailer lines after the last chunk.
    ReadTrailers,
}

/// Request decoder and response encoder.
#[derive(Debug)]
pub struct HttpCodec {
    buffer: BytesMut,
    state: DecodeState,
    trailers: Headers,
    /// Bytes of trailer lines consumed for the current request.
    trailer_bytes: usize,
    max_initial_line_length: usize,
    max_header_size: usize,
    max_chunk_size: usize,
}

impl Default for HttpCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpCodec {
    /// Create a codec with the default size limits.
    pub fn new() -> Self {
        Self::with_limits(MAX_INITIAL_LINE_LENGTH, MAX_HEADER_SIZE, MAX_CHUNK_SIZE)
    }

    pub fn with_limits(
        max_initial_line_length: usize,
        max_header_size: usize,
        max_chunk_size: usize,
    ) -> Self {
        Self {
            buffer: BytesMut::new(),
            state: DecodeState::ReadHead,
            trailers: Headers::new(),
            trailer_bytes: 0,
            max_initial_line_length,
            max_header_size,
            max_chunk_size: max_chunk_size.max(1),
        }
    }

    /// Append wire bytes and return every fragment that is now complete.
    pub fn decode(&mut self, input: &[u8]) -> Result<Vec<HttpObject>, PipelineError> {
        self.buffer.extend_from_slice(input);

        let mut objects = Vec::new();
        while let Some(object) = self.decode_one()? {
            objects.push(object);
        }
        Ok(objects)
    }

    /// Drop partial input. Returns how many bytes were discarded.
    pub fn release(&mut self) -> usize {
        let discarded = self.buffer.len();
        self.buffer.clear();
        self.trailers = Headers::new();
        self.trailer_bytes = 0;
        self.state = DecodeState::ReadHead;
        discarded
    }

    pub(crate) fn on_inbound(
        &mut self,
        ctx: &mut StageContext,
        message: Message,
    ) -> Result<(), PipelineError> {
        match message {
            Message::Bytes(data) => {
                for object in self.decode(&data)? {
                    ctx.forward(Message::Http(object));
                }
            }
            other => ctx.forward(other),
        }
        Ok(())
    }

    pub(crate) fn on_outbound(
        &mut self,
        ctx: &mut StageContext,
        message: Message,
    ) -> Result<(), PipelineError> {
        match message {
            Message::Response(response) => {
                trace!(status = response.status.code(), "Encoding response");
                ctx.forward(Message::Bytes(response.encode()));
            }
            other => ctx.forward(other),
        }
        Ok(())
    }

    fn decode_one(&mut self) -> Result<Option<HttpObject>, PipelineError> {
        loop {
            match self.state {
                DecodeState::ReadHead => return self.decode_head(),

                DecodeState::ReadFixed(0) => {
                    self.state = DecodeState::ReadHead;
                    return Ok(Some(HttpObject::Last {
                        trailers: Headers::new(),
                    }));
                }

                DecodeState::ReadFixed(remaining) => {
                    if self.buffer.is_empty() {
                        return Ok(None);
                    }
                    let take = self
                        .buffer
                        .len()
                        .min(self.max_chunk_size)
                        .min(usize::try_from(remaining).unwrap_or(usize::MAX));
                    self.state = DecodeState::ReadFixed(remaining - take as u64);
                    let chunk = self.buffer.split_to(take).freeze();
                    return Ok(Some(HttpObject::Content(chunk)));
                }

                DecodeState::ReadChunkSize => {
                    let Some(line_end) = find_crlf(&self.buffer) else {
                        if self.buffer.len() > self.max_initial_line_length {
                            return Err(decode_error("chunk size line too long"));
                        }
                        return Ok(None);
                    };
                    let size = parse_chunk_size(&self.buffer[..line_end])?;
                    self.buffer.advance(line_end + 2);
                    self.state = if size == 0 {
                        DecodeState::ReadTrailers
                    } else {
                        DecodeState::ReadChunk(size)
                    };
                }

                DecodeState::ReadChunk(remaining) => {
                    if self.buffer.is_empty() {
                        return Ok(None);
                    }
                    let take = self.buffer.len().min(self.max_chunk_size).min(remaining);
                    self.state = if take == remaining {
                        DecodeState::ReadChunkDelimiter
                    } else {
                        DecodeState::ReadChunk(remaining - take)
                    };
                    let chunk = self.buffer.split_to(take).freeze();
                    return Ok(Some(HttpObject::Content(chunk)));
                }

                DecodeState::ReadChunkDelimiter => {
                    if self.buffer.len() < 2 {
                        return Ok(None);
                    }
                    if &self.buffer[..2] != b"\r\n" {
                        return Err(decode_error("missing CRLF after chunk data"));
                    }
                    self.buffer.advance(2);
                    self.state = DecodeState::ReadChunkSize;
                }

                DecodeState::ReadTrailers => {
                    let Some(line_end) = find_crlf(&self.buffer) else {
                        if self.trailer_bytes + self.buffer.len() > self.max_header_size {
                            return Err(decode_error("trailer section too large"));
                        }
                        return Ok(None);
                    };
                    if line_end == 0 {
                        self.buffer.advance(2);
                        self.state = DecodeState::ReadHead;
                        self.trailer_bytes = 0;
                        let trailers = std::mem::take(&mut self.trailers);
                        return Ok(Some(HttpObject::Last { trailers }));
                    }

                    // The whole trailer section shares the header size limit.
                    self.trailer_bytes += line_end + 2;
                    if self.trailer_bytes > self.max_header_size {
                        return Err(decode_error("trailer section too large"));
                    }
                    if self.trailers.len() >= MAX_HEADERS {
                        return Err(decode_error("too many trailers"));
                    }

                    let line = self.buffer.split_to(line_end);
                    self.buffer.advance(2);
                    let (name, value) = parse_header_line(&line)?;
                    self.trailers.append(name, value);
                }
            }
        }
    }

    fn decode_head(&mut self) -> Result<Option<HttpObject>, PipelineError> {
        // Tolerate stray line breaks between requests.
        while self.buffer.starts_with(b"\r\n") || self.buffer.starts_with(b"\n") {
            let skip = if self.buffer[0] == b'\r' { 2 } else { 1 };
            self.buffer.advance(skip);
        }

        let max_head = self.max_initial_line_length + self.max_header_size;
        let line_end = find_line_end(&self.buffer);

        match line_end {
            Some(end) if end > self.max_initial_line_length => {
                return Err(decode_error("request line too long"));
            }
            None if self.buffer.len() > self.max_initial_line_length => {
                return Err(decode_error("request line too long"));
            }
            _ => {}
        }

        let Some(head_len) = find_head_end(&self.buffer) else {
            if self.buffer.len() > max_head {
                return Err(decode_error("request head too large"));
            }
            return Ok(None);
        };
        if head_len > max_head {
            return Err(decode_error("request head too large"));
        }

        let head = parse_head(&self.buffer[..head_len])?;
        self.buffer.advance(head_len);

        self.state = body_state(&head)?;
        trace!(
            method = %head.method,
            uri = %head.uri,
            state = ?self.state,
            "Decoded request head"
        );
        Ok(Some(HttpObject::Head(head)))
    }
}

fn decode_error(msg: &str) -> PipelineError {
    PipelineError::ProtocolDecode(msg.to_string())
}

fn parse_head(raw: &[u8]) -> Result<RequestHead, PipelineError> {
    let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut request = httparse::Request::new(&mut slots);

    match request.parse(raw) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => return Err(decode_error("incomplete request head")),
        Err(e) => {
            return Err(PipelineError::ProtocolDecode(format!(
                "malformed request head: {e}"
            )))
        }
    }

    let version = match request.version {
        Some(0) => Version::Http10,
        _ => Version::Http11,
    };

    let mut headers = Headers::new();
    for header in request.headers.iter() {
        headers.append(
            header.name,
            String::from_utf8_lossy(header.value).into_owned(),
        );
    }

    Ok(RequestHead {
        method: request.method.unwrap_or_default().to_string(),
        uri: request.path.unwrap_or_default().to_string(),
        version,
        headers,
    })
}

/// Decide how the body is framed.
fn body_state(head: &RequestHead) -> Result<DecodeState, PipelineError> {
    if head.is_chunked() {
        return Ok(DecodeState::ReadChunkSize);
    }

    let mut length: Option<u64> = None;
    for value in head.headers.get_all("content-length") {
        let parsed: u64 = value
            .trim()
            .parse()
            .map_err(|_| decode_error("invalid Content-Length"))?;
        if length.is_some_and(|l| l != parsed) {
            return Err(decode_error("conflicting Content-Length values"));
        }
        length = Some(parsed);
    }

    Ok(DecodeState::ReadFixed(length.unwrap_or(0)))
}

fn parse_chunk_size(line: &[u8]) -> Result<usize, PipelineError> {
    let line = std::str::from_utf8(line).map_err(|_| decode_error("invalid chunk size"))?;
    let size = line.split(';').next().unwrap_or("").trim();
    usize::from_str_radix(size, 16).map_err(|_| decode_error("invalid chunk size"))
}

fn parse_header_line(line: &[u8]) -> Result<(String, String), PipelineError> {
    let colon = line
        .iter()
        .position(|&b| b == b':')
        .ok_or_else(|| decode_error("malformed trailer line"))?;
    let name = String::from_utf8_lossy(&line[..colon]).trim().to_string();
    if name.is_empty() {
        return Err(decode_error("malformed trailer line"));
    }
    let value = String::from_utf8_lossy(&line[colon + 1..]).trim().to_string();
    Ok((name, value))
}

/// Find \r\n in buffer, returning the position of \r.
fn find_crlf(buffer: &[u8]) -> Option<usize> {
    (0..buffer.len().saturating_sub(1)).find(|&i| buffer[i] == b'\r' && buffer[i + 1] == b'\n')
}

/// Find the end of the first line, returning the position of its
/// terminator. Both \r\n and a bare \n end a line.
fn find_line_end(buffer: &[u8]) -> Option<usize> {
    let lf = buffer.iter().position(|&b| b == b'\n')?;
    Some(if lf > 0 && buffer[lf - 1] == b'\r' { lf - 1 } else { lf })
}

/// Find the blank line ending a header block, returning the length of the
/// head up to and including it. Bare \n line endings are accepted.
fn find_head_end(buffer: &[u8]) -> Option<usize> {
    buffer.iter().enumerate().find_map(|(i, &b)| {
        if b != b'\n' {
            return None;
        }
        match &buffer[i + 1..] {
            [b'\n', ..] => Some(i + 2),
            [b'\r', b'\n', ..] => Some(i + 3),
            _ => None,
        }
    })
}
