//! Response body compression negotiated through `Accept-Encoding`.

use super::message::{FullResponse, HttpObject};
use crate::runtime::{Message, PipelineError, StageContext};
use bytes::Bytes;
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use std::collections::VecDeque;
use std::io::Write;
use tracing::trace;

/// Default compression level.
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// Content coding applied to a response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    Gzip,
    Deflate,
}

impl ContentEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentEncoding::Gzip => "gzip",
            ContentEncoding::Deflate => "deflate",
        }
    }
}

/// Pick a coding from an `Accept-Encoding` value.
///
/// Highest q-value wins, gzip on a tie. A wildcard grants whichever of
/// gzip or deflate was not listed explicitly.
pub fn select_encoding(accept_encoding: &str) -> Option<ContentEncoding> {
    let mut star_q = -1.0f32;
    let mut gzip_q = -1.0f32;
    let mut deflate_q = -1.0f32;

    for entry in accept_encoding.split(',') {
        let mut parts = entry.split(';');
        let coding = parts.next().unwrap_or("").trim();
        let q = parts
            .find_map(|p| p.trim().strip_prefix("q="))
            .map_or(1.0, |v| v.trim().parse::<f32>().unwrap_or(0.0));

        if coding == "*" {
            star_q = q;
        } else if coding.eq_ignore_ascii_case("gzip") || coding.eq_ignore_ascii_case("x-gzip") {
            gzip_q = gzip_q.max(q);
        } else if coding.eq_ignore_ascii_case("deflate") {
            deflate_q = deflate_q.max(q);
        }
    }

    if gzip_q > 0.0 || deflate_q > 0.0 {
        return if gzip_q >= deflate_q {
            Some(ContentEncoding::Gzip)
        } else {
            Some(ContentEncoding::Deflate)
        };
    }
    if star_q > 0.0 {
        if gzip_q == -1.0 {
            return Some(ContentEncoding::Gzip);
        }
        if deflate_q == -1.0 {
            return Some(ContentEncoding::Deflate);
        }
    }
    None
}

/// Compresses responses according to the request they answer.
#[derive(Debug)]
pub struct HttpCompressor {
    level: u32,
    /// `Accept-Encoding` of every request not yet answered, oldest first.
    pending: VecDeque<String>,
}

impl Default for HttpCompressor {
    fn default() -> Self {
        Self::new(DEFAULT_COMPRESSION_LEVEL)
    }
}

impl HttpCompressor {
    /// `level` is clamped to 0..=9.
    pub fn new(level: u32) -> Self {
        Self {
            level: level.min(9),
            pending: VecDeque::new(),
        }
    }

    pub fn release(&mut self) -> usize {
        self.pending.clear();
        0
    }

    pub(crate) fn on_inbound(
        &mut self,
        ctx: &mut StageContext,
        message: Message,
    ) -> Result<(), PipelineError> {
        let accept = match &message {
            Message::Http(HttpObject::Head(head)) => Some(&head.headers),
            Message::Request(request) => Some(request.headers()),
            _ => None,
        };
        if let Some(headers) = accept {
            self.pending
                .push_back(headers.get("accept-encoding").unwrap_or("").to_string());
        }
        ctx.forward(message);
        Ok(())
    }

    pub(crate) fn on_outbound(
        &mut self,
        ctx: &mut StageContext,
        message: Message,
    ) -> Result<(), PipelineError> {
        match message {
            Message::Response(response) if !response.status.is_informational() => {
                let accept = self.pending.pop_front().unwrap_or_default();
                let response = self.compress(response, &accept)?;
                ctx.forward(Message::Response(response));
            }
            other => ctx.forward(other),
        }
        Ok(())
    }

    fn compress(
        &self,
        mut response: FullResponse,
        accept: &str,
    ) -> Result<FullResponse, PipelineError> {
        if response.body.is_empty()
            || !response.status.permits_body()
            || response.headers.contains("content-encoding")
        {
            return Ok(response);
        }
        let Some(encoding) = select_encoding(accept) else {
            return Ok(response);
        };

        let uncompressed = response.body.len();
        response.body = encode(encoding, &response.body, self.level)?;
        response
            .headers
            .insert("content-encoding", encoding.as_str());
        response
            .headers
            .insert("content-length", response.body.len().to_string());

        trace!(
            encoding = encoding.as_str(),
            uncompressed,
            compressed = response.body.len(),
            "Compressed response body"
        );
        Ok(response)
    }
}

fn encode(encoding: ContentEncoding, body: &[u8], level: u32) -> Result<Bytes, PipelineError> {
    let level = Compression::new(level);
    let compressed = match encoding {
        ContentEncoding::Gzip => {
            let mut encoder = GzEncoder::new(Vec::with_capacity(body.len() / 2), level);
            encoder.write_all(body).map_err(PipelineError::Compression)?;
            encoder.finish().map_err(PipelineError::Compression)?
        }
        ContentEncoding::Deflate => {
            let mut encoder = ZlibEncoder::new(Vec::with_capacity(body.len() / 2), level);
            encoder.write_all(body).map_err(PipelineError::Compression)?;
            encoder.finish().map_err(PipelineError::Compression)?
        }
    };
    Ok(Bytes::from(compressed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::http::message::{Headers, RequestHead, Status, Version};
    use crate::runtime::context::Action;
    use flate2::read::{GzDecoder, ZlibDecoder};
    use std::io::Read;

    fn request_head(accept: Option<&str>) -> Message {
        let mut headers = Headers::new();
        if let Some(accept) = accept {
            headers.append("Accept-Encoding", accept);
        }
        Message::Http(HttpObject::Head(RequestHead {
            method: "GET".into(),
            uri: "/".into(),
            version: Version::Http11,
            headers,
        }))
    }

    fn respond(compressor: &mut HttpCompressor, response: FullResponse) -> FullResponse {
        let mut ctx = StageContext::new();
        compressor
            .on_outbound(&mut ctx, Message::Response(response))
            .unwrap();
        match ctx.into_actions().pop() {
            Some(Action::Forward(Message::Response(r))) => r,
            other => panic!("unexpected: {:?}", other),
        }
    }

    fn observe(compressor: &mut HttpCompressor, message: Message) {
        let mut ctx = StageContext::new();
        compressor.on_inbound(&mut ctx, message).unwrap();
    }

    #[test]
    fn test_select_encoding() {
        assert_eq!(select_encoding("gzip"), Some(ContentEncoding::Gzip));
        assert_eq!(select_encoding("deflate"), Some(ContentEncoding::Deflate));
        assert_eq!(select_encoding("gzip, deflate"), Some(ContentEncoding::Gzip));
        assert_eq!(
            select_encoding("gzip;q=0.5, deflate;q=0.8"),
            Some(ContentEncoding::Deflate)
        );
        assert_eq!(select_encoding("*"), Some(ContentEncoding::Gzip));
        assert_eq!(select_encoding("gzip;q=0, *"), Some(ContentEncoding::Deflate));
        assert_eq!(select_encoding("gzip;q=0"), None);
        assert_eq!(select_encoding("br"), None);
        assert_eq!(select_encoding(""), None);
    }

    #[test]
    fn test_gzip_response() {
        let mut compressor = HttpCompressor::default();
        observe(&mut compressor, request_head(Some("gzip")));

        let body = "hello hello hello hello hello";
        let response = respond(&mut compressor, FullResponse::new(Status::OK, body));

        assert_eq!(response.headers.get("content-encoding"), Some("gzip"));
        assert_eq!(
            response.headers.get("content-length"),
            Some(response.body.len().to_string().as_str())
        );

        let mut decoded = String::new();
        GzDecoder::new(&response.body[..])
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn test_deflate_response() {
        let mut compressor = HttpCompressor::new(9);
        observe(&mut compressor, request_head(Some("deflate")));

        let response = respond(&mut compressor, FullResponse::new(Status::OK, "abcabcabc"));
        assert_eq!(response.headers.get("content-encoding"), Some("deflate"));

        let mut decoded = Vec::new();
        ZlibDecoder::new(&response.body[..])
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, b"abcabcabc");
    }

    #[test]
    fn test_skip_rules() {
        let mut compressor = HttpCompressor::default();

        // No Accept-Encoding.
        observe(&mut compressor, request_head(None));
        let response = respond(&mut compressor, FullResponse::new(Status::OK, "plain"));
        assert_eq!(&response.body[..], b"plain");

        // Empty body.
        observe(&mut compressor, request_head(Some("gzip")));
        let response = respond(&mut compressor, FullResponse::empty(Status::OK));
        assert!(!response.headers.contains("content-encoding"));

        // Already encoded.
        observe(&mut compressor, request_head(Some("gzip")));
        let mut encoded = FullResponse::new(Status::OK, "xyz");
        encoded.headers.insert("Content-Encoding", "br");
        let response = respond(&mut compressor, encoded);
        assert_eq!(response.headers.get("content-encoding"), Some("br"));
        assert_eq!(&response.body[..], b"xyz");
    }

    #[test]
    fn test_informational_does_not_consume_request() {
        let mut compressor = HttpCompressor::default();
        observe(&mut compressor, request_head(Some("gzip")));

        let interim = respond(&mut compressor, FullResponse::empty(Status::CONTINUE));
        assert_eq!(interim.status, Status::CONTINUE);
        assert_eq!(compressor.pending.len(), 1);

        let response = respond(&mut compressor, FullResponse::new(Status::OK, "body"));
        assert_eq!(response.headers.get("content-encoding"), Some("gzip"));
        assert!(compressor.pending.is_empty());
    }

    #[test]
    fn test_pipelined_requests_match_in_order() {
        let mut compressor = HttpCompressor::default();
        observe(&mut compressor, request_head(None));
        observe(&mut compressor, request_head(Some("gzip")));

        let first = respond(&mut compressor, FullResponse::new(Status::OK, "one"));
        let second = respond(&mut compressor, FullResponse::new(Status::OK, "two"));
        assert!(!first.headers.contains("content-encoding"));
        assert_eq!(second.headers.get("content-encoding"), Some("gzip"));
    }
}
