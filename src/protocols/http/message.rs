//! HTTP message types shared by the codec, compressor and aggregator.

use bytes::{Bytes, BytesMut};

/// Ordered header list with case-insensitive name lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value for `name`, in order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Add a value, keeping existing ones.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Replace every value for `name` with a single one.
    ///
    /// The new entry takes the position of the first existing one.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .entries
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(&name))
        {
            Some(first) => {
                self.entries[first] = (name.clone(), value);
                let mut index = 0;
                self.entries.retain(|(n, _)| {
                    let keep = index <= first || !n.eq_ignore_ascii_case(&name);
                    index += 1;
                    keep
                });
            }
            None => self.entries.push((name, value)),
        }
    }

    /// Remove every value for `name`. Returns whether anything was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

/// HTTP protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }
}

/// Response status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status(pub u16);

impl Status {
    pub const CONTINUE: Status = Status(100);
    pub const OK: Status = Status(200);
    pub const NO_CONTENT: Status = Status(204);
    pub const NOT_MODIFIED: Status = Status(304);
    pub const REQUEST_ENTITY_TOO_LARGE: Status = Status(413);
    pub const EXPECTATION_FAILED: Status = Status(417);

    pub fn code(&self) -> u16 {
        self.0
    }

    pub fn reason_phrase(&self) -> &'static str {
        match self.0 {
            100 => "Continue",
            200 => "OK",
            204 => "No Content",
            304 => "Not Modified",
            413 => "Request Entity Too Large",
            417 => "Expectation Failed",
            500 => "Internal Server Error",
            _ => "Unknown",
        }
    }

    /// 1xx
    pub fn is_informational(&self) -> bool {
        (100..200).contains(&self.0)
    }

    /// Whether a response with this status may carry a body.
    pub fn permits_body(&self) -> bool {
        !self.is_informational() && *self != Status::NO_CONTENT && *self != Status::NOT_MODIFIED
    }
}

/// Request line and headers of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub uri: String,
    pub version: Version,
    pub headers: Headers,
}

impl RequestHead {
    /// Declared `Content-Length`, if present and valid.
    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get("content-length")
            .and_then(|v| v.trim().parse().ok())
    }

    /// Whether the body uses chunked transfer coding.
    pub fn is_chunked(&self) -> bool {
        self.headers
            .get_all("transfer-encoding")
            .flat_map(|v| v.split(','))
            .last()
            .is_some_and(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
    }
}

/// One fragment of a request as produced by the codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpObject {
    /// Request line and headers.
    Head(RequestHead),
    /// A slice of the body.
    Content(Bytes),
    /// End of the request, with any chunked-body trailers.
    Last { trailers: Headers },
}

/// A complete request: head plus the whole body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullRequest {
    pub head: RequestHead,
    pub body: Bytes,
    pub trailers: Headers,
}

impl FullRequest {
    pub fn method(&self) -> &str {
        &self.head.method
    }

    pub fn uri(&self) -> &str {
        &self.head.uri
    }

    pub fn headers(&self) -> &Headers {
        &self.head.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }
}

/// A complete response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullResponse {
    pub version: Version,
    pub status: Status,
    pub headers: Headers,
    pub body: Bytes,
}

impl FullResponse {
    /// Build an HTTP/1.1 response. `Content-Length` is set whenever the
    /// status permits a body.
    pub fn new(status: Status, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        let mut headers = Headers::new();
        if status.permits_body() {
            headers.insert("content-length", body.len().to_string());
        }
        Self {
            version: Version::Http11,
            status,
            headers,
            body,
        }
    }

    /// A response with no body.
    pub fn empty(status: Status) -> Self {
        Self::new(status, Bytes::new())
    }

    /// Serialize to wire format.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(128 + self.body.len());
        buf.extend_from_slice(self.version.as_str().as_bytes());
        buf.extend_from_slice(b" ");
        buf.extend_from_slice(self.status.code().to_string().as_bytes());
        buf.extend_from_slice(b" ");
        buf.extend_from_slice(self.status.reason_phrase().as_bytes());
        buf.extend_from_slice(b"\r\n");
        for (name, value) in self.headers.iter() {
            buf.extend_from_slice(name.as_bytes());
            buf.extend_from_slice(b": ");
            buf.extend_from_slice(value.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        buf.extend_from_slice(b"\r\n");
        buf.extend_from_slice(&self.body);
        buf.freeze()
    }
}
