//! Units flowing through a pipeline and out to the transport.

use crate::protocols::http::{FullRequest, FullResponse, HttpObject};
use bytes::Bytes;

/// A unit of data travelling through the stage chain.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Raw transport bytes, in either direction.
    Bytes(Bytes),
    /// One delimiter-bounded frame.
    Frame(Bytes),
    /// One fragment of an HTTP request.
    Http(HttpObject),
    /// A fully aggregated HTTP request.
    Request(FullRequest),
    /// A complete HTTP response.
    Response(FullResponse),
}

impl Message {
    /// Short label used in logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Bytes(_) => "bytes",
            Message::Frame(_) => "frame",
            Message::Http(HttpObject::Head(_)) => "http-head",
            Message::Http(HttpObject::Content(_)) => "http-content",
            Message::Http(HttpObject::Last { .. }) => "http-last",
            Message::Request(_) => "request",
            Message::Response(_) => "response",
        }
    }
}

/// Work handed from a pipeline to its connection driver, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transmit {
    /// Bytes to write to the transport.
    Data(Bytes),
    /// Close the transport once every earlier transmit is flushed.
    Close,
}
