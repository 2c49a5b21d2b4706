//! HTTP/1.1 server side.
//!
//! Three stages cooperate on an HTTP connection, front to back:
//!
//! ```text
//! bytes -> HttpCodec -> HttpCompressor -> HttpAggregator -> application
//!          (Head, Content.., Last)        (FullRequest)
//! ```
//!
//! Responses travel the other way as a [`FullResponse`]; the compressor
//! may encode the body and the codec serializes it to wire bytes.

pub mod aggregator;
pub mod codec;
pub mod compressor;
pub mod message;

pub use aggregator::HttpAggregator;
pub use codec::HttpCodec;
pub use compressor::{ContentEncoding, HttpCompressor};
pub use message::{
    FullRequest, FullResponse, Headers, HttpObject, RequestHead, Status, Version,
};
