//! Stage implementations.
//!
//! ## Codecs
//! - `frame`: delimiter-based frame decoder
//! - `http`: HTTP/1.1 codec, response compressor and request aggregator
//!
//! ## Handlers
//! - `echo`: writes frames back and answers HTTP requests
//! - `probe`: logging probes for observing propagation order

pub mod echo;
pub mod frame;
pub mod http;
pub mod probe;
