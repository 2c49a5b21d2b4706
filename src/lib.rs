//! channel-pipe: a layered connection pipeline server
//!
//! Every accepted connection gets its own ordered chain of stages. Inbound
//! bytes run front to back through decoders and handlers; replies run back
//! to front through encoders onto the wire.
//!
//! Stock services:
//! - `echo`: `&`-delimited frames echoed back verbatim
//! - `http`: HTTP/1.1 requests aggregated and answered with a description
//!   of the request, optionally gzip/deflate compressed
//! - `demo`: logging probes showing inbound and outbound propagation order

pub mod config;
pub mod protocols;
pub mod runtime;
pub mod server;

pub use config::Config;
pub use runtime::{Connection, Pipeline, PipelineError, PipelineFactory};
pub use server::Server;
