//! Echo responder.
//!
//! The application end of both stock services:
//!
//! ```text
//! frame echo:  "hello&"            ->  "hello"
//! http echo:   GET /a?b=1 (body x) ->  200 "Receive Http Request , url : /a?b=1 , method:GET ,content : x"
//! ```
//!
//! Frames and raw bytes are written back verbatim. Complete HTTP requests
//! are answered with a plain-text description of the request. HTTP replies
//! always close the connection once flushed; frame replies do so when
//! `close_after_reply` is set.

pub mod handler;

pub use handler::{describe, EchoResponder};
