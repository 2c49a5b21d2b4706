//! Delimiter framing.
//!
//! Turns a raw byte stream into discrete frames bounded by a configured
//! delimiter and a maximum frame length:
//!
//! ```text
//! Stream:  hello&wor ld&&
//! Frames:  "hello", "world", ""
//! ```
//!
//! A stream that grows past the maximum frame length without a delimiter
//! fails with `FrameTooLong`; the buffered bytes are discarded and the
//! connection is closed.

pub mod decoder;

pub use decoder::FrameDecoder;
