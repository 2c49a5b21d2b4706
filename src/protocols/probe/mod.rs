//! Diagnostic probe stages.
//!
//! Probes log every unit they see and can record their visits in a shared
//! [`VisitTrace`], which makes propagation order observable:
//!
//! ```text
//! inbound:  A -> B -> C!          (C answers from the tail)
//! outbound: C -> B -> A           (reverse registration order)
//! ```

pub mod handler;

pub use handler::{ProbeInbound, ProbeOutbound, Visit, VisitTrace};
