//! Connection runtime.
//!
//! A connection owns one [`Pipeline`], an ordered chain of [`Stage`]s:
//!
//! ```text
//!            inbound (front -> back)
//! transport ========================> [stage 0] -> [stage 1] -> ... -> [stage n]
//!           <======================== [stage 0] <- [stage 1] <- ... <- [stage n]
//!            outbound (back -> front)
//! ```
//!
//! - `context`: what a stage may do with a unit (forward, write, close)
//! - `pipeline`: stage registry and propagation
//! - `factory`: builds a fresh pipeline per connection from configuration
//! - `connection`: drives one transport through its pipeline

pub mod connection;
pub mod context;
pub mod error;
pub mod factory;
pub mod message;
pub mod pipeline;
pub mod stage;

pub use connection::{CloseReason, Connection};
pub use context::{Direction, StageContext, WriteHandle, WriteOrigin};
pub use error::PipelineError;
pub use factory::{PipelineFactory, PipelineSettings, StageId};
pub use message::{Message, Transmit};
pub use pipeline::{Pipeline, Position, UnroutedPolicy};
pub use stage::Stage;
