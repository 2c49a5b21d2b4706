use crate::runtime::{Direction, Message, PipelineError, StageContext};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

/// One stage invocation seen by a probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Visit {
    pub stage: String,
    pub direction: Direction,
}

/// Shared, append-only record of probe visits.
#[derive(Debug, Clone, Default)]
pub struct VisitTrace {
    visits: Arc<Mutex<Vec<Visit>>>,
}

impl VisitTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, stage: &str, direction: Direction) {
        self.visits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Visit {
                stage: stage.to_string(),
                direction,
            });
    }

    /// Every visit so far, in order.
    pub fn visits(&self) -> Vec<Visit> {
        self.visits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Names of the stages visited in one direction, in order.
    pub fn stages(&self, direction: Direction) -> Vec<String> {
        self.visits()
            .into_iter()
            .filter(|v| v.direction == direction)
            .map(|v| v.stage)
            .collect()
    }
}

/// Inbound probe. Forwards the unit, or with `short_circuit` writes it back
/// from the tail of the pipeline instead.
#[derive(Debug)]
pub struct ProbeInbound {
    name: String,
    short_circuit: bool,
    trace: Option<VisitTrace>,
}

impl ProbeInbound {
    pub fn new(name: impl Into<String>, short_circuit: bool) -> Self {
        Self {
            name: name.into(),
            short_circuit,
            trace: None,
        }
    }

    pub fn with_trace(mut self, trace: VisitTrace) -> Self {
        self.trace = Some(trace);
        self
    }

    pub(crate) fn on_inbound(
        &mut self,
        ctx: &mut StageContext,
        message: Message,
    ) -> Result<(), PipelineError> {
        info!(stage = %self.name, kind = message.kind(), "inbound unit observed");
        if let Some(trace) = &self.trace {
            trace.record(&self.name, Direction::Inbound);
        }

        if self.short_circuit {
            ctx.write_from_tail(message);
        } else {
            ctx.forward(message);
        }
        Ok(())
    }
}

/// Outbound probe. Always forwards.
#[derive(Debug)]
pub struct ProbeOutbound {
    name: String,
    trace: Option<VisitTrace>,
}

impl ProbeOutbound {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            trace: None,
        }
    }

    pub fn with_trace(mut self, trace: VisitTrace) -> Self {
        self.trace = Some(trace);
        self
    }

    pub(crate) fn on_outbound(
        &mut self,
        ctx: &mut StageContext,
        message: Message,
    ) -> Result<(), PipelineError> {
        info!(stage = %self.name, kind = message.kind(), "outbound unit observed");
        if let Some(trace) = &self.trace {
            trace.record(&self.name, Direction::Outbound);
        }
        ctx.forward(message);
        Ok(())
    }
}
