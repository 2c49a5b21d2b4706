//! Ordered stage chain for one connection.
//!
//! Inbound units run front to back through the inbound-capable stages.
//! Outbound units run back to front through the outbound-capable stages,
//! so the encoder nearest the transport touches the bytes last. Whatever
//! leaves the front of the chain is queued as a [`Transmit`] for the
//! connection driver.
//!
//! Stages may be added and removed only until the pipeline is sealed. It
//! seals itself on the first unit it processes.

use crate::runtime::context::{Action, Direction, StageContext, WriteOrigin};
use crate::runtime::error::PipelineError;
use crate::runtime::message::{Message, Transmit};
use crate::runtime::stage::Stage;
use std::collections::VecDeque;
use tracing::{debug, trace, warn};

/// What happens to an inbound unit no stage consumed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnroutedPolicy {
    /// Log a warning and drop it.
    #[default]
    Drop,
    /// Fail the connection with [`PipelineError::Unrouted`].
    Fail,
}

/// Insertion point for [`Pipeline::add_stage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Position {
    First,
    Last,
    Before(String),
    After(String),
}

#[derive(Debug)]
struct StageEntry {
    name: String,
    stage: Stage,
}

/// A connection's stage chain.
#[derive(Debug, Default)]
pub struct Pipeline {
    stages: Vec<StageEntry>,
    sealed: bool,
    closing: bool,
    unrouted: UnroutedPolicy,
    transmits: VecDeque<Transmit>,
}

impl Pipeline {
    /// Create an empty pipeline that drops unrouted units.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty pipeline with the given unrouted policy.
    pub fn with_unrouted_policy(unrouted: UnroutedPolicy) -> Self {
        Self {
            unrouted,
            ..Self::default()
        }
    }

    /// Register a stage under a unique name.
    pub fn add_stage(
        &mut self,
        position: Position,
        name: impl Into<String>,
        stage: impl Into<Stage>,
    ) -> Result<&mut Self, PipelineError> {
        if self.sealed {
            return Err(PipelineError::Sealed);
        }

        let name = name.into();
        if self.index_of(&name).is_some() {
            return Err(PipelineError::DuplicateStage(name));
        }

        let index = match position {
            Position::First => 0,
            Position::Last => self.stages.len(),
            Position::Before(ref anchor) => self
                .index_of(anchor)
                .ok_or_else(|| PipelineError::StageNotFound(anchor.clone()))?,
            Position::After(ref anchor) => {
                self.index_of(anchor)
                    .ok_or_else(|| PipelineError::StageNotFound(anchor.clone()))?
                    + 1
            }
        };

        let stage = stage.into();
        trace!(stage = %name, kind = stage.kind(), index, "Adding stage");
        self.stages.insert(index, StageEntry { name, stage });
        Ok(self)
    }

    /// Append a stage at the back of the chain.
    pub fn add_last(
        &mut self,
        name: impl Into<String>,
        stage: impl Into<Stage>,
    ) -> Result<&mut Self, PipelineError> {
        self.add_stage(Position::Last, name, stage)
    }

    /// Remove a stage by name, returning it.
    pub fn remove_stage(&mut self, name: &str) -> Result<Stage, PipelineError> {
        if self.sealed {
            return Err(PipelineError::Sealed);
        }
        let index = self
            .index_of(name)
            .ok_or_else(|| PipelineError::StageNotFound(name.to_string()))?;
        Ok(self.stages.remove(index).stage)
    }

    /// Freeze the stage list. Idempotent.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Whether a close has been scheduled.
    pub fn is_closing(&self) -> bool {
        self.closing
    }

    /// Stage names in chain order.
    pub fn names(&self) -> Vec<&str> {
        self.stages.iter().map(|e| e.name.as_str()).collect()
    }

    /// Look up a stage by name.
    pub fn get(&self, name: &str) -> Option<&Stage> {
        self.index_of(name).map(|i| &self.stages[i].stage)
    }

    /// Feed one unit into the front of the chain.
    pub fn fire_inbound(&mut self, message: Message) -> Result<(), PipelineError> {
        self.sealed = true;
        self.inbound_from(0, message)
    }

    /// Write one unit from the tail, through every outbound stage.
    pub fn fire_outbound(&mut self, message: Message) -> Result<(), PipelineError> {
        self.sealed = true;
        let end = self.stages.len();
        self.outbound_before(end, message)
    }

    /// Take every queued transmit, in production order.
    pub fn drain_transmits(&mut self) -> Vec<Transmit> {
        self.transmits.drain(..).collect()
    }

    /// Release every stage buffer and stop accepting units.
    pub fn close(&mut self) {
        self.closing = true;
        self.sealed = true;
        for entry in &mut self.stages {
            let discarded = entry.stage.release();
            if discarded > 0 {
                debug!(stage = %entry.name, discarded, "Discarded buffered bytes on close");
            }
        }
        self.transmits.clear();
    }

    /// The transport went away. Same as [`Pipeline::close`].
    pub fn fire_inactive(&mut self) {
        trace!("Transport inactive");
        self.close();
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.stages.iter().position(|e| e.name == name)
    }

    fn inbound_from(&mut self, start: usize, message: Message) -> Result<(), PipelineError> {
        if self.closing {
            debug!(kind = message.kind(), "Discarding inbound unit after close");
            return Ok(());
        }

        let next = (start..self.stages.len()).find(|&i| self.stages[i].stage.handles_inbound());
        let Some(index) = next else {
            return self.unrouted(message);
        };

        let entry = &mut self.stages[index];
        trace!(stage = %entry.name, kind = message.kind(), "Inbound");
        let mut ctx = StageContext::new();
        entry.stage.on_inbound(&mut ctx, message)?;
        self.apply(index, Direction::Inbound, ctx.into_actions())
    }

    fn outbound_before(&mut self, end: usize, message: Message) -> Result<(), PipelineError> {
        if self.closing {
            debug!(kind = message.kind(), "Discarding outbound unit after close");
            return Ok(());
        }

        let next = (0..end)
            .rev()
            .find(|&i| self.stages[i].stage.handles_outbound());
        let Some(index) = next else {
            return self.transmit(message);
        };

        let entry = &mut self.stages[index];
        trace!(stage = %entry.name, kind = message.kind(), "Outbound");
        let mut ctx = StageContext::new();
        entry.stage.on_outbound(&mut ctx, message)?;
        self.apply(index, Direction::Outbound, ctx.into_actions())
    }

    fn apply(
        &mut self,
        index: usize,
        direction: Direction,
        actions: Vec<Action>,
    ) -> Result<(), PipelineError> {
        for action in actions {
            match action {
                Action::Forward(message) => match direction {
                    Direction::Inbound => self.inbound_from(index + 1, message)?,
                    Direction::Outbound => self.outbound_before(index, message)?,
                },
                Action::Write { message, origin } => {
                    let end = match origin {
                        WriteOrigin::Here => index,
                        WriteOrigin::Tail => self.stages.len(),
                    };
                    self.outbound_before(end, message)?;
                }
                Action::Close => self.schedule_close(),
            }
        }
        Ok(())
    }

    fn transmit(&mut self, message: Message) -> Result<(), PipelineError> {
        match message {
            Message::Bytes(bytes) => {
                trace!(len = bytes.len(), "Queued transmit");
                self.transmits.push_back(Transmit::Data(bytes));
                Ok(())
            }
            other => Err(PipelineError::UnencodableMessage { kind: other.kind() }),
        }
    }

    fn schedule_close(&mut self) {
        if !self.closing {
            trace!("Close scheduled after flush");
            self.closing = true;
            self.transmits.push_back(Transmit::Close);
        }
    }

    fn unrouted(&mut self, message: Message) -> Result<(), PipelineError> {
        match self.unrouted {
            UnroutedPolicy::Drop => {
                warn!(
                    kind = message.kind(),
                    "Inbound unit reached the end of the pipeline unconsumed"
                );
                Ok(())
            }
            UnroutedPolicy::Fail => Err(PipelineError::Unrouted {
                kind: message.kind(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::echo::EchoResponder;
    use crate::protocols::frame::FrameDecoder;
    use crate::protocols::http::{HttpAggregator, HttpCodec};
    use crate::protocols::probe::{ProbeInbound, ProbeOutbound, VisitTrace};
    use bytes::Bytes;

    fn bytes(data: &'static [u8]) -> Message {
        Message::Bytes(Bytes::from_static(data))
    }

    fn demo_pipeline(trace: &VisitTrace, short_circuit_last: bool) -> Pipeline {
        let mut pipeline = Pipeline::new();
        pipeline
            .add_last("A", ProbeInbound::new("A", false).with_trace(trace.clone()))
            .unwrap()
            .add_last("B", ProbeInbound::new("B", false).with_trace(trace.clone()))
            .unwrap()
            .add_last(
                "C",
                ProbeInbound::new("C", short_circuit_last).with_trace(trace.clone()),
            )
            .unwrap()
            .add_last("X", ProbeOutbound::new("X").with_trace(trace.clone()))
            .unwrap()
            .add_last("Y", ProbeOutbound::new("Y").with_trace(trace.clone()))
            .unwrap()
            .add_last("Z", ProbeOutbound::new("Z").with_trace(trace.clone()))
            .unwrap();
        pipeline
    }

    #[test]
    fn test_inbound_then_outbound_order() {
        let trace = VisitTrace::new();
        let mut pipeline = demo_pipeline(&trace, true);

        pipeline.fire_inbound(bytes(b"ping")).unwrap();

        assert_eq!(trace.stages(Direction::Inbound), vec!["A", "B", "C"]);
        assert_eq!(trace.stages(Direction::Outbound), vec!["Z", "Y", "X"]);
        let order: Vec<String> = trace.visits().into_iter().map(|v| v.stage).collect();
        assert_eq!(order, vec!["A", "B", "C", "Z", "Y", "X"]);

        assert_eq!(
            pipeline.drain_transmits(),
            vec![Transmit::Data(Bytes::from_static(b"ping"))]
        );
    }

    #[test]
    fn test_short_circuit_hides_unit_from_later_stages() {
        let trace = VisitTrace::new();
        let mut pipeline = Pipeline::with_unrouted_policy(UnroutedPolicy::Fail);
        pipeline
            .add_last("A", ProbeInbound::new("A", true).with_trace(trace.clone()))
            .unwrap()
            .add_last("B", ProbeInbound::new("B", false).with_trace(trace.clone()))
            .unwrap();

        // Strict routing would fail if the unit had travelled past B.
        pipeline.fire_inbound(bytes(b"x")).unwrap();

        assert_eq!(trace.stages(Direction::Inbound), vec!["A"]);
        assert_eq!(pipeline.drain_transmits().len(), 1);
    }

    #[test]
    fn test_forwarding_probes_leave_unit_unrouted() {
        let trace = VisitTrace::new();
        let mut pipeline = demo_pipeline(&trace, false);

        pipeline.fire_inbound(bytes(b"x")).unwrap();

        assert_eq!(trace.stages(Direction::Inbound), vec!["A", "B", "C"]);
        assert!(trace.stages(Direction::Outbound).is_empty());
        assert!(pipeline.drain_transmits().is_empty());
    }

    #[test]
    fn test_strict_routing_fails_loudly() {
        let mut pipeline = Pipeline::with_unrouted_policy(UnroutedPolicy::Fail);
        pipeline
            .add_last("A", ProbeInbound::new("A", false))
            .unwrap();

        let err = pipeline.fire_inbound(bytes(b"x")).unwrap_err();
        assert!(matches!(err, PipelineError::Unrouted { kind: "bytes" }));
    }

    #[test]
    fn test_empty_pipeline_drops_by_default() {
        let mut pipeline = Pipeline::new();
        pipeline.fire_inbound(bytes(b"x")).unwrap();
        assert!(pipeline.drain_transmits().is_empty());
    }

    #[test]
    fn test_positions() {
        let mut pipeline = Pipeline::new();
        pipeline
            .add_last("b", ProbeInbound::new("b", false))
            .unwrap();
        pipeline
            .add_stage(Position::First, "a", ProbeInbound::new("a", false))
            .unwrap();
        pipeline
            .add_stage(Position::After("b".into()), "d", ProbeInbound::new("d", false))
            .unwrap();
        pipeline
            .add_stage(Position::Before("d".into()), "c", ProbeInbound::new("c", false))
            .unwrap();

        assert_eq!(pipeline.names(), vec!["a", "b", "c", "d"]);

        let removed = pipeline.remove_stage("c").unwrap();
        assert_eq!(removed.kind(), "probe-in");
        assert_eq!(pipeline.names(), vec!["a", "b", "d"]);
        assert!(pipeline.get("c").is_none());
    }

    #[test]
    fn test_structural_errors() {
        let mut pipeline = Pipeline::new();
        pipeline
            .add_last("a", ProbeInbound::new("a", false))
            .unwrap();

        assert!(matches!(
            pipeline.add_last("a", ProbeInbound::new("a", false)),
            Err(PipelineError::DuplicateStage(_))
        ));
        assert!(matches!(
            pipeline.add_stage(
                Position::Before("missing".into()),
                "b",
                ProbeInbound::new("b", false)
            ),
            Err(PipelineError::StageNotFound(_))
        ));
        assert!(matches!(
            pipeline.remove_stage("missing"),
            Err(PipelineError::StageNotFound(_))
        ));
    }

    #[test]
    fn test_sealed_after_first_unit() {
        let mut pipeline = Pipeline::new();
        pipeline
            .add_last("a", ProbeInbound::new("a", true))
            .unwrap();
        assert!(!pipeline.is_sealed());

        pipeline.fire_inbound(bytes(b"x")).unwrap();
        assert!(pipeline.is_sealed());

        assert!(matches!(
            pipeline.add_last("b", ProbeInbound::new("b", false)),
            Err(PipelineError::Sealed)
        ));
        assert!(matches!(
            pipeline.remove_stage("a"),
            Err(PipelineError::Sealed)
        ));
    }

    #[test]
    fn test_write_here_skips_later_outbound_stages() {
        // The responder writes relative to its own position, so an outbound
        // stage registered after it never sees the reply.
        let trace = VisitTrace::new();
        let mut pipeline = Pipeline::new();
        pipeline
            .add_last("before", ProbeOutbound::new("before").with_trace(trace.clone()))
            .unwrap()
            .add_last("echo", EchoResponder::new(false))
            .unwrap()
            .add_last("after", ProbeOutbound::new("after").with_trace(trace.clone()))
            .unwrap();

        pipeline.fire_inbound(bytes(b"hi")).unwrap();

        assert_eq!(trace.stages(Direction::Outbound), vec!["before"]);
    }

    #[test]
    fn test_close_on_flush_orders_after_data() {
        let mut pipeline = Pipeline::new();
        pipeline
            .add_last("decoder", FrameDecoder::new(&b"&"[..], 10))
            .unwrap()
            .add_last("echo", EchoResponder::new(true))
            .unwrap();

        // Second frame arrives in the same read but is discarded after close.
        pipeline.fire_inbound(bytes(b"hello&world&")).unwrap();

        assert!(pipeline.is_closing());
        assert_eq!(
            pipeline.drain_transmits(),
            vec![
                Transmit::Data(Bytes::from_static(b"hello")),
                Transmit::Close
            ]
        );
    }

    #[test]
    fn test_unencoded_message_cannot_reach_transport() {
        let mut pipeline = Pipeline::new();
        let err = pipeline
            .fire_outbound(Message::Frame(Bytes::from_static(b"x")))
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::UnencodableMessage { kind: "frame" }
        ));
    }

    #[test]
    fn test_close_releases_buffers() {
        let mut pipeline = Pipeline::new();
        pipeline
            .add_last("decoder", FrameDecoder::new(&b"&"[..], 10))
            .unwrap();
        pipeline.fire_inbound(bytes(b"partial")).unwrap();

        pipeline.close();
        match pipeline.get("decoder") {
            Some(Stage::FrameDecoder(d)) => assert_eq!(d.buffered(), 0),
            other => panic!("unexpected: {:?}", other),
        }

        // Nothing is processed after close.
        pipeline.fire_inbound(bytes(b"more&")).unwrap();
        assert!(pipeline.drain_transmits().is_empty());
    }

    #[test]
    fn test_fire_inactive_releases_buffers() {
        let mut pipeline = Pipeline::new();
        pipeline
            .add_last("codec", HttpCodec::new())
            .unwrap()
            .add_last("aggregator", HttpAggregator::new(1024))
            .unwrap();
        pipeline
            .fire_inbound(bytes(b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc"))
            .unwrap();

        pipeline.fire_inactive();

        assert!(pipeline.is_closing());
        match pipeline.get("aggregator") {
            Some(Stage::HttpAggregator(a)) => assert_eq!(a.buffered(), 0),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
