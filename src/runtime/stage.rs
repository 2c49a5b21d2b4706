//! The closed set of pipeline stages.
//!
//! Each variant declares which directions it takes part in. The pipeline
//! skips stages that do not handle the direction a unit is travelling.

use crate::protocols::echo::EchoResponder;
use crate::protocols::frame::FrameDecoder;
use crate::protocols::http::{HttpAggregator, HttpCodec, HttpCompressor};
use crate::protocols::probe::{ProbeInbound, ProbeOutbound};
use crate::runtime::context::StageContext;
use crate::runtime::error::PipelineError;
use crate::runtime::message::Message;

/// One unit of the processing chain.
#[derive(Debug)]
pub enum Stage {
    FrameDecoder(FrameDecoder),
    HttpCodec(HttpCodec),
    HttpCompressor(HttpCompressor),
    HttpAggregator(HttpAggregator),
    EchoResponder(EchoResponder),
    ProbeInbound(ProbeInbound),
    ProbeOutbound(ProbeOutbound),
}

impl Stage {
    /// Capability pair `(handles_inbound, handles_outbound)`.
    pub fn capabilities(&self) -> (bool, bool) {
        match self {
            Stage::FrameDecoder(_) => (true, false),
            Stage::HttpCodec(_) => (true, true),
            Stage::HttpCompressor(_) => (true, true),
            Stage::HttpAggregator(_) => (true, false),
            Stage::EchoResponder(_) => (true, false),
            Stage::ProbeInbound(_) => (true, false),
            Stage::ProbeOutbound(_) => (false, true),
        }
    }

    pub fn handles_inbound(&self) -> bool {
        self.capabilities().0
    }

    pub fn handles_outbound(&self) -> bool {
        self.capabilities().1
    }

    /// Stage type label.
    pub fn kind(&self) -> &'static str {
        match self {
            Stage::FrameDecoder(_) => "frame-decoder",
            Stage::HttpCodec(_) => "http-codec",
            Stage::HttpCompressor(_) => "http-compressor",
            Stage::HttpAggregator(_) => "http-aggregator",
            Stage::EchoResponder(_) => "echo",
            Stage::ProbeInbound(_) => "probe-in",
            Stage::ProbeOutbound(_) => "probe-out",
        }
    }

    pub(crate) fn on_inbound(
        &mut self,
        ctx: &mut StageContext,
        message: Message,
    ) -> Result<(), PipelineError> {
        match self {
            Stage::FrameDecoder(s) => s.on_inbound(ctx, message),
            Stage::HttpCodec(s) => s.on_inbound(ctx, message),
            Stage::HttpCompressor(s) => s.on_inbound(ctx, message),
            Stage::HttpAggregator(s) => s.on_inbound(ctx, message),
            Stage::EchoResponder(s) => s.on_inbound(ctx, message),
            Stage::ProbeInbound(s) => s.on_inbound(ctx, message),
            Stage::ProbeOutbound(_) => {
                ctx.forward(message);
                Ok(())
            }
        }
    }

    pub(crate) fn on_outbound(
        &mut self,
        ctx: &mut StageContext,
        message: Message,
    ) -> Result<(), PipelineError> {
        match self {
            Stage::HttpCodec(s) => s.on_outbound(ctx, message),
            Stage::HttpCompressor(s) => s.on_outbound(ctx, message),
            Stage::ProbeOutbound(s) => s.on_outbound(ctx, message),
            _ => {
                ctx.forward(message);
                Ok(())
            }
        }
    }

    /// Drop any buffered state. Returns the number of bytes discarded.
    pub(crate) fn release(&mut self) -> usize {
        match self {
            Stage::FrameDecoder(s) => s.release(),
            Stage::HttpCodec(s) => s.release(),
            Stage::HttpCompressor(s) => s.release(),
            Stage::HttpAggregator(s) => s.release(),
            Stage::EchoResponder(_) | Stage::ProbeInbound(_) | Stage::ProbeOutbound(_) => 0,
        }
    }
}

macro_rules! impl_from_stage {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for Stage {
                fn from(stage: $variant) -> Self {
                    Stage::$variant(stage)
                }
            }
        )*
    };
}

impl_from_stage!(
    FrameDecoder,
    HttpCodec,
    HttpCompressor,
    HttpAggregator,
    EchoResponder,
    ProbeInbound,
    ProbeOutbound,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capabilities() {
        let decoder: Stage = FrameDecoder::new(&b"&"[..], 10).into();
        assert_eq!(decoder.capabilities(), (true, false));

        let codec: Stage = HttpCodec::new().into();
        assert!(codec.handles_inbound() && codec.handles_outbound());

        let probe: Stage = ProbeOutbound::new("X").into();
        assert!(!probe.handles_inbound());
        assert!(probe.handles_outbound());
        assert_eq!(probe.kind(), "probe-out");
    }
}
