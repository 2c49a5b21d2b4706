//! Per-connection pipeline construction.
//!
//! A [`PipelineFactory`] is built once from the configuration and shared
//! read-only by every connection task. Each call to [`PipelineFactory::build`]
//! produces a fresh pipeline with its own stage state.

use crate::config::Config;
use crate::protocols::echo::EchoResponder;
use crate::protocols::frame::FrameDecoder;
use crate::protocols::http::{HttpAggregator, HttpCodec, HttpCompressor};
use crate::protocols::probe::{ProbeInbound, ProbeOutbound, VisitTrace};
use crate::runtime::error::PipelineError;
use crate::runtime::pipeline::{Pipeline, UnroutedPolicy};
use crate::runtime::stage::Stage;
use bytes::Bytes;
use std::fmt;
use std::str::FromStr;

/// A stage identifier as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageId {
    FrameDecoder,
    HttpCodec,
    HttpCompressor,
    HttpAggregator,
    Echo,
    /// `probe-in:<name>` or `probe-in:<name>:reply`
    ProbeIn { name: String, reply: bool },
    /// `probe-out:<name>`
    ProbeOut { name: String },
}

/// Unknown or malformed stage identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStageError(pub String);

impl fmt::Display for ParseStageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown stage identifier '{}'", self.0)
    }
}

impl std::error::Error for ParseStageError {}

impl FromStr for StageId {
    type Err = ParseStageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = s.trim();
        let stage_id = match id {
            "frame-decoder" => StageId::FrameDecoder,
            "http-codec" => StageId::HttpCodec,
            "http-compressor" => StageId::HttpCompressor,
            "http-aggregator" => StageId::HttpAggregator,
            "echo" => StageId::Echo,
            _ => {
                let mut parts = id.split(':');
                match (parts.next(), parts.next(), parts.next(), parts.next()) {
                    (Some("probe-in"), Some(name), None, None) if !name.is_empty() => {
                        StageId::ProbeIn {
                            name: name.to_string(),
                            reply: false,
                        }
                    }
                    (Some("probe-in"), Some(name), Some("reply"), None) if !name.is_empty() => {
                        StageId::ProbeIn {
                            name: name.to_string(),
                            reply: true,
                        }
                    }
                    (Some("probe-out"), Some(name), None, None) if !name.is_empty() => {
                        StageId::ProbeOut {
                            name: name.to_string(),
                        }
                    }
                    _ => return Err(ParseStageError(id.to_string())),
                }
            }
        };
        Ok(stage_id)
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageId::FrameDecoder => f.write_str("frame-decoder"),
            StageId::HttpCodec => f.write_str("http-codec"),
            StageId::HttpCompressor => f.write_str("http-compressor"),
            StageId::HttpAggregator => f.write_str("http-aggregator"),
            StageId::Echo => f.write_str("echo"),
            StageId::ProbeIn { name, reply: false } => write!(f, "probe-in:{name}"),
            StageId::ProbeIn { name, reply: true } => write!(f, "probe-in:{name}:reply"),
            StageId::ProbeOut { name } => write!(f, "probe-out:{name}"),
        }
    }
}

/// Everything needed to instantiate a connection's stages.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub stages: Vec<StageId>,
    pub delimiter: Bytes,
    pub max_frame_length: usize,
    pub max_aggregate_bytes: usize,
    pub compression_level: u32,
    pub close_after_reply: bool,
    pub unrouted: UnroutedPolicy,
}

impl From<&Config> for PipelineSettings {
    fn from(config: &Config) -> Self {
        Self {
            stages: config.stages.clone(),
            delimiter: Bytes::from(config.delimiter.clone()),
            max_frame_length: config.max_frame_length,
            max_aggregate_bytes: config.max_aggregate_bytes,
            compression_level: config.compression_level,
            close_after_reply: config.close_after_reply,
            unrouted: if config.strict_routing {
                UnroutedPolicy::Fail
            } else {
                UnroutedPolicy::Drop
            },
        }
    }
}

/// Builds one pipeline per connection.
#[derive(Debug, Clone)]
pub struct PipelineFactory {
    settings: PipelineSettings,
}

impl PipelineFactory {
    pub fn new(settings: PipelineSettings) -> Self {
        Self { settings }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(PipelineSettings::from(config))
    }

    /// Whether any configured stage is a probe.
    pub fn has_probes(&self) -> bool {
        self.settings
            .stages
            .iter()
            .any(|id| matches!(id, StageId::ProbeIn { .. } | StageId::ProbeOut { .. }))
    }

    /// Build a fresh pipeline. Stages are registered under their identifier.
    pub fn build(&self) -> Result<Pipeline, PipelineError> {
        self.build_with_trace(None)
    }

    /// Build a fresh pipeline whose probes record into `trace`.
    pub fn build_with_trace(&self, trace: Option<&VisitTrace>) -> Result<Pipeline, PipelineError> {
        let mut pipeline = Pipeline::with_unrouted_policy(self.settings.unrouted);
        for stage_id in &self.settings.stages {
            pipeline.add_last(stage_id.to_string(), self.instantiate(stage_id, trace))?;
        }
        Ok(pipeline)
    }

    fn instantiate(&self, stage_id: &StageId, trace: Option<&VisitTrace>) -> Stage {
        let settings = &self.settings;
        match stage_id {
            StageId::FrameDecoder => {
                FrameDecoder::new(settings.delimiter.clone(), settings.max_frame_length).into()
            }
            StageId::HttpCodec => HttpCodec::new().into(),
            StageId::HttpCompressor => HttpCompressor::new(settings.compression_level).into(),
            StageId::HttpAggregator => HttpAggregator::new(settings.max_aggregate_bytes).into(),
            StageId::Echo => EchoResponder::new(settings.close_after_reply).into(),
            StageId::ProbeIn { name, reply } => {
                let probe = ProbeInbound::new(name.as_str(), *reply);
                let probe = match trace {
                    Some(trace) => probe.with_trace(trace.clone()),
                    None => probe,
                };
                probe.into()
            }
            StageId::ProbeOut { name } => {
                let probe = ProbeOutbound::new(name.as_str());
                let probe = match trace {
                    Some(trace) => probe.with_trace(trace.clone()),
                    None => probe,
                };
                probe.into()
            }
        }
    }
}
