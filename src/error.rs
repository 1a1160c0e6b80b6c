//! Error types for pipeline construction and execution.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::record::Record;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// A panic raised inside a filter while it processed one record.
///
/// The record is dropped. Under [`FaultPolicy::Isolate`](crate::FaultPolicy)
/// the stage keeps going; under `Abort` the whole run fails with this fault.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("stage {stage} ({filter}) faulted on \"{record}\": {message}")]
pub struct StageFault {
    /// Index of the failing stage (0-based).
    pub stage: usize,
    /// Name of the filter at that stage.
    pub filter: String,
    /// The record being processed when the fault occurred.
    pub record: Record,
    /// Panic message.
    pub message: String,
}

/// Failure of a single channel endpoint operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("channel {channel} was cancelled")]
    Cancelled { channel: usize },

    #[error("channel {channel} lost its producer before the terminal marker")]
    Disconnected { channel: usize },

    #[error("channel {channel} lost its consumer")]
    ConsumerGone { channel: usize },

    #[error("put on channel {channel} after its terminal marker")]
    PutAfterEnd { channel: usize },

    #[error("take on channel {channel} after its terminal marker")]
    TakeAfterEnd { channel: usize },

    #[error("no item arrived on channel {channel} within {timeout:?}")]
    TimedOut { channel: usize, timeout: Duration },
}

impl ChannelError {
    /// Index of the channel the error was raised on.
    pub fn channel(&self) -> usize {
        match self {
            ChannelError::Cancelled { channel }
            | ChannelError::Disconnected { channel }
            | ChannelError::ConsumerGone { channel }
            | ChannelError::PutAfterEnd { channel }
            | ChannelError::TakeAfterEnd { channel }
            | ChannelError::TimedOut { channel, .. } => *channel,
        }
    }
}

/// Errors surfaced by building or running a pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Fault(#[from] StageFault),

    /// The consumer of a channel never saw its terminal marker.
    ///
    /// `producer` is the stage that writes the channel, `None` for the
    /// source feeding channel 0.
    #[error(
        "channel {channel} closed before its terminal marker arrived from {}",
        producer_label(.producer)
    )]
    ChannelClosedPrematurely {
        channel: usize,
        producer: Option<usize>,
    },

    #[error("protocol violation at stage {stage}: {source}")]
    Protocol {
        stage: usize,
        #[source]
        source: ChannelError,
    },

    #[error("worker for stage {stage} panicked")]
    WorkerPanicked { stage: usize },

    #[error("record source panicked")]
    SourcePanicked,

    #[error("pipeline run was cancelled")]
    Cancelled,

    #[error("failed to spawn worker for stage {stage}: {source}")]
    Spawn {
        stage: usize,
        #[source]
        source: io::Error,
    },

    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    #[error("cannot open '{}': {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl PipelineError {
    /// Premature close of channel `channel`, blamed on the stage that writes it.
    pub fn closed_prematurely(channel: usize) -> Self {
        PipelineError::ChannelClosedPrematurely {
            channel,
            producer: channel.checked_sub(1),
        }
    }
}

fn producer_label(producer: &Option<usize>) -> String {
    match producer {
        Some(stage) => format!("stage {stage}"),
        None => "the record source".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_fault_display_names_stage_and_record() {
        let fault = StageFault {
            stage: 2,
            filter: "political-screen".to_string(),
            record: Record::new("Ann, BigMac"),
            message: "boom".to_string(),
        };
        let text = fault.to_string();
        assert!(text.contains("stage 2"));
        assert!(text.contains("political-screen"));
        assert!(text.contains("Ann, BigMac"));
        assert!(text.contains("boom"));
    }

    #[test]
    fn test_channel_error_index() {
        assert_eq!(ChannelError::Cancelled { channel: 3 }.channel(), 3);
        let timeout = ChannelError::TimedOut {
            channel: 5,
            timeout: Duration::from_millis(10),
        };
        assert_eq!(timeout.channel(), 5);
    }

    #[test]
    fn test_premature_close_names_producing_stage() {
        let err = PipelineError::closed_prematurely(3);
        assert!(matches!(
            err,
            PipelineError::ChannelClosedPrematurely {
                channel: 3,
                producer: Some(2)
            }
        ));
        let text = err.to_string();
        assert!(text.contains("channel 3"));
        assert!(text.contains("stage 2"));

        let from_source = PipelineError::closed_prematurely(0).to_string();
        assert!(from_source.contains("channel 0"));
        assert!(from_source.contains("record source"));
    }

    #[test]
    fn test_fault_converts_into_pipeline_error() {
        let fault = StageFault {
            stage: 0,
            filter: "f".to_string(),
            record: Record::new("r"),
            message: "m".to_string(),
        };
        let err: PipelineError = fault.clone().into();
        assert!(matches!(err, PipelineError::Fault(f) if f == fault));
    }
}
