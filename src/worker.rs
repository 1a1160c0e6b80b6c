//! Stage worker: the receive-transform-forward loop for one filter.
//!
//! A worker owns the reading end of its input channel and the writing end of
//! its output channel. Whatever happens (end of input, cancellation, a lost
//! upstream) it tries to leave exactly one terminal marker on its output
//! before it exits, so the next stage never waits on a marker that will not
//! come.

use std::sync::Arc;

use log::{debug, error, trace, warn};

use crate::cancel::CancelToken;
use crate::channel::{ChannelReader, ChannelWriter, Message};
use crate::error::{ChannelError, PipelineError, Result, StageFault};
use crate::filter::{Filter, apply_guarded};
use crate::pipeline::FaultPolicy;
use crate::record::Record;

/// Lifecycle of a stage worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Taking and filtering records.
    Running,
    /// Terminal marker observed, forwarding it downstream.
    Draining,
    /// Exited.
    Done,
}

/// Per-stage counters returned when a worker exits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub stage: usize,
    pub filter: String,
    /// Records taken from the input channel and handed to the filter.
    pub processed: usize,
    /// Records written to the output channel.
    pub forwarded: usize,
    /// Records the filter chose to drop.
    pub dropped: usize,
    /// Records lost to a filter panic.
    pub faults: Vec<StageFault>,
    pub state: WorkerState,
    /// The worker stopped because the run was cancelled.
    pub cancelled: bool,
}

impl StageReport {
    pub(crate) fn new(stage: usize, filter: &str) -> Self {
        Self {
            stage,
            filter: filter.to_string(),
            processed: 0,
            forwarded: 0,
            dropped: 0,
            faults: Vec::new(),
            state: WorkerState::Running,
            cancelled: false,
        }
    }
}

enum Flow {
    Continue,
    Stop,
}

/// One stage of a concurrent pipeline.
pub struct StageWorker {
    stage: usize,
    filter: Arc<dyn Filter>,
    input: ChannelReader,
    output: ChannelWriter,
    policy: FaultPolicy,
    cancel: CancelToken,
    report: StageReport,
}

impl StageWorker {
    pub fn new(
        stage: usize,
        filter: Arc<dyn Filter>,
        input: ChannelReader,
        output: ChannelWriter,
        policy: FaultPolicy,
        cancel: CancelToken,
    ) -> Self {
        let report = StageReport::new(stage, filter.name());
        Self {
            stage,
            filter,
            input,
            output,
            policy,
            cancel,
            report,
        }
    }

    pub fn stage(&self) -> usize {
        self.stage
    }

    pub fn name(&self) -> &str {
        self.filter.name()
    }

    pub fn state(&self) -> WorkerState {
        self.report.state
    }

    /// Run until the input's terminal marker (or cancellation) is observed.
    ///
    /// Returns an error only for protocol failures on the channels; filter
    /// panics are recorded in the report.
    pub fn run(mut self) -> Result<StageReport> {
        debug!(
            "stage {} ({}) started: channel {} -> channel {}",
            self.stage,
            self.name(),
            self.input.index(),
            self.output.index()
        );
        loop {
            let message = match self.input.take() {
                Ok(message) => message,
                Err(ChannelError::Cancelled { .. }) => {
                    self.stop_cancelled();
                    break;
                }
                Err(ChannelError::Disconnected { channel }) => {
                    error!(
                        "stage {} ({}): channel {} closed without a terminal marker",
                        self.stage,
                        self.name(),
                        channel
                    );
                    self.forward_marker()?;
                    self.finish();
                    return Err(PipelineError::closed_prematurely(channel));
                }
                Err(other) => return Err(self.violation(other)),
            };

            let flow = match message {
                Message::EndOfStream => {
                    self.transition(WorkerState::Draining);
                    self.forward_marker()?;
                    Flow::Stop
                }
                Message::Data(record) => self.process(record)?,
            };
            if let Flow::Stop = flow {
                break;
            }
        }
        self.finish();
        Ok(self.report)
    }

    fn process(&mut self, record: Record) -> Result<Flow> {
        self.report.processed += 1;
        match apply_guarded(self.filter.as_ref(), &record) {
            Ok(Some(out)) => {
                trace!("stage {} forward \"{}\"", self.stage, out);
                match self.output.put(out) {
                    Ok(()) => {
                        self.report.forwarded += 1;
                        Ok(Flow::Continue)
                    }
                    Err(ChannelError::Cancelled { .. }) => {
                        self.stop_cancelled();
                        Ok(Flow::Stop)
                    }
                    Err(other) => Err(self.violation(other)),
                }
            }
            Ok(None) => {
                trace!("stage {} drop \"{}\"", self.stage, record);
                self.report.dropped += 1;
                Ok(Flow::Continue)
            }
            Err(message) => {
                let fault = StageFault {
                    stage: self.stage,
                    filter: self.filter.name().to_string(),
                    record,
                    message,
                };
                warn!("{fault}");
                self.report.faults.push(fault);
                if self.policy == FaultPolicy::Abort {
                    self.cancel.cancel();
                    self.stop_cancelled();
                    return Ok(Flow::Stop);
                }
                Ok(Flow::Continue)
            }
        }
    }

    /// Blocking marker forward on the normal path.
    fn forward_marker(&mut self) -> Result<()> {
        match self.output.close() {
            Ok(()) => Ok(()),
            Err(ChannelError::Cancelled { .. }) => {
                self.stop_cancelled();
                Ok(())
            }
            Err(other) => Err(self.violation(other)),
        }
    }

    fn stop_cancelled(&mut self) {
        if !self.report.cancelled {
            debug!("stage {} ({}) cancelled", self.stage, self.name());
        }
        self.report.cancelled = true;
        self.transition(WorkerState::Draining);
        self.output.try_close();
    }

    /// Record a channel protocol failure and make the rest of the run stop.
    fn violation(&mut self, source: ChannelError) -> PipelineError {
        error!("stage {} ({}): {}", self.stage, self.name(), source);
        self.cancel.cancel();
        self.output.try_close();
        self.finish();
        PipelineError::Protocol {
            stage: self.stage,
            source,
        }
    }

    fn transition(&mut self, next: WorkerState) {
        if self.report.state != next {
            trace!(
                "stage {} {:?} -> {:?}",
                self.stage, self.report.state, next
            );
            self.report.state = next;
        }
    }

    fn finish(&mut self) {
        self.transition(WorkerState::Done);
        debug!(
            "stage {} ({}) done: processed={} forwarded={} dropped={} faults={}",
            self.stage,
            self.name(),
            self.report.processed,
            self.report.forwarded,
            self.report.dropped,
            self.report.faults.len()
        );
    }
}
