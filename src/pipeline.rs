//! Concurrent pipeline: one worker thread per filter, linked by channels.
//!
//! For `N` filters the pipeline owns `N + 1` channels. Stage `i` reads
//! channel `i` and writes channel `i + 1`; a feeder thread fills channel 0
//! from the source, and the calling thread drains channel `N` into the sink.
//! All threads start before any record moves, and all are joined before
//! `run` returns.
//!
//! ```
//! use pipes_filters_rs::{Keep, Map, PipelineBuilder, Record};
//!
//! let output = PipelineBuilder::new()
//!     .filter(Keep::new("non-empty", |r: &Record| !r.is_empty()))
//!     .filter(Map::new("upper", |r: &Record| Record::new(r.as_str().to_uppercase())))
//!     .build()
//!     .unwrap()
//!     .run(vec![Record::new("a"), Record::new(""), Record::new("b")])
//!     .unwrap();
//!
//! assert_eq!(output.records, vec![Record::new("A"), Record::new("B")]);
//! ```

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::cancel::CancelToken;
use crate::channel::{ChannelReader, ChannelWriter, Message, channel};
use crate::error::{ChannelError, PipelineError, Result, StageFault};
use crate::filter::Filter;
use crate::record::Record;
use crate::worker::{StageReport, StageWorker};

/// Default number of in-flight records per channel.
pub const DEFAULT_CAPACITY: usize = 64;

/// What a stage does when its filter panics on a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaultPolicy {
    /// Drop the record, report the fault, keep processing.
    #[default]
    Isolate,
    /// Cancel the run; `run` fails with the fault.
    Abort,
}

/// Settings for one pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Per-channel bound on in-flight records; `None` is unbounded.
    pub capacity: Option<usize>,
    pub fault_policy: FaultPolicy,
    /// Longest wait for any single item on the final channel.
    pub drain_timeout: Option<Duration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            capacity: Some(DEFAULT_CAPACITY),
            fault_policy: FaultPolicy::Isolate,
            drain_timeout: None,
        }
    }
}

impl PipelineConfig {
    fn validate(&self) -> Result<()> {
        if self.capacity == Some(0) {
            return Err(PipelineError::InvalidConfig(
                "channel capacity must be at least 1 (omit it for unbounded)".to_string(),
            ));
        }
        if self.drain_timeout == Some(Duration::ZERO) {
            return Err(PipelineError::InvalidConfig(
                "drain timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Something that yields records until exhausted.
pub trait RecordSource {
    /// Next record, or `None` once the source is exhausted.
    fn next_record(&mut self) -> Result<Option<Record>>;
}

impl<I> RecordSource for I
where
    I: Iterator<Item = Record>,
{
    fn next_record(&mut self) -> Result<Option<Record>> {
        Ok(self.next())
    }
}

/// Something that accepts the pipeline's surviving records, in order.
pub trait RecordSink {
    fn accept(&mut self, record: Record) -> Result<()>;

    /// Called once after the last record.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

impl RecordSink for Vec<Record> {
    fn accept(&mut self, record: Record) -> Result<()> {
        self.push(record);
        Ok(())
    }
}

/// Counters for a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub records_in: usize,
    pub records_out: usize,
    /// One entry per stage, in stage order.
    pub stages: Vec<StageReport>,
    pub elapsed: Duration,
}

impl RunReport {
    /// Every fault recorded during the run, in stage order.
    pub fn faults(&self) -> impl Iterator<Item = &StageFault> {
        self.stages.iter().flat_map(|s| s.faults.iter())
    }
}

/// Surviving records plus the run report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutput {
    pub records: Vec<Record>,
    pub report: RunReport,
}

impl RunOutput {
    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}

/// Fluent construction of a [`Pipeline`].
#[derive(Default)]
pub struct PipelineBuilder {
    filters: Vec<Arc<dyn Filter>>,
    config: PipelineConfig,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage.
    pub fn filter<F: Filter + 'static>(mut self, filter: F) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    /// Append a stage backed by an already shared filter.
    pub fn shared_filter(mut self, filter: Arc<dyn Filter>) -> Self {
        self.filters.push(filter);
        self
    }

    /// Append several stages in order.
    pub fn filters<I>(mut self, filters: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn Filter>>,
    {
        self.filters.extend(filters);
        self
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.config.capacity = Some(capacity);
        self
    }

    pub fn unbounded(mut self) -> Self {
        self.config.capacity = None;
        self
    }

    pub fn fault_policy(mut self, policy: FaultPolicy) -> Self {
        self.config.fault_policy = policy;
        self
    }

    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.config.drain_timeout = Some(timeout);
        self
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Pipeline> {
        Pipeline::build(self.filters, self.config)
    }
}

/// A wired, not yet started pipeline. Consumed by a single run.
pub struct Pipeline {
    config: PipelineConfig,
    workers: Vec<StageWorker>,
    head: ChannelWriter,
    tail: ChannelReader,
    cancel: CancelToken,
}

impl Pipeline {
    /// Allocate `filters.len() + 1` channels and one worker per filter.
    pub fn build(filters: Vec<Arc<dyn Filter>>, config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let cancel = CancelToken::new();
        let (head, mut upstream) = channel(0, config.capacity, &cancel);
        let mut workers = Vec::with_capacity(filters.len());
        for (stage, filter) in filters.into_iter().enumerate() {
            let (output, next) = channel(stage + 1, config.capacity, &cancel);
            workers.push(StageWorker::new(
                stage,
                filter,
                upstream,
                output,
                config.fault_policy,
                cancel.clone(),
            ));
            upstream = next;
        }
        debug!(
            "built pipeline: {} stages, capacity {:?}",
            workers.len(),
            config.capacity
        );
        Ok(Self {
            config,
            workers,
            head,
            tail: upstream,
            cancel,
        })
    }

    pub fn stage_count(&self) -> usize {
        self.workers.len()
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.workers.iter().map(|w| w.name().to_string()).collect()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Token that cancels this pipeline's run from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run over a finite batch and collect the survivors.
    pub fn run<I>(self, records: I) -> Result<RunOutput>
    where
        I: IntoIterator<Item = Record>,
        I::IntoIter: Send,
    {
        let mut sink = Vec::new();
        let report = self.run_stream(records.into_iter(), &mut sink)?;
        Ok(RunOutput {
            records: sink,
            report,
        })
    }

    /// Stream records from `source` through every stage into `sink`.
    ///
    /// Either every surviving record reaches the sink followed by
    /// `sink.finish()`, or an error is returned.
    pub fn run_stream<S, K>(self, source: S, sink: &mut K) -> Result<RunReport>
    where
        S: RecordSource + Send,
        K: RecordSink + ?Sized,
    {
        let Pipeline {
            config,
            workers,
            head,
            tail,
            cancel,
        } = self;
        let started = Instant::now();
        let stage_count = workers.len();

        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(stage_count);
            for worker in workers {
                let stage = worker.stage();
                let spawned = thread::Builder::new()
                    .name(format!("stage-{stage}"))
                    .spawn_scoped(scope, move || worker.run());
                match spawned {
                    Ok(handle) => handles.push((stage, handle)),
                    Err(source) => {
                        cancel.cancel();
                        return Err(PipelineError::Spawn { stage, source });
                    }
                }
            }

            let feed_cancel = cancel.clone();
            let feeder = thread::Builder::new()
                .name("pipeline-feed".to_string())
                .spawn_scoped(scope, move || feed(source, head, &feed_cancel));
            let feeder = match feeder {
                Ok(handle) => handle,
                Err(source) => {
                    cancel.cancel();
                    return Err(PipelineError::Spawn {
                        stage: 0,
                        source,
                    });
                }
            };

            let drained = drain(tail, sink, config.drain_timeout, &cancel);

            let fed = feeder.join().unwrap_or_else(|_| {
                cancel.cancel();
                Err(PipelineError::SourcePanicked)
            });
            let mut stages = Vec::with_capacity(stage_count);
            let mut panicked = None;
            let mut violation = None;
            for (stage, handle) in handles {
                match handle.join() {
                    Ok(Ok(report)) => stages.push(report),
                    Ok(Err(err)) => {
                        if violation.is_none() {
                            violation = Some(err);
                        }
                    }
                    Err(_) => {
                        cancel.cancel();
                        if panicked.is_none() {
                            panicked = Some(PipelineError::WorkerPanicked { stage });
                        }
                    }
                }
            }

            let records_in = fed?;
            if let Some(err) = panicked {
                return Err(err);
            }
            // A marker that raced a cancellation can still reach the sink;
            // the output is only complete if no stage was cut short.
            let records_out = match drained {
                Ok(count) if stages.iter().all(|s| !s.cancelled) => Some(count),
                Ok(_) | Err(PipelineError::Cancelled) => None,
                Err(err) => return Err(err),
            };
            if let Some(err) = violation {
                return Err(err);
            }
            if config.fault_policy == FaultPolicy::Abort
                && let Some(fault) = stages.iter().flat_map(|s| s.faults.iter()).next()
            {
                return Err(PipelineError::Fault(fault.clone()));
            }
            let Some(records_out) = records_out else {
                return Err(PipelineError::Cancelled);
            };

            let report = RunReport {
                records_in,
                records_out,
                stages,
                elapsed: started.elapsed(),
            };
            let faults = report.faults().count();
            if faults > 0 {
                warn!("{faults} record(s) dropped by stage faults");
            }
            debug!(
                "pipeline processed {} -> {} records across {} stages in {:?}",
                report.records_in, report.records_out, stage_count, report.elapsed
            );
            Ok(report)
        })
    }
}

/// Push every source record, then the terminal marker, into channel 0.
fn feed<S: RecordSource>(
    mut source: S,
    mut head: ChannelWriter,
    cancel: &CancelToken,
) -> Result<usize> {
    let mut fed = 0;
    loop {
        let record = match source.next_record() {
            Ok(Some(record)) => record,
            Ok(None) => break,
            Err(err) => {
                warn!("record source failed after {fed} records: {err}");
                cancel.cancel();
                return Err(err);
            }
        };
        if let Err(err) = head.put(record) {
            stop_feeding(err, cancel);
            return Ok(fed);
        }
        fed += 1;
    }
    if let Err(err) = head.close() {
        stop_feeding(err, cancel);
    }
    Ok(fed)
}

/// The reader of channel 0 only goes away after cancellation or a failure
/// that its own thread reports, so the feeder just stops.
fn stop_feeding(err: ChannelError, cancel: &CancelToken) {
    if !matches!(err, ChannelError::Cancelled { .. }) {
        debug!("feeder stopping: {err}");
        cancel.cancel();
    }
}

/// Move records from the final channel into the sink until its marker.
fn drain<K: RecordSink + ?Sized>(
    mut tail: ChannelReader,
    sink: &mut K,
    timeout: Option<Duration>,
    cancel: &CancelToken,
) -> Result<usize> {
    let mut drained = 0;
    loop {
        let taken = match timeout {
            Some(timeout) => tail.take_timeout(timeout),
            None => tail.take(),
        };
        match taken {
            Ok(Message::Data(record)) => {
                if let Err(err) = sink.accept(record) {
                    cancel.cancel();
                    return Err(err);
                }
                drained += 1;
            }
            Ok(Message::EndOfStream) => break,
            Err(ChannelError::Cancelled { .. }) => return Err(PipelineError::Cancelled),
            // Disconnected or TimedOut; the loop never takes past the marker.
            Err(err) => {
                cancel.cancel();
                return Err(PipelineError::closed_prematurely(err.channel()));
            }
        }
    }
    if let Err(err) = sink.finish() {
        cancel.cancel();
        return Err(err);
    }
    Ok(drained)
}
