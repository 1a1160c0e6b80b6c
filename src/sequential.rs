//! Whole-batch sequential executor.
//!
//! Each filter runs over the complete batch before the next filter starts.
//! Nothing runs concurrently; this is the reference the concurrent
//! pipeline must agree with record for record.

use std::sync::Arc;
use std::time::Instant;

use log::{debug, warn};

use crate::error::StageFault;
use crate::filter::{Filter, apply_guarded};
use crate::pipeline::{RunOutput, RunReport};
use crate::record::Record;
use crate::worker::{StageReport, WorkerState};

/// Apply `filters` in order, one full pass per filter.
///
/// Filter panics drop the record and are reported, as with
/// [`FaultPolicy::Isolate`](crate::FaultPolicy).
pub fn run_sequential(filters: &[Arc<dyn Filter>], records: Vec<Record>) -> RunOutput {
    let started = Instant::now();
    let records_in = records.len();
    let mut stages = Vec::with_capacity(filters.len());
    let mut current = records;

    for (stage, filter) in filters.iter().enumerate() {
        let mut report = StageReport::new(stage, filter.name());
        let mut next = Vec::with_capacity(current.len());
        for record in current {
            report.processed += 1;
            match apply_guarded(filter.as_ref(), &record) {
                Ok(Some(out)) => {
                    report.forwarded += 1;
                    next.push(out);
                }
                Ok(None) => report.dropped += 1,
                Err(message) => {
                    let fault = StageFault {
                        stage,
                        filter: filter.name().to_string(),
                        record,
                        message,
                    };
                    warn!("{fault}");
                    report.faults.push(fault);
                }
            }
        }
        report.state = WorkerState::Done;
        debug!(
            "stage {} ({}): {} -> {} records",
            stage,
            filter.name(),
            report.processed,
            report.forwarded
        );
        stages.push(report);
        current = next;
    }

    let report = RunReport {
        records_in,
        records_out: current.len(),
        stages,
        elapsed: started.elapsed(),
    };
    RunOutput {
        records: current,
        report,
    }
}
