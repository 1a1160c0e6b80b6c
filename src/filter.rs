//! The filter capability and closure adapters.
//!
//! A [`Filter`] sees one record at a time and decides to drop it (`None`) or
//! forward it (`Some`), possibly transformed. Filters hold only configuration
//! fixed at construction, so one instance can serve a stage worker without
//! any locking.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::record::Record;

/// A record transformation stage.
///
/// Implementations must not block, sleep, or perform I/O. A panic inside
/// `apply` is treated as a fault on that record, not as a stage failure.
pub trait Filter: Send + Sync {
    /// Drop (`None`) or forward (`Some`) the record.
    fn apply(&self, record: &Record) -> Option<Record>;

    /// Display name used in logs, reports and faults.
    fn name(&self) -> &str;
}

impl<F: Filter + ?Sized> Filter for Arc<F> {
    fn apply(&self, record: &Record) -> Option<Record> {
        (**self).apply(record)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

impl<F: Filter + ?Sized> Filter for Box<F> {
    fn apply(&self, record: &Record) -> Option<Record> {
        (**self).apply(record)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Filter backed by a closure with the full drop-or-forward signature.
pub struct FnFilter<F> {
    name: String,
    f: F,
}

impl<F> FnFilter<F>
where
    F: Fn(&Record) -> Option<Record> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> Filter for FnFilter<F>
where
    F: Fn(&Record) -> Option<Record> + Send + Sync,
{
    fn apply(&self, record: &Record) -> Option<Record> {
        (self.f)(record)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Filter that forwards records unchanged when a predicate holds.
pub struct Keep<P> {
    name: String,
    predicate: P,
}

impl<P> Keep<P>
where
    P: Fn(&Record) -> bool + Send + Sync,
{
    pub fn new(name: impl Into<String>, predicate: P) -> Self {
        Self {
            name: name.into(),
            predicate,
        }
    }
}

impl<P> Filter for Keep<P>
where
    P: Fn(&Record) -> bool + Send + Sync,
{
    fn apply(&self, record: &Record) -> Option<Record> {
        (self.predicate)(record).then(|| record.clone())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Filter that transforms every record and never drops.
pub struct Map<F> {
    name: String,
    f: F,
}

impl<F> Map<F>
where
    F: Fn(&Record) -> Record + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> Filter for Map<F>
where
    F: Fn(&Record) -> Record + Send + Sync,
{
    fn apply(&self, record: &Record) -> Option<Record> {
        Some((self.f)(record))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Apply a filter, converting a panic into its message.
pub(crate) fn apply_guarded(
    filter: &dyn Filter,
    record: &Record,
) -> std::result::Result<Option<Record>, String> {
    panic::catch_unwind(AssertUnwindSafe(|| filter.apply(record)))
        .map_err(|payload| panic_message(payload.as_ref()))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
