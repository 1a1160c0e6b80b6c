//! # pipes-filters-rs
//!
//! A pipes-and-filters pipeline for comma-delimited text records.
//!
//! Each filter runs on its own thread. Adjacent stages are linked by a
//! single-producer, single-consumer channel that carries records followed by
//! one typed end-of-stream marker, so every stage can work on a different
//! record at the same time while the output keeps the input order.
//!
//! ## Overview
//!
//! - **Records**: one line of text, viewed as fields split on `", "`
//! - **Filters**: `&Record -> Option<Record>`; `None` drops, `Some` forwards
//! - **Channels**: bounded FIFO hand-off with a terminal marker
//! - **Stage workers**: take, filter, forward, and always pass the marker on
//! - **Pipeline**: wires `N + 1` channels for `N` filters, starts every
//!   worker at once, feeds the source and drains the sink
//!
//! ## Example
//!
//! ```
//! use pipes_filters_rs::{BuyerCheck, Pipeline, PipelineConfig, Record, standard_chain};
//!
//! let buyers = BuyerCheck::new(["John - Laptop", "Mary - Phone", "Ann - BigMac"]);
//! let records = vec![
//!     Record::new("John, Laptop, ok, PICTURE"),
//!     Record::new("Mary, Phone, @#$%, IMAGE"),
//!     Record::new("Peter, Phone, GREAT, Pics"),
//!     Record::new("Ann, BigMac, So GOOD, Image"),
//! ];
//!
//! let output = Pipeline::build(standard_chain(buyers), PipelineConfig::default())
//!     .unwrap()
//!     .run(records)
//!     .unwrap();
//!
//! assert_eq!(
//!     output.records,
//!     vec![
//!         Record::new("John, Laptop, ok-, picture"),
//!         Record::new("Ann, BigMac, So GOOD+, image"),
//!     ]
//! );
//! ```

pub mod cancel;
pub mod channel;
pub mod error;
pub mod filter;
pub mod io;
pub mod moderation;
pub mod pipeline;
pub mod record;
pub mod sequential;
pub mod worker;

pub use cancel::CancelToken;
pub use channel::{ChannelReader, ChannelWriter, Message, channel};
pub use error::{ChannelError, PipelineError, Result, StageFault};
pub use filter::{Filter, FnFilter, Keep, Map};
pub use io::{LineSink, LineSource, create_sink, open_source, read_records};
pub use moderation::{
    BuyerCheck, DEFAULT_BUYERS, FieldNormalizer, KeywordScreen, LinkStripper, Sentiment,
    SentimentTagger, standard_chain,
};
pub use pipeline::{
    DEFAULT_CAPACITY, FaultPolicy, Pipeline, PipelineBuilder, PipelineConfig, RecordSink,
    RecordSource, RunOutput, RunReport,
};
pub use record::{FIELD_DELIMITER, Record};
pub use sequential::run_sequential;
pub use worker::{StageReport, StageWorker, WorkerState};
