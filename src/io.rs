//! Line-oriented record sources and sinks.

use std::borrow::Cow;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use log::warn;

use crate::error::{PipelineError, Result};
use crate::pipeline::{RecordSink, RecordSource};
use crate::record::Record;

/// Reads one record per line. Line terminators (`\n` or `\r\n`) are
/// stripped; empty lines are kept as empty records. Bytes that are not
/// valid UTF-8 become U+FFFD instead of failing the read.
pub struct LineSource<R> {
    reader: R,
    buf: Vec<u8>,
    lines: usize,
}

impl<R: BufRead> LineSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            lines: 0,
        }
    }

    /// Lines read so far.
    pub fn lines_read(&self) -> usize {
        self.lines
    }
}

impl<R: BufRead> RecordSource for LineSource<R> {
    fn next_record(&mut self) -> Result<Option<Record>> {
        self.buf.clear();
        if self.reader.read_until(b'\n', &mut self.buf)? == 0 {
            return Ok(None);
        }
        self.lines += 1;
        let line = self
            .buf
            .strip_suffix(b"\n")
            .map(|l| l.strip_suffix(b"\r").unwrap_or(l))
            .unwrap_or(&self.buf);
        let text = String::from_utf8_lossy(line);
        if let Cow::Owned(_) = text {
            warn!("line {}: invalid UTF-8 replaced", self.lines);
        }
        Ok(Some(Record::new(text.into_owned())))
    }
}

/// Writes one record per line and flushes on finish.
pub struct LineSink<W: Write> {
    writer: W,
    written: usize,
}

impl<W: Write> LineSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> RecordSink for LineSink<W> {
    fn accept(&mut self, record: Record) -> Result<()> {
        writeln!(self.writer, "{record}")?;
        self.written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Open `path` as a buffered line source.
pub fn open_source(path: impl AsRef<Path>) -> Result<LineSource<BufReader<File>>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| PipelineError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(LineSource::new(BufReader::new(file)))
}

/// Create (or truncate) `path` as a buffered line sink, creating any
/// missing parent directories.
pub fn create_sink(path: impl AsRef<Path>) -> Result<LineSink<BufWriter<File>>> {
    let path = path.as_ref();
    let open_err = |source| PipelineError::Open {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(open_err)?;
    }
    let file = File::create(path).map_err(open_err)?;
    Ok(LineSink::new(BufWriter::new(file)))
}

/// Read every line of `path` into memory.
pub fn read_records(path: impl AsRef<Path>) -> Result<Vec<Record>> {
    let mut source = open_source(path)?;
    let mut records = Vec::new();
    while let Some(record) = source.next_record()? {
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{Filter, Keep};
    use crate::moderation::{BuyerCheck, standard_chain};
    use crate::pipeline::{Pipeline, PipelineConfig};
    use std::io::Cursor;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn spec_path(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("specs").join(name)
    }

    #[test]
    fn test_line_source_strips_terminators() {
        let mut source = LineSource::new(Cursor::new("a\r\nb\n\nc"));
        let mut got = Vec::new();
        while let Some(r) = source.next_record().unwrap() {
            got.push(r.into_string());
        }
        assert_eq!(got, vec!["a", "b", "", "c"]);
        assert_eq!(source.lines_read(), 4);
    }

    #[test]
    fn test_invalid_utf8_line_is_decoded_not_fatal() {
        let input: &[u8] = b"John, Laptop, ok, PIC\nMary, Phone, caf\xe9, IMG\nAnn, BigMac, So GOOD, Image\n";
        let source = LineSource::new(Cursor::new(input));
        let pipeline = Pipeline::build(
            vec![Arc::new(Keep::new("all", |_: &Record| true)) as Arc<dyn Filter>],
            PipelineConfig::default(),
        )
        .unwrap();
        let mut sink = Vec::new();
        let report = pipeline.run_stream(source, &mut sink).unwrap();

        assert_eq!(report.records_in, 3);
        assert_eq!(sink.len(), 3);
        assert_eq!(sink[0], Record::new("John, Laptop, ok, PIC"));
        assert_eq!(sink[1], Record::new("Mary, Phone, caf\u{FFFD}, IMG"));
        assert_eq!(sink[2], Record::new("Ann, BigMac, So GOOD, Image"));
    }

    #[test]
    fn test_line_sink_writes_lines() {
        let mut sink = LineSink::new(Vec::new());
        sink.accept(Record::new("a, b")).unwrap();
        sink.accept(Record::new("")).unwrap();
        sink.finish().unwrap();
        assert_eq!(sink.written(), 2);
        assert_eq!(sink.into_inner(), b"a, b\n\n");
    }

    #[test]
    fn test_open_missing_file_names_path() {
        let err = open_source("/definitely/not/here.data").err().unwrap();
        assert!(matches!(err, PipelineError::Open { .. }));
        assert!(err.to_string().contains("/definitely/not/here.data"));
    }

    #[test]
    fn test_create_sink_makes_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/out.data");
        let mut sink = create_sink(&path).unwrap();
        sink.accept(Record::new("x")).unwrap();
        sink.finish().unwrap();
        drop(sink);
        assert_eq!(fs::read_to_string(&path).unwrap(), "x\n");
    }

    #[test]
    fn test_messages_file_streamed_to_file() {
        let source = open_source(spec_path("messages.data")).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let out_path = dir.path().join("out.data");
        let mut sink = create_sink(&out_path).unwrap();

        let report = Pipeline::build(
            standard_chain(BuyerCheck::with_defaults()),
            PipelineConfig::default(),
        )
        .unwrap()
        .run_stream(source, &mut sink)
        .unwrap();
        drop(sink);

        let expected = fs::read_to_string(spec_path("messages.expected")).unwrap();
        let actual = fs::read_to_string(&out_path).unwrap();
        assert_eq!(actual, expected);
        assert_eq!(report.records_out, expected.lines().count());
        assert_eq!(report.records_in, read_records(spec_path("messages.data")).unwrap().len());
    }
}
