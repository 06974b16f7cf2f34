//! Strace output parser

use std::{
    fs::File,
    io::{self, BufRead, BufWriter, Write as _},
    iter::FusedIterator,
    path::Path,
};

use crate::strace::TraceRecord;

macro_rules! dbg_parser {
    ($input:expr) => {
        log::trace!("{}:{}\ninput: {:?}", function_name!(), line!(), $input,);
    };
}

mod line;
mod value;

use line::{LineError, parse_line};

/// Failure to turn a line into a record, stops the record stream
#[derive(Debug, thiserror::Error)]
pub(crate) enum ParseError {
    #[error("line {line_number} (byte offset {byte_offset}) matches no known record shape: {line:?}")]
    UnrecognizedLine {
        line_number: usize,
        byte_offset: usize,
        line: String,
    },
    #[error(
        "line {line_number} (byte offset {byte_offset}) has a missing or invalid {field:?} field: {line:?}"
    )]
    MalformedCapture {
        field: &'static str,
        line_number: usize,
        byte_offset: usize,
        line: String,
    },
    #[error("failed to read line {line_number} (byte offset {byte_offset})")]
    Read {
        line_number: usize,
        byte_offset: usize,
        #[source]
        source: io::Error,
    },
    #[error("failed to mirror line {line_number} to strace log")]
    Log {
        line_number: usize,
        #[source]
        source: io::Error,
    },
}

/// Lazily turns strace output lines into records, one line at a time.
///
/// The first error ends the stream, no line is read after it.
pub(crate) struct RecordParser {
    reader: Box<dyn BufRead>,
    log: Option<BufWriter<File>>,
    buf: String,
    /// Number of lines read so far
    line_number: usize,
    /// Offset of the next line start
    byte_offset: usize,
    failed: bool,
}

impl RecordParser {
    pub(crate) fn new(reader: Box<dyn BufRead>, log_path: Option<&Path>) -> anyhow::Result<Self> {
        let log = log_path
            .map(|p| -> io::Result<_> {
                let file = File::options().create(true).append(true).open(p)?;
                Ok(BufWriter::with_capacity(64 * 1024, file))
            })
            .transpose()?;
        Ok(Self {
            reader,
            log,
            buf: String::new(),
            line_number: 0,
            byte_offset: 0,
            failed: false,
        })
    }

    fn parse_next_line(&mut self) -> Option<Result<TraceRecord, ParseError>> {
        self.buf.clear();
        let line_number = self.line_number + 1;
        let byte_offset = self.byte_offset;
        let read_len = match self.reader.read_line(&mut self.buf) {
            Ok(0) => return None, // EOF
            Ok(n) => n,
            Err(source) => {
                return Some(Err(ParseError::Read {
                    line_number,
                    byte_offset,
                    source,
                }));
            }
        };
        self.line_number = line_number;
        self.byte_offset += read_len;
        let line = self.buf.trim_end_matches(['\n', '\r']);

        if let Some(log) = self.log.as_mut() {
            if let Err(source) = writeln!(log, "{line}") {
                return Some(Err(ParseError::Log {
                    line_number,
                    source,
                }));
            }
        }

        let res = match parse_line(line) {
            Ok(record) => {
                log::trace!("Parsed line {line_number}: {line:?}");
                Ok(record)
            }
            Err(LineError::Unrecognized) => Err(ParseError::UnrecognizedLine {
                line_number,
                byte_offset,
                line: line.to_owned(),
            }),
            Err(LineError::MalformedCapture { field }) => Err(ParseError::MalformedCapture {
                field,
                line_number,
                byte_offset,
                line: line.to_owned(),
            }),
        };
        if let Err(e) = &res {
            log::error!("{e}");
        }
        Some(res)
    }
}

impl Iterator for RecordParser {
    type Item = Result<TraceRecord, ParseError>;

    /// Parse the next strace output line, in input order
    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let item = self.parse_next_line();
        if matches!(item, Some(Err(_))) {
            self.failed = true;
            if let Some(log) = self.log.as_mut() {
                if let Err(e) = log.flush() {
                    log::warn!("Failed to flush strace log: {e}");
                }
            }
        }
        item
    }
}

impl FusedIterator for RecordParser {}
