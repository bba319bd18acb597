//! Intel-HEX record reader.
//!
//! Only the subset the SXB monitor can load is understood: data records (`00`),
//! the end-of-file record (`01`, or any record with a zero byte count) and
//! extended segment address records (`04`). Checksums are not validated.

use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::Path;

pub const RECORD_START: u8 = b':';

pub const DATA: u8 = 0x00;
pub const END_OF_FILE: u8 = 0x01;
pub const EXTENDED_SEGMENT_ADDRESS: u8 = 0x04;

/// Record field being parsed when an error occurred
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum Field {
    ByteCount,
    Address,
    RecordType,
    /// Data byte at the given index
    Data(usize),
}

impl core::fmt::Display for Field {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Field::ByteCount => write!(f, "byte count"),
            Field::Address => write!(f, "address"),
            Field::RecordType => write!(f, "record type"),
            Field::Data(i) => write!(f, "data byte {}", i),
        }
    }
}

#[derive(Clone, PartialEq, Debug, thiserror::Error)]
pub enum ParseError {
    #[error("line {line}: malformed {field} field")]
    MalformedField { line: usize, field: Field },

    #[error("line {line}: input ended inside {field} field")]
    Truncated { line: usize, field: Field },

    #[error("line {line}: malformed {field} field in segment record")]
    MalformedSegment { line: usize, field: Field },

    #[error("line {line}: segment record carries {count} data bytes, expected 2")]
    SegmentLength { line: usize, count: u8 },

    #[error("line {line}: unsupported record type 0x{record_type:02X}")]
    UnsupportedRecordType { line: usize, record_type: u8 },

    #[error("read error: {0:?}")]
    Io(ErrorKind),
}

impl ParseError {
    /// Line of the failing record, if the error belongs to one
    pub fn line(&self) -> Option<usize> {
        match self {
            ParseError::MalformedField { line, .. }
            | ParseError::Truncated { line, .. }
            | ParseError::MalformedSegment { line, .. }
            | ParseError::SegmentLength { line, .. }
            | ParseError::UnsupportedRecordType { line, .. } => Some(*line),
            ParseError::Io(_) => None,
        }
    }

    /// Whether reading can continue with the next record.
    ///
    /// Errors in a segment record are not, every later data record depends on it.
    pub fn is_recoverable(&self) -> bool {
        match self {
            ParseError::Truncated { .. }
            | ParseError::MalformedSegment { .. }
            | ParseError::SegmentLength { .. }
            | ParseError::Io(_) => false,
            _ => true,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Debug)]
pub enum RecordKind {
    /// Bytes to be written at `address` within the current segment
    Data,
    /// New segment base
    Segment(u16),
}

/// A single parsed record
#[derive(Clone, PartialEq, Debug)]
pub struct HexRecord {
    /// Declared number of data bytes
    pub byte_count: u8,
    /// Offset within the current segment, or the new segment base for segment records
    pub address: u16,
    pub record_type: u8,
    /// Data bytes, empty for segment records
    pub data: Vec<u8>,
    /// Line the record started on (1-based)
    pub line: usize,
}

impl HexRecord {
    pub fn kind(&self) -> RecordKind {
        match self.record_type {
            EXTENDED_SEGMENT_ADDRESS => RecordKind::Segment(self.address),
            _ => RecordKind::Data,
        }
    }
}

/// Lazily reads one record at a time from a text source.
///
/// Iteration ends at the end of input or at the first end-of-file record,
/// any lines following it are never read.
pub struct HexRecordReader<R> {
    src: R,
    line: usize,
    done: bool,
}

impl HexRecordReader<BufReader<File>> {
    /// Open a HEX file for reading
    pub fn open<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let f = File::open(path)?;
        Ok(Self::new(BufReader::new(f)))
    }
}

impl<R: BufRead> HexRecordReader<R> {
    pub fn new(src: R) -> Self {
        Self {
            src,
            line: 1,
            done: false,
        }
    }

    /// Current physical line (1-based)
    pub fn line(&self) -> usize {
        self.line
    }

    fn peek(&mut self) -> Result<Option<u8>, ParseError> {
        let buff = self.src.fill_buf().map_err(|e| ParseError::Io(e.kind()))?;
        Ok(buff.first().copied())
    }

    fn bump(&mut self, b: u8) {
        self.src.consume(1);
        if b == b'\n' {
            self.line += 1;
        }
    }

    /// Skip to just past the next record start marker, returns false at end of input
    fn seek_start(&mut self) -> Result<bool, ParseError> {
        while let Some(b) = self.peek()? {
            self.bump(b);
            if b == RECORD_START {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Discard everything up to and including the next line terminator
    fn skip_line(&mut self) -> Result<(), ParseError> {
        while let Some(b) = self.peek()? {
            self.bump(b);
            if b == b'\n' {
                break;
            }
        }
        Ok(())
    }

    /// Read a fixed-width hex field, digits are only consumed when valid
    fn field(&mut self, digits: usize, field: Field, line: usize) -> Result<u16, ParseError> {
        let mut value = 0u16;

        for _ in 0..digits {
            let b = match self.peek()? {
                Some(b) => b,
                None => return Err(ParseError::Truncated { line, field }),
            };

            let nibble = match (b as char).to_digit(16) {
                Some(n) => n as u16,
                None => return Err(ParseError::MalformedField { line, field }),
            };

            self.bump(b);
            value = (value << 4) | nibble;
        }

        Ok(value)
    }

    /// Parse the body of a record following the start marker.
    /// Returns `None` for end-of-file records.
    fn record(&mut self, line: usize) -> Result<Option<HexRecord>, ParseError> {
        let byte_count = self.field(2, Field::ByteCount, line)? as u8;
        if byte_count == 0 {
            return Ok(None);
        }

        let address = self.field(4, Field::Address, line)?;
        let record_type = self.field(2, Field::RecordType, line)? as u8;

        match record_type {
            DATA => {
                let mut data = Vec::with_capacity(byte_count as usize);
                for i in 0..byte_count as usize {
                    data.push(self.field(2, Field::Data(i), line)? as u8);
                }

                Ok(Some(HexRecord {
                    byte_count,
                    address,
                    record_type,
                    data,
                    line,
                }))
            }
            EXTENDED_SEGMENT_ADDRESS => {
                if byte_count != 2 {
                    return Err(ParseError::SegmentLength {
                        line,
                        count: byte_count,
                    });
                }

                let segment = self.field(4, Field::Data(0), line).map_err(|e| match e {
                    ParseError::MalformedField { line, field } => {
                        ParseError::MalformedSegment { line, field }
                    }
                    e => e,
                })?;

                Ok(Some(HexRecord {
                    byte_count,
                    address: segment,
                    record_type,
                    data: Vec::new(),
                    line,
                }))
            }
            END_OF_FILE => Ok(None),
            _ => Err(ParseError::UnsupportedRecordType { line, record_type }),
        }
    }
}

impl<R: BufRead> Iterator for HexRecordReader<R> {
    type Item = Result<HexRecord, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let line = match self.seek_start() {
            Ok(true) => self.line,
            Ok(false) => {
                self.done = true;
                return None;
            }
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };

        match self.record(line) {
            Ok(Some(r)) => Some(self.skip_line().map(|_| r)),
            Ok(None) => {
                debug!("End of file record at line {}", line);
                self.done = true;
                None
            }
            Err(e) if !e.is_recoverable() => {
                self.done = true;
                Some(Err(e))
            }
            // Resume at the next line
            Err(e) => Some(self.skip_line().and(Err(e))),
        }
    }
}

impl<R: BufRead> core::iter::FusedIterator for HexRecordReader<R> {}
