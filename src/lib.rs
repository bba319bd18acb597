//! SXB program loader.
//!
//! Drives the monitor of an SXB development board over its serial line, both as a
//! plain terminal and as an Intel-HEX program loader that types each record
//! into the monitor's memory-edit mode.

use core::marker::PhantomData;
use std::path::{Path, PathBuf};

#[macro_use]
extern crate log;

#[macro_use(block)]
extern crate nb;

extern crate embedded_hal;
use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::serial::{Read, Write};

#[cfg(feature = "linux")]
extern crate linux_embedded_hal;

#[cfg(feature = "linux")]
pub mod linux;

pub mod ihex;
use ihex::{HexRecord, HexRecordReader, ParseError, RecordKind};

pub mod protocol;

pub mod terminal;
pub use terminal::Terminal;

#[cfg(test)]
mod mock;

/// Duplex byte channel to the SXB.
///
/// `WouldBlock` on write means the byte was not accepted and must be retried,
/// `WouldBlock` on read means no data is currently available.
pub trait Channel<E>: Write<u8, Error = E> + Read<u8, Error = E> {
    fn is_open(&self) -> bool;
}

#[derive(Copy, Clone, PartialEq, Debug)]
pub enum State {
    Connected,
    Disconnected,
}

#[derive(Clone, PartialEq, Debug, thiserror::Error)]
pub enum Error<SerialError> {
    #[error("not connected")]
    NotConnected,

    #[error("could not open {path:?}: {kind:?}")]
    FileOpen {
        path: PathBuf,
        kind: std::io::ErrorKind,
    },

    #[error("{error} (after {records_sent} records)")]
    Parse {
        records_sent: usize,
        error: ParseError,
    },

    #[error("channel closed after {records_sent} records")]
    ChannelClosed { records_sent: usize },

    #[error("write failed after {records_sent} records: {error:?}")]
    Write {
        records_sent: usize,
        error: SerialError,
    },

    #[error("upload cancelled after {records_sent} records")]
    Cancelled { records_sent: usize },

    #[error("serial error: {0:?}")]
    Serial(SerialError),

    #[error("io error: {0:?}")]
    Io(std::io::ErrorKind),
}

impl<SerialError> From<SerialError> for Error<SerialError> {
    fn from(e: SerialError) -> Self {
        Self::Serial(e)
    }
}

impl<SerialError> Error<SerialError> {
    /// Number of data records already written to the device when an upload failed.
    ///
    /// `Some` means the device memory may be partially programmed.
    pub fn records_sent(&self) -> Option<usize> {
        match self {
            Error::Parse { records_sent, .. }
            | Error::ChannelClosed { records_sent }
            | Error::Write { records_sent, .. }
            | Error::Cancelled { records_sent } => Some(*records_sent),
            _ => None,
        }
    }
}

/// Handling of records that fail to parse
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum ParsePolicy {
    /// Halt the upload at the first malformed record
    Abort,
    /// Log and skip malformed records
    Skip,
}

impl core::str::FromStr for ParsePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "abort" => Ok(ParsePolicy::Abort),
            "skip" => Ok(ParsePolicy::Skip),
            _ => Err(format!("unknown policy '{}' (expected abort or skip)", s)),
        }
    }
}

#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "structopt", derive(structopt::StructOpt))]
pub struct Options {
    /// Settle time after entering memory-edit mode
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "100"))]
    pub mode_settle_ms: u32,

    /// Settle time after sending a record address
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "100"))]
    pub address_settle_ms: u32,

    /// Settle time after each data byte
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "10"))]
    pub byte_settle_ms: u32,

    /// Settle time after committing a record
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "100"))]
    pub commit_settle_ms: u32,

    /// Pause after each terminal keystroke
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "100"))]
    pub key_settle_ms: u32,

    /// Pause before sending the first record of a program
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "100"))]
    pub start_delay_ms: u32,

    /// Action on malformed HEX records (abort or skip)
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "abort"))]
    pub on_malformed: ParsePolicy,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            mode_settle_ms: protocol::MODE_SETTLE_MS,
            address_settle_ms: protocol::ADDRESS_SETTLE_MS,
            byte_settle_ms: protocol::BYTE_SETTLE_MS,
            commit_settle_ms: protocol::COMMIT_SETTLE_MS,
            key_settle_ms: protocol::KEY_SETTLE_MS,
            start_delay_ms: protocol::START_DELAY_MS,
            on_malformed: ParsePolicy::Abort,
        }
    }
}

/// Upload progress counters
#[derive(Copy, Clone, PartialEq, Debug, Default)]
pub struct UploadStats {
    /// Data records written to the device
    pub records: usize,
    /// Segment address records applied
    pub segments: usize,
    /// Data bytes written to the device
    pub bytes: usize,
    /// Malformed records skipped
    pub skipped: usize,
}

/// Connection to an SXB board.
///
/// Owns the channel, so the terminal relay and the program loader can only
/// borrow it one at a time.
pub struct Sxb<P, D, E> {
    options: Options,
    port: P,
    delay: D,
    _err: PhantomData<E>,
}

impl<P, D, E> Sxb<P, D, E>
where
    P: Channel<E>,
    D: DelayMs<u32>,
    E: core::fmt::Debug,
{
    /// Create a new connection over an open channel
    pub fn new(port: P, delay: D, options: Options) -> Self {
        Self {
            options,
            port,
            delay,
            _err: PhantomData,
        }
    }

    /// Fetch the connection state
    pub fn state(&self) -> State {
        match self.port.is_open() {
            true => State::Connected,
            false => State::Disconnected,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == State::Connected
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Close the connection, handing back the channel
    pub fn disconnect(self) -> P {
        info!("Connection closed");
        self.port
    }

    /// Borrow the channel as an interactive terminal
    pub fn terminal(&mut self) -> Terminal<'_, P, D, E> {
        Terminal::new(&mut self.port, &mut self.delay, &self.options)
    }

    /// Upload a sequence of records
    pub fn upload<I>(&mut self, records: I) -> Result<UploadStats, Error<E>>
    where
        I: IntoIterator<Item = Result<HexRecord, ParseError>>,
    {
        self.upload_with(records, |_| true)
    }

    /// Upload a sequence of records, calling `progress` between records.
    /// Returning `false` from `progress` cancels the upload.
    pub fn upload_with<I, F>(&mut self, records: I, progress: F) -> Result<UploadStats, Error<E>>
    where
        I: IntoIterator<Item = Result<HexRecord, ParseError>>,
        F: FnMut(&UploadStats) -> bool,
    {
        if !self.is_connected() {
            error!("Upload requested while not connected");
            return Err(Error::NotConnected);
        }

        self.delay.delay_ms(self.options.start_delay_ms);

        let mut u = Uploader::new(&mut self.port, &mut self.delay, &self.options);
        u.run_with(records, progress)
    }

    /// Load an Intel-HEX program from a file
    pub fn load_file<Q: AsRef<Path>>(&mut self, path: Q) -> Result<UploadStats, Error<E>> {
        self.load_file_with(path, |_| true)
    }

    /// Load an Intel-HEX program from a file, reporting progress between records
    pub fn load_file_with<Q, F>(&mut self, path: Q, progress: F) -> Result<UploadStats, Error<E>>
    where
        Q: AsRef<Path>,
        F: FnMut(&UploadStats) -> bool,
    {
        if !self.is_connected() {
            error!("Load requested while not connected");
            return Err(Error::NotConnected);
        }

        let path = path.as_ref();
        let reader = HexRecordReader::open(path).map_err(|e| {
            error!("Could not open {}: {}", path.display(), e);
            Error::FileOpen {
                path: path.to_path_buf(),
                kind: e.kind(),
            }
        })?;

        info!("Loading program from {}", path.display());

        self.upload_with(reader, progress)
    }
}

/// Program upload session.
///
/// Applies records in order, tracking the current segment base and typing
/// each data record into the monitor's memory-edit mode.
pub struct Uploader<'a, P, D, E> {
    port: &'a mut P,
    delay: &'a mut D,
    options: &'a Options,
    segment: u16,
    stats: UploadStats,
    _err: PhantomData<E>,
}

impl<'a, P, D, E> Uploader<'a, P, D, E>
where
    P: Channel<E>,
    D: DelayMs<u32>,
    E: core::fmt::Debug,
{
    pub fn new(port: &'a mut P, delay: &'a mut D, options: &'a Options) -> Self {
        Self {
            port,
            delay,
            options,
            segment: 0,
            stats: UploadStats::default(),
            _err: PhantomData,
        }
    }

    /// Current segment base
    pub fn segment(&self) -> u16 {
        self.segment
    }

    pub fn stats(&self) -> UploadStats {
        self.stats
    }

    /// Upload records until the end of data
    pub fn run<I>(&mut self, records: I) -> Result<UploadStats, Error<E>>
    where
        I: IntoIterator<Item = Result<HexRecord, ParseError>>,
    {
        self.run_with(records, |_| true)
    }

    /// Upload records until the end of data, calling `progress` before each record.
    ///
    /// Cancellation only happens between records, a record's monitor
    /// transaction is never cut short.
    pub fn run_with<I, F>(&mut self, records: I, mut progress: F) -> Result<UploadStats, Error<E>>
    where
        I: IntoIterator<Item = Result<HexRecord, ParseError>>,
        F: FnMut(&UploadStats) -> bool,
    {
        for r in records {
            if !progress(&self.stats) {
                warn!("Upload cancelled after {} records", self.stats.records);
                return Err(Error::Cancelled {
                    records_sent: self.stats.records,
                });
            }

            if !self.port.is_open() {
                error!("Channel closed after {} records", self.stats.records);
                return Err(Error::ChannelClosed {
                    records_sent: self.stats.records,
                });
            }

            let record = match r {
                Ok(r) => r,
                Err(e) if self.options.on_malformed == ParsePolicy::Skip && e.is_recoverable() => {
                    warn!("Skipping record: {}", e);
                    self.stats.skipped += 1;
                    continue;
                }
                Err(e) => {
                    error!("Aborting upload: {}", e);
                    return Err(Error::Parse {
                        records_sent: self.stats.records,
                        error: e,
                    });
                }
            };

            self.apply(&record)?;
        }

        progress(&self.stats);

        info!(
            "Upload complete: {} records, {} bytes",
            self.stats.records, self.stats.bytes
        );

        Ok(self.stats)
    }

    /// Apply a single record
    pub fn apply(&mut self, record: &HexRecord) -> Result<(), Error<E>> {
        if let RecordKind::Segment(s) = record.kind() {
            debug!("Segment base 0x{:04X} (line {})", s, record.line);
            self.segment = s;
            self.stats.segments += 1;
            return Ok(());
        }

        debug!(
            "Writing {} bytes at 0x{:06X} (line {})",
            record.data.len(),
            protocol::effective_address(self.segment, record.address) & protocol::ADDRESS_MASK,
            record.line
        );

        for step in protocol::steps(self.segment, record) {
            self.send(&step.bytes())?;
            self.delay.delay_ms(step.settle_ms(self.options));
        }

        self.stats.records += 1;
        self.stats.bytes += record.data.len();

        Ok(())
    }

    /// Write every byte, retrying until each is accepted
    fn send(&mut self, data: &[u8]) -> Result<(), Error<E>> {
        for b in data {
            if let Err(error) = block!(self.port.write(*b)) {
                error!("Write failed: {:?}", error);
                return Err(Error::Write {
                    records_sent: self.stats.records,
                    error,
                });
            }
        }

        Ok(())
    }
}
