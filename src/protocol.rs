//! SXB monitor keystroke protocol.
//!
//! The monitor is driven open-loop: nothing is acknowledged, so each group of
//! keystrokes is followed by a fixed settle period before the next is sent.

use crate::ihex::{HexRecord, RecordKind};
use crate::Options;

/// Enter memory-edit mode
pub const MODE_MEMORY: u8 = b'M';

/// Carriage return, commits the current entry
pub const COMMIT: u8 = 0x0D;

/// Number of hex digits in an address entry
pub const ADDRESS_DIGITS: usize = 6;
pub const ADDRESS_MASK: u32 = 0x00FF_FFFF;

/// Settle after switching the monitor into memory-edit mode
pub const MODE_SETTLE_MS: u32 = 100;
/// Settle after the address digits
pub const ADDRESS_SETTLE_MS: u32 = 100;
/// Settle after each data byte
pub const BYTE_SETTLE_MS: u32 = 10;
/// Settle after committing an entry
pub const COMMIT_SETTLE_MS: u32 = 100;
/// Pause after each interactive keystroke so the monitor can echo it
pub const KEY_SETTLE_MS: u32 = 100;
/// Pause between opening a program and sending the first record
pub const START_DELAY_MS: u32 = 100;

/// Terminal receive polling period
pub const POLL_PERIOD_MS: u32 = 250;

pub const DEFAULT_BAUD: usize = 9600;

/// Compose the effective address of a record within a segment
pub fn effective_address(segment: u16, offset: u16) -> u32 {
    ((segment as u32) << 16) | offset as u32
}

/// One keystroke group of a monitor memory-edit transaction
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum Step {
    /// Enter memory-edit mode
    Mode,
    /// Start address, sent as the low 24 bits
    Address(u32),
    /// Single data byte
    Data(u8),
    /// Commit the entry
    Commit,
}

impl Step {
    /// Keystrokes for this step
    pub fn bytes(&self) -> Vec<u8> {
        match self {
            Step::Mode => vec![MODE_MEMORY],
            Step::Address(a) => format!("{:06X}", a & ADDRESS_MASK).into_bytes(),
            Step::Data(d) => format!("{:02X}", d).into_bytes(),
            Step::Commit => vec![COMMIT],
        }
    }

    /// Time to wait after sending this step
    pub fn settle_ms(&self, options: &Options) -> u32 {
        match self {
            Step::Mode => options.mode_settle_ms,
            Step::Address(_) => options.address_settle_ms,
            Step::Data(_) => options.byte_settle_ms,
            Step::Commit => options.commit_settle_ms,
        }
    }
}

/// Build the monitor transaction for a record, segment records produce none
pub fn steps(segment: u16, record: &HexRecord) -> Vec<Step> {
    if let RecordKind::Segment(_) = record.kind() {
        return Vec::new();
    }

    let mut s = Vec::with_capacity(record.data.len() + 3);

    s.push(Step::Mode);
    s.push(Step::Address(effective_address(segment, record.address)));
    s.extend(record.data.iter().map(|d| Step::Data(*d)));
    s.push(Step::Commit);

    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ihex::{DATA, EXTENDED_SEGMENT_ADDRESS};

    fn data_record(address: u16, data: &[u8]) -> HexRecord {
        HexRecord {
            byte_count: data.len() as u8,
            address,
            record_type: DATA,
            data: data.to_vec(),
            line: 1,
        }
    }

    #[test]
    fn composes_segment_and_offset() {
        assert_eq!(effective_address(0, 0x1234), 0x0000_1234);
        assert_eq!(effective_address(0xABCD, 0x0010), 0xABCD_0010);
        assert_eq!(effective_address(0x0001, 0xFFFF), 0x0001_FFFF);
    }

    #[test]
    fn address_is_six_digits() {
        assert_eq!(Step::Address(0).bytes(), b"000000".to_vec());
        assert_eq!(Step::Address(0x01_2345).bytes(), b"012345".to_vec());
        assert_eq!(Step::Address(0xABCD_0010).bytes(), b"CD0010".to_vec());
    }

    #[test]
    fn data_is_two_uppercase_digits() {
        assert_eq!(Step::Data(0x0a).bytes(), b"0A".to_vec());
        assert_eq!(Step::Data(0xff).bytes(), b"FF".to_vec());
        assert_eq!(Step::Mode.bytes(), vec![b'M']);
        assert_eq!(Step::Commit.bytes(), vec![13]);
    }

    #[test]
    fn default_settle_times() {
        let o = Options::default();
        assert_eq!(Step::Mode.settle_ms(&o), 100);
        assert_eq!(Step::Address(0).settle_ms(&o), 100);
        assert_eq!(Step::Data(0).settle_ms(&o), 10);
        assert_eq!(Step::Commit.settle_ms(&o), 100);
    }

    #[test]
    fn data_record_transaction() {
        let s = steps(0x0001, &data_record(0x0200, &[0xC3, 0x00]));
        assert_eq!(
            s,
            vec![
                Step::Mode,
                Step::Address(0x0001_0200),
                Step::Data(0xC3),
                Step::Data(0x00),
                Step::Commit,
            ]
        );
    }

    #[test]
    fn segment_record_has_no_transaction() {
        let r = HexRecord {
            byte_count: 2,
            address: 0x1000,
            record_type: EXTENDED_SEGMENT_ADDRESS,
            data: Vec::new(),
            line: 1,
        };
        assert!(steps(0, &r).is_empty());
    }
}
