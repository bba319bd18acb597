//! Recording channel and delay for tests

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::serial::{Read, Write};

use crate::Channel;

#[derive(Copy, Clone, PartialEq, Debug)]
pub enum Event {
    Write(u8),
    Delay(u32),
}

/// Ordered log of writes and delays, shared between port and delay
#[derive(Clone, Default)]
pub struct Log(Rc<RefCell<Vec<Event>>>);

impl Log {
    fn push(&self, e: Event) {
        self.0.borrow_mut().push(e);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.borrow().clone()
    }

    pub fn written(&self) -> String {
        self.0
            .borrow()
            .iter()
            .filter_map(|e| match e {
                Event::Write(b) => Some(*b as char),
                _ => None,
            })
            .collect()
    }

    pub fn delays(&self) -> Vec<u32> {
        self.0
            .borrow()
            .iter()
            .filter_map(|e| match e {
                Event::Delay(ms) => Some(*ms),
                _ => None,
            })
            .collect()
    }
}

#[derive(Copy, Clone, PartialEq, Debug)]
pub struct MockError;

pub struct MockPort {
    log: Log,
    /// Bytes available to read
    pub rx: VecDeque<u8>,
    pub open: bool,
    /// Reject every other write attempt with `WouldBlock`
    pub stall: bool,
    /// Fail writes once this many bytes have been accepted
    pub fail_after: Option<usize>,
    /// Report the channel closed once this many bytes have been accepted
    pub close_after: Option<usize>,
    attempts: usize,
    written: usize,
}

impl MockPort {
    pub fn new(log: &Log) -> Self {
        Self {
            log: log.clone(),
            rx: VecDeque::new(),
            open: true,
            stall: false,
            fail_after: None,
            close_after: None,
            attempts: 0,
            written: 0,
        }
    }
}

impl Write<u8> for MockPort {
    type Error = MockError;

    fn write(&mut self, word: u8) -> nb::Result<(), MockError> {
        self.attempts += 1;

        if let Some(n) = self.fail_after {
            if self.written >= n {
                return Err(nb::Error::Other(MockError));
            }
        }

        if self.stall && self.attempts % 2 == 1 {
            return Err(nb::Error::WouldBlock);
        }

        self.written += 1;
        self.log.push(Event::Write(word));
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), MockError> {
        Ok(())
    }
}

impl Read<u8> for MockPort {
    type Error = MockError;

    fn read(&mut self) -> nb::Result<u8, MockError> {
        self.rx.pop_front().ok_or(nb::Error::WouldBlock)
    }
}

impl Channel<MockError> for MockPort {
    fn is_open(&self) -> bool {
        match self.close_after {
            Some(n) if self.written >= n => false,
            _ => self.open,
        }
    }
}

pub struct MockDelay(Log);

impl MockDelay {
    pub fn new(log: &Log) -> Self {
        Self(log.clone())
    }
}

impl DelayMs<u32> for MockDelay {
    fn delay_ms(&mut self, ms: u32) {
        self.0.push(Event::Delay(ms));
    }
}
