//! Interactive terminal relay.
//!
//! Keystrokes are upper-cased so the monitor's echo reads cleanly, and line
//! endings are translated between `\n` and the monitor's carriage return.

use core::marker::PhantomData;

use embedded_hal::blocking::delay::DelayMs;

use crate::protocol::COMMIT;
use crate::{Channel, Error, Options};

pub struct Terminal<'a, P, D, E> {
    port: &'a mut P,
    delay: &'a mut D,
    options: &'a Options,
    _err: PhantomData<E>,
}

impl<'a, P, D, E> Terminal<'a, P, D, E>
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
            _err: PhantomData,
        }
    }

    /// Send a single keystroke and wait for the monitor to process it
    pub fn send(&mut self, c: char) -> Result<(), Error<E>> {
        if !c.is_ascii() {
            debug!("Ignoring non-ascii keystroke {:?}", c);
            return Ok(());
        }

        let b = match c.to_ascii_uppercase() as u8 {
            b'\n' => COMMIT,
            b => b,
        };

        block!(self.port.write(b))?;

        self.delay.delay_ms(self.options.key_settle_ms);

        Ok(())
    }

    pub fn send_str(&mut self, s: &str) -> Result<(), Error<E>> {
        for c in s.chars() {
            self.send(c)?;
        }
        Ok(())
    }

    /// Drain everything the monitor has sent so far into `out`.
    ///
    /// Returns the number of bytes relayed.
    pub fn receive<W: std::io::Write>(&mut self, out: &mut W) -> Result<usize, Error<E>> {
        let mut n = 0;

        loop {
            let b = match self.port.read() {
                Ok(b) => b,
                Err(nb::Error::WouldBlock) => break,
                Err(nb::Error::Other(e)) => return Err(e.into()),
            };

            let b = match b {
                COMMIT => b'\n',
                b => b,
            };

            out.write_all(&[b]).map_err(|e| Error::Io(e.kind()))?;
            n += 1;
        }

        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use crate::mock::{Log, MockDelay, MockError, MockPort};
    use crate::{Options, Sxb};

    #[test]
    fn send_folds_case_and_newlines() {
        let log = Log::default();
        let mut s: Sxb<_, _, MockError> =
            Sxb::new(MockPort::new(&log), MockDelay::new(&log), Options::default());

        s.terminal().send_str("m 00\n").unwrap();

        assert_eq!(log.written(), "M 00\r");
        assert_eq!(log.delays(), vec![100; 5]);
    }

    #[test]
    fn send_ignores_non_ascii() {
        let log = Log::default();
        let mut s: Sxb<_, _, MockError> =
            Sxb::new(MockPort::new(&log), MockDelay::new(&log), Options::default());

        s.terminal().send('é').unwrap();

        assert!(log.events().is_empty());
    }

    #[test]
    fn receive_translates_carriage_return() {
        let log = Log::default();
        let mut port = MockPort::new(&log);
        port.rx.extend(b"00 A9\r>".iter());
        let mut s: Sxb<_, _, MockError> =
            Sxb::new(port, MockDelay::new(&log), Options::default());

        let mut out = Vec::new();
        let n = s.terminal().receive(&mut out).unwrap();

        assert_eq!(n, 7);
        assert_eq!(out, b"00 A9\n>".to_vec());
        assert_eq!(s.terminal().receive(&mut out).unwrap(), 0);
    }
}
