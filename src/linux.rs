use std::io::ErrorKind as IoErrorKind;
use std::path::Path;
use std::time::Duration;

use linux_embedded_hal::{Delay, Serial};
use serial_core::{
    BaudRate, CharSize, Error as SerialError, FlowControl, Parity, SerialDevice as _,
    SerialPortSettings as _, StopBits,
};

use crate::{Channel, Options, Sxb};

/// Read timeout, short enough that reads behave as polls
const READ_TIMEOUT_MS: u64 = 10;

impl Channel<IoErrorKind> for Serial {
    // Failures on an open tty surface as write errors
    fn is_open(&self) -> bool {
        true
    }
}

impl Sxb<Serial, Delay, IoErrorKind> {
    /// Connect to an SXB over a linux serial port
    pub fn linux<P: AsRef<Path>>(
        path: P,
        baud: usize,
        options: Options,
    ) -> Result<Self, SerialError> {
        let mut tty = Serial::open(path.as_ref())?;

        // The SXB monitor talks 8N1 with no handshaking, 9600 baud unless reconfigured
        let mut settings = tty.0.read_settings()?;

        settings.set_baud_rate(BaudRate::from_speed(baud))?;
        settings.set_char_size(CharSize::Bits8);
        settings.set_parity(Parity::ParityNone);
        settings.set_stop_bits(StopBits::Stop1);
        settings.set_flow_control(FlowControl::FlowNone);

        tty.0.write_settings(&settings)?;

        // Nothing is acknowledged, reads only poll for monitor echo
        tty.0.set_timeout(Duration::from_millis(READ_TIMEOUT_MS))?;

        info!("Connected to {} at {} baud", path.as_ref().display(), baud);

        Ok(Self::new(tty, Delay {}, options))
    }
}
