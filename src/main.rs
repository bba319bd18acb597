#[macro_use]
extern crate log;

extern crate structopt;
use structopt::StructOpt;

extern crate simplelog;
use simplelog::{Config, LevelFilter, SimpleLogger};

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, TryRecvError};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};

use sxb_loader::ihex::{HexRecordReader, RecordKind};
use sxb_loader::{protocol, Options, Sxb};

#[derive(Clone, Debug, StructOpt)]
pub struct Args {
    /// Serial port to connect to
    #[structopt(long, default_value = "/dev/ttyUSB0")]
    port: String,

    /// Serial port baud rate
    #[structopt(long, default_value = "9600")]
    baud: usize,

    #[structopt(flatten)]
    options: Options,

    /// Log level for console output
    #[structopt(long, default_value = "info")]
    log_level: LevelFilter,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, StructOpt)]
pub enum Command {
    /// Load an Intel-HEX program into the SXB
    Load {
        #[structopt(parse(from_os_str))]
        file: PathBuf,
    },
    /// Interactive terminal, lines from stdin are typed into the monitor
    Term,
    /// Print the monitor keystrokes for a HEX file without connecting
    Dump {
        #[structopt(parse(from_os_str))]
        file: PathBuf,
    },
}

fn main() {
    // Parse out arguments
    let o = Args::from_args();

    // Configure logger
    let _ = SimpleLogger::init(o.log_level, Config::default());

    let res = match &o.command {
        Command::Load { file } => load(&o, file),
        Command::Term => term(&o),
        Command::Dump { file } => dump(file),
    };

    if let Err(e) = res {
        error!("{:?}", e);
        std::process::exit(1);
    }
}

fn load(o: &Args, file: &Path) -> Result<()> {
    let size = std::fs::metadata(file)
        .with_context(|| format!("Error reading {}", file.display()))?
        .len();
    let total = HexRecordReader::open(file)
        .with_context(|| format!("Error opening {}", file.display()))?
        .count();

    info!(
        "Program {} ({}, {} records)",
        file.display(),
        bytefmt::format(size),
        total
    );

    info!("Connecting to serial port");

    let mut sxb = Sxb::linux(&o.port, o.baud, o.options.clone())
        .with_context(|| format!("Error connecting to serial port {}", o.port))?;

    let bar = ProgressBar::new(total as u64);
    bar.set_style(ProgressStyle::default_bar().template("{bar:40} {pos}/{len} records {msg}"));

    let res = sxb.load_file_with(file, |s| {
        bar.set_position((s.records + s.segments + s.skipped) as u64);
        bar.set_message(&bytefmt::format(s.bytes as u64));
        true
    });

    bar.finish_and_clear();

    match res {
        Ok(s) => {
            info!(
                "Loaded {} records ({}), {} segments, {} skipped",
                s.records,
                bytefmt::format(s.bytes as u64),
                s.segments,
                s.skipped
            );
            Ok(())
        }
        Err(e) => {
            if let Some(n) = e.records_sent() {
                if n > 0 {
                    warn!("Device partially programmed, {} records written", n);
                }
            }
            Err(e).context("Error loading program")
        }
    }
}

fn term(o: &Args) -> Result<()> {
    let mut sxb = Sxb::linux(&o.port, o.baud, o.options.clone())
        .with_context(|| format!("Error connecting to serial port {}", o.port))?;

    println!("(Connected to SXB at {} baud.)", o.baud);

    // Stdin blocks, so lines are forwarded from a reader thread
    let (tx, rx) = mpsc::channel::<String>();
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(l) => {
                    if tx.send(l).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    let stdout = std::io::stdout();

    loop {
        let mut t = sxb.terminal();

        match rx.try_recv() {
            Ok(line) => {
                t.send_str(&line)?;
                t.send('\n')?;
            }
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => break,
        }

        let mut out = stdout.lock();
        t.receive(&mut out)?;
        out.flush()?;

        thread::sleep(Duration::from_millis(protocol::POLL_PERIOD_MS as u64));
    }

    let _ = sxb.disconnect();
    println!("\n(Connection Closed.)");

    Ok(())
}

fn dump(file: &Path) -> Result<()> {
    let reader = HexRecordReader::open(file)
        .with_context(|| format!("Error opening {}", file.display()))?;

    let mut segment = 0u16;

    for r in reader {
        let r = r.context("Error parsing HEX file")?;

        if let RecordKind::Segment(s) = r.kind() {
            println!("{:>5}  segment {:04X}", r.line, s);
            segment = s;
            continue;
        }

        let keys: Vec<u8> = protocol::steps(segment, &r)
            .iter()
            .flat_map(|s| s.bytes())
            .collect();

        println!("{:>5}  {}", r.line, render_keys(&keys));
    }

    Ok(())
}

/// Render monitor keystrokes as text followed by the raw bytes in hex
fn render_keys(keys: &[u8]) -> String {
    let text: String = keys
        .iter()
        .map(|b| match *b {
            protocol::COMMIT => "<CR>".to_string(),
            b => (b as char).to_string(),
        })
        .collect();

    format!("{}  [{}]", text, hex::encode_upper(keys))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_commit_and_raw_bytes() {
        assert_eq!(render_keys(b"M0000A9\r"), "M0000A9<CR>  [4D3030303041390D]");
        assert_eq!(render_keys(&[]), "  []");
    }

    #[test]
    fn renders_record_transaction() {
        let r = HexRecordReader::new(":02001000AA5500\n".as_bytes())
            .next()
            .unwrap()
            .unwrap();

        let keys: Vec<u8> = protocol::steps(0x0001, &r)
            .iter()
            .flat_map(|s| s.bytes())
            .collect();

        assert_eq!(
            render_keys(&keys),
            "M010010AA55<CR>  [4D303130303130414135350D]"
        );
    }
}
