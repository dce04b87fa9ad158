#[cfg(test)]
mod tests;

use std::{
    fs::File,
    io::{self, Read},
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::payload::{parse_weight_line, PayloadError};

const CHUNK_SIZE: usize = 32;
// longest line kept while waiting for a newline
const MAX_LINE: usize = 256;

#[derive(Debug, Error)]
pub enum SerialError {
    #[error("failed to open serial port {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read from serial port: {0}")]
    Read(#[from] io::Error),
}

/// Anything that yields corrected weight readings, one at a time.
///
/// `Ok(None)` means the source has ended and will not produce more.
#[cfg_attr(test, mockall::automock)]
pub trait WeightSource {
    fn next_weight(&mut self) -> Result<Option<f64>, SerialError>;
}

/// Line-oriented reader over the scale's serial device.
pub struct WeightSerial<R> {
    port: R,
    pending: Vec<u8>,
    eof: bool,
}

impl WeightSerial<File> {
    /// Opens the device node. Line settings (baud, raw mode) are left to the host.
    pub fn open(path: &Path) -> Result<Self, SerialError> {
        let port = File::open(path).map_err(|source| SerialError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(Self::from_reader(port))
    }
}

impl<R: Read> WeightSerial<R> {
    pub fn from_reader(port: R) -> Self {
        Self {
            port,
            pending: Vec::with_capacity(MAX_LINE),
            eof: false,
        }
    }

    // next complete line from what has been read so far; at eof the
    // unterminated tail counts as a line
    fn take_line(&mut self) -> Option<String> {
        let end = match self.pending.iter().position(|b| *b == b'\n') {
            Some(i) => i + 1,
            None if self.eof && !self.pending.is_empty() => self.pending.len(),
            None => return None,
        };

        let line: Vec<u8> = self.pending.drain(..end).collect();
        Some(String::from_utf8_lossy(&line).trim().to_string())
    }

    fn fill(&mut self) -> io::Result<()> {
        let mut buf = [0u8; CHUNK_SIZE];
        let n = loop {
            match self.port.read(&mut buf) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => break other?,
            }
        };

        if n == 0 {
            self.eof = true;
            return Ok(());
        }

        self.pending.extend_from_slice(&buf[..n]);
        if self.pending.len() > MAX_LINE && !self.pending.contains(&b'\n') {
            tracing::warn!(bytes = self.pending.len(), "discarding unterminated serial line");
            self.pending.clear();
        }

        Ok(())
    }
}

impl<R: Read> WeightSource for WeightSerial<R> {
    fn next_weight(&mut self) -> Result<Option<f64>, SerialError> {
        loop {
            while let Some(line) = self.take_line() {
                match parse_weight_line(&line) {
                    Ok(weight) => return Ok(Some(correct_weight(weight))),
                    Err(PayloadError::MissingWeight) => {
                        tracing::trace!(%line, "no weight in serial line");
                    }
                    Err(e) => tracing::warn!(%line, error = %e, "failed to parse weight value"),
                }
            }

            if self.eof {
                return Ok(None);
            }
            self.fill()?;
        }
    }
}

/// The scale can drift below zero when unloaded; clamp it.
pub fn correct_weight(weight: f64) -> f64 {
    if weight < 0.0 {
        0.0
    } else {
        weight
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpOutcome {
    SourceEnded,
    ReceiverClosed,
}

/// Moves readings from `source` into the hand-off channel.
///
/// The send never blocks: when the slot is still occupied the new reading
/// is dropped. A read error loses at most the reading in flight; the pump
/// waits `retry_delay` and carries on.
pub fn pump<S: WeightSource>(
    source: &mut S,
    tx: &mpsc::Sender<f64>,
    retry_delay: Duration,
) -> PumpOutcome {
    let mut forwarded: u64 = 0;
    let mut dropped: u64 = 0;

    let outcome = loop {
        if tx.is_closed() {
            break PumpOutcome::ReceiverClosed;
        }

        match source.next_weight() {
            Ok(Some(weight)) => match tx.try_send(weight) {
                Ok(()) => forwarded += 1,
                Err(TrySendError::Full(weight)) => {
                    dropped += 1;
                    tracing::debug!(weight, dropped, "hand-off slot full, reading dropped");
                }
                Err(TrySendError::Closed(_)) => break PumpOutcome::ReceiverClosed,
            },
            Ok(None) => break PumpOutcome::SourceEnded,
            Err(e) => {
                tracing::warn!(error = %e, "serial read failed");
                thread::sleep(retry_delay);
            }
        }
    };

    tracing::info!(?outcome, forwarded, dropped, "serial pump stopped");
    outcome
}

/// Producer thread body: pumps `port` and reopens `path` whenever the
/// device stream ends, until the receiving side goes away.
pub fn sampling_context(
    path: PathBuf,
    mut port: WeightSerial<File>,
    tx: mpsc::Sender<f64>,
    reconnect_delay: Duration,
) {
    loop {
        if pump(&mut port, &tx, reconnect_delay) == PumpOutcome::ReceiverClosed {
            return;
        }

        tracing::warn!(device = %path.display(), "serial stream ended, reopening");
        port = loop {
            thread::sleep(reconnect_delay);
            if tx.is_closed() {
                return;
            }
            match WeightSerial::open(&path) {
                Ok(p) => break p,
                Err(e) => tracing::warn!(error = %e, "reopen failed"),
            }
        };
        tracing::info!(device = %path.display(), "serial port reopened");
    }
}
