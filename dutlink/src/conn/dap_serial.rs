//! Byte stream framing over a debug probe's vendor command channel.
//!
//! Probe firmware exposes a tiny request/response protocol: one CONFIGURE
//! command carrying the UART parameters, one RESET command driving the
//! target reset line, and one READ_WRITE command moving up to
//! [`MAX_PAYLOAD`] bytes in each direction per exchange. [`DapSerial`] turns
//! that into an ordered byte stream with host-side transmit and receive
//! queues, so the connector above it never sees frames.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use log::trace;
use tokio::time::{Instant, sleep};

use super::probe::ProbeChannel;

/// Sets the UART parameters on the probe's target-facing port.
pub const COMMAND_CONFIGURE: u8 = 1;
/// Asserts (`[1]`) or deasserts (`[0]`) the target reset line.
pub const COMMAND_RESET: u8 = 2;
/// Bidirectional byte move; see [`DapSerial::write`] for the frame layout.
pub const COMMAND_READ_WRITE: u8 = 3;

/// Most serial bytes one vendor exchange carries per direction, fixed by
/// the probe's report size.
pub const MAX_PAYLOAD: usize = 61;

/// Failures below the connector contract. The connector turns these into
/// its sticky last-error state.
#[derive(Debug)]
pub enum DapError {
    /// The command channel itself failed.
    Exchange(std::io::Error),
    /// Response too short to carry the two count bytes.
    ShortResponse { len: usize },
    /// Response counts point past the bytes actually returned.
    CountMismatch { claimed: usize, available: usize },
}

impl fmt::Display for DapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DapError::Exchange(e) => write!(f, "vendor exchange failed: {e}"),
            DapError::ShortResponse { len } => {
                write!(f, "response of {len} bytes is missing its counts")
            }
            DapError::CountMismatch { claimed, available } => {
                write!(f, "response claims {claimed} bytes but carries {available}")
            }
        }
    }
}

impl From<std::io::Error> for DapError {
    fn from(e: std::io::Error) -> Self {
        DapError::Exchange(e)
    }
}

pub struct DapSerial<Probe: ProbeChannel> {
    probe: Probe,
    baudrate: u32,
    tx_data: VecDeque<u8>,
    rx_data: VecDeque<u8>,
    /// `None` lets `write` run until the device drains the whole queue.
    write_timeout: Option<Duration>,
}

impl<Probe: ProbeChannel> DapSerial<Probe> {
    /// Wraps an open probe channel and pushes the initial UART
    /// configuration to the firmware.
    pub async fn new(probe: Probe, baudrate: u32) -> Result<Self, DapError> {
        let mut dap = Self {
            probe,
            baudrate,
            tx_data: VecDeque::new(),
            rx_data: VecDeque::new(),
            write_timeout: None,
        };
        dap.configure().await?;
        Ok(dap)
    }

    pub fn baudrate(&self) -> u32 {
        self.baudrate
    }

    /// Reconfigures the probe's UART; in effect before this returns.
    pub async fn set_baudrate(&mut self, rate: u32) -> Result<(), DapError> {
        self.baudrate = rate;
        self.configure().await
    }

    pub fn set_write_timeout(&mut self, timeout: Option<Duration>) {
        self.write_timeout = timeout;
    }

    /// Bytes queued for the device but not yet accepted by it.
    pub fn pending_tx(&self) -> usize {
        self.tx_data.len()
    }

    /// Bytes harvested from the device but not yet read by the caller.
    pub fn pending_rx(&self) -> usize {
        self.rx_data.len()
    }

    // Wire layout is rate in LE followed by 8 data bits, parity none, one
    // stop bit (0 on the wire) and no flow control.
    fn config_bytes(&self) -> [u8; 8] {
        let rate = self.baudrate.to_le_bytes();
        [rate[0], rate[1], rate[2], rate[3], 8, 0, 0, 0]
    }

    async fn configure(&mut self) -> Result<(), DapError> {
        trace!("configure(): {} baud", self.baudrate);
        self.probe
            .vendor(COMMAND_CONFIGURE, &self.config_bytes())
            .await?;
        Ok(())
    }

    /// Queues `data` and runs READ_WRITE exchanges until the device has
    /// taken all of it. Each request is `[MAX_PAYLOAD, chunk_len, ..chunk]`,
    /// each response `[n_read, n_sent, ..bytes]`; bytes the device returns
    /// along the way are parked in the receive queue for the next
    /// [`DapSerial::read`]. When the write timeout elapses first, whatever
    /// the device has not accepted yet is discarded.
    pub async fn write(&mut self, data: &[u8]) -> Result<(), DapError> {
        let start = Instant::now();
        self.tx_data.extend(data);

        while !self.tx_data.is_empty() {
            let chunk = self.tx_data.len().min(MAX_PAYLOAD);
            let mut request = Vec::with_capacity(2 + chunk);
            request.push(MAX_PAYLOAD as u8);
            request.push(chunk as u8);
            request.extend(self.tx_data.iter().take(chunk));

            let (returned, sent) = self.exchange(&request).await?;
            trace!("write(): device took {sent}, returned {} bytes", returned.len());
            self.rx_data.extend(returned);
            self.tx_data.drain(..sent.min(self.tx_data.len()));

            if let Some(timeout) = self.write_timeout {
                if start.elapsed() > timeout {
                    trace!("write(): timeout, dropping {} queued bytes", self.tx_data.len());
                    self.tx_data.clear();
                    break;
                }
            }
        }
        Ok(())
    }

    /// Serves `size` bytes from the receive queue, polling the device with
    /// empty READ_WRITE exchanges while the queue is short. A zero timeout
    /// still performs one poll, so callers see bytes the device buffered
    /// before they asked. Returns short once the deadline hits.
    pub async fn read(&mut self, size: usize, timeout: Duration) -> Result<Vec<u8>, DapError> {
        let start = Instant::now();
        while self.rx_data.len() < size {
            let (returned, _) = self.exchange(&[MAX_PAYLOAD as u8, 0]).await?;
            self.rx_data.extend(returned);
            if start.elapsed() >= timeout {
                break;
            }
        }
        let served = size.min(self.rx_data.len());
        Ok(self.rx_data.drain(..served).collect())
    }

    /// Pulses the target reset line: assert, hold for `duration`, deassert.
    pub async fn send_break(&mut self, duration: Duration) -> Result<(), DapError> {
        self.probe.vendor(COMMAND_RESET, &[1]).await?;
        sleep(duration).await;
        self.probe.vendor(COMMAND_RESET, &[0]).await?;
        Ok(())
    }

    /// Releases the probe channel. Consumes the framer, so a second close
    /// cannot be expressed.
    pub async fn close(mut self) {
        self.probe.close().await;
    }

    /// One READ_WRITE request/response pair, validated down to the counts.
    async fn exchange(&mut self, request: &[u8]) -> Result<(Vec<u8>, usize), DapError> {
        let response = self.probe.vendor(COMMAND_READ_WRITE, request).await?;
        if response.len() < 2 {
            return Err(DapError::ShortResponse {
                len: response.len(),
            });
        }
        let n_read = response[0] as usize;
        let n_sent = response[1] as usize;
        if 2 + n_read > response.len() {
            return Err(DapError::CountMismatch {
                claimed: n_read,
                available: response.len() - 2,
            });
        }
        Ok((response[2..2 + n_read].to_vec(), n_sent))
    }
}
