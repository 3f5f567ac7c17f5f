//! Fakes for exercising connectors without bench hardware.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::dap_serial::{COMMAND_CONFIGURE, COMMAND_READ_WRITE, COMMAND_RESET, DapError, MAX_PAYLOAD};
use super::probe::ProbeChannel;

/// One recorded vendor exchange: the command byte and the raw request.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub command: u8,
    pub request: Vec<u8>,
}

/// Scripted probe standing in for real interface firmware.
///
/// Bytes queued with [`MockProbe::feed`] flow back through READ_WRITE
/// responses; bytes the host sends accumulate in `sunk`. The per-exchange
/// caps force the partial-accept and partial-return paths a real probe
/// shows under load. Hand connectors an `Arc<Mutex<MockProbe>>` clone and
/// keep one for inspection.
pub struct MockProbe {
    /// Device-side bytes waiting to be handed to the host.
    pending: VecDeque<u8>,
    /// Everything the host got the device to accept, in order.
    pub sunk: Vec<u8>,
    /// Every request seen, in order.
    pub exchanges: Vec<Exchange>,
    /// Reset line transitions observed (`1` asserts, `0` deasserts).
    pub resets: Vec<u8>,
    /// Most bytes accepted from the host per exchange.
    pub accept_cap: usize,
    /// Most bytes returned to the host per exchange.
    pub return_cap: usize,
    /// Fail every exchange once this many have run.
    pub fail_after: Option<usize>,
    /// Times the channel has been closed.
    pub closed: usize,
}

impl MockProbe {
    pub fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            sunk: Vec::new(),
            exchanges: Vec::new(),
            resets: Vec::new(),
            accept_cap: MAX_PAYLOAD,
            return_cap: MAX_PAYLOAD,
            fail_after: None,
            closed: 0,
        }
    }

    /// Queues device output for later READ_WRITE harvests.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.pending.extend(bytes);
    }

    pub fn count_command(&self, command: u8) -> usize {
        self.exchanges.iter().filter(|e| e.command == command).count()
    }

    fn vendor_sync(&mut self, command: u8, payload: &[u8]) -> Result<Vec<u8>, DapError> {
        if let Some(limit) = self.fail_after {
            if self.exchanges.len() >= limit {
                return Err(DapError::Exchange(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "probe gone",
                )));
            }
        }
        self.exchanges.push(Exchange {
            command,
            request: payload.to_vec(),
        });
        match command {
            COMMAND_CONFIGURE => Ok(Vec::new()),
            COMMAND_RESET => {
                self.resets.push(payload.first().copied().unwrap_or(0));
                Ok(Vec::new())
            }
            COMMAND_READ_WRITE => {
                let host_cap = payload.first().copied().unwrap_or(0) as usize;
                let offered = payload.get(1).copied().unwrap_or(0) as usize;
                let taken = offered.min(self.accept_cap);
                self.sunk.extend(&payload[2..2 + taken]);

                let returned = self.pending.len().min(host_cap).min(self.return_cap);
                let mut response = Vec::with_capacity(2 + returned);
                response.push(returned as u8);
                response.push(taken as u8);
                response.extend(self.pending.drain(..returned));
                Ok(response)
            }
            _ => Ok(Vec::new()),
        }
    }
}

impl Default for MockProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProbeChannel for Arc<Mutex<MockProbe>> {
    async fn vendor(&mut self, command: u8, payload: &[u8]) -> Result<Vec<u8>, DapError> {
        self.lock().unwrap().vendor_sync(command, payload)
    }

    async fn close(&mut self) {
        self.lock().unwrap().closed += 1;
    }
}

pub fn mock_probe() -> Arc<Mutex<MockProbe>> {
    Arc::new(Mutex::new(MockProbe::new()))
}
