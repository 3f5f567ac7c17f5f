//! Connector over a debug probe's packetized serial channel.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use super::dap_serial::{DapError, DapSerial};
use super::{ConnectorPrimitive, ConnectorState};
use crate::config::ConnectorConfig;

/// Pause before each read, letting target bytes pool on the probe instead
/// of burning exchanges on single bytes.
const READ_POLL_DELAY: Duration = Duration::from_millis(10);

/// Handle to one debug probe, opened by the embedding harness from a board
/// identifier. The firmware answers exactly one operation, the vendor
/// command exchange; everything this crate needs is built on top of that.
#[async_trait]
pub trait ProbeChannel: Send {
    /// One request/response vendor exchange.
    async fn vendor(&mut self, command: u8, payload: &[u8]) -> Result<Vec<u8>, DapError>;

    /// Releases the underlying device handle.
    async fn close(&mut self) {}
}

pub struct ProbeConnector<P: ProbeChannel> {
    state: ConnectorState,
    serial: Option<DapSerial<P>>,
}

impl<P: ProbeChannel> ProbeConnector<P> {
    /// Opens the connector: pushes the UART configuration to the probe,
    /// then resets the target through the probe's reset line. A failing
    /// probe leaves the connector permanently disconnected with the cause
    /// in `error()`; construction itself never fails.
    pub async fn open(name: impl Into<String>, probe: P, config: &ConnectorConfig) -> Self {
        let mut state = ConnectorState::new(name);
        state.logger.info(format!(
            "probe serial(baudrate={}, poll={:?})",
            config.baudrate, READ_POLL_DELAY
        ));

        let serial = match DapSerial::new(probe, config.baudrate).await {
            Ok(dap) => Some(dap),
            Err(e) => {
                state.fault(format!(
                    "connection lost, configure({}): {e}",
                    config.baudrate
                ));
                None
            }
        };
        let mut conn = Self { state, serial };
        if conn.serial.is_some() {
            conn.reset_target(config.reset_settle()).await;
        }
        conn
    }

    /// Resets the target by holding the probe's reset line for the settle
    /// window. The line pulse is the whole reset, there is no extra wait.
    async fn reset_target(&mut self, settle: Duration) {
        self.state.logger.info("reset device using probe reset line...");
        if let Some(dap) = self.serial.as_mut() {
            if let Err(e) = dap.send_break(settle).await {
                self.invalidate(format!("connection lost, send_break: {e}"));
                return;
            }
        }
        self.state.logger.info("wait for it...");
    }

    fn invalidate(&mut self, msg: String) {
        self.serial = None;
        self.state.fault(msg);
    }
}

#[async_trait]
impl<P: ProbeChannel> ConnectorPrimitive for ProbeConnector<P> {
    fn name(&self) -> &str {
        self.state.name()
    }

    async fn read(&mut self, count: usize) -> Vec<u8> {
        sleep(READ_POLL_DELAY).await;
        let Some(dap) = self.serial.as_mut() else {
            return Vec::new();
        };
        match dap.read(count, Duration::ZERO).await {
            Ok(data) => data,
            Err(e) => {
                self.invalidate(format!("connection lost, read({count}): {e}"));
                Vec::new()
            }
        }
    }

    async fn write(&mut self, payload: &[u8], log: bool) -> bool {
        let Some(dap) = self.serial.as_mut() else {
            return false;
        };
        match dap.write(payload).await {
            Ok(()) => {
                if log {
                    self.state.logger.txd(payload);
                }
            }
            Err(e) => self.invalidate(format!(
                "connection lost, write({} bytes): {e}",
                payload.len()
            )),
        }
        true
    }

    async fn flush(&mut self) {
        // every vendor exchange flushes before returning
    }

    fn connected(&mut self) -> bool {
        self.serial.is_some()
    }

    fn error(&self) -> Option<&str> {
        self.state.last_error()
    }

    async fn finish(&mut self) {
        if let Some(dap) = self.serial.take() {
            dap.close().await;
        }
    }
}
