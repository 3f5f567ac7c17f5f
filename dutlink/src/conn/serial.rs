//! Connector over a directly attached serial port.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::{sleep, timeout};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use super::{ConnectorPrimitive, ConnectorState};
use crate::config::ConnectorConfig;
use crate::plugins::{ResetContext, ResetRegistry};
use crate::resolver::{PortResolver, WaitForPort};

/// Pause before each read, letting bytes pool in the OS buffer instead of
/// spinning on the descriptor.
const READ_POLL_DELAY: Duration = Duration::from_millis(10);

pub struct SerialConnector {
    state: ConnectorState,
    serial: Option<SerialStream>,
}

impl SerialConnector {
    /// Resolves the port for the configured target, opens it 8N1 with no
    /// flow control and resets the device through the configured reset
    /// method. Every failure mode ends in a connector that reports
    /// `connected() == false` with the cause in `error()`; construction
    /// itself never fails.
    pub async fn connect(name: impl Into<String>, port: &str, config: &ConnectorConfig) -> Self {
        Self::connect_with(&WaitForPort, &ResetRegistry::default(), name, port, config).await
    }

    /// Same as [`SerialConnector::connect`] with a caller-supplied port
    /// resolver and reset registry.
    pub async fn connect_with<R: PortResolver>(
        resolver: &R,
        registry: &ResetRegistry,
        name: impl Into<String>,
        port: &str,
        config: &ConnectorConfig,
    ) -> Self {
        let mut state = ConnectorState::new(name);
        state.logger.info(format!(
            "serial(port={port}, baudrate={}, poll={:?})",
            config.baudrate, READ_POLL_DELAY
        ));

        // the target may have re-enumerated since the config was written;
        // open whatever resolution hands back
        let port = match resolver
            .resolve(port, config.target_id.as_deref(), config.resolution_window())
            .await
        {
            Some(resolved) => {
                if resolved != port {
                    state
                        .logger
                        .info(format!("serial port changed from '{port}' to '{resolved}'"));
                }
                resolved
            }
            None => port.to_string(),
        };

        let opened = tokio_serial::new(port.as_str(), config.baudrate)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async();

        let mut conn = match opened {
            Ok(stream) => Self {
                state,
                serial: Some(stream),
            },
            Err(e) => {
                state.fault(format!(
                    "connection lost, open({port}, {}): {e}",
                    config.baudrate
                ));
                Self {
                    state,
                    serial: None,
                }
            }
        };
        if conn.serial.is_some() {
            conn.reset_dev(registry, config).await;
        }
        conn
    }

    /// Wraps an already-open stream; pseudo-terminal rigs and simulated
    /// ports construct connectors this way. The reset method still runs.
    pub async fn from_stream(
        name: impl Into<String>,
        stream: SerialStream,
        registry: &ResetRegistry,
        config: &ConnectorConfig,
    ) -> Self {
        let mut conn = Self {
            state: ConnectorState::new(name),
            serial: Some(stream),
        };
        conn.reset_dev(registry, config).await;
        conn
    }

    /// Runs the configured reset method, then waits out the settle delay.
    /// A failed reset is logged but does not degrade the link; the device
    /// may well already be in the state the caller wants.
    async fn reset_dev(&mut self, registry: &ResetRegistry, config: &ConnectorConfig) {
        let reset_type = config.reset_method();
        self.state
            .logger
            .info(format!("reset device using '{reset_type}' method..."));
        let Some(serial) = self.serial.as_mut() else {
            return;
        };
        let ok = registry
            .call(
                reset_type,
                ResetContext {
                    serial,
                    disk: config.disk.as_deref(),
                    target_id: config.target_id.as_deref(),
                },
            )
            .await;
        if !ok {
            self.state
                .logger
                .error(format!("reset method '{reset_type}' reported failure"));
        }
        let settle = config.reset_settle();
        if !settle.is_zero() {
            self.state
                .logger
                .info(format!("waiting {settle:?} after reset"));
            sleep(settle).await;
        }
        self.state.logger.info("wait for it...");
    }

    fn invalidate(&mut self, msg: String) {
        self.serial = None;
        self.state.fault(msg);
    }
}

#[async_trait]
impl ConnectorPrimitive for SerialConnector {
    fn name(&self) -> &str {
        self.state.name()
    }

    async fn read(&mut self, count: usize) -> Vec<u8> {
        sleep(READ_POLL_DELAY).await;
        let Some(serial) = self.serial.as_mut() else {
            return Vec::new();
        };
        let mut buf = vec![0u8; count];
        // a zero deadline polls the descriptor exactly once
        match timeout(Duration::ZERO, serial.read(&mut buf)).await {
            Ok(Ok(n)) => {
                buf.truncate(n);
                buf
            }
            Ok(Err(e)) => {
                self.invalidate(format!("connection lost, read({count}): {e}"));
                Vec::new()
            }
            Err(_) => Vec::new(),
        }
    }

    async fn write(&mut self, payload: &[u8], log: bool) -> bool {
        let Some(serial) = self.serial.as_mut() else {
            return false;
        };
        match serial.write_all(payload).await {
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
        let Some(serial) = self.serial.as_mut() else {
            return;
        };
        if let Err(e) = serial.flush().await {
            self.invalidate(format!("connection lost, flush: {e}"));
        }
    }

    fn connected(&mut self) -> bool {
        self.serial.is_some()
    }

    fn error(&self) -> Option<&str> {
        self.state.last_error()
    }

    async fn finish(&mut self) {
        // dropping the stream closes the descriptor
        self.serial.take();
    }
}
