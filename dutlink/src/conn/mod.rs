//! The connector contract and its backends.
//!
//! A connector is one live link to a device under test. The orchestration
//! layer drives every link through the same moves: construct it, pump bytes
//! with `read`/`write`, watch `connected()`, tear it down with `finish()`.
//! Which wire sits underneath is the backend's business: a directly attached
//! serial port ([`SerialConnector`]), a debug probe tunneling serial bytes
//! through its vendor command channel ([`ProbeConnector`]), or a locally
//! spawned process standing in for a device ([`ProcessConnector`]).
//!
//! None of the operations return errors. A link failure flips the connector
//! into a degraded mode where `read` returns nothing and `write` refuses the
//! payload, with the cause kept in [`ConnectorPrimitive::error`] until the
//! caller decides what to do about it.

pub mod dap_serial;
pub mod probe;
pub mod process;
pub mod serial;
pub mod test_harness;


use async_trait::async_trait;

pub use dap_serial::{
    COMMAND_CONFIGURE, COMMAND_READ_WRITE, COMMAND_RESET, DapError, DapSerial, MAX_PAYLOAD,
};
pub use probe::{ProbeChannel, ProbeConnector};
pub use process::{BufferedChild, ProcessConnector};
pub use serial::SerialConnector;

use crate::config::ConnectorConfig;
use crate::logger::ConnectionLogger;

/// Uniform contract over one link to a device under test.
#[async_trait]
pub trait ConnectorPrimitive: Send {
    fn name(&self) -> &str;

    /// Returns between zero and `count` bytes, waiting no longer than the
    /// backend's poll budget. A short or empty result is normal; link loss
    /// surfaces through [`ConnectorPrimitive::error`], never here.
    async fn read(&mut self, count: usize) -> Vec<u8>;

    /// Hands `payload` to the link, mirroring it to the transmit log when
    /// `log` is set. Returns whether the link was alive to accept the
    /// attempt; a failure during the attempt still counts as accepted and
    /// shows up later through `connected()`.
    async fn write(&mut self, payload: &[u8], log: bool) -> bool;

    /// Pushes out anything the backend buffers on the transmit side.
    async fn flush(&mut self);

    /// Takes `&mut self` because process-backed links have to poll the
    /// child for its exit status.
    fn connected(&mut self) -> bool;

    /// Most recent failure, kept until the connector is dropped.
    fn error(&self) -> Option<&str>;

    /// Releases the link and stops any background work. Idempotent; after
    /// the first call no operation observes a live link again.
    async fn finish(&mut self);
}

/// Identity and sticky failure state every backend carries.
pub struct ConnectorState {
    name: String,
    pub logger: ConnectionLogger,
    last_error: Option<String>,
}

impl ConnectorState {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let logger = ConnectionLogger::new(name.clone());
        Self {
            name,
            logger,
            last_error: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Records a failure and mirrors it to the log. A later fault overwrites
    /// an earlier one, `error()` always reports the most recent.
    pub fn fault(&mut self, msg: String) {
        self.logger.error(&msg);
        self.last_error = Some(msg);
    }
}

/// Builds a connector from the resource name the orchestration layer keeps
/// in its configuration. Probe-backed connectors need a live
/// [`ProbeChannel`] handle and are constructed directly instead.
pub async fn build_connector(
    resource: &str,
    name: &str,
    port: Option<&str>,
    config: &ConnectorConfig,
) -> Option<Box<dyn ConnectorPrimitive>> {
    match resource {
        "serial" => {
            let port = port?;
            Some(Box::new(SerialConnector::connect(name, port, config).await))
        }
        "process" => Some(Box::new(ProcessConnector::spawn(name, config))),
        other => {
            log::error!("unknown connector resource '{other}'");
            None
        }
    }
}
