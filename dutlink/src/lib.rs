//! Transport layer between a test host and a device under test.
//!
//! Three backends implement one contract, [`ConnectorPrimitive`]: a directly
//! attached serial port, a debug probe tunneling serial bytes through its
//! vendor command channel, and a locally spawned process standing in for a
//! device. The orchestration layer constructs a backend through
//! [`build_connector`] (or directly), pumps bytes with `read`/`write`,
//! watches `connected()` and releases everything with `finish()`. Failures
//! never panic the harness; they park the link in a degraded mode with the
//! cause in `error()`.

pub mod config;
pub mod conn;
pub mod logger;
pub mod plugins;
pub mod resolver;

pub use config::ConnectorConfig;
pub use conn::{
    BufferedChild, ConnectorPrimitive, ConnectorState, DapError, DapSerial, MAX_PAYLOAD,
    ProbeChannel, ProbeConnector, ProcessConnector, SerialConnector, build_connector,
};
pub use logger::ConnectionLogger;
pub use plugins::{NoReset, ResetContext, ResetMethod, ResetRegistry, SendBreak};
pub use resolver::{PortResolver, WaitForPort};
