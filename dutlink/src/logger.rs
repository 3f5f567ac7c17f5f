//! Name-prefixed diagnostics for connector backends.
//!
//! Every connector reports through three calls: `info`, `error` and `txd`
//! (transmitted data). All of it lands on the `log` facade, so the embedding
//! harness decides sinks and formatting. Nothing here affects control flow.

/// Logger attached to one connector, prefixing each line with the connector
/// name so interleaved links stay readable.
#[derive(Debug, Clone)]
pub struct ConnectionLogger {
    name: String,
}

impl ConnectionLogger {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        log::info!("[{}] {}", self.name, msg.as_ref());
    }

    pub fn error(&self, msg: impl AsRef<str>) {
        log::error!("[{}] {}", self.name, msg.as_ref());
    }

    /// Mirror of the transmit path. Payloads are ASCII-escaped so binary
    /// traffic stays greppable in the session log.
    pub fn txd(&self, payload: &[u8]) {
        log::info!("[{}] TXD {}", self.name, payload.escape_ascii());
    }
}
