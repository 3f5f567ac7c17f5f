//! Resolution of the serial port that belongs to a target.
//!
//! The port a target enumerates on can move across replug and reflash, so
//! the direct-port connector asks a resolver right before opening. Rigs with
//! a real target-to-port mapping service plug it in through [`PortResolver`];
//! [`WaitForPort`] is the builtin that covers the common case of waiting for
//! the expected port to enumerate.

use std::time::Duration;

use tokio::time::{Instant, sleep};

const SCAN_INTERVAL: Duration = Duration::from_millis(250);

/// Maps a nominal port (plus optional target id) to the port to actually
/// open, waiting up to `window` for an answer.
#[allow(async_fn_in_trait)]
pub trait PortResolver {
    /// `None` means the window elapsed without an answer. Callers fall back
    /// to the nominal port in that case.
    async fn resolve(&self, port: &str, target_id: Option<&str>, window: Duration)
    -> Option<String>;
}

/// Builtin resolver: poll the OS port list until `port` shows up.
pub struct WaitForPort;

impl PortResolver for WaitForPort {
    async fn resolve(
        &self,
        port: &str,
        _target_id: Option<&str>,
        window: Duration,
    ) -> Option<String> {
        let deadline = Instant::now() + window;
        loop {
            if let Ok(ports) = tokio_serial::available_ports() {
                if ports.iter().any(|p| p.port_name == port) {
                    return Some(port.to_string());
                }
            }
            if Instant::now() >= deadline {
                return None;
            }
            sleep(SCAN_INTERVAL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_port_times_out() {
        let started = std::time::Instant::now();
        let resolved = WaitForPort
            .resolve("/dev/ttyNOPE", None, Duration::ZERO)
            .await;
        assert!(resolved.is_none());
        // a zero window still scans once, but must not sit in the poll loop
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
