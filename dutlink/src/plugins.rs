//! Reset methods, selectable by name at configuration time.
//!
//! How a device gets back to its reset vector depends on the bench wiring:
//! the stock interface firmware latches a serial break, other rigs pull a
//! GPIO through a relay board or copy a magic file to a mass-storage mount.
//! The direct-port connector only knows the method name from its config and
//! asks the registry to run it.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tokio_serial::{SerialPort, SerialStream};

/// How long the break condition is held by the stock method.
const BREAK_PULSE: Duration = Duration::from_millis(250);

/// What a reset method gets to work with: the open port plus the optional
/// bits of bench context a method may need.
pub struct ResetContext<'a> {
    pub serial: &'a mut SerialStream,
    /// Mass-storage mount of the interface chip, when the rig has one.
    pub disk: Option<&'a Path>,
    pub target_id: Option<&'a str>,
}

/// One way of resetting a device under test. Failure is reported through the
/// return value; a method must never take the harness down with it.
#[async_trait]
pub trait ResetMethod: Send + Sync {
    async fn reset(&self, ctx: ResetContext<'_>) -> bool;
}

/// Pulses the serial break condition, the reset wiring on stock interface
/// firmware.
pub struct SendBreak;

#[async_trait]
impl ResetMethod for SendBreak {
    async fn reset(&self, ctx: ResetContext<'_>) -> bool {
        if let Err(e) = ctx.serial.set_break() {
            log::error!("reset: set_break failed: {e}");
            return false;
        }
        sleep(BREAK_PULSE).await;
        if let Err(e) = ctx.serial.clear_break() {
            log::error!("reset: clear_break failed: {e}");
            return false;
        }
        true
    }
}

/// For rigs where something out of band drives the reset line.
pub struct NoReset;

#[async_trait]
impl ResetMethod for NoReset {
    async fn reset(&self, _ctx: ResetContext<'_>) -> bool {
        true
    }
}

/// Maps method names to implementations. Starts with the builtin methods;
/// project-specific ones are registered on top and may shadow them.
pub struct ResetRegistry {
    methods: HashMap<String, Box<dyn ResetMethod>>,
}

impl ResetRegistry {
    pub fn builtin() -> Self {
        let mut registry = Self {
            methods: HashMap::new(),
        };
        registry.register("default", Box::new(SendBreak));
        registry.register("none", Box::new(NoReset));
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, method: Box<dyn ResetMethod>) {
        self.methods.insert(name.into(), method);
    }

    /// Runs the method registered under `name`; an empty name selects the
    /// stock method. An unknown name reports failure instead of erroring,
    /// the link itself is still usable without a reset.
    pub async fn call(&self, name: &str, ctx: ResetContext<'_>) -> bool {
        let name = if name.is_empty() { "default" } else { name };
        match self.methods.get(name) {
            Some(method) => method.reset(ctx).await,
            None => {
                log::error!("reset: no method named '{name}'");
                false
            }
        }
    }
}

impl Default for ResetRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    struct FlagReset(Arc<AtomicBool>);

    #[async_trait]
    impl ResetMethod for FlagReset {
        async fn reset(&self, _ctx: ResetContext<'_>) -> bool {
            self.0.store(true, Ordering::SeqCst);
            true
        }
    }

    #[tokio::test]
    async fn unknown_method_reports_failure() {
        let registry = ResetRegistry::default();
        let (mut master, _peer) = SerialStream::pair().expect("tty pair");
        let ctx = ResetContext {
            serial: &mut master,
            disk: None,
            target_id: None,
        };
        assert!(!registry.call("bogus", ctx).await);
    }

    #[tokio::test]
    async fn empty_name_falls_back_to_default() {
        let hit = Arc::new(AtomicBool::new(false));
        let mut registry = ResetRegistry::default();
        registry.register("default", Box::new(FlagReset(hit.clone())));

        let (mut master, _peer) = SerialStream::pair().expect("tty pair");
        let ctx = ResetContext {
            serial: &mut master,
            disk: None,
            target_id: None,
        };
        assert!(registry.call("", ctx).await);
        assert!(hit.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn none_method_leaves_port_alone() {
        let registry = ResetRegistry::default();
        let (mut master, _peer) = SerialStream::pair().expect("tty pair");
        let ctx = ResetContext {
            serial: &mut master,
            disk: None,
            target_id: Some("024002"),
        };
        assert!(registry.call("none", ctx).await);
    }
}
