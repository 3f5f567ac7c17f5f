//! Connector over a locally spawned process standing in for a device.
//!
//! The child's stdout is a blocking pipe, so a background pump drains it
//! byte by byte into a hand-off queue. Caller-side reads then become plain
//! bounded waits on the queue, and tearing the link down is kill, reap,
//! join the pump.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use log::trace;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};

use super::{ConnectorPrimitive, ConnectorState};
use crate::config::ConnectorConfig;

/// Budget for one connector-level `read` call.
const READ_BUDGET: Duration = Duration::from_secs(1);

/// Bytes already pulled off the hand-off queue but not yet delivered to a
/// caller. Owned by the consumer side only; the pump never sees it, so no
/// lock is involved.
#[derive(Default)]
struct Remainder {
    buf: Vec<u8>,
}

impl Remainder {
    /// Moves up to `count` stored bytes into `out`, oldest first.
    fn drain_into(&mut self, out: &mut Vec<u8>, count: usize) {
        let take = count.min(self.buf.len());
        out.extend(self.buf.drain(..take));
    }

    /// Accepts a fresh chunk: the first `need` bytes go to `out`, any
    /// excess is stored for the next read.
    fn split_chunk(&mut self, chunk: Vec<u8>, out: &mut Vec<u8>, need: usize) {
        if chunk.len() <= need {
            out.extend(chunk);
        } else {
            out.extend(&chunk[..need]);
            // a read drains the remainder before touching the queue
            debug_assert!(self.buf.is_empty());
            self.buf.extend(&chunk[need..]);
        }
    }
}

/// Drains the child's stdout into the hand-off channel one byte at a time.
/// Exits when the pipe reports end of file (the child is gone) or the
/// consumer side has been dropped.
async fn pump(mut stdout: ChildStdout, chunks: UnboundedSender<Vec<u8>>) {
    let mut byte = [0u8; 1];
    loop {
        match stdout.read(&mut byte).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if chunks.send(byte[..n].to_vec()).is_err() {
                    break;
                }
            }
        }
    }
    trace!("reader pump exiting");
}

/// Child process wrapped with the background reader, so caller-side reads
/// are bounded by a deadline instead of the pipe's blocking semantics.
pub struct BufferedChild {
    child: Child,
    stdin: Option<ChildStdin>,
    chunks: UnboundedReceiver<Vec<u8>>,
    remainder: Remainder,
    pump: Option<JoinHandle<()>>,
}

impl BufferedChild {
    /// Spawns `path` with piped stdio and starts the pump.
    pub fn spawn(path: &Path) -> std::io::Result<Self> {
        let mut child = Command::new(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        let stdin = child.stdin.take();
        let stdout = child.stdout.take().expect("child stdout is piped");
        let (tx, chunks) = mpsc::unbounded_channel();
        let pump = tokio::spawn(pump(stdout, tx));
        Ok(Self {
            child,
            stdin,
            chunks,
            remainder: Remainder::default(),
            pump: Some(pump),
        })
    }

    /// Returns up to `count` bytes, waiting at most `timeout` for the pump
    /// to deliver more. Remainder bytes go out before the queue is
    /// consulted, preserving pipe order. A short result means the deadline
    /// hit or the child went away, not a failure.
    pub async fn read(&mut self, count: usize, timeout: Duration) -> Vec<u8> {
        let mut out = Vec::new();
        self.remainder.drain_into(&mut out, count);
        if out.len() >= count {
            return out;
        }
        let deadline = Instant::now() + timeout;
        while out.len() < count {
            let need = count - out.len();
            match timeout_at(deadline, self.chunks.recv()).await {
                Ok(Some(chunk)) => self.remainder.split_chunk(chunk, &mut out, need),
                // queue closed and drained, or deadline hit
                Ok(None) | Err(_) => break,
            }
        }
        out
    }

    /// Forwards `data` to the child's stdin. A broken pipe is swallowed:
    /// the child going away mid-run shows up through
    /// [`BufferedChild::running`], not here.
    pub async fn write(&mut self, data: &[u8]) {
        if let Some(stdin) = self.stdin.as_mut() {
            if let Err(e) = stdin.write_all(data).await {
                trace!("stdin write dropped {} bytes: {e}", data.len());
            }
        }
    }

    /// True while the child has not been reaped and reports no exit status.
    pub fn running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Kills the child, reaps it and joins the pump. Only the first call
    /// does work; queued bytes stay readable afterwards.
    pub async fn finish(&mut self) {
        let Some(pump) = self.pump.take() else {
            return;
        };
        // closing stdin first lets a well-behaved child exit on its own
        self.stdin.take();
        let _ = self.child.kill().await;
        let _ = pump.await;
    }

    /// True once no background reader is running.
    pub fn pump_stopped(&self) -> bool {
        self.pump.is_none()
    }
}

pub struct ProcessConnector {
    state: ConnectorState,
    child: Option<BufferedChild>,
    read_budget: Duration,
}

impl ProcessConnector {
    /// Spawns the executable named by `image_path`. A failed spawn leaves
    /// the connector permanently disconnected with the cause in `error()`.
    pub fn spawn(name: impl Into<String>, config: &ConnectorConfig) -> Self {
        let mut state = ConnectorState::new(name);
        let child = match config.image_path.as_deref() {
            Some(path) => {
                state.logger.info(format!("process({})", path.display()));
                match BufferedChild::spawn(path) {
                    Ok(child) => Some(child),
                    Err(e) => {
                        state.fault(format!(
                            "connection lost, spawn({}): {e}",
                            path.display()
                        ));
                        None
                    }
                }
            }
            None => {
                state.fault("connection lost, spawn: no image_path configured".into());
                None
            }
        };
        Self {
            state,
            child,
            read_budget: READ_BUDGET,
        }
    }

    /// True once no background reader is running (never started, or joined
    /// by `finish`).
    pub fn pump_stopped(&self) -> bool {
        self.child.as_ref().is_none_or(|c| c.pump_stopped())
    }
}

#[async_trait]
impl ConnectorPrimitive for ProcessConnector {
    fn name(&self) -> &str {
        self.state.name()
    }

    async fn read(&mut self, count: usize) -> Vec<u8> {
        match self.child.as_mut() {
            Some(child) => child.read(count, self.read_budget).await,
            None => Vec::new(),
        }
    }

    async fn write(&mut self, payload: &[u8], log: bool) -> bool {
        let Some(child) = self.child.as_mut() else {
            return false;
        };
        if log {
            self.state.logger.txd(payload);
        }
        child.write(payload).await;
        true
    }

    async fn flush(&mut self) {
        // pipe writes are pushed out as they happen
    }

    fn connected(&mut self) -> bool {
        self.child.as_mut().is_some_and(|c| c.running())
    }

    fn error(&self) -> Option<&str> {
        self.state.last_error()
    }

    async fn finish(&mut self) {
        if let Some(child) = self.child.as_mut() {
            child.finish().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    use super::Remainder;

    // Mirrors the consumer side of `BufferedChild::read` without the
    // channel in the middle.
    fn read_from(queue: &mut VecDeque<Vec<u8>>, rem: &mut Remainder, count: usize) -> Vec<u8> {
        let mut out = Vec::new();
        rem.drain_into(&mut out, count);
        while out.len() < count {
            let Some(chunk) = queue.pop_front() else {
                break;
            };
            let need = count - out.len();
            rem.split_chunk(chunk, &mut out, need);
        }
        out
    }

    #[test]
    fn randomized_chunking_reassembles_in_order() {
        let mut rng = SmallRng::seed_from_u64(0x0d07);
        for _ in 0..50 {
            let data: Vec<u8> = (0..rng.random_range(1..512)).map(|_| rng.random()).collect();

            let mut queue = VecDeque::new();
            let mut offset = 0;
            while offset < data.len() {
                let chunk = rng.random_range(1..=16).min(data.len() - offset);
                queue.push_back(data[offset..offset + chunk].to_vec());
                offset += chunk;
            }

            let mut rem = Remainder::default();
            let mut got = Vec::new();
            while got.len() < data.len() {
                let want = rng.random_range(1..=32);
                let piece = read_from(&mut queue, &mut rem, want);
                assert!(piece.len() <= want);
                got.extend(piece);
            }
            assert_eq!(got, data);
        }
    }

    #[test]
    fn remainder_served_before_queue() {
        let mut rem = Remainder::default();
        let mut queue = VecDeque::from([b"late".to_vec()]);

        let mut first = Vec::new();
        rem.split_chunk(b"early-plus-extra".to_vec(), &mut first, 5);
        assert_eq!(first, b"early");

        let next = read_from(&mut queue, &mut rem, 64);
        assert_eq!(next, b"-plus-extralate");
    }

    #[test]
    fn oversized_tail_chunk_splits_mid_read() {
        let mut rem = Remainder::default();
        let mut queue = VecDeque::from([b"ab".to_vec(), b"cd".to_vec(), b"efgh".to_vec()]);

        // one read drains three chunks; the tail is split with four bytes
        // already assembled
        let got = read_from(&mut queue, &mut rem, 6);
        assert_eq!(got, b"abcdef");

        let rest = read_from(&mut queue, &mut rem, 16);
        assert_eq!(rest, b"gh");
    }
}
