//! Metric delivery through the external sender tool.
//!
//! A batch of `<host> <key> <value>` lines is staged on disk, then the
//! sender executable is invoked once for the whole file. Failed batches are
//! retried with jittered exponential backoff; when the retry budget runs
//! out the staged file is committed to the spool instead of being dropped.
//! Every successful delivery opportunistically drains the spool, oldest
//! entry first, stopping at the first entry that still fails so a backend
//! that is still down is not hammered.

pub mod spool;

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};
use std::io;
use std::path::Path;
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::config::DeliveryConfig;
use crate::error::Result;
use spool::Spool;

/// Backoff ceiling for delivery retries.
const BACKOFF_MAX: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
enum SenderError {
    /// The executable itself is missing. Retrying the same call cannot
    /// succeed, so this short-circuits the retry loop.
    #[error("sender tool not found: {0}")]
    NotFound(String),

    #[error("sender exited with {status}: {output}")]
    Failed { status: ExitStatus, output: String },

    #[error("sender timed out after {0:?}")]
    TimedOut(Duration),

    #[error("cannot run sender: {0}")]
    Io(#[from] io::Error),
}

struct ExponentialBackoff {
    current: Duration,
    max: Duration,
    // Per-process jitter seed. RandomState is seeded from OS randomness
    // at construction, so concurrent collectors retrying against the same
    // backend spread their attempts apart.
    jitter_state: RandomState,
    jitter_step: u64,
}

impl ExponentialBackoff {
    fn new(initial: Duration, max: Duration) -> Self {
        Self {
            current: initial,
            max,
            jitter_state: RandomState::new(),
            jitter_step: 0,
        }
    }

    /// Return the next delay (with jitter) and advance the state.
    ///
    /// The nominal delay doubles per call up to the ceiling and is scaled
    /// by a jitter factor in [0.5, 1.0].
    fn next_delay(&mut self) -> Duration {
        let nominal = self.current;
        self.current = (self.current * 2).min(self.max);

        let mut hasher = self.jitter_state.build_hasher();
        hasher.write_u64(self.jitter_step);
        self.jitter_step = self.jitter_step.wrapping_add(1);
        let hash = hasher.finish();
        let jitter = 0.5 + (hash as f64 / u64::MAX as f64) * 0.5;

        nominal.mul_f64(jitter)
    }
}

fn format_batch(host: &str, items: &[(String, String)]) -> String {
    let mut batch = String::new();
    for (key, value) in items {
        batch.push_str(host);
        batch.push(' ');
        batch.push_str(key);
        batch.push(' ');
        batch.push_str(value);
        batch.push('\n');
    }
    batch
}

/// Resilient front of the trapper backend.
pub struct DeliveryQueue {
    config: DeliveryConfig,
    spool: Spool,
    /// Serializes drain passes; a caller that loses the race skips the
    /// drain, the winner will pick its entries up anyway.
    drain_lock: Mutex<()>,
}

impl DeliveryQueue {
    /// Open the queue, creating the spool directory if needed.
    pub async fn open(config: DeliveryConfig) -> Result<Self> {
        let spool = Spool::open(config.spool_dir.clone()).await?;
        Ok(Self {
            config,
            spool,
            drain_lock: Mutex::new(()),
        })
    }

    /// Deliver one batch of `(key, value)` metrics for `host`.
    ///
    /// Backend failures never surface here; an undeliverable batch ends up
    /// in the spool. The only error this returns is a spool directory that
    /// cannot be written, which no amount of retrying will fix.
    pub async fn submit(&self, host: &str, items: &[(String, String)]) -> Result<()> {
        let staged = self.spool.stage(&format_batch(host, items)).await?;

        if self.send_with_retries(&staged).await {
            self.spool.discard(&staged).await;
            self.drain_spool().await;
        } else {
            let spooled = self.spool.commit(&staged).await?;
            warn!(batch = %spooled.display(), "batch spooled after failed delivery");
        }
        Ok(())
    }

    /// Replay spooled batches, oldest first.
    ///
    /// Stops at the first entry that still fails; the rest wait for the
    /// next trigger. Also called once at process start to flush batches
    /// left over from a previous run.
    pub async fn drain_spool(&self) {
        let Ok(_guard) = self.drain_lock.try_lock() else {
            return;
        };

        let entries = match self.spool.entries().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "cannot list spool directory");
                return;
            }
        };
        if entries.is_empty() {
            return;
        }

        info!(pending = entries.len(), "draining spool");
        for entry in entries {
            match self.invoke_sender(&entry).await {
                Ok(_) => {
                    info!(batch = %entry.display(), "spooled batch delivered");
                    self.spool.discard(&entry).await;
                }
                Err(e) => {
                    debug!(batch = %entry.display(), error = %e, "spool drain stopped");
                    break;
                }
            }
        }
    }

    /// Try the batch until it goes through or the retry budget runs out.
    async fn send_with_retries(&self, batch: &Path) -> bool {
        let mut backoff = ExponentialBackoff::new(self.config.backoff_initial(), BACKOFF_MAX);
        let mut attempt: u32 = 1;

        loop {
            match self.invoke_sender(batch).await {
                Ok(output) => {
                    if self.config.log_sender_output && !output.is_empty() {
                        info!(output = %output, "sender output");
                    }
                    debug!(batch = %batch.display(), attempt, "batch delivered");
                    return true;
                }
                Err(SenderError::NotFound(tool)) => {
                    error!(tool = %tool, "sender tool not found, spooling batch");
                    return false;
                }
                Err(e) => {
                    warn!(
                        batch = %batch.display(),
                        attempt,
                        error = %e,
                        "delivery attempt failed"
                    );
                }
            }

            if attempt > self.config.retry_count {
                return false;
            }
            attempt += 1;
            time::sleep(backoff.next_delay()).await;
        }
    }

    /// One sender invocation for one batch file.
    async fn invoke_sender(&self, batch: &Path) -> std::result::Result<String, SenderError> {
        let mut command = Command::new(&self.config.sender_path);
        command
            .arg("-z")
            .arg(&self.config.server)
            .arg("-p")
            .arg(self.config.port.to_string())
            .arg("-i")
            .arg(batch)
            .kill_on_drop(true);

        let output = match time::timeout(self.config.timeout(), command.output()).await {
            Err(_) => return Err(SenderError::TimedOut(self.config.timeout())),
            Ok(Err(e)) if e.kind() == io::ErrorKind::NotFound => {
                return Err(SenderError::NotFound(self.config.sender_path.clone()));
            }
            Ok(Err(e)) => return Err(SenderError::Io(e)),
            Ok(Ok(output)) => output,
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if output.status.success() {
            Ok(stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let text = if stderr.is_empty() { stdout } else { stderr };
            Err(SenderError::Failed {
                status: output.status,
                output: text,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_format_one_line_per_metric() {
        let items = vec![
            ("axis.radial".to_string(), "-45".to_string()),
            ("axis.tangential".to_string(), "98.2".to_string()),
        ];

        let batch = format_batch("BILBAO_IN", &items);

        assert_eq!(batch, "BILBAO_IN axis.radial -45\nBILBAO_IN axis.tangential 98.2\n");
    }

    #[test]
    fn should_back_off_exponentially_with_jitter() {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(60));

        let d1 = backoff.next_delay();
        let d2 = backoff.next_delay();
        let d3 = backoff.next_delay();

        // Nominal sequence is 1s, 2s, 4s. With jitter in [0.5, 1.0],
        // each delay is at least half the nominal value.
        assert!(d1 >= Duration::from_millis(500), "d1={d1:?}");
        assert!(d1 <= Duration::from_secs(1), "d1={d1:?}");

        assert!(d2 >= Duration::from_secs(1), "d2={d2:?}");
        assert!(d2 <= Duration::from_secs(2), "d2={d2:?}");

        assert!(d3 >= Duration::from_secs(2), "d3={d3:?}");
        assert!(d3 <= Duration::from_secs(4), "d3={d3:?}");
    }

    #[test]
    fn should_cap_backoff_at_max() {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_secs(32), Duration::from_secs(60));

        let _d1 = backoff.next_delay();
        let d2 = backoff.next_delay();
        let d3 = backoff.next_delay();

        assert!(d2 <= Duration::from_secs(60), "d2={d2:?}");
        assert!(d3 <= Duration::from_secs(60), "d3={d3:?}");
        assert!(d3 >= Duration::from_secs(30), "d3={d3:?}");
    }
}
