//! Serial link acquisition workers.
//!
//! One [`LinkWorker`] per configured link, each an independent task with its
//! own open/read/retry state machine:
//!
//! ```text
//! OPENING -> OPEN -> (reading loop) -> failure -> OPENING
//!                                   \-> DISABLED (handed to the supervisor)
//!                                   \-> SHUTDOWN (cancellation or stop_app)
//! ```
//!
//! Workers share nothing with each other. They touch two common structures:
//! the [`registry::LinkRegistry`] of disabled links and the [`Sink`] that
//! archives and forwards readings.

pub mod registry;
pub mod supervisor;

use std::sync::Arc;

use time::OffsetDateTime;
use tokio::time::{sleep, timeout};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tokio_stream::StreamExt;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::{LinkConfig, OnExhaustion, RetryConfig};
use crate::frame::{FrameDecoder, RawLineCodec};
use crate::sink::Sink;
use registry::{DisabledLink, LinkRegistry};

/// Open a serial port with the link's framing parameters.
///
/// The builder timeout only bounds the blocking open; read pacing is handled
/// by the worker's own per-read timeout.
pub(crate) fn open_link(config: &LinkConfig) -> tokio_serial::Result<SerialStream> {
    tokio_serial::new(&config.path, config.baud_rate)
        .data_bits(config.data_bits())
        .parity(config.parity())
        .stop_bits(config.stop_bits())
        .timeout(config.read_timeout())
        .open_native_async()
}

enum ReadOutcome {
    Shutdown,
    Failed(String),
}

/// Acquisition worker for one serial link.
pub struct LinkWorker {
    config: LinkConfig,
    retry: RetryConfig,
    decoder: FrameDecoder,
    sink: Arc<dyn Sink>,
    registry: Arc<LinkRegistry>,
    shutdown: CancellationToken,
}

impl LinkWorker {
    /// A per-link retry override takes precedence over the global policy.
    pub fn new(
        config: LinkConfig,
        global_retry: RetryConfig,
        decoder: FrameDecoder,
        sink: Arc<dyn Sink>,
        registry: Arc<LinkRegistry>,
        shutdown: CancellationToken,
    ) -> Self {
        let retry = config.retry.clone().unwrap_or(global_retry);
        Self {
            config,
            retry,
            decoder,
            sink,
            registry,
            shutdown,
        }
    }

    /// Run until cancellation, the `stop_app` policy, or a `disable` hand-off
    /// to the supervisor.
    pub async fn run(self) {
        let mut failures: u32 = 0;

        while !self.shutdown.is_cancelled() {
            match open_link(&self.config) {
                Ok(port) => {
                    info!(link = %self.config.path, baud = self.config.baud_rate, "link open");
                    failures = 0;
                    match self.read_loop(port).await {
                        ReadOutcome::Shutdown => break,
                        ReadOutcome::Failed(reason) => {
                            if !self.handle_failure(&mut failures, reason).await {
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    let reason = format!("open failed: {e}");
                    if !self.handle_failure(&mut failures, reason).await {
                        return;
                    }
                }
            }
        }

        debug!(link = %self.config.path, "link worker stopped");
    }

    /// Read lines until the stream fails or cancellation fires.
    ///
    /// A read timeout means the sensor is quiet, not that the link is broken;
    /// only stream errors and EOF count as failures.
    async fn read_loop(&self, port: SerialStream) -> ReadOutcome {
        let mut lines = FramedRead::new(port, RawLineCodec::default());

        loop {
            let next = tokio::select! {
                _ = self.shutdown.cancelled() => return ReadOutcome::Shutdown,
                next = timeout(self.config.read_timeout(), lines.next()) => next,
            };

            match next {
                Err(_) => {
                    trace!(link = %self.config.path, "no data within read timeout");
                }
                Ok(None) => return ReadOutcome::Failed("serial stream closed".to_string()),
                Ok(Some(Err(e))) => return ReadOutcome::Failed(format!("read error: {e}")),
                Ok(Some(Ok(line))) => self.process_line(&line).await,
            }
        }
    }

    /// Decode one raw line and feed the reading to the sink.
    ///
    /// Decode failures are logged and dropped; a malformed frame is never
    /// retried and never counts against the link's retry budget.
    async fn process_line(&self, line: &[u8]) {
        match self.decoder.decode(line) {
            Ok(reading) => {
                debug!(
                    link = %self.config.path,
                    station = %reading.station_name,
                    "frame decoded"
                );
                if let Err(e) = self.sink.store_reading(&reading).await {
                    warn!(link = %self.config.path, error = %e, "archive write failed");
                }
                if let Err(e) = self.sink.deliver_reading(&reading).await {
                    warn!(link = %self.config.path, error = %e, "delivery submission failed");
                }
            }
            Err(e) => {
                warn!(link = %self.config.path, error = %e, "dropping undecodable frame");
                debug!(
                    link = %self.config.path,
                    payload = %line.iter().map(|b| format!("{b:02x}")).collect::<String>(),
                    "undecodable frame payload"
                );
            }
        }
    }

    /// Count one failure and apply the retry policy.
    ///
    /// Returns `false` when the worker must terminate.
    async fn handle_failure(&self, failures: &mut u32, reason: String) -> bool {
        *failures += 1;
        warn!(
            link = %self.config.path,
            failures = *failures,
            reason = %reason,
            "link failure"
        );

        if self.retry.max_attempts > 0 && *failures >= self.retry.max_attempts {
            match self.retry.on_exhaustion {
                OnExhaustion::KeepRetrying => {
                    info!(link = %self.config.path, "retry budget exhausted, retrying anyway");
                }
                OnExhaustion::Disable => {
                    warn!(link = %self.config.path, "retry budget exhausted, disabling link");
                    self.registry.disable(DisabledLink {
                        config: self.config.clone(),
                        reason,
                        disabled_at: OffsetDateTime::now_utc(),
                    });
                    return false;
                }
                OnExhaustion::StopApp => {
                    error!(link = %self.config.path, "retry budget exhausted, stopping application");
                    self.shutdown.cancel();
                    return false;
                }
            }
        }

        tokio::select! {
            _ = self.shutdown.cancelled() => false,
            _ = sleep(self.retry.delay()) => true,
        }
    }
}
