//! Disabled-link resurrection loop.
//!
//! Runs independently of the workers on a fixed interval. Each cycle probes
//! every disabled link with a bare open; a link that answers gets a fresh
//! worker with a clean retry state, one that does not stays in the registry
//! for the next cycle.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::registry::LinkRegistry;
use super::{open_link, LinkWorker};
use crate::config::{RetryConfig, SupervisorConfig};
use crate::frame::FrameDecoder;
use crate::sink::Sink;

pub struct LinkSupervisor {
    config: SupervisorConfig,
    global_retry: RetryConfig,
    decoder: FrameDecoder,
    sink: Arc<dyn Sink>,
    registry: Arc<LinkRegistry>,
    shutdown: CancellationToken,
}

impl LinkSupervisor {
    pub fn new(
        config: SupervisorConfig,
        global_retry: RetryConfig,
        decoder: FrameDecoder,
        sink: Arc<dyn Sink>,
        registry: Arc<LinkRegistry>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            global_retry,
            decoder,
            sink,
            registry,
            shutdown,
        }
    }

    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.config.probe_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    break;
                }
                _ = interval.tick() => {
                    self.probe_disabled_links();
                }
            }
        }

        debug!("link supervisor stopped");
    }

    /// Probe every disabled link once, restarting workers for the ones that
    /// answer. Probes run against a snapshot so the registry lock is never
    /// held across an open.
    fn probe_disabled_links(&self) {
        for entry in self.registry.snapshot() {
            if self.shutdown.is_cancelled() {
                return;
            }

            match open_link(&entry.config) {
                Ok(port) => {
                    // The probe port is closed again; the worker opens its own.
                    drop(port);
                    info!(
                        link = %entry.config.path,
                        down_since = %entry.disabled_at,
                        "disabled link answered probe, restarting worker"
                    );
                    self.registry.remove(&entry.config.path);

                    let worker = LinkWorker::new(
                        entry.config,
                        self.global_retry.clone(),
                        self.decoder.clone(),
                        self.sink.clone(),
                        self.registry.clone(),
                        self.shutdown.clone(),
                    );
                    tokio::spawn(worker.run());
                }
                Err(e) => {
                    debug!(link = %entry.config.path, error = %e, "disabled link still unreachable");
                }
            }
        }
    }
}
