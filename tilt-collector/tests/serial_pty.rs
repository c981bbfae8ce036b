//! End-to-end acquisition tests over a pseudo-terminal.
//!
//! The master side of a PTY plays the station; the worker opens the slave
//! side like any serial device. These tests run serially because PTY
//! allocation and real-time waits do not mix well with parallel siblings.

#![cfg(target_os = "linux")]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nix::fcntl::OFlag;
use nix::pty::{grantpt, posix_openpt, ptsname_r, unlockpt, PtyMaster};
use parking_lot::Mutex;
use serial_test::serial;
use tokio_util::sync::CancellationToken;

use tilt_collector::config::{FrameLayout, LinkConfig, RetryConfig, SupervisorConfig};
use tilt_collector::error::Result;
use tilt_collector::frame::FrameDecoder;
use tilt_collector::link::registry::{DisabledLink, LinkRegistry};
use tilt_collector::link::supervisor::LinkSupervisor;
use tilt_collector::link::LinkWorker;
use tilt_collector::reading::Reading;
use tilt_collector::sink::Sink;

#[derive(Default)]
struct RecordingSink {
    readings: Mutex<Vec<Reading>>,
}

#[async_trait]
impl Sink for RecordingSink {
    async fn store_reading(&self, reading: &Reading) -> Result<()> {
        self.readings.lock().push(reading.clone());
        Ok(())
    }

    async fn deliver_reading(&self, _reading: &Reading) -> Result<()> {
        Ok(())
    }
}

/// Open a PTY pair and return the master plus the slave device path.
fn create_pty() -> (PtyMaster, String) {
    let master = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY).unwrap();
    grantpt(&master).unwrap();
    unlockpt(&master).unwrap();
    let slave_path = ptsname_r(&master).unwrap();
    (master, slave_path)
}

fn create_frame(station_number: u8) -> Vec<u8> {
    let mut header = [0u8; 10];
    header[0] = 3;
    header[6] = station_number;
    header[8] = 7;

    let mut frame = Vec::new();
    frame.push(b'~');
    frame.extend_from_slice(&header);
    frame.extend_from_slice(b"RD-0045.0,TD+0098.2,T+0009.4,V+0012.0");
    frame.extend_from_slice(b"~~");
    frame.extend_from_slice(&[0u8; 10]);
    frame.extend_from_slice(b"RAIN+0000.0,V+0012.0");
    frame.extend_from_slice(b"~\r\n");
    frame
}

fn create_link_config(path: &str) -> LinkConfig {
    serde_json::from_str(&format!(
        r#"{{"path": "{path}", "read_timeout_ms": 200}}"#
    ))
    .unwrap()
}

async fn wait_for_readings(sink: &RecordingSink, count: usize) -> bool {
    for _ in 0..100 {
        if sink.readings.lock().len() >= count {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
#[serial]
#[cfg_attr(feature = "skip-pty-tests", ignore)]
async fn should_deliver_frames_in_read_order() {
    let (master, slave_path) = create_pty();
    let sink = Arc::new(RecordingSink::default());
    let registry = Arc::new(LinkRegistry::new());
    let shutdown = CancellationToken::new();

    let worker = LinkWorker::new(
        create_link_config(&slave_path),
        RetryConfig::default(),
        FrameDecoder::new(FrameLayout::default()),
        sink.clone(),
        registry.clone(),
        shutdown.clone(),
    );
    let handle = tokio::spawn(worker.run());

    // Give the worker time to open the slave side.
    tokio::time::sleep(Duration::from_millis(200)).await;
    for station in [1u8, 2, 3] {
        nix::unistd::write(&master, &create_frame(station)).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    assert!(wait_for_readings(&sink, 3).await, "expected three readings");

    let readings = sink.readings.lock().clone();
    assert_eq!(readings.len(), 3);
    assert_eq!(readings[0].station_number, 1);
    assert_eq!(readings[0].station_name, "VC1");
    assert_eq!(readings[1].station_number, 2);
    assert_eq!(readings[2].station_number, 3);
    assert_eq!(readings[0].inclinometer.radial, -45.0);
    assert!(registry.is_empty());

    shutdown.cancel();
    handle.await.unwrap();
}

#[tokio::test]
#[serial]
#[cfg_attr(feature = "skip-pty-tests", ignore)]
async fn should_resurrect_disabled_link_when_probe_succeeds() {
    let (master, slave_path) = create_pty();
    let sink = Arc::new(RecordingSink::default());
    let registry = Arc::new(LinkRegistry::new());
    let shutdown = CancellationToken::new();

    // The link starts out disabled, as if a worker had exhausted its budget.
    registry.disable(DisabledLink {
        config: create_link_config(&slave_path),
        reason: "open failed".to_string(),
        disabled_at: time::OffsetDateTime::now_utc(),
    });

    let supervisor_config: SupervisorConfig =
        serde_json::from_str(r#"{"enabled": true, "probe_interval_secs": 1}"#).unwrap();
    let supervisor = LinkSupervisor::new(
        supervisor_config,
        RetryConfig::default(),
        FrameDecoder::new(FrameLayout::default()),
        sink.clone(),
        registry.clone(),
        shutdown.clone(),
    );
    let handle = tokio::spawn(supervisor.run());

    // First probe cycle should resurrect the link and start a worker.
    for _ in 0..100 {
        if registry.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(registry.is_empty(), "probe should have resurrected the link");

    tokio::time::sleep(Duration::from_millis(200)).await;
    nix::unistd::write(&master, &create_frame(5)).unwrap();

    assert!(wait_for_readings(&sink, 1).await, "expected a reading");
    assert_eq!(sink.readings.lock()[0].station_name, "GPCAM");

    shutdown.cancel();
    handle.await.unwrap();
}
