//! Tilt-station acquisition and forwarding daemon.
//!
//! Reads hybrid binary/ASCII sensor frames from field stations attached over
//! serial links, decodes them into inclinometer and pluviometer readings,
//! appends the readings to local TSV archives, and forwards them to a Zabbix
//! trapper through the external `zabbix_sender` tool. Batches that cannot be
//! delivered are spooled on disk and replayed once the backend is reachable
//! again.

pub mod config;
pub mod delivery;
pub mod error;
pub mod frame;
pub mod link;
pub mod reading;
pub mod sink;
pub mod station;
pub mod storage;
