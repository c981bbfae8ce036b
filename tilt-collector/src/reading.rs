//! Decoded sensor reading types.
//!
//! A [`Reading`] is only ever constructed from a frame whose two sub-frames
//! were both fully extracted; partial data never escapes the decoder.

/// Inclinometer measurements, in the order they appear on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Inclinometer {
    /// Radial axis tilt (micro radians).
    pub radial: f64,
    /// Tangential axis tilt (micro radians).
    pub tangential: f64,
    /// Enclosure temperature (degrees Celsius).
    pub temperature: f64,
    /// Battery voltage (volts).
    pub voltage: f64,
}

/// Rain gauge measurements.
#[derive(Debug, Clone, PartialEq)]
pub struct Pluviometer {
    /// Accumulated rain level (millimeters).
    pub rain_level: f64,
    /// Battery voltage (volts).
    pub voltage: f64,
}

/// One fully decoded station frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub station_type: u8,
    pub station_number: u8,
    pub network_id: u8,
    /// Resolved from the station table, `Unknown_<n>` when absent.
    pub station_name: String,
    pub inclinometer: Inclinometer,
    pub pluviometer: Pluviometer,
}
