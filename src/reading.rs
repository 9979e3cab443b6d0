//! Decoded sensor reading.

/// One set of physical measurements decoded from a single broadcast frame.
///
/// Units:
/// - Temperature in Celsius
/// - Humidity in percent relative humidity
/// - Pressure in hectopascals
/// - Battery voltage in millivolts
/// - TX power in dBm
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub battery: u16,
    pub tx_power: i8,
    /// Canonical identity of the sensor that produced the frame.
    pub source: String,
}
