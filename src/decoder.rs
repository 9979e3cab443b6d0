//! RuuviTag broadcast frame decoding.
//!
//! Only data format 5 (RAWv2) is understood. Frames from other vendors, other
//! format revisions, or truncated payloads decode to `None` and are skipped by
//! the caller without any report.

use crate::mac_address::MacAddress;
use crate::reading::Reading;
use std::collections::HashMap;
use thiserror::Error;

/// Ruuvi Innovations company identifier (0x0499).
pub const RUUVI_MANUFACTURER_ID: u16 = 0x0499;

/// Same identifier as it appears on the air (little-endian).
pub const RUUVI_MANUFACTURER_ID_BYTES: [u8; 2] = [0x99, 0x04];

/// Advertised names starting with this prefix belong to the sensor family.
pub const RUUVI_NAME_PREFIX: &str = "Ruuvi";

/// Format revision byte of RAWv2 payloads.
pub const FORMAT_RAWV2: u8 = 5;

/// Minimum manufacturer payload length for RAWv2 (format byte through MAC).
pub const RAWV2_MIN_LEN: usize = 24;

const BATTERY_OFFSET: usize = 13;
const TX_POWER_OFFSET: usize = 14;
const MAC_OFFSET: usize = 18;

/// One advertisement as surfaced by the capture layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    /// Address the advertisement was broadcast from.
    pub address: String,
    /// Advertised local name, if any.
    pub name: Option<String>,
    /// Manufacturer specific data keyed by company identifier, without the id prefix.
    pub manufacturer_data: HashMap<u16, Vec<u8>>,
}

impl Frame {
    /// Frame carrying Ruuvi manufacturer data only.
    pub fn ruuvi(address: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            address: address.into(),
            name: None,
            manufacturer_data: HashMap::from([(RUUVI_MANUFACTURER_ID, payload)]),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    fn ruuvi_payload(&self) -> Option<&[u8]> {
        self.manufacturer_data
            .get(&RUUVI_MANUFACTURER_ID)
            .map(Vec::as_slice)
    }
}

/// Reasons a payload does not produce a reading.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("payload too short: {0} bytes, need {min}", min = RAWV2_MIN_LEN)]
    TooShort(usize),
    #[error("unsupported data format {0} (only RAWv2 is supported)")]
    UnsupportedFormat(u8),
}

/// Whether the frame belongs to the sensor family, by vendor id or advertised name.
pub fn is_sensor_frame(frame: &Frame) -> bool {
    frame.ruuvi_payload().is_some()
        || frame
            .name
            .as_deref()
            .is_some_and(|name| name.starts_with(RUUVI_NAME_PREFIX))
}

/// Decode a captured frame, returning `None` for anything that is not a valid RAWv2 frame.
pub fn decode_frame(frame: &Frame) -> Option<Reading> {
    if !is_sensor_frame(frame) {
        return None;
    }
    // A name match alone identifies the family but leaves nothing to decode.
    decode_payload(frame.ruuvi_payload()?).ok()
}

/// Decode a RAWv2 manufacturer payload (format byte first, company id stripped).
///
/// Fields are big-endian at fixed offsets:
/// - temperature: i16 at 1..3, 0.005 °C steps
/// - humidity: u16 at 3..5, 0.0025 % steps
/// - pressure: u16 at 5..7, Pa offset by 50000, reported in hPa
/// - battery: upper 11 bits of u16 at 13..15, mV above 1600
/// - tx power: lower 5 bits of byte 14, signed, 2 dBm steps
/// - identity: 6 bytes at 18..24
pub fn decode_payload(data: &[u8]) -> Result<Reading, DecodeError> {
    if data.len() < RAWV2_MIN_LEN {
        return Err(DecodeError::TooShort(data.len()));
    }
    if data[0] != FORMAT_RAWV2 {
        return Err(DecodeError::UnsupportedFormat(data[0]));
    }

    let word = |offset: usize| u16::from_be_bytes([data[offset], data[offset + 1]]);

    let temperature = f64::from(word(1) as i16) * 0.005;
    let humidity = f64::from(word(3)) * 0.0025;
    let pressure = (f64::from(word(5)) + 50_000.0) / 100.0;
    let battery = (word(BATTERY_OFFSET) >> 5) + 1600;

    // Shift the 5-bit field to the top of an i8 and back to sign-extend it.
    let tx_raw = ((data[TX_POWER_OFFSET] & 0x1F) << 3) as i8 >> 3;
    let tx_power = tx_raw * 2;

    let source = MacAddress::from_slice(&data[MAC_OFFSET..])
        .ok_or(DecodeError::TooShort(data.len()))?
        .identity();

    Ok(Reading {
        temperature,
        humidity,
        pressure,
        battery,
        tx_power,
        source,
    })
}

/// Parse a hex dump (whitespace tolerated) into bytes.
pub fn parse_hex(src: &str) -> Option<Vec<u8>> {
    let digits: Vec<u8> = src
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    if digits.len() % 2 != 0 {
        return None;
    }
    digits
        .chunks(2)
        .map(|pair| {
            let pair = std::str::from_utf8(pair).ok()?;
            u8::from_str_radix(pair, 16).ok()
        })
        .collect()
}
