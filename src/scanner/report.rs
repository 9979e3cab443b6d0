//! HCI LE advertising report parsing.
//!
//! Input is a raw HCI event packet including the packet type byte, as printed
//! by `hcidump --raw` or read from an HCI socket.

use crate::decoder::Frame;
use crate::mac_address::MacAddress;
use std::collections::HashMap;

// HCI packet types
pub const HCI_EVENT_PKT: u8 = 0x04;

// HCI events
pub const EVT_LE_META_EVENT: u8 = 0x3E;

// LE Meta event sub-events
pub const EVT_LE_ADVERTISING_REPORT: u8 = 0x02;

// AD types
const AD_TYPE_SHORT_NAME: u8 = 0x08;
const AD_TYPE_COMPLETE_NAME: u8 = 0x09;
const AD_TYPE_MANUFACTURER_DATA: u8 = 0xFF;

/// Parse every report of an LE advertising report event into frames.
///
/// Anything that is not an advertising report, or is truncated, yields no
/// frames (or only the reports preceding the truncation).
pub fn parse_event(packet: &[u8]) -> Vec<Frame> {
    let mut frames = Vec::new();

    // type(1) + event(1) + param len(1) + subevent(1) + num reports(1)
    if packet.len() < 5
        || packet[0] != HCI_EVENT_PKT
        || packet[1] != EVT_LE_META_EVENT
        || packet[3] != EVT_LE_ADVERTISING_REPORT
    {
        return frames;
    }

    let num_reports = packet[4] as usize;
    let mut rest = &packet[5..];

    for _ in 0..num_reports {
        // event type(1) + address type(1) + address(6) + data len(1)
        if rest.len() < 9 {
            break;
        }
        let Some(address) = MacAddress::from_le_slice(&rest[2..8]) else {
            break;
        };
        let data_len = rest[8] as usize;
        // data + rssi(1)
        let Some(ad_data) = rest.get(9..9 + data_len) else {
            break;
        };

        let (name, manufacturer_data) = parse_ad_structures(ad_data);
        frames.push(Frame {
            address: address.identity(),
            name,
            manufacturer_data,
        });

        rest = rest.get(9 + data_len + 1..).unwrap_or(&[]);
    }

    frames
}

/// Walk length-type-value AD structures, keeping the local name and manufacturer data.
fn parse_ad_structures(ad_data: &[u8]) -> (Option<String>, HashMap<u16, Vec<u8>>) {
    let mut name = None;
    let mut manufacturer_data = HashMap::new();

    let mut offset = 0;
    while offset + 2 <= ad_data.len() {
        let len = ad_data[offset] as usize;
        if len == 0 || offset + 1 + len > ad_data.len() {
            break;
        }
        let ad_type = ad_data[offset + 1];
        let value = &ad_data[offset + 2..offset + 1 + len];

        match ad_type {
            AD_TYPE_MANUFACTURER_DATA if value.len() >= 2 => {
                let company = u16::from_le_bytes([value[0], value[1]]);
                manufacturer_data.insert(company, value[2..].to_vec());
            }
            AD_TYPE_COMPLETE_NAME => {
                name = Some(String::from_utf8_lossy(value).into_owned());
            }
            AD_TYPE_SHORT_NAME if name.is_none() => {
                name = Some(String::from_utf8_lossy(value).into_owned());
            }
            _ => {}
        }

        offset += 1 + len;
    }

    (name, manufacturer_data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{RUUVI_MANUFACTURER_ID, decode_frame};
    use crate::test_utils::{TEST_IDENTITY, canonical_payload};

    /// Build an advertising report event carrying the canonical RAWv2 payload.
    fn ruuvi_event(name: Option<&str>) -> Vec<u8> {
        let mut ad = vec![0x02, 0x01, 0x06]; // flags
        let payload = canonical_payload();
        ad.push((payload.len() + 3) as u8);
        ad.push(AD_TYPE_MANUFACTURER_DATA);
        ad.extend_from_slice(&[0x99, 0x04]);
        ad.extend_from_slice(&payload);
        if let Some(name) = name {
            ad.push((name.len() + 1) as u8);
            ad.push(AD_TYPE_COMPLETE_NAME);
            ad.extend_from_slice(name.as_bytes());
        }

        let mut report = vec![0x00, 0x01]; // event type, random address
        report.extend_from_slice(&[0x34, 0x12, 0xBE, 0xBA, 0xFE, 0xCA]);
        report.push(ad.len() as u8);
        report.extend_from_slice(&ad);
        report.push(0xC4); // rssi

        let mut event = vec![HCI_EVENT_PKT, EVT_LE_META_EVENT, 0, EVT_LE_ADVERTISING_REPORT, 1];
        event.extend_from_slice(&report);
        event[2] = (event.len() - 3) as u8;
        event
    }

    #[test]
    fn test_parse_ruuvi_report() {
        let frames = parse_event(&ruuvi_event(Some("Ruuvi 1234")));
        assert_eq!(frames.len(), 1);

        let frame = &frames[0];
        assert_eq!(frame.address, TEST_IDENTITY);
        assert_eq!(frame.name.as_deref(), Some("Ruuvi 1234"));
        assert_eq!(
            frame.manufacturer_data.get(&RUUVI_MANUFACTURER_ID),
            Some(&canonical_payload())
        );
        assert_eq!(decode_frame(frame).unwrap().source, TEST_IDENTITY);
    }

    #[test]
    fn test_parse_two_reports() {
        let single = ruuvi_event(None);
        let report = &single[5..];
        let mut event = vec![HCI_EVENT_PKT, EVT_LE_META_EVENT, 0, EVT_LE_ADVERTISING_REPORT, 2];
        event.extend_from_slice(report);
        event.extend_from_slice(report);

        assert_eq!(parse_event(&event).len(), 2);
    }

    #[test]
    fn test_ignores_other_events() {
        let mut event = ruuvi_event(None);
        event[3] = 0x01; // connection complete
        assert!(parse_event(&event).is_empty());

        let command = [0x01, 0x0C, 0x20, 0x02, 0x01, 0x00];
        assert!(parse_event(&command).is_empty());
        assert!(parse_event(&[]).is_empty());
    }

    #[test]
    fn test_truncated_report() {
        let event = ruuvi_event(None);
        assert!(parse_event(&event[..20]).is_empty());
    }

    #[test]
    fn test_malformed_ad_length_stops_parsing() {
        let (name, data) = parse_ad_structures(&[0x05, 0x09, b'R']);
        assert!(name.is_none());
        assert!(data.is_empty());
    }
}
