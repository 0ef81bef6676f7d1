//! Advertising data and GAP timing parameters
//!
//! Advertising payloads are a sequence of `[length, type, data...]` structures
//! where `length` covers the type byte and the data.

use super::event::ConnParams;
use super::uuid::{Uuid128, UUID128_SIZE};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// AD type: flags
pub const BLE_GAP_AD_TYPE_FLAGS: u8 = 0x01;
/// AD type: incomplete list of 128-bit service UUIDs
pub const BLE_GAP_AD_TYPE_128BIT_SERVICE_UUID_MORE_AVAILABLE: u8 = 0x06;
/// AD type: complete list of 128-bit service UUIDs
pub const BLE_GAP_AD_TYPE_128BIT_SERVICE_UUID_COMPLETE: u8 = 0x07;
/// AD type: complete local name
pub const BLE_GAP_AD_TYPE_COMPLETE_LOCAL_NAME: u8 = 0x09;
/// AD type: shortened local name
pub const BLE_GAP_AD_TYPE_SHORT_LOCAL_NAME: u8 = 0x08;

/// LE only, general discoverable
pub const BLE_GAP_ADV_FLAGS_LE_ONLY_GENERAL_DISC_MODE: u8 = 0x06;

/// Maximum legacy advertising payload
pub const BLE_GAP_ADV_MAX_SIZE: usize = 31;

/// Errors while parsing advertising data
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdvParseError {
    #[error("AD type 0x{0:02x} not found")]
    NotFound(u8),
    #[error("Malformed AD structure at offset {0}")]
    Malformed(usize),
    #[error("Advertising data too long: {0} bytes")]
    TooLong(usize),
}

/// Find the data of the first AD structure of the given type
pub fn find_ad_type(data: &[u8], ad_type: u8) -> Result<&[u8], AdvParseError> {
    let mut index = 0;
    while index < data.len() {
        let field_length = usize::from(data[index]);
        if field_length == 0 {
            // Zero length marks the start of padding
            break;
        }
        let end = index + 1 + field_length;
        if end > data.len() {
            return Err(AdvParseError::Malformed(index));
        }
        if data[index + 1] == ad_type {
            return Ok(&data[index + 2..end]);
        }
        index = end;
    }
    Err(AdvParseError::NotFound(ad_type))
}

/// 128-bit service UUIDs listed in an advertisement. The incomplete list is
/// consulted first, then the complete one.
pub fn advertised_uuid128s(data: &[u8]) -> Result<Vec<Uuid128>, AdvParseError> {
    let list = match find_ad_type(data, BLE_GAP_AD_TYPE_128BIT_SERVICE_UUID_MORE_AVAILABLE) {
        Ok(list) => list,
        Err(AdvParseError::NotFound(_)) => {
            find_ad_type(data, BLE_GAP_AD_TYPE_128BIT_SERVICE_UUID_COMPLETE)?
        }
        Err(e) => return Err(e),
    };

    Ok(list
        .chunks_exact(UUID128_SIZE)
        .filter_map(|chunk| Uuid128::from_slice(chunk).ok())
        .collect())
}

/// Whether the advertisement lists the given 128-bit service
pub fn advertises_service(data: &[u8], service: &Uuid128) -> bool {
    advertised_uuid128s(data)
        .map(|uuids| uuids.contains(service))
        .unwrap_or(false)
}

/// Build our advertising payload: flags, complete 128-bit UUID list, and as
/// much of the name as still fits.
pub fn build_adv_data(device_name: &str, services: &[Uuid128]) -> Result<Vec<u8>, AdvParseError> {
    let mut data = vec![2, BLE_GAP_AD_TYPE_FLAGS, BLE_GAP_ADV_FLAGS_LE_ONLY_GENERAL_DISC_MODE];

    if !services.is_empty() {
        data.push((1 + services.len() * UUID128_SIZE) as u8);
        data.push(BLE_GAP_AD_TYPE_128BIT_SERVICE_UUID_COMPLETE);
        for service in services {
            data.extend_from_slice(&service.0);
        }
    }

    if data.len() > BLE_GAP_ADV_MAX_SIZE {
        return Err(AdvParseError::TooLong(data.len()));
    }

    let room = BLE_GAP_ADV_MAX_SIZE - data.len();
    let name = device_name.as_bytes();
    if room > 2 && !name.is_empty() {
        let (ad_type, len) = if name.len() <= room - 2 {
            (BLE_GAP_AD_TYPE_COMPLETE_LOCAL_NAME, name.len())
        } else {
            (BLE_GAP_AD_TYPE_SHORT_LOCAL_NAME, room - 2)
        };
        data.push((len + 1) as u8);
        data.push(ad_type);
        data.extend_from_slice(&name[..len]);
    }

    Ok(data)
}

/// Advertising mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdvMode {
    Fast,
    Slow,
}

/// Advertising intervals and timeouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvertisingParams {
    /// 0.625 ms units (320 = 200 ms)
    pub fast_interval: u16,
    /// Seconds
    pub fast_timeout_secs: u16,
    /// 0.625 ms units (1600 = 1 s)
    pub slow_interval: u16,
    /// Seconds
    pub slow_timeout_secs: u16,
}

impl Default for AdvertisingParams {
    fn default() -> Self {
        Self {
            fast_interval: 320,
            fast_timeout_secs: 120,
            slow_interval: 1600,
            slow_timeout_secs: 300,
        }
    }
}

/// Scan parameters used while looking for the BTC peripheral
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanParams {
    pub active: bool,
    /// 0.625 ms units
    pub interval: u16,
    /// 0.625 ms units
    pub window: u16,
    /// Seconds, 0 = no timeout
    pub timeout: u16,
}

impl Default for ScanParams {
    fn default() -> Self {
        Self {
            active: true,
            interval: 0x00A0,
            window: 0x0050,
            timeout: 0,
        }
    }
}

/// Convert milliseconds to stack units of `unit_us` microseconds
pub fn msec_to_units(ms: u32, unit_us: u32) -> u16 {
    (ms * 1000 / unit_us) as u16
}

/// 1.25 ms connection interval unit, in microseconds
pub const UNIT_1_25_MS: u32 = 1250;
/// 10 ms supervision timeout unit, in microseconds
pub const UNIT_10_MS: u32 = 10_000;

impl ConnParams {
    /// Parameters we prefer as a peripheral (7.5-75 ms, latency 3, 4 s)
    pub fn peripheral_default() -> Self {
        Self {
            min_conn_interval: 6,
            max_conn_interval: msec_to_units(75, UNIT_1_25_MS),
            slave_latency: 3,
            conn_sup_timeout: msec_to_units(4000, UNIT_10_MS),
        }
    }

    /// Parameters we request as a central (same window, no latency)
    pub fn central_default() -> Self {
        Self {
            slave_latency: 0,
            ..Self::peripheral_default()
        }
    }

    /// Check the ranges the stack accepts
    pub fn is_valid(&self) -> bool {
        (6..=3200).contains(&self.min_conn_interval)
            && (self.min_conn_interval..=3200).contains(&self.max_conn_interval)
            && self.slave_latency <= 499
            && (10..=3200).contains(&self.conn_sup_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::uuid::{BTC_SERVICE_UUID, BTP_BASE_UUID};

    fn adv_with(ad_type: u8, uuids: &[Uuid128]) -> Vec<u8> {
        let mut data = vec![2, BLE_GAP_AD_TYPE_FLAGS, 0x06];
        data.push((1 + uuids.len() * 16) as u8);
        data.push(ad_type);
        for uuid in uuids {
            data.extend_from_slice(&uuid.0);
        }
        data
    }

    #[test]
    fn test_find_ad_type() {
        let data = [2, 0x01, 0x06, 4, 0x09, b'a', b'b', b'c'];
        assert_eq!(find_ad_type(&data, 0x09).expect("Name"), b"abc");
        assert_eq!(find_ad_type(&data, 0x01).expect("Flags"), &[0x06]);
        assert_eq!(find_ad_type(&data, 0x07), Err(AdvParseError::NotFound(0x07)));
    }

    #[test]
    fn test_find_ad_type_truncated() {
        let data = [2, 0x01, 0x06, 9, 0x09, b'a'];
        assert_eq!(find_ad_type(&data, 0x09), Err(AdvParseError::Malformed(3)));
    }

    #[test]
    fn test_find_ad_type_stops_at_padding() {
        let data = [2, 0x01, 0x06, 0, 0, 0];
        assert_eq!(find_ad_type(&data, 0x09), Err(AdvParseError::NotFound(0x09)));
    }

    #[test]
    fn test_advertises_service_complete_list() {
        let data = adv_with(BLE_GAP_AD_TYPE_128BIT_SERVICE_UUID_COMPLETE, &[BTC_SERVICE_UUID]);
        assert!(advertises_service(&data, &BTC_SERVICE_UUID));
        assert!(!advertises_service(&data, &BTP_BASE_UUID));
    }

    #[test]
    fn test_more_available_list_takes_precedence() {
        let mut data =
            adv_with(BLE_GAP_AD_TYPE_128BIT_SERVICE_UUID_MORE_AVAILABLE, &[BTP_BASE_UUID]);
        data.push(17);
        data.push(BLE_GAP_AD_TYPE_128BIT_SERVICE_UUID_COMPLETE);
        data.extend_from_slice(&BTC_SERVICE_UUID.0);

        let uuids = advertised_uuid128s(&data).expect("Parse");
        assert_eq!(uuids, vec![BTP_BASE_UUID]);
    }

    #[test]
    fn test_no_uuid_list() {
        let data = [2, 0x01, 0x06];
        assert!(advertised_uuid128s(&data).is_err());
        assert!(!advertises_service(&data, &BTC_SERVICE_UUID));
    }

    #[test]
    fn test_build_adv_data_shortens_name() {
        let data = build_adv_data("a-rather-long-device-label", &[BTP_BASE_UUID])
            .expect("Build");
        assert!(data.len() <= BLE_GAP_ADV_MAX_SIZE);
        assert!(advertises_service(&data, &BTP_BASE_UUID));
        let name = find_ad_type(&data, BLE_GAP_AD_TYPE_SHORT_LOCAL_NAME).expect("Short name");
        assert_eq!(name, b"a-rather");
    }

    #[test]
    fn test_build_adv_data_complete_name() {
        let data = build_adv_data("12345", &[]).expect("Build");
        let name = find_ad_type(&data, BLE_GAP_AD_TYPE_COMPLETE_LOCAL_NAME).expect("Name");
        assert_eq!(name, b"12345");
    }

    #[test]
    fn test_conn_params_defaults() {
        let peripheral = ConnParams::peripheral_default();
        assert_eq!(peripheral.max_conn_interval, 60);
        assert_eq!(peripheral.conn_sup_timeout, 400);
        assert_eq!(peripheral.slave_latency, 3);
        assert!(peripheral.is_valid());

        let central = ConnParams::central_default();
        assert_eq!(central.slave_latency, 0);
        assert!(central.is_valid());
    }
}
