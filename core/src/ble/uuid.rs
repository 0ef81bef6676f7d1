//! Vendor-specific 128-bit UUIDs and their 16-bit "shortcut" form
//!
//! The BLE stack keeps a small table of 128-bit base UUIDs. A registered base is
//! addressed by its table slot (the UUID *type*) plus a 16-bit value that is
//! overlaid on bytes 12 and 13 of the base. Bytes are stored least-significant
//! first, matching what goes over the air.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Size of a 128-bit UUID in bytes
pub const UUID128_SIZE: usize = 16;

/// First UUID type handed out for vendor-specific bases
pub const BLE_UUID_TYPE_VENDOR_BEGIN: u8 = 2;

/// Vendor slots left in the 8-bit type space
pub const MAX_VS_UUID_COUNT: usize = (u8::MAX - BLE_UUID_TYPE_VENDOR_BEGIN) as usize + 1;

/// Default number of vendor-specific bases the stack can hold
pub const DEFAULT_VS_UUID_COUNT: usize = 10;

/// 16-bit shortcut of the BTP primary service
pub const BLE_UUID_BTP_SERVICE: u16 = 0x2001;
/// 16-bit shortcut of the TX characteristic (peer writes to us)
pub const BLE_UUID_BTP_TX_CHARACTERISTIC: u16 = 0x2002;
/// 16-bit shortcut of the RX characteristic (we notify the peer)
pub const BLE_UUID_BTP_RX_CHARACTERISTIC: u16 = 0x2003;

/// Base UUID of the BTP service. Bytes 12..14 (0xFF 0xFF) are replaced by the
/// shortcuts above. This is also the UUID we advertise as a peripheral.
pub const BTP_BASE_UUID: Uuid128 = Uuid128([
    0x1B, 0xC5, 0xD5, 0xA5, 0x02, 0x00, 0x6D, 0xAC, 0xE5, 0x11, 0x69, 0xFA, 0xFF, 0xFF, 0x55, 0xC8,
]);

/// UUID type the BTP base is expected to land on (first vendor slot)
pub const BTP_SERVICE_UUID_TYPE: UuidType = UuidType::Vendor(BLE_UUID_TYPE_VENDOR_BEGIN);

/// Service advertised by the peripheral we accept as a central
pub const BTC_SERVICE_UUID: Uuid128 = Uuid128([
    0x7F, 0x5D, 0x79, 0xF4, 0xA5, 0x05, 0x3F, 0xBD, 0xFF, 0x41, 0xBE, 0xC3, 0x8C, 0x0D, 0x08, 0xEF,
]);

/// Notifying characteristic of that peripheral
pub const BTC_RX_CHAR_UUID: Uuid128 = Uuid128([
    0x3B, 0x09, 0xB0, 0xE0, 0xDF, 0x69, 0xC6, 0x87, 0x4C, 0x4E, 0x6B, 0x69, 0xB1, 0xF5, 0xE8, 0xA1,
]);

/// Errors for UUID handling
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UuidError {
    #[error("Vendor UUID table full ({0} entries)")]
    TableFull(usize),
    #[error("Invalid UUID length: {0}")]
    InvalidLength(usize),
}

/// A 128-bit UUID, least-significant byte first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Uuid128(pub [u8; UUID128_SIZE]);

impl Uuid128 {
    /// Build from a little-endian byte slice
    pub fn from_slice(bytes: &[u8]) -> Result<Self, UuidError> {
        let array: [u8; UUID128_SIZE] = bytes
            .try_into()
            .map_err(|_| UuidError::InvalidLength(bytes.len()))?;
        Ok(Self(array))
    }

    /// The 16-bit value sitting in bytes 12 and 13
    pub fn shortcut(&self) -> u16 {
        u16::from(self.0[12]) | (u16::from(self.0[13]) << 8)
    }

    /// Copy of this UUID with a different 16-bit shortcut overlaid
    pub fn with_shortcut(&self, shortcut: u16) -> Self {
        let mut bytes = self.0;
        bytes[12..14].copy_from_slice(&shortcut.to_le_bytes());
        Self(bytes)
    }

    /// Base with the shortcut bytes zeroed; two UUIDs share a table slot when
    /// their bases are equal.
    pub fn base(&self) -> Self {
        self.with_shortcut(0)
    }

    /// Canonical (big-endian) form for display and interop
    pub fn to_uuid(&self) -> uuid::Uuid {
        let mut be = self.0;
        be.reverse();
        uuid::Uuid::from_bytes(be)
    }

    /// Build from a canonical (big-endian) UUID
    pub fn from_uuid(value: uuid::Uuid) -> Self {
        let mut le = *value.as_bytes();
        le.reverse();
        Self(le)
    }
}

impl fmt::Display for Uuid128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_uuid())
    }
}

/// Which table a 16-bit UUID value is interpreted against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UuidType {
    /// Not yet registered
    Unknown,
    /// Bluetooth SIG base UUID
    Ble,
    /// Vendor-specific base at the given table slot
    Vendor(u8),
}

impl UuidType {
    /// Raw value used by the stack
    pub fn value(&self) -> u8 {
        match self {
            UuidType::Unknown => 0,
            UuidType::Ble => 1,
            UuidType::Vendor(slot) => *slot,
        }
    }
}

/// A 16-bit UUID bound to its base
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BleUuid {
    pub uuid: u16,
    pub uuid_type: UuidType,
}

impl BleUuid {
    pub fn new(uuid: u16, uuid_type: UuidType) -> Self {
        Self { uuid, uuid_type }
    }

    /// Placeholder before registration
    pub fn unknown() -> Self {
        Self::new(0, UuidType::Unknown)
    }
}

/// Table of registered vendor bases, as kept by the stack
#[derive(Debug, Clone)]
pub struct VendorUuidTable {
    bases: Vec<Uuid128>,
    capacity: usize,
}

impl VendorUuidTable {
    /// Capacity is clamped to the vendor type range of the stack
    pub fn new(capacity: usize) -> Self {
        Self {
            bases: Vec::new(),
            capacity: capacity.min(MAX_VS_UUID_COUNT),
        }
    }

    /// Register a base and return its type. Registering the same base twice
    /// (shortcut bytes ignored) returns the slot it already holds.
    pub fn add(&mut self, uuid: &Uuid128) -> Result<UuidType, UuidError> {
        let base = uuid.base();
        if let Some(index) = self.bases.iter().position(|b| *b == base) {
            return self.slot(index);
        }
        if self.bases.len() >= self.capacity {
            return Err(UuidError::TableFull(self.capacity));
        }
        let uuid_type = self.slot(self.bases.len())?;
        self.bases.push(base);
        Ok(uuid_type)
    }

    /// Expand a 16-bit UUID back to 128 bits
    pub fn expand(&self, uuid: &BleUuid) -> Option<Uuid128> {
        match uuid.uuid_type {
            UuidType::Vendor(slot) if slot >= BLE_UUID_TYPE_VENDOR_BEGIN => self
                .bases
                .get(usize::from(slot - BLE_UUID_TYPE_VENDOR_BEGIN))
                .map(|base| base.with_shortcut(uuid.uuid)),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.bases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bases.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn slot(&self, index: usize) -> Result<UuidType, UuidError> {
        u8::try_from(index)
            .ok()
            .and_then(|i| BLE_UUID_TYPE_VENDOR_BEGIN.checked_add(i))
            .map(UuidType::Vendor)
            .ok_or(UuidError::TableFull(self.capacity))
    }
}

impl Default for VendorUuidTable {
    fn default() -> Self {
        Self::new(DEFAULT_VS_UUID_COUNT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_btc_shortcuts() {
        assert_eq!(BTC_SERVICE_UUID.shortcut(), 0x0D8C);
        assert_eq!(BTC_RX_CHAR_UUID.shortcut(), 0xF5B1);
        assert_eq!(BTP_BASE_UUID.shortcut(), 0xFFFF);
    }

    #[test]
    fn test_with_shortcut_overlays_bytes_12_13() {
        let service = BTP_BASE_UUID.with_shortcut(BLE_UUID_BTP_SERVICE);
        assert_eq!(service.0[12], 0x01);
        assert_eq!(service.0[13], 0x20);
        assert_eq!(service.0[..12], BTP_BASE_UUID.0[..12]);
        assert_eq!(service.0[14..], BTP_BASE_UUID.0[14..]);
    }

    #[test]
    fn test_canonical_display_is_big_endian() {
        let text = BTP_BASE_UUID.to_string();
        assert_eq!(text, "c855ffff-fa69-11e5-ac6d-0002a5d5c51b");

        let parsed = uuid::Uuid::parse_str(&text).expect("Valid UUID");
        assert_eq!(Uuid128::from_uuid(parsed), BTP_BASE_UUID);
    }

    #[test]
    fn test_from_slice_rejects_wrong_length() {
        assert_eq!(
            Uuid128::from_slice(&[0u8; 15]),
            Err(UuidError::InvalidLength(15))
        );
        assert!(Uuid128::from_slice(&[0u8; 16]).is_ok());
    }

    #[test]
    fn test_vendor_table_dedups_by_base() {
        let mut table = VendorUuidTable::default();

        let first = table.add(&BTP_BASE_UUID).expect("Add base");
        assert_eq!(first, BTP_SERVICE_UUID_TYPE);

        let again = table
            .add(&BTP_BASE_UUID.with_shortcut(0x1234))
            .expect("Add same base");
        assert_eq!(again, first);

        let other = table.add(&BTC_SERVICE_UUID).expect("Add second base");
        assert_eq!(other, UuidType::Vendor(3));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_vendor_table_full() {
        let mut table = VendorUuidTable::new(1);
        table.add(&BTP_BASE_UUID).expect("First add");
        assert_eq!(table.add(&BTC_SERVICE_UUID), Err(UuidError::TableFull(1)));
    }

    #[test]
    fn test_vendor_table_clamps_to_type_range() {
        let mut table = VendorUuidTable::new(300);
        assert_eq!(table.capacity(), MAX_VS_UUID_COUNT);

        let mut last = None;
        for n in 0..MAX_VS_UUID_COUNT {
            let mut bytes = [0u8; 16];
            bytes[0] = n as u8;
            bytes[1] = (n >> 8) as u8;
            last = Some(table.add(&Uuid128(bytes)).expect("Slot available"));
        }
        assert_eq!(last, Some(UuidType::Vendor(u8::MAX)));

        let overflow = Uuid128([0xEE; 16]);
        assert_eq!(
            table.add(&overflow),
            Err(UuidError::TableFull(MAX_VS_UUID_COUNT))
        );
        assert_eq!(table.len(), MAX_VS_UUID_COUNT);
    }

    #[test]
    fn test_vendor_table_expand() {
        let mut table = VendorUuidTable::default();
        let uuid_type = table.add(&BTP_BASE_UUID).expect("Add base");

        let rx = BleUuid::new(BLE_UUID_BTP_RX_CHARACTERISTIC, uuid_type);
        let expanded = table.expand(&rx).expect("Expand");
        assert_eq!(expanded.shortcut(), BLE_UUID_BTP_RX_CHARACTERISTIC);

        assert!(table.expand(&BleUuid::new(0x2A37, UuidType::Ble)).is_none());
        assert!(table.expand(&BleUuid::new(1, UuidType::Vendor(9))).is_none());
    }
}
