//! GATT definitions shared by the peripheral service and the central client
//!
//! Characteristic descriptions, attribute handles and the CCCD encoding.

use super::uuid::BleUuid;
use serde::{Deserialize, Serialize};

/// Default ATT MTU before any exchange
pub const GATT_MTU_SIZE_DEFAULT: u16 = 23;

/// MTU we offer and accept on an MTU exchange. Larger than the default so
/// that peers which insist on an exchange before notifying still work.
pub const NRF_BLE_MAX_MTU_SIZE: u16 = 158;

/// Largest payload of a single notification at the default MTU (23 - 3)
pub const BTP_MAX_DATA_LEN: usize = (GATT_MTU_SIZE_DEFAULT - 3) as usize;

/// Maximum length of the TX characteristic value
pub const BTP_MAX_TX_CHAR_LEN: u16 = BTP_MAX_DATA_LEN as u16;
/// Maximum length of the RX characteristic value
pub const BTP_MAX_RX_CHAR_LEN: u16 = BTP_MAX_DATA_LEN as u16;

/// Connection handle meaning "no connection"
pub const BLE_CONN_HANDLE_INVALID: u16 = 0xFFFF;

/// Attribute handle meaning "not discovered"
pub const BLE_GATT_HANDLE_INVALID: u16 = 0x0000;

/// Length of a CCCD value
pub const BLE_CCCD_VALUE_LEN: usize = 2;

/// CCCD bit enabling notifications
pub const BLE_GATT_HVX_NOTIFICATION: u16 = 0x0001;
/// CCCD bit enabling indications
pub const BLE_GATT_HVX_INDICATION: u16 = 0x0002;

/// First application-defined ATT error code
pub const BLE_GATT_STATUS_ATTERR_APP_BEGIN: u16 = 0x0180;

/// Handles assigned to a characteristic when it is added to the table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CharHandles {
    pub value_handle: u16,
    pub user_desc_handle: u16,
    pub cccd_handle: u16,
    pub sccd_handle: u16,
}

/// Characteristic properties we make use of
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CharProperties {
    pub read: bool,
    pub write: bool,
    pub write_wo_resp: bool,
    pub notify: bool,
    pub indicate: bool,
}

/// Description of a characteristic to add to a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacteristicSpec {
    pub uuid: BleUuid,
    pub props: CharProperties,
    /// Add a CCCD so the peer can subscribe
    pub has_cccd: bool,
    /// Value length may vary up to `max_len`
    pub variable_length: bool,
    pub init_len: u16,
    pub max_len: u16,
}

impl CharacteristicSpec {
    /// Notifying characteristic with an open CCCD
    pub fn notify(uuid: BleUuid, max_len: u16) -> Self {
        Self {
            uuid,
            props: CharProperties {
                notify: true,
                ..Default::default()
            },
            has_cccd: true,
            variable_length: true,
            init_len: 1,
            max_len,
        }
    }

    /// Writable characteristic, with and without response
    pub fn writable(uuid: BleUuid, max_len: u16) -> Self {
        Self {
            uuid,
            props: CharProperties {
                write: true,
                write_wo_resp: true,
                ..Default::default()
            },
            has_cccd: false,
            variable_length: true,
            init_len: 1,
            max_len,
        }
    }
}

/// Kind of handle value transmission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HvxType {
    Notification,
    Indication,
}

/// GATT client write operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteOp {
    /// Write request, acknowledged by a write response
    WriteReq,
    /// Write command, no response
    WriteCmd,
}

/// Parameters of a GATT client write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GattcWriteParams {
    pub handle: u16,
    pub offset: u16,
    pub write_op: WriteOp,
    pub value: Vec<u8>,
}

/// Encode a CCCD value
pub fn cccd_value(enable_notification: bool) -> [u8; BLE_CCCD_VALUE_LEN] {
    let value = if enable_notification {
        BLE_GATT_HVX_NOTIFICATION
    } else {
        0
    };
    value.to_le_bytes()
}

/// Whether a CCCD value written by the peer enables notifications
pub fn is_notification_enabled(data: &[u8]) -> bool {
    match data {
        [lo, hi, ..] => u16::from_le_bytes([*lo, *hi]) & BLE_GATT_HVX_NOTIFICATION != 0,
        _ => false,
    }
}
