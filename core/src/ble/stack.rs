//! Seam to the BLE stack
//!
//! Everything that touches the radio goes through [`SoftDevice`]. The firmware
//! binds it to the vendor stack; tests and the CLI simulator bind it to
//! [`SimStack`](super::sim::SimStack).

use super::adv::{AdvMode, AdvertisingParams, ScanParams};
use super::event::{AuthorizeType, ConnParams, PeerAddr};
use super::gatt::{CharHandles, CharacteristicSpec, GattcWriteParams, HvxType};
use super::uuid::{BleUuid, Uuid128, UuidType};
use thiserror::Error;

/// Security status: pairing not supported
pub const BLE_GAP_SEC_STATUS_PAIRING_NOT_SUPP: u8 = 0x85;

const NRF_ERROR_NO_MEM: u32 = 0x0004;
const NRF_ERROR_NOT_FOUND: u32 = 0x0005;
const NRF_ERROR_INVALID_PARAM: u32 = 0x0007;
const NRF_ERROR_INVALID_STATE: u32 = 0x0008;
const NRF_ERROR_INVALID_LENGTH: u32 = 0x0009;
const NRF_ERROR_BUSY: u32 = 0x0011;
const BLE_ERROR_INVALID_CONN_HANDLE: u32 = 0x3002;
const BLE_ERROR_GATTS_SYS_ATTR_MISSING: u32 = 0x3401;

/// Status returned by the stack
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackError {
    #[error("No memory for operation")]
    NoMem,
    #[error("Not found")]
    NotFound,
    #[error("Invalid parameter")]
    InvalidParam,
    #[error("Invalid state")]
    InvalidState,
    #[error("Invalid length")]
    InvalidLength,
    #[error("Busy")]
    Busy,
    #[error("Invalid connection handle")]
    InvalidConnHandle,
    #[error("GATTS system attributes missing")]
    SysAttrMissing,
    #[error("Stack error 0x{0:04x}")]
    Other(u32),
}

impl StackError {
    /// Numeric status code
    pub fn code(&self) -> u32 {
        match self {
            StackError::NoMem => NRF_ERROR_NO_MEM,
            StackError::NotFound => NRF_ERROR_NOT_FOUND,
            StackError::InvalidParam => NRF_ERROR_INVALID_PARAM,
            StackError::InvalidState => NRF_ERROR_INVALID_STATE,
            StackError::InvalidLength => NRF_ERROR_INVALID_LENGTH,
            StackError::Busy => NRF_ERROR_BUSY,
            StackError::InvalidConnHandle => BLE_ERROR_INVALID_CONN_HANDLE,
            StackError::SysAttrMissing => BLE_ERROR_GATTS_SYS_ATTR_MISSING,
            StackError::Other(code) => *code,
        }
    }

    /// Map a status code; `None` for success (0)
    pub fn from_code(code: u32) -> Option<Self> {
        let error = match code {
            0 => return None,
            NRF_ERROR_NO_MEM => StackError::NoMem,
            NRF_ERROR_NOT_FOUND => StackError::NotFound,
            NRF_ERROR_INVALID_PARAM => StackError::InvalidParam,
            NRF_ERROR_INVALID_STATE => StackError::InvalidState,
            NRF_ERROR_INVALID_LENGTH => StackError::InvalidLength,
            NRF_ERROR_BUSY => StackError::Busy,
            BLE_ERROR_INVALID_CONN_HANDLE => StackError::InvalidConnHandle,
            BLE_ERROR_GATTS_SYS_ATTR_MISSING => StackError::SysAttrMissing,
            other => StackError::Other(other),
        };
        Some(error)
    }
}

/// Calls into the BLE stack
pub trait SoftDevice: Send {
    /// Register a vendor-specific base UUID
    fn uuid_vs_add(&mut self, uuid: &Uuid128) -> Result<UuidType, StackError>;

    /// Add a primary service, returning its handle
    fn gatts_service_add(&mut self, uuid: BleUuid) -> Result<u16, StackError>;

    /// Add a characteristic to a service
    fn gatts_characteristic_add(
        &mut self,
        service_handle: u16,
        spec: &CharacteristicSpec,
    ) -> Result<CharHandles, StackError>;

    /// Send a notification or indication
    fn gatts_hvx(
        &mut self,
        conn_handle: u16,
        handle: u16,
        hvx_type: HvxType,
        data: &[u8],
    ) -> Result<(), StackError>;

    /// Set (empty) persistent system attributes for a link
    fn gatts_sys_attr_set(&mut self, conn_handle: u16) -> Result<(), StackError>;

    /// Reply to a peer MTU exchange
    fn gatts_exchange_mtu_reply(&mut self, conn_handle: u16, mtu: u16) -> Result<(), StackError>;

    /// Reply to a read/write authorization request
    fn gatts_rw_authorize_reply(
        &mut self,
        conn_handle: u16,
        auth_type: AuthorizeType,
        gatt_status: u16,
    ) -> Result<(), StackError>;

    /// Start an MTU exchange
    fn gattc_exchange_mtu_request(&mut self, conn_handle: u16, mtu: u16)
        -> Result<(), StackError>;

    /// Read a peer attribute
    fn gattc_read(&mut self, conn_handle: u16, handle: u16, offset: u16)
        -> Result<(), StackError>;

    /// Write a peer attribute
    fn gattc_write(
        &mut self,
        conn_handle: u16,
        params: &GattcWriteParams,
    ) -> Result<(), StackError>;

    /// Connect to an advertising peer
    fn gap_connect(
        &mut self,
        peer_addr: &PeerAddr,
        scan_params: &ScanParams,
        conn_params: &ConnParams,
    ) -> Result<(), StackError>;

    /// Tear a link down
    fn gap_disconnect(&mut self, conn_handle: u16, reason: u8) -> Result<(), StackError>;

    /// Reply to a security parameters request
    fn gap_sec_params_reply(&mut self, conn_handle: u16, status: u8) -> Result<(), StackError>;

    /// Accept or propose connection parameters
    fn gap_conn_param_update(
        &mut self,
        conn_handle: u16,
        params: &ConnParams,
    ) -> Result<(), StackError>;

    /// Set the advertised device name
    fn gap_device_name_set(&mut self, name: &str) -> Result<(), StackError>;

    /// Set the preferred peripheral connection parameters
    fn gap_ppcp_set(&mut self, params: &ConnParams) -> Result<(), StackError>;

    fn gap_scan_start(&mut self, params: &ScanParams) -> Result<(), StackError>;

    fn gap_scan_stop(&mut self) -> Result<(), StackError>;

    /// Configure advertising payload and timing
    fn advertising_init(
        &mut self,
        data: &[u8],
        params: &AdvertisingParams,
    ) -> Result<(), StackError>;

    fn advertising_start(&mut self, mode: AdvMode) -> Result<(), StackError>;

    fn advertising_stop(&mut self) -> Result<(), StackError>;

    /// Reply to a user memory request (we never provide any)
    fn user_mem_reply(&mut self, conn_handle: u16) -> Result<(), StackError>;

    /// Ask the peer manager to secure (bond) a link
    fn conn_secure(&mut self, conn_handle: u16) -> Result<(), StackError>;

    /// Register a service UUID for database discovery
    fn db_discovery_register(&mut self, uuid: BleUuid) -> Result<(), StackError>;

    /// Start database discovery on a link
    fn db_discovery_start(&mut self, conn_handle: u16) -> Result<(), StackError>;

    /// Enable or disable delivery of stack events to the application
    fn set_event_delivery(&mut self, enabled: bool);
}
