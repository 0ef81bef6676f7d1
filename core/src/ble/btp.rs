//! BTP: the peripheral-role transport service
//!
//! A phone connects to us and talks over two characteristics of one primary
//! service:
//!
//! - **TX** (`0x2002`): the phone writes bytes to us (with or without response)
//! - **RX** (`0x2003`): we notify the phone, once it has enabled the CCCD
//!
//! Each notification carries at most [`BTP_MAX_DATA_LEN`] bytes.

use super::event::BleEvent;
use super::gatt::{
    is_notification_enabled, CharHandles, CharacteristicSpec, HvxType, BLE_CCCD_VALUE_LEN,
    BLE_CONN_HANDLE_INVALID, BTP_MAX_DATA_LEN, BTP_MAX_RX_CHAR_LEN, BTP_MAX_TX_CHAR_LEN,
};
use super::stack::{SoftDevice, StackError};
use super::uuid::{
    BleUuid, UuidType, BLE_UUID_BTP_RX_CHARACTERISTIC, BLE_UUID_BTP_SERVICE,
    BLE_UUID_BTP_TX_CHARACTERISTIC, BTP_BASE_UUID,
};
use std::fmt;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Receives bytes the peer wrote to the TX characteristic
pub type DataHandler = Box<dyn FnMut(&[u8]) + Send>;

/// Errors for BTP operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BtpError {
    #[error("Not connected or notifications not enabled")]
    InvalidState,
    #[error("Payload of {len} bytes exceeds {max}")]
    InvalidParam { len: usize, max: usize },
    #[error("Stack error: {0}")]
    Stack(#[from] StackError),
}

/// State of the BTP service
pub struct BtpService {
    /// UUID type of the registered BTP base
    pub uuid_type: UuidType,
    /// Handle of the primary service
    pub service_handle: u16,
    /// Handles of the TX characteristic (peer writes here)
    pub tx_handles: CharHandles,
    /// Handles of the RX characteristic (we notify here)
    pub rx_handles: CharHandles,
    conn_handle: u16,
    notification_enabled: bool,
    data_handler: Option<DataHandler>,
}

impl BtpService {
    /// Create a service that hands received bytes to `handler`
    pub fn new(handler: DataHandler) -> Self {
        Self {
            data_handler: Some(handler),
            ..Self::default()
        }
    }

    /// Reset state and add the service and its two characteristics to the
    /// attribute table. The first stack failure aborts.
    pub fn init<S: SoftDevice + ?Sized>(&mut self, stack: &mut S) -> Result<(), BtpError> {
        self.conn_handle = BLE_CONN_HANDLE_INVALID;
        self.notification_enabled = false;

        self.uuid_type = stack.uuid_vs_add(&BTP_BASE_UUID).map_err(|e| {
            warn!("BTP base UUID registration failed: {}", e);
            e
        })?;

        self.service_handle = stack
            .gatts_service_add(BleUuid::new(BLE_UUID_BTP_SERVICE, self.uuid_type))
            .map_err(|e| {
                warn!("BTP service add failed: {}", e);
                e
            })?;

        self.rx_handles = stack
            .gatts_characteristic_add(
                self.service_handle,
                &CharacteristicSpec::notify(
                    BleUuid::new(BLE_UUID_BTP_RX_CHARACTERISTIC, self.uuid_type),
                    BTP_MAX_RX_CHAR_LEN,
                ),
            )
            .map_err(|e| {
                warn!("BTP RX characteristic add failed: {}", e);
                e
            })?;

        self.tx_handles = stack
            .gatts_characteristic_add(
                self.service_handle,
                &CharacteristicSpec::writable(
                    BleUuid::new(BLE_UUID_BTP_TX_CHARACTERISTIC, self.uuid_type),
                    BTP_MAX_TX_CHAR_LEN,
                ),
            )
            .map_err(|e| {
                warn!("BTP TX characteristic add failed: {}", e);
                e
            })?;

        debug!(
            "BTP service 0x{:04x}: rx=0x{:04x} cccd=0x{:04x} tx=0x{:04x}",
            self.service_handle,
            self.rx_handles.value_handle,
            self.rx_handles.cccd_handle,
            self.tx_handles.value_handle
        );
        Ok(())
    }

    /// Handle a stack event. Only writes to our attributes matter here.
    pub fn on_ble_event(&mut self, event: &BleEvent) {
        if let BleEvent::GattsWrite { handle, data, .. } = event {
            self.on_write(*handle, data);
        }
    }

    fn on_write(&mut self, handle: u16, data: &[u8]) {
        if handle == self.rx_handles.cccd_handle && data.len() == BLE_CCCD_VALUE_LEN {
            self.notification_enabled = is_notification_enabled(data);
            debug!("BTP notifications enabled: {}", self.notification_enabled);
        } else if handle == self.tx_handles.value_handle {
            trace!("BTP rx {}", hex::encode(data));
            if let Some(handler) = self.data_handler.as_mut() {
                handler(data);
            }
        }
    }

    /// A link is up on `conn_handle`
    pub fn attach(&mut self, conn_handle: u16) {
        self.conn_handle = conn_handle;
    }

    /// The link went away
    pub fn detach(&mut self) {
        self.conn_handle = BLE_CONN_HANDLE_INVALID;
        self.notification_enabled = false;
    }

    pub fn conn_handle(&self) -> u16 {
        self.conn_handle
    }

    pub fn is_notification_enabled(&self) -> bool {
        self.notification_enabled
    }

    /// We are not fully connected until the peer has enabled notifications
    pub fn can_send(&self) -> bool {
        self.conn_handle != BLE_CONN_HANDLE_INVALID && self.notification_enabled
    }

    /// Send one packet to the peer as a notification on the RX characteristic
    pub fn string_send<S: SoftDevice + ?Sized>(
        &self,
        stack: &mut S,
        data: &[u8],
    ) -> Result<(), BtpError> {
        if !self.can_send() {
            return Err(BtpError::InvalidState);
        }
        if data.len() > BTP_MAX_DATA_LEN {
            return Err(BtpError::InvalidParam {
                len: data.len(),
                max: BTP_MAX_DATA_LEN,
            });
        }

        stack
            .gatts_hvx(
                self.conn_handle,
                self.rx_handles.value_handle,
                HvxType::Notification,
                data,
            )
            .map_err(|e| {
                match e {
                    StackError::SysAttrMissing => warn!("GATTS system attributes missing"),
                    StackError::InvalidState => {
                        warn!("Invalid state or MTU exchange not completed")
                    }
                    other => warn!(
                        "gatts_hvx(hdl=0x{:04x}) error 0x{:04x}",
                        self.conn_handle,
                        other.code()
                    ),
                }
                BtpError::Stack(e)
            })
    }
}

impl Default for BtpService {
    fn default() -> Self {
        Self {
            uuid_type: UuidType::Unknown,
            service_handle: 0,
            tx_handles: CharHandles::default(),
            rx_handles: CharHandles::default(),
            conn_handle: BLE_CONN_HANDLE_INVALID,
            notification_enabled: false,
            data_handler: None,
        }
    }
}

impl fmt::Debug for BtpService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BtpService")
            .field("uuid_type", &self.uuid_type)
            .field("service_handle", &self.service_handle)
            .field("tx_handles", &self.tx_handles)
            .field("rx_handles", &self.rx_handles)
            .field("conn_handle", &self.conn_handle)
            .field("notification_enabled", &self.notification_enabled)
            .finish()
    }
}
