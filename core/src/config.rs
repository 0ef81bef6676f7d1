//! Bluetooth configuration
//!
//! Defaults mirror what the node ships with: both roles enabled, bonding on,
//! power optimisation off.

use crate::ble::adv::{AdvertisingParams, ScanParams};
use crate::ble::event::ConnParams;
use crate::ble::gatt::{GATT_MTU_SIZE_DEFAULT, NRF_BLE_MAX_MTU_SIZE};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest device name the stack accepts
pub const MAX_DEVICE_NAME_LEN: usize = 31;

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid device name: {0}")]
    InvalidDeviceName(String),
    #[error("Invalid connection parameters: {0}")]
    InvalidConnParams(String),
    #[error("Invalid scan parameters: {0}")]
    InvalidScanParams(String),
    #[error("MTU {0} outside {min}..={max}", min = GATT_MTU_SIZE_DEFAULT, max = NRF_BLE_MAX_MTU_SIZE)]
    InvalidMtu(u16),
}

/// Configuration of the Bluetooth link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Name to advertise; the device address is used when unset
    pub device_label: Option<String>,
    /// Numeric device address
    pub device_address: u32,
    /// Run the BTC central client next to the BTP peripheral
    pub central_enabled: bool,
    /// Secure BTC links once the service is discovered
    pub bonding: bool,
    /// Let advertising and scanning lapse on timeout
    pub optimize_power: bool,
    /// MTU offered and requested on exchange
    pub max_mtu: u16,
    pub advertising: AdvertisingParams,
    pub scan: ScanParams,
    /// Preferred parameters while we are the peripheral
    pub peripheral_conn: ConnParams,
    /// Parameters requested when connecting out
    pub central_conn: ConnParams,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            device_label: None,
            device_address: 0,
            central_enabled: true,
            bonding: true,
            optimize_power: false,
            max_mtu: NRF_BLE_MAX_MTU_SIZE,
            advertising: AdvertisingParams::default(),
            scan: ScanParams::default(),
            peripheral_conn: ConnParams::peripheral_default(),
            central_conn: ConnParams::central_default(),
        }
    }
}

impl BluetoothConfig {
    /// Name handed to GAP: the label, or the device address in decimal
    pub fn device_name(&self) -> String {
        match self.device_label.as_deref() {
            Some(label) if !label.is_empty() => label.to_string(),
            _ => self.device_address.to_string(),
        }
    }

    /// Builder: set the device label
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.device_label = Some(label.into());
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let name = self.device_name();
        if name.len() > MAX_DEVICE_NAME_LEN {
            return Err(ConfigError::InvalidDeviceName(format!(
                "{} bytes, at most {} allowed",
                name.len(),
                MAX_DEVICE_NAME_LEN
            )));
        }

        if !self.peripheral_conn.is_valid() {
            return Err(ConfigError::InvalidConnParams(
                "peripheral parameters out of range".to_string(),
            ));
        }
        if !self.central_conn.is_valid() {
            return Err(ConfigError::InvalidConnParams(
                "central parameters out of range".to_string(),
            ));
        }

        if self.scan.interval == 0 || self.scan.window == 0 {
            return Err(ConfigError::InvalidScanParams(
                "Scan intervals must be > 0".to_string(),
            ));
        }
        if self.scan.window > self.scan.interval {
            return Err(ConfigError::InvalidScanParams(
                "Scan window must be <= scan interval".to_string(),
            ));
        }

        if !(GATT_MTU_SIZE_DEFAULT..=NRF_BLE_MAX_MTU_SIZE).contains(&self.max_mtu) {
            return Err(ConfigError::InvalidMtu(self.max_mtu));
        }

        Ok(())
    }
}
