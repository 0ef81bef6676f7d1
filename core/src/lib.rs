// ttble core
//
// Bluetooth transport of a sensor node: the BTP peripheral service a phone
// talks to, the BTC central client for a paired peripheral, and the reader
// for the navigation index of their documentation.

pub mod ble;
pub mod config;
pub mod docindex;

pub use ble::{
    Bluetooth, BleEvent, BtcClient, BtcEvent, BtcEventType, BtpService, DiscoveryEvent,
    LinkError, NotificationSink, Outbox, SimStack, SoftDevice, StackError, StackEvent,
};
pub use config::{BluetoothConfig, ConfigError};
pub use docindex::{IndexError, NavChildren, NavEntry, NavIndex, Violation, ViolationKind};
