//! BLE transport of the node
//!
//! - **btp**: peripheral service, a phone exchanges text lines with us
//! - **btc**: central client for a known peripheral that streams readings
//! - **cccd**: queue of GATT client requests enabling the peer's notifications
//! - **link**: coordinator routing stack events to both roles
//! - **outbox**: buffered text for the phone, drained on a timer
//! - **pump**: async task feeding stack events into the coordinator
//!
//! The radio is reached only through the [`SoftDevice`] trait, so all of the
//! logic here runs against [`SimStack`] in tests and in the CLI simulator.

pub mod adv;
pub mod btc;
pub mod btp;
pub mod cccd;
pub mod discovery;
pub mod event;
pub mod gatt;
pub mod link;
pub mod outbox;
pub mod pump;
pub mod sim;
pub mod stack;
pub mod uuid;

// Re-export commonly used types
pub use adv::{AdvMode, AdvParseError, AdvertisingParams, ScanParams};

pub use btc::{BtcClient, BtcError, BtcEvent, BtcEventType, NotificationSink};

pub use btp::{BtpError, BtpService, DataHandler};

pub use cccd::{CccdError, CccdTxQueue, TX_BUFFER_SIZE};

pub use discovery::{DiscoveredCharacteristic, DiscoveredService, DiscoveryEvent};

pub use event::{BleEvent, ConnParams, GapRole, PeerAddr, TimeoutSource};

pub use gatt::{BLE_CONN_HANDLE_INVALID, BTP_MAX_DATA_LEN, NRF_BLE_MAX_MTU_SIZE};

pub use link::{Bluetooth, LinkError};

pub use outbox::{spawn_outbox, Outbox, SharedOutbox, OUTBOX_CAPACITY, OUTBOX_PERIOD};

pub use pump::{event_channel, spawn_event_pump, SharedLink, StackEvent};

pub use sim::{SimOp, SimStack, StackCall};

pub use stack::{SoftDevice, StackError};

pub use uuid::{BleUuid, Uuid128, UuidType, BTC_SERVICE_UUID, BTP_BASE_UUID};
