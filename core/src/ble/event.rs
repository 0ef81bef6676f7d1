//! Events delivered by the BLE stack

use serde::{Deserialize, Serialize};
use std::fmt;

/// HCI reason: the remote user terminated the connection
pub const BLE_HCI_REMOTE_USER_TERMINATED_CONNECTION: u8 = 0x13;
/// HCI reason: we terminated the connection
pub const BLE_HCI_LOCAL_HOST_TERMINATED_CONNECTION: u8 = 0x16;

/// Role this device plays on a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GapRole {
    /// Not (yet) known for the handle
    Invalid,
    /// We are the peripheral, a phone is connected to us
    Peripheral,
    /// We are the central, connected out to a peripheral
    Central,
}

/// A 48-bit device address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PeerAddr {
    pub addr_type: u8,
    pub addr: [u8; 6],
}

impl PeerAddr {
    pub fn new(addr_type: u8, addr: [u8; 6]) -> Self {
        Self { addr_type, addr }
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let a = &self.addr;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            a[5], a[4], a[3], a[2], a[1], a[0]
        )
    }
}

/// What timed out on a GAP timeout event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeoutSource {
    Advertising,
    Scan,
    Connection,
}

/// Kind of a read/write authorization request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthorizeType {
    Invalid,
    Read,
    Write,
}

/// GATT server write operation carried by a write or authorize event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GattsWriteOp {
    WriteReq,
    WriteCmd,
    SignedWriteCmd,
    PrepWriteReq,
    ExecWriteReqCancel,
    ExecWriteReqNow,
}

impl GattsWriteOp {
    /// Long-write operations we do not support
    pub fn is_long_write(&self) -> bool {
        matches!(
            self,
            GattsWriteOp::PrepWriteReq
                | GattsWriteOp::ExecWriteReqNow
                | GattsWriteOp::ExecWriteReqCancel
        )
    }
}

/// Connection parameters, in stack units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnParams {
    /// Minimum connection interval, 1.25 ms units
    pub min_conn_interval: u16,
    /// Maximum connection interval, 1.25 ms units
    pub max_conn_interval: u16,
    pub slave_latency: u16,
    /// Supervision timeout, 10 ms units
    pub conn_sup_timeout: u16,
}

/// An event from the BLE stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BleEvent {
    /// A link came up
    Connected {
        conn_handle: u16,
        peer_addr: PeerAddr,
        role: GapRole,
    },
    /// A link went down
    Disconnected { conn_handle: u16, reason: u8 },
    /// The peer wants to negotiate security
    SecParamsRequest { conn_handle: u16 },
    /// Something timed out
    Timeout {
        conn_handle: u16,
        source: TimeoutSource,
    },
    /// An advertising packet was received while scanning
    AdvReport { peer_addr: PeerAddr, rssi: i8, data: Vec<u8> },
    /// The peer asks for new connection parameters
    ConnParamUpdateRequest { conn_handle: u16, params: ConnParams },
    /// The peer wrote one of our attributes
    GattsWrite {
        conn_handle: u16,
        handle: u16,
        op: GattsWriteOp,
        data: Vec<u8>,
    },
    /// Persistent system attributes (CCCD state) are unknown for this link
    GattsSysAttrMissing { conn_handle: u16 },
    /// The peer requests authorization for a read or write
    GattsRwAuthorizeRequest {
        conn_handle: u16,
        auth_type: AuthorizeType,
        op: GattsWriteOp,
    },
    /// Peer-initiated MTU exchange
    GattsExchangeMtuRequest { conn_handle: u16, client_rx_mtu: u16 },
    /// GATT server procedure timed out
    GattsTimeout { conn_handle: u16 },
    /// A notification or indication arrived from the peer
    GattcHvx {
        conn_handle: u16,
        handle: u16,
        data: Vec<u8>,
    },
    /// The peer acknowledged one of our writes
    GattcWriteRsp { conn_handle: u16, handle: u16 },
    /// Response to our MTU exchange request
    GattcExchangeMtuRsp { conn_handle: u16, server_rx_mtu: u16 },
    /// GATT client procedure timed out
    GattcTimeout { conn_handle: u16 },
    /// The stack needs memory for a queued write
    UserMemRequest { conn_handle: u16 },
}

impl BleEvent {
    /// Connection the event belongs to, if any
    pub fn conn_handle(&self) -> Option<u16> {
        match self {
            BleEvent::Connected { conn_handle, .. }
            | BleEvent::Disconnected { conn_handle, .. }
            | BleEvent::SecParamsRequest { conn_handle }
            | BleEvent::Timeout { conn_handle, .. }
            | BleEvent::ConnParamUpdateRequest { conn_handle, .. }
            | BleEvent::GattsWrite { conn_handle, .. }
            | BleEvent::GattsSysAttrMissing { conn_handle }
            | BleEvent::GattsRwAuthorizeRequest { conn_handle, .. }
            | BleEvent::GattsExchangeMtuRequest { conn_handle, .. }
            | BleEvent::GattsTimeout { conn_handle }
            | BleEvent::GattcHvx { conn_handle, .. }
            | BleEvent::GattcWriteRsp { conn_handle, .. }
            | BleEvent::GattcExchangeMtuRsp { conn_handle, .. }
            | BleEvent::GattcTimeout { conn_handle }
            | BleEvent::UserMemRequest { conn_handle } => Some(*conn_handle),
            BleEvent::AdvReport { .. } => None,
        }
    }

    /// Stack name of the event, for tracing
    pub fn name(&self) -> &'static str {
        match self {
            BleEvent::Connected { .. } => "BLE_GAP_EVT_CONNECTED",
            BleEvent::Disconnected { .. } => "BLE_GAP_EVT_DISCONNECTED",
            BleEvent::SecParamsRequest { .. } => "BLE_GAP_EVT_SEC_PARAMS_REQUEST",
            BleEvent::Timeout { .. } => "BLE_GAP_EVT_TIMEOUT",
            BleEvent::AdvReport { .. } => "BLE_GAP_EVT_ADV_REPORT",
            BleEvent::ConnParamUpdateRequest { .. } => "BLE_GAP_EVT_CONN_PARAM_UPDATE_REQUEST",
            BleEvent::GattsWrite { .. } => "BLE_GATTS_EVT_WRITE",
            BleEvent::GattsSysAttrMissing { .. } => "BLE_GATTS_EVT_SYS_ATTR_MISSING",
            BleEvent::GattsRwAuthorizeRequest { .. } => "BLE_GATTS_EVT_RW_AUTHORIZE_REQUEST",
            BleEvent::GattsExchangeMtuRequest { .. } => "BLE_GATTS_EVT_EXCHANGE_MTU_REQUEST",
            BleEvent::GattsTimeout { .. } => "BLE_GATTS_EVT_TIMEOUT",
            BleEvent::GattcHvx { .. } => "BLE_GATTC_EVT_HVX",
            BleEvent::GattcWriteRsp { .. } => "BLE_GATTC_EVT_WRITE_RSP",
            BleEvent::GattcExchangeMtuRsp { .. } => "BLE_GATTC_EVT_EXCHANGE_MTU_RSP",
            BleEvent::GattcTimeout { .. } => "BLE_GATTC_EVT_TIMEOUT",
            BleEvent::UserMemRequest { .. } => "BLE_EVT_USER_MEM_REQUEST",
        }
    }
}

impl fmt::Display for BleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.conn_handle() {
            Some(handle) => write!(f, "{} (hdl=0x{:04x})", self.name(), handle),
            None => write!(f, "{}", self.name()),
        }
    }
}
