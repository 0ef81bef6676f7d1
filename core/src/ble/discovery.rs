//! Results of GATT database discovery on a peer
//!
//! The stack walks the peer's attribute table for a registered service UUID
//! and reports what it found; the central client picks its handles from here.

use super::uuid::BleUuid;
use serde::{Deserialize, Serialize};

/// A characteristic found on the peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredCharacteristic {
    pub uuid: BleUuid,
    pub handle_decl: u16,
    pub handle_value: u16,
    /// 0 when the characteristic has no CCCD
    pub cccd_handle: u16,
}

/// A service found on the peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredService {
    pub srv_uuid: BleUuid,
    pub characteristics: Vec<DiscoveredCharacteristic>,
}

impl DiscoveredService {
    /// First characteristic whose 16-bit UUID matches
    pub fn find_characteristic(&self, uuid: u16) -> Option<&DiscoveredCharacteristic> {
        self.characteristics.iter().find(|c| c.uuid.uuid == uuid)
    }
}

/// Outcome of a discovery run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscoveryEvent {
    /// The registered service was found
    Complete {
        conn_handle: u16,
        service: DiscoveredService,
    },
    /// The peer does not have the service
    ServiceNotFound { conn_handle: u16 },
    /// Discovery failed with a stack status
    Error { conn_handle: u16, code: u32 },
}

impl DiscoveryEvent {
    pub fn conn_handle(&self) -> u16 {
        match self {
            DiscoveryEvent::Complete { conn_handle, .. }
            | DiscoveryEvent::ServiceNotFound { conn_handle }
            | DiscoveryEvent::Error { conn_handle, .. } => *conn_handle,
        }
    }
}
