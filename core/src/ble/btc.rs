//! BTC: the central-role client
//!
//! We connect out to a known peripheral advertising [`BTC_SERVICE_UUID`],
//! discover its notifying characteristic, enable the CCCD and then forward
//! whatever it notifies to a [`NotificationSink`].

use super::cccd::{CccdError, CccdTxQueue};
use super::discovery::DiscoveryEvent;
use super::event::BleEvent;
use super::gatt::{BLE_CONN_HANDLE_INVALID, BLE_GATT_HANDLE_INVALID};
use super::stack::{SoftDevice, StackError};
use super::uuid::{BleUuid, BTC_RX_CHAR_UUID, BTC_SERVICE_UUID};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Client event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum BtcEventType {
    /// The service has been discovered at the peer
    DiscoveryComplete = 1,
    /// A notification of the characteristic has been received from the peer
    Notification = 2,
}

/// An event raised by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BtcEvent {
    pub evt_type: BtcEventType,
    pub conn_handle: u16,
}

/// Errors for BTC operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BtcError {
    #[error("Stack error: {0}")]
    Stack(#[from] StackError),
    #[error("CCCD error: {0}")]
    Cccd(#[from] CccdError),
}

/// Destination of data notified by the peripheral
pub trait NotificationSink: Send {
    /// Whether data may be forwarded right now; dropped otherwise
    fn accepting(&self) -> bool {
        true
    }

    fn on_data(&mut self, data: &[u8]);
}

impl<F> NotificationSink for F
where
    F: FnMut(&[u8]) + Send,
{
    fn on_data(&mut self, data: &[u8]) {
        self(data)
    }
}

/// State of the BTC client
pub struct BtcClient {
    /// Service UUID, as a 16-bit shortcut on its registered base
    pub service_uuid: BleUuid,
    /// Notifying characteristic UUID
    pub rx_uuid: BleUuid,
    conn_handle: u16,
    cccd_handle: u16,
    rx_handle: u16,
    bonding: bool,
    data_seen: bool,
    cccd: CccdTxQueue,
    sink: Option<Box<dyn NotificationSink>>,
}

impl BtcClient {
    pub fn new(sink: Box<dyn NotificationSink>) -> Self {
        Self {
            sink: Some(sink),
            ..Self::default()
        }
    }

    /// Request link security before enabling notifications
    pub fn with_bonding(mut self, bonding: bool) -> Self {
        self.bonding = bonding;
        self
    }

    /// Register our UUIDs with the stack and ask for discovery of the service.
    ///
    /// The stack addresses vendor UUIDs by the 16-bit value in bytes 12/13 of
    /// the full UUID; this only breaks if two of our UUIDs ever share a base
    /// and those bytes.
    pub fn init<S: SoftDevice + ?Sized>(&mut self, stack: &mut S) -> Result<(), BtcError> {
        self.service_uuid = BleUuid::new(
            BTC_SERVICE_UUID.shortcut(),
            stack.uuid_vs_add(&BTC_SERVICE_UUID)?,
        );
        self.rx_uuid = BleUuid::new(
            BTC_RX_CHAR_UUID.shortcut(),
            stack.uuid_vs_add(&BTC_RX_CHAR_UUID)?,
        );

        self.conn_handle = BLE_CONN_HANDLE_INVALID;
        self.cccd_handle = BLE_GATT_HANDLE_INVALID;
        self.rx_handle = BLE_GATT_HANDLE_INVALID;

        stack.db_discovery_register(self.service_uuid)?;
        Ok(())
    }

    /// Handle a stack event for our link
    pub fn on_ble_event<S: SoftDevice + ?Sized>(
        &mut self,
        stack: &mut S,
        event: &BleEvent,
    ) -> Option<BtcEvent> {
        match event {
            BleEvent::Connected { conn_handle, .. } => {
                self.conn_handle = *conn_handle;
                None
            }
            BleEvent::Disconnected { conn_handle, .. } if *conn_handle == self.conn_handle => {
                self.cccd.purge(*conn_handle);
                self.conn_handle = BLE_CONN_HANDLE_INVALID;
                None
            }
            BleEvent::GattcHvx {
                conn_handle,
                handle,
                data,
            } if *handle == self.rx_handle && self.rx_handle != BLE_GATT_HANDLE_INVALID => {
                Some(self.on_hvx(stack, *conn_handle, data))
            }
            BleEvent::GattcWriteRsp { .. } => {
                // the peer answered; send whatever is waiting
                self.cccd.process(stack);
                None
            }
            _ => None,
        }
    }

    fn on_hvx<S: SoftDevice + ?Sized>(
        &mut self,
        stack: &mut S,
        conn_handle: u16,
        data: &[u8],
    ) -> BtcEvent {
        // Once data has flowed, keep listening even if this link drops
        self.data_seen = true;
        trace!("BTC notification {}", hex::encode(data));

        if let Some(sink) = self.sink.as_mut() {
            if sink.accepting() {
                sink.on_data(data);
            }
        }

        let event = BtcEvent {
            evt_type: BtcEventType::Notification,
            conn_handle,
        };
        if let Err(e) = self.handle_event(stack, &event) {
            warn!("BTC notification handling failed: {}", e);
        }
        event
    }

    /// Handle the result of database discovery
    pub fn on_discovery<S: SoftDevice + ?Sized>(
        &mut self,
        stack: &mut S,
        event: &DiscoveryEvent,
    ) -> Result<Option<BtcEvent>, BtcError> {
        let DiscoveryEvent::Complete {
            conn_handle,
            service,
        } = event
        else {
            debug!("BTC discovery without result on 0x{:04x}", event.conn_handle());
            return Ok(None);
        };

        if service.srv_uuid != self.service_uuid {
            return Ok(None);
        }

        self.conn_handle = *conn_handle;

        let Some(rx) = service.find_characteristic(self.rx_uuid.uuid) else {
            warn!("BTC service found without RX characteristic");
            return Ok(None);
        };

        debug!("Found RX characteristic");
        self.cccd_handle = rx.cccd_handle;
        self.rx_handle = rx.handle_value;

        let event = BtcEvent {
            evt_type: BtcEventType::DiscoveryComplete,
            conn_handle: *conn_handle,
        };
        self.handle_event(stack, &event)?;
        Ok(Some(event))
    }

    /// Built-in event handler
    pub fn handle_event<S: SoftDevice + ?Sized>(
        &mut self,
        stack: &mut S,
        event: &BtcEvent,
    ) -> Result<(), BtcError> {
        match event.evt_type {
            BtcEventType::DiscoveryComplete => {
                info!("BTC service discovered");

                if self.bonding {
                    match stack.conn_secure(self.conn_handle) {
                        Ok(()) | Err(StackError::InvalidState) => {}
                        Err(e) => warn!("BTC link security request failed: {}", e),
                    }
                }

                self.cccd
                    .configure(stack, self.conn_handle, self.cccd_handle, true)?;
            }
            BtcEventType::Notification => {}
        }
        Ok(())
    }

    pub fn conn_handle(&self) -> u16 {
        self.conn_handle
    }

    pub fn cccd_handle(&self) -> u16 {
        self.cccd_handle
    }

    pub fn rx_handle(&self) -> u16 {
        self.rx_handle
    }

    /// Whether the peripheral has ever sent us data
    pub fn data_seen(&self) -> bool {
        self.data_seen
    }

    /// Requests still waiting for the stack
    pub fn pending_requests(&self) -> usize {
        self.cccd.len()
    }

    /// Forget the link without telling the stack
    pub fn reset_connection(&mut self) {
        self.cccd.purge(self.conn_handle);
        self.conn_handle = BLE_CONN_HANDLE_INVALID;
    }
}

impl Default for BtcClient {
    fn default() -> Self {
        Self {
            service_uuid: BleUuid::unknown(),
            rx_uuid: BleUuid::unknown(),
            conn_handle: BLE_CONN_HANDLE_INVALID,
            cccd_handle: BLE_GATT_HANDLE_INVALID,
            rx_handle: BLE_GATT_HANDLE_INVALID,
            bonding: false,
            data_seen: false,
            cccd: CccdTxQueue::default(),
            sink: None,
        }
    }
}

impl fmt::Debug for BtcClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BtcClient")
            .field("service_uuid", &self.service_uuid)
            .field("rx_uuid", &self.rx_uuid)
            .field("conn_handle", &self.conn_handle)
            .field("cccd_handle", &self.cccd_handle)
            .field("rx_handle", &self.rx_handle)
            .field("bonding", &self.bonding)
            .field("data_seen", &self.data_seen)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::discovery::{DiscoveredCharacteristic, DiscoveredService};
    use crate::ble::sim::{SimOp, SimStack, StackCall};
    use crate::ble::uuid::UuidType;
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct GatedSink {
        open: bool,
        received: Arc<Mutex<Vec<u8>>>,
    }

    impl NotificationSink for GatedSink {
        fn accepting(&self) -> bool {
            self.open
        }

        fn on_data(&mut self, data: &[u8]) {
            self.received.lock().extend_from_slice(data);
        }
    }

    fn client(open: bool) -> (BtcClient, Arc<Mutex<Vec<u8>>>) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = GatedSink {
            open,
            received: received.clone(),
        };
        (BtcClient::new(Box::new(sink)), received)
    }

    fn discovered(client: &BtcClient) -> DiscoveryEvent {
        DiscoveryEvent::Complete {
            conn_handle: 1,
            service: DiscoveredService {
                srv_uuid: client.service_uuid,
                characteristics: vec![
                    DiscoveredCharacteristic {
                        uuid: BleUuid::new(0x1234, client.rx_uuid.uuid_type),
                        handle_decl: 0x20,
                        handle_value: 0x21,
                        cccd_handle: 0,
                    },
                    DiscoveredCharacteristic {
                        uuid: client.rx_uuid,
                        handle_decl: 0x23,
                        handle_value: 0x24,
                        cccd_handle: 0x25,
                    },
                ],
            },
        }
    }

    #[test]
    fn test_init_registers_shortcuts() {
        let mut stack = SimStack::new();
        let (mut client, _) = client(true);
        client.init(&mut stack).expect("Init");

        assert_eq!(client.service_uuid.uuid, 0x0D8C);
        assert_eq!(client.rx_uuid.uuid, 0xF5B1);
        assert!(matches!(client.service_uuid.uuid_type, UuidType::Vendor(_)));
        assert_ne!(client.service_uuid.uuid_type, client.rx_uuid.uuid_type);
        assert_eq!(client.conn_handle(), BLE_CONN_HANDLE_INVALID);
        assert!(stack
            .calls()
            .contains(&StackCall::DiscoveryRegister(client.service_uuid)));
    }

    #[test]
    fn test_discovery_enables_notifications() {
        let mut stack = SimStack::new();
        let (mut client, _) = client(true);
        client.init(&mut stack).expect("Init");

        let event = client
            .on_discovery(&mut stack, &discovered(&client))
            .expect("Discovery")
            .expect("Event");
        assert_eq!(event.evt_type, BtcEventType::DiscoveryComplete);
        assert_eq!(client.conn_handle(), 1);
        assert_eq!(client.rx_handle(), 0x24);
        assert_eq!(client.cccd_handle(), 0x25);

        let writes = stack.gattc_writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].0, 1);
        assert_eq!(writes[0].1.handle, 0x25);
        assert_eq!(writes[0].1.value, vec![0x01, 0x00]);
    }

    #[test]
    fn test_discovery_of_other_service_ignored() {
        let mut stack = SimStack::new();
        let (mut client, _) = client(true);
        client.init(&mut stack).expect("Init");

        let event = DiscoveryEvent::Complete {
            conn_handle: 1,
            service: DiscoveredService {
                srv_uuid: BleUuid::new(0x180D, UuidType::Ble),
                characteristics: vec![],
            },
        };
        assert_eq!(client.on_discovery(&mut stack, &event), Ok(None));
        assert_eq!(client.conn_handle(), BLE_CONN_HANDLE_INVALID);
        assert!(stack.gattc_writes().is_empty());
    }

    #[test]
    fn test_bonding_tolerates_invalid_state() {
        let mut stack = SimStack::new();
        let (client, _) = client(true);
        let mut client = client.with_bonding(true);
        client.init(&mut stack).expect("Init");
        stack.fail_next(SimOp::ConnSecure, StackError::InvalidState);

        client
            .on_discovery(&mut stack, &discovered(&client))
            .expect("Discovery");
        assert!(stack.calls().contains(&StackCall::ConnSecure(1)));
        assert_eq!(stack.gattc_writes().len(), 1);
    }

    #[test]
    fn test_write_response_pumps_queue() {
        let mut stack = SimStack::new();
        let (mut client, _) = client(true);
        client.init(&mut stack).expect("Init");
        stack.fail_next(SimOp::GattcWrite, StackError::Busy);

        client
            .on_discovery(&mut stack, &discovered(&client))
            .expect("Discovery");
        assert_eq!(client.pending_requests(), 1);

        client.on_ble_event(
            &mut stack,
            &BleEvent::GattcWriteRsp {
                conn_handle: 1,
                handle: 0x25,
            },
        );
        assert_eq!(client.pending_requests(), 0);
    }

    #[test]
    fn test_hvx_forwarded_only_for_rx_handle() {
        let mut stack = SimStack::new();
        let (mut client, received) = client(true);
        client.init(&mut stack).expect("Init");
        client
            .on_discovery(&mut stack, &discovered(&client))
            .expect("Discovery");

        let other = client.on_ble_event(
            &mut stack,
            &BleEvent::GattcHvx {
                conn_handle: 1,
                handle: 0x21,
                data: b"nope".to_vec(),
            },
        );
        assert!(other.is_none());
        assert!(!client.data_seen());

        let ours = client.on_ble_event(
            &mut stack,
            &BleEvent::GattcHvx {
                conn_handle: 1,
                handle: 0x24,
                data: b"$BNRDD,1".to_vec(),
            },
        );
        assert_eq!(
            ours.map(|e| e.evt_type),
            Some(BtcEventType::Notification)
        );
        assert!(client.data_seen());
        assert_eq!(received.lock().as_slice(), b"$BNRDD,1");
    }

    #[test]
    fn test_closed_sink_drops_data() {
        let mut stack = SimStack::new();
        let (mut client, received) = client(false);
        client.init(&mut stack).expect("Init");
        client
            .on_discovery(&mut stack, &discovered(&client))
            .expect("Discovery");

        client.on_ble_event(
            &mut stack,
            &BleEvent::GattcHvx {
                conn_handle: 1,
                handle: 0x24,
                data: b"data".to_vec(),
            },
        );
        assert!(client.data_seen());
        assert!(received.lock().is_empty());
    }

    #[test]
    fn test_closure_sink() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink_buf = received.clone();
        let mut sink = move |data: &[u8]| sink_buf.lock().extend_from_slice(data);
        assert!(NotificationSink::accepting(&sink));
        NotificationSink::on_data(&mut sink, b"ok");
        assert_eq!(received.lock().as_slice(), b"ok");
    }
}
