//! Bluetooth coordinator
//!
//! Owns the stack, the BTP peripheral service and (optionally) the BTC
//! central client. Every stack event goes through [`Bluetooth::dispatch`],
//! which works out which role the connection plays and routes the event to
//! the central and/or peripheral handlers. Outbound text is framed into
//! notifications by [`Bluetooth::send_byte`].

use super::adv::{advertises_service, build_adv_data, AdvMode, AdvParseError};
use super::btc::{BtcClient, BtcError, BtcEvent, NotificationSink};
use super::btp::{BtpError, BtpService, DataHandler};
use super::discovery::DiscoveryEvent;
use super::event::{
    AuthorizeType, BleEvent, GapRole, PeerAddr, TimeoutSource,
    BLE_HCI_LOCAL_HOST_TERMINATED_CONNECTION, BLE_HCI_REMOTE_USER_TERMINATED_CONNECTION,
};
use super::gatt::{BLE_CONN_HANDLE_INVALID, BLE_GATT_STATUS_ATTERR_APP_BEGIN, BTP_MAX_DATA_LEN};
use super::stack::{SoftDevice, StackError, BLE_GAP_SEC_STATUS_PAIRING_NOT_SUPP};
use super::uuid::{BLE_UUID_BTP_SERVICE, BTC_SERVICE_UUID, BTP_BASE_UUID};
use crate::config::{BluetoothConfig, ConfigError};
use rand::Rng;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Reply status for long writes we do not support
pub const LONG_WRITE_REJECT_STATUS: u16 = BLE_GATT_STATUS_ATTERR_APP_BEGIN + 2;

/// Errors raised while bringing the link up
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("BTP error: {0}")]
    Btp(#[from] BtpError),
    #[error("BTC error: {0}")]
    Btc(#[from] BtcError),
    #[error("Advertising data error: {0}")]
    Advertising(#[from] AdvParseError),
    #[error("Stack error: {0}")]
    Stack(#[from] StackError),
}

fn check(result: Result<(), StackError>, what: &str) {
    if let Err(e) = result {
        warn!("{} failed: {} (0x{:04x})", what, e, e.code());
    }
}

/// The node's Bluetooth link
pub struct Bluetooth<S: SoftDevice> {
    stack: S,
    config: BluetoothConfig,
    btp: BtpService,
    btc: Option<BtcClient>,
    roles: HashMap<u16, GapRole>,
    btp_conn_handle: u16,
    btc_conn_handle: u16,
    /// Address we are connecting out to, until its link comes up
    btc_peer: Option<PeerAddr>,
    session_id: u32,
    advertising: bool,
    scanning: bool,
    stay_suboptimal: bool,
    force_optimal: bool,
    dropped: bool,
    line: Vec<u8>,
}

impl<S: SoftDevice> Bluetooth<S> {
    /// Create the link. `data_handler` receives what the phone writes to us;
    /// `sink` receives what the BTC peripheral notifies.
    pub fn new(
        stack: S,
        config: BluetoothConfig,
        data_handler: DataHandler,
        sink: Box<dyn NotificationSink>,
    ) -> Self {
        let btc = config
            .central_enabled
            .then(|| BtcClient::new(sink).with_bonding(config.bonding));

        Self {
            stack,
            btp: BtpService::new(data_handler),
            btc,
            config,
            roles: HashMap::new(),
            btp_conn_handle: BLE_CONN_HANDLE_INVALID,
            btc_conn_handle: BLE_CONN_HANDLE_INVALID,
            btc_peer: None,
            session_id: 0,
            advertising: false,
            scanning: false,
            stay_suboptimal: false,
            force_optimal: false,
            dropped: false,
            line: Vec::with_capacity(BTP_MAX_DATA_LEN),
        }
    }

    /// Bring up GAP, both services, advertising and scanning.
    ///
    /// BTP must be registered before BTC: the first vendor service is the one
    /// peers see as our primary service.
    pub fn init(&mut self) -> Result<(), LinkError> {
        self.config.validate()?;

        let name = self.config.device_name();
        self.stack.gap_device_name_set(&name)?;
        self.stack.gap_ppcp_set(&self.config.peripheral_conn)?;

        self.btp.init(&mut self.stack)?;

        let btp_service = BTP_BASE_UUID.with_shortcut(BLE_UUID_BTP_SERVICE);
        let adv_data = build_adv_data(&name, &[btp_service])?;
        self.stack
            .advertising_init(&adv_data, &self.config.advertising)?;

        if let Some(btc) = self.btc.as_mut() {
            btc.init(&mut self.stack)?;
            self.scan_start();
        }

        self.stack.advertising_start(AdvMode::Fast)?;
        self.advertising = true;

        info!("Bluetooth up as {}", name);
        Ok(())
    }

    /// Whether advertising and scanning may lapse
    pub fn optimize_power(&self) -> bool {
        if self.force_optimal {
            return true;
        }
        let data_seen = self.btc.as_ref().map(BtcClient::data_seen).unwrap_or(false);
        self.config.optimize_power && !self.stay_suboptimal && !data_seen
    }

    /// Keep the radio up from now on, even if the config allows it to lapse
    pub fn power_stay_suboptimal(&mut self) {
        self.stay_suboptimal = true;
    }

    /// Optimise power from now on, whatever has connected. Used when
    /// debugging power behaviour.
    pub fn force_optimize_power(&mut self) {
        info!("Power optimisation forced");
        self.force_optimal = true;
    }

    fn role_of(&self, event: &BleEvent, conn_handle: u16) -> GapRole {
        if let Some(role) = self.roles.get(&conn_handle) {
            return *role;
        }
        match event {
            BleEvent::Connected { role, .. } => *role,
            _ => GapRole::Invalid,
        }
    }

    /// Route one stack event
    pub fn dispatch(&mut self, event: &BleEvent) {
        if self.dropped {
            return;
        }

        let conn_handle = event.conn_handle().unwrap_or(BLE_CONN_HANDLE_INVALID);
        let role = self.role_of(event, conn_handle);
        if !matches!(event, BleEvent::AdvReport { .. }) {
            trace!("{} on 0x{:04x} as {:?}", event.name(), conn_handle, role);
        }

        if let BleEvent::Connected { .. } = event {
            if role != GapRole::Invalid {
                self.roles.insert(conn_handle, role);
            }
        }

        if let BleEvent::Timeout {
            source: TimeoutSource::Advertising,
            ..
        } = event
        {
            // scan and connection timeouts leave advertising alone
            self.on_advertising_timeout();
        }

        let connected = matches!(event, BleEvent::Connected { .. });
        let disconnected = matches!(event, BleEvent::Disconnected { .. });

        if self.btc.is_some() && matches!(role, GapRole::Central | GapRole::Invalid) {
            // The central handler resets the BTC handle on disconnect, so the
            // client sees the event first.
            if !disconnected {
                self.on_central_event(event);
            }
            if conn_handle == self.btc_conn_handle {
                if let Some(btc) = self.btc.as_mut() {
                    btc.on_ble_event(&mut self.stack, event);
                }
            }
            if disconnected {
                self.on_central_event(event);
            }
        }

        if matches!(role, GapRole::Peripheral | GapRole::Invalid) {
            self.on_peripheral_event(event);
            if self.btc.is_none() || conn_handle != self.btc_conn_handle {
                self.btp.on_ble_event(event);
            }
            // a phone link resumes the scan once the node is held awake
            if connected && role == GapRole::Peripheral && self.btc.is_some() {
                self.scan_start();
            }
        }

        if disconnected {
            self.roles.remove(&conn_handle);
        }
    }

    fn on_advertising_timeout(&mut self) {
        self.advertising = false;
        if self.optimize_power() {
            debug!("Advertising timed out; letting it lapse");
            return;
        }
        debug!("Advertising timed out; restarting");
        check(self.stack.advertising_start(AdvMode::Fast), "Advertising restart");
        self.advertising = true;
    }

    fn on_central_event(&mut self, event: &BleEvent) {
        match event {
            BleEvent::Connected {
                conn_handle,
                peer_addr,
                ..
            } => {
                if self.btc_peer.as_ref() == Some(peer_addr) {
                    self.btc_peer = None;
                    self.btc_conn_handle = *conn_handle;
                    info!("BTC connected to {} on 0x{:04x}", peer_addr, conn_handle);
                    check(
                        self.stack.db_discovery_start(*conn_handle),
                        "Discovery start",
                    );
                }
                self.scan_start();
            }
            BleEvent::Disconnected {
                conn_handle,
                reason,
            } => {
                if *conn_handle == self.btc_conn_handle {
                    info!("BTC disconnected (reason 0x{:02x})", reason);
                    self.btc_conn_handle = BLE_CONN_HANDLE_INVALID;
                }
                self.scan_start();
            }
            BleEvent::AdvReport {
                peer_addr, data, ..
            } => self.on_adv_report(peer_addr, data),
            BleEvent::Timeout { source, .. } => match source {
                TimeoutSource::Scan => {
                    debug!("Scan timed out");
                    self.scan_start();
                }
                TimeoutSource::Connection => debug!("Connection request timed out"),
                TimeoutSource::Advertising => {}
            },
            BleEvent::ConnParamUpdateRequest {
                conn_handle,
                params,
            } => {
                check(
                    self.stack.gap_conn_param_update(*conn_handle, params),
                    "Connection parameter update",
                );
            }
            BleEvent::GattcTimeout { conn_handle } | BleEvent::GattsTimeout { conn_handle } => {
                debug!("GATT timeout on 0x{:04x}; disconnecting", conn_handle);
                check(
                    self.stack
                        .gap_disconnect(*conn_handle, BLE_HCI_REMOTE_USER_TERMINATED_CONNECTION),
                    "Disconnect",
                );
            }
            BleEvent::GattsExchangeMtuRequest { conn_handle, .. } => {
                check(
                    self.stack
                        .gatts_exchange_mtu_reply(*conn_handle, self.config.max_mtu),
                    "MTU reply",
                );
            }
            _ => {}
        }
    }

    fn on_adv_report(&mut self, peer_addr: &PeerAddr, data: &[u8]) {
        // One BTC link at a time
        if self.btc_conn_handle != BLE_CONN_HANDLE_INVALID {
            return;
        }
        if !advertises_service(data, &BTC_SERVICE_UUID) {
            return;
        }

        debug!("Connecting to BTC peripheral {}", peer_addr);
        self.btc_peer = Some(*peer_addr);
        if let Err(e) =
            self.stack
                .gap_connect(peer_addr, &self.config.scan, &self.config.central_conn)
        {
            warn!("Connection request to {} failed: {}", peer_addr, e);
        }
    }

    fn on_peripheral_event(&mut self, event: &BleEvent) {
        match event {
            BleEvent::Connected { conn_handle, .. } => {
                check(
                    self.stack
                        .gattc_exchange_mtu_request(*conn_handle, self.config.max_mtu),
                    "MTU exchange request",
                );
                self.session_id = rand::thread_rng().gen_range(1..=u32::MAX);
                self.btp_conn_handle = *conn_handle;
                self.btp.attach(*conn_handle);
                self.stay_suboptimal = true;
                check(
                    self.stack.gatts_sys_attr_set(*conn_handle),
                    "System attribute set",
                );
                info!(
                    "BTP connected on 0x{:04x}, session {:08x}",
                    conn_handle, self.session_id
                );
            }
            BleEvent::Disconnected { reason, .. } => {
                info!("BTP disconnected (reason 0x{:02x})", reason);
                self.session_id = 0;
                self.btp_conn_handle = BLE_CONN_HANDLE_INVALID;
                self.btp.detach();
                self.line.clear();
            }
            BleEvent::SecParamsRequest { .. } => {
                check(
                    self.stack.gap_sec_params_reply(
                        self.btp_conn_handle,
                        BLE_GAP_SEC_STATUS_PAIRING_NOT_SUPP,
                    ),
                    "Security parameters reply",
                );
            }
            BleEvent::GattsSysAttrMissing { .. } => {
                check(
                    self.stack.gatts_sys_attr_set(self.btp_conn_handle),
                    "System attribute set",
                );
            }
            BleEvent::GattcTimeout { conn_handle } | BleEvent::GattsTimeout { conn_handle } => {
                debug!("GATT timeout on 0x{:04x}; disconnecting", conn_handle);
                check(
                    self.stack
                        .gap_disconnect(*conn_handle, BLE_HCI_REMOTE_USER_TERMINATED_CONNECTION),
                    "Disconnect",
                );
            }
            BleEvent::UserMemRequest { .. } => {
                check(
                    self.stack.user_mem_reply(self.btp_conn_handle),
                    "User memory reply",
                );
            }
            BleEvent::GattsRwAuthorizeRequest {
                conn_handle,
                auth_type,
                op,
            } if *auth_type != AuthorizeType::Invalid && op.is_long_write() => {
                let reply_type = match auth_type {
                    AuthorizeType::Write => AuthorizeType::Write,
                    _ => AuthorizeType::Read,
                };
                check(
                    self.stack.gatts_rw_authorize_reply(
                        *conn_handle,
                        reply_type,
                        LONG_WRITE_REJECT_STATUS,
                    ),
                    "Authorize reply",
                );
            }
            BleEvent::GattsExchangeMtuRequest {
                conn_handle,
                client_rx_mtu,
            } => {
                debug!("Peer MTU {}", client_rx_mtu);
                check(
                    self.stack
                        .gatts_exchange_mtu_reply(*conn_handle, self.config.max_mtu),
                    "MTU reply",
                );
            }
            BleEvent::GattcExchangeMtuRsp { server_rx_mtu, .. } => {
                debug!("MTU exchanged, server MTU {}", server_rx_mtu);
            }
            _ => {}
        }
    }

    /// Feed a discovery result to the BTC client
    pub fn on_discovery(&mut self, event: &DiscoveryEvent) -> Option<BtcEvent> {
        if self.dropped {
            return None;
        }
        let btc = self.btc.as_mut()?;
        match btc.on_discovery(&mut self.stack, event) {
            Ok(result) => result,
            Err(e) => {
                warn!("BTC discovery handling failed: {}", e);
                None
            }
        }
    }

    /// (Re)start scanning for the BTC peripheral
    fn scan_start(&mut self) {
        self.scan_stop();
        if self.optimize_power() {
            return;
        }
        match self.stack.gap_scan_start(&self.config.scan) {
            Ok(()) | Err(StackError::InvalidState) => {}
            Err(e) => warn!("Scan start failed: {}", e),
        }
        self.scanning = true;
    }

    fn scan_stop(&mut self) {
        if self.scanning {
            check(self.stack.gap_scan_stop(), "Scan stop");
            self.scanning = false;
        }
    }

    fn advertising_stop(&mut self) {
        if self.advertising {
            check(self.stack.advertising_stop(), "Advertising stop");
            self.advertising = false;
        }
    }

    /// Whether a phone is connected and listening
    pub fn can_send(&self) -> bool {
        self.btp_conn_handle != BLE_CONN_HANDLE_INVALID
            && self.btp.conn_handle() != BLE_CONN_HANDLE_INVALID
            && self.btp.can_send()
    }

    /// Random id of the current phone connection, 0 when there is none
    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    /// Queue one byte for the phone.
    ///
    /// Bytes accumulate until a newline or a full packet, which is then sent
    /// as one notification. Returns false right after a packet went out, when
    /// the caller must pause before the next byte. Without a listening phone
    /// the byte is discarded and true is returned.
    pub fn send_byte(&mut self, byte: u8) -> bool {
        if !self.can_send() {
            return true;
        }

        if self.line.len() < BTP_MAX_DATA_LEN {
            self.line.push(byte);
        }

        if byte == b'\n' || self.line.len() >= BTP_MAX_DATA_LEN {
            if let Err(e) = self.btp.string_send(&mut self.stack, &self.line) {
                debug!("Dropped {} bytes for phone: {}", self.line.len(), e);
            }
            self.line.clear();
            return false;
        }

        true
    }

    /// Tear everything down for good. Later calls do nothing.
    pub fn drop_link(&mut self) {
        if self.dropped {
            return;
        }

        let mut handles = vec![self.btp.conn_handle(), self.btp_conn_handle];
        if let Some(btc) = self.btc.as_mut() {
            handles.push(btc.conn_handle());
            btc.reset_connection();
        }
        handles.push(self.btc_conn_handle);
        handles.retain(|h| *h != BLE_CONN_HANDLE_INVALID);
        handles.dedup();

        for handle in handles {
            check(
                self.stack
                    .gap_disconnect(handle, BLE_HCI_LOCAL_HOST_TERMINATED_CONNECTION),
                "Disconnect",
            );
        }

        self.btp.detach();
        self.btp_conn_handle = BLE_CONN_HANDLE_INVALID;
        self.btc_conn_handle = BLE_CONN_HANDLE_INVALID;
        self.session_id = 0;

        self.scan_stop();
        self.advertising_stop();
        self.stack.set_event_delivery(false);
        self.dropped = true;
        info!("Bluetooth dropped");
    }

    pub fn is_dropped(&self) -> bool {
        self.dropped
    }

    pub fn is_advertising(&self) -> bool {
        self.advertising
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    pub fn btp(&self) -> &BtpService {
        &self.btp
    }

    pub fn btc(&self) -> Option<&BtcClient> {
        self.btc.as_ref()
    }

    pub fn btc_conn_handle(&self) -> u16 {
        self.btc_conn_handle
    }

    pub fn config(&self) -> &BluetoothConfig {
        &self.config
    }

    pub fn stack(&self) -> &S {
        &self.stack
    }

    pub fn stack_mut(&mut self) -> &mut S {
        &mut self.stack
    }
}
