//! In-memory BLE stack
//!
//! [`SimStack`] implements [`SoftDevice`] without a radio. It allocates attribute
//! handles the way the real stack does, records every call, and can be told to
//! fail the next call of a given kind. Used by the test-suite and by the CLI
//! `simulate` command.

use super::adv::{AdvMode, AdvertisingParams, ScanParams};
use super::event::{AuthorizeType, ConnParams, PeerAddr};
use super::gatt::{CharHandles, CharacteristicSpec, GattcWriteParams, HvxType};
use super::stack::{SoftDevice, StackError};
use super::uuid::{BleUuid, Uuid128, UuidType, VendorUuidTable};
use std::collections::HashMap;

/// First attribute handle available to application services
pub const APP_SERVICE_HANDLE_START: u16 = 0x000C;

/// Kinds of stack calls, for failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimOp {
    UuidVsAdd,
    ServiceAdd,
    CharacteristicAdd,
    Hvx,
    SysAttrSet,
    ExchangeMtuReply,
    RwAuthorizeReply,
    ExchangeMtuRequest,
    GattcRead,
    GattcWrite,
    Connect,
    Disconnect,
    SecParamsReply,
    ConnParamUpdate,
    DeviceNameSet,
    PpcpSet,
    ScanStart,
    ScanStop,
    AdvertisingInit,
    AdvertisingStart,
    AdvertisingStop,
    UserMemReply,
    ConnSecure,
    DiscoveryRegister,
    DiscoveryStart,
}

/// A call the application made into the stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackCall {
    UuidVsAdd(Uuid128),
    ServiceAdd(BleUuid),
    CharacteristicAdd { service_handle: u16, spec: CharacteristicSpec },
    Hvx { conn_handle: u16, handle: u16, hvx_type: HvxType, data: Vec<u8> },
    SysAttrSet(u16),
    ExchangeMtuReply { conn_handle: u16, mtu: u16 },
    RwAuthorizeReply { conn_handle: u16, auth_type: AuthorizeType, gatt_status: u16 },
    ExchangeMtuRequest { conn_handle: u16, mtu: u16 },
    GattcRead { conn_handle: u16, handle: u16, offset: u16 },
    GattcWrite { conn_handle: u16, params: GattcWriteParams },
    Connect { peer_addr: PeerAddr, conn_params: ConnParams },
    Disconnect { conn_handle: u16, reason: u8 },
    SecParamsReply { conn_handle: u16, status: u8 },
    ConnParamUpdate { conn_handle: u16, params: ConnParams },
    DeviceNameSet(String),
    PpcpSet(ConnParams),
    ScanStart(ScanParams),
    ScanStop,
    AdvertisingInit { data: Vec<u8> },
    AdvertisingStart(AdvMode),
    AdvertisingStop,
    UserMemReply(u16),
    ConnSecure(u16),
    DiscoveryRegister(BleUuid),
    DiscoveryStart(u16),
}

/// Recording, handle-allocating stand-in for the BLE stack
#[derive(Debug)]
pub struct SimStack {
    uuids: VendorUuidTable,
    next_handle: u16,
    calls: Vec<StackCall>,
    failures: HashMap<SimOp, StackError>,
    scanning: bool,
    advertising: bool,
    event_delivery: bool,
}

impl SimStack {
    pub fn new() -> Self {
        Self {
            uuids: VendorUuidTable::default(),
            next_handle: APP_SERVICE_HANDLE_START,
            calls: Vec::new(),
            failures: HashMap::new(),
            scanning: false,
            advertising: false,
            event_delivery: true,
        }
    }

    /// Make the next call of `op` fail with `error`
    pub fn fail_next(&mut self, op: SimOp, error: StackError) {
        self.failures.insert(op, error);
    }

    /// Every call made so far
    pub fn calls(&self) -> &[StackCall] {
        &self.calls
    }

    /// Forget recorded calls
    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    /// Payloads of all notifications attempted, failed ones included
    pub fn notifications(&self) -> Vec<Vec<u8>> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                StackCall::Hvx { data, .. } => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    /// All GATT client writes issued
    pub fn gattc_writes(&self) -> Vec<(u16, GattcWriteParams)> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                StackCall::GattcWrite { conn_handle, params } => {
                    Some((*conn_handle, params.clone()))
                }
                _ => None,
            })
            .collect()
    }

    /// Handles disconnected by the application
    pub fn disconnects(&self) -> Vec<(u16, u8)> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                StackCall::Disconnect { conn_handle, reason } => Some((*conn_handle, *reason)),
                _ => None,
            })
            .collect()
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    pub fn is_advertising(&self) -> bool {
        self.advertising
    }

    pub fn event_delivery(&self) -> bool {
        self.event_delivery
    }

    pub fn uuid_table(&self) -> &VendorUuidTable {
        &self.uuids
    }

    fn record(&mut self, op: SimOp, call: StackCall) -> Result<(), StackError> {
        self.calls.push(call);
        match self.failures.remove(&op) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn allocate_handle(&mut self) -> Result<u16, StackError> {
        let handle = self.next_handle;
        self.next_handle = self.next_handle.checked_add(1).ok_or(StackError::NoMem)?;
        Ok(handle)
    }
}

impl Default for SimStack {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftDevice for SimStack {
    fn uuid_vs_add(&mut self, uuid: &Uuid128) -> Result<UuidType, StackError> {
        self.record(SimOp::UuidVsAdd, StackCall::UuidVsAdd(*uuid))?;
        self.uuids.add(uuid).map_err(|_| StackError::NoMem)
    }

    fn gatts_service_add(&mut self, uuid: BleUuid) -> Result<u16, StackError> {
        self.record(SimOp::ServiceAdd, StackCall::ServiceAdd(uuid))?;
        if let UuidType::Vendor(_) = uuid.uuid_type {
            if self.uuids.expand(&uuid).is_none() {
                return Err(StackError::NotFound);
            }
        }
        self.allocate_handle()
    }

    fn gatts_characteristic_add(
        &mut self,
        service_handle: u16,
        spec: &CharacteristicSpec,
    ) -> Result<CharHandles, StackError> {
        self.record(
            SimOp::CharacteristicAdd,
            StackCall::CharacteristicAdd {
                service_handle,
                spec: spec.clone(),
            },
        )?;
        if spec.init_len > spec.max_len {
            return Err(StackError::InvalidParam);
        }
        // declaration, then value, then optional CCCD
        self.allocate_handle()?;
        let value_handle = self.allocate_handle()?;
        let cccd_handle = if spec.has_cccd {
            self.allocate_handle()?
        } else {
            0
        };
        Ok(CharHandles {
            value_handle,
            user_desc_handle: 0,
            cccd_handle,
            sccd_handle: 0,
        })
    }

    fn gatts_hvx(
        &mut self,
        conn_handle: u16,
        handle: u16,
        hvx_type: HvxType,
        data: &[u8],
    ) -> Result<(), StackError> {
        self.record(
            SimOp::Hvx,
            StackCall::Hvx {
                conn_handle,
                handle,
                hvx_type,
                data: data.to_vec(),
            },
        )
    }

    fn gatts_sys_attr_set(&mut self, conn_handle: u16) -> Result<(), StackError> {
        self.record(SimOp::SysAttrSet, StackCall::SysAttrSet(conn_handle))
    }

    fn gatts_exchange_mtu_reply(&mut self, conn_handle: u16, mtu: u16) -> Result<(), StackError> {
        self.record(
            SimOp::ExchangeMtuReply,
            StackCall::ExchangeMtuReply { conn_handle, mtu },
        )
    }

    fn gatts_rw_authorize_reply(
        &mut self,
        conn_handle: u16,
        auth_type: AuthorizeType,
        gatt_status: u16,
    ) -> Result<(), StackError> {
        self.record(
            SimOp::RwAuthorizeReply,
            StackCall::RwAuthorizeReply {
                conn_handle,
                auth_type,
                gatt_status,
            },
        )
    }

    fn gattc_exchange_mtu_request(
        &mut self,
        conn_handle: u16,
        mtu: u16,
    ) -> Result<(), StackError> {
        self.record(
            SimOp::ExchangeMtuRequest,
            StackCall::ExchangeMtuRequest { conn_handle, mtu },
        )
    }

    fn gattc_read(
        &mut self,
        conn_handle: u16,
        handle: u16,
        offset: u16,
    ) -> Result<(), StackError> {
        self.record(
            SimOp::GattcRead,
            StackCall::GattcRead {
                conn_handle,
                handle,
                offset,
            },
        )
    }

    fn gattc_write(
        &mut self,
        conn_handle: u16,
        params: &GattcWriteParams,
    ) -> Result<(), StackError> {
        self.record(
            SimOp::GattcWrite,
            StackCall::GattcWrite {
                conn_handle,
                params: params.clone(),
            },
        )
    }

    fn gap_connect(
        &mut self,
        peer_addr: &PeerAddr,
        _scan_params: &ScanParams,
        conn_params: &ConnParams,
    ) -> Result<(), StackError> {
        self.record(
            SimOp::Connect,
            StackCall::Connect {
                peer_addr: *peer_addr,
                conn_params: *conn_params,
            },
        )?;
        // connecting ends the scan
        self.scanning = false;
        Ok(())
    }

    fn gap_disconnect(&mut self, conn_handle: u16, reason: u8) -> Result<(), StackError> {
        self.record(
            SimOp::Disconnect,
            StackCall::Disconnect {
                conn_handle,
                reason,
            },
        )
    }

    fn gap_sec_params_reply(&mut self, conn_handle: u16, status: u8) -> Result<(), StackError> {
        self.record(
            SimOp::SecParamsReply,
            StackCall::SecParamsReply {
                conn_handle,
                status,
            },
        )
    }

    fn gap_conn_param_update(
        &mut self,
        conn_handle: u16,
        params: &ConnParams,
    ) -> Result<(), StackError> {
        self.record(
            SimOp::ConnParamUpdate,
            StackCall::ConnParamUpdate {
                conn_handle,
                params: *params,
            },
        )
    }

    fn gap_device_name_set(&mut self, name: &str) -> Result<(), StackError> {
        self.record(SimOp::DeviceNameSet, StackCall::DeviceNameSet(name.to_string()))
    }

    fn gap_ppcp_set(&mut self, params: &ConnParams) -> Result<(), StackError> {
        self.record(SimOp::PpcpSet, StackCall::PpcpSet(*params))
    }

    fn gap_scan_start(&mut self, params: &ScanParams) -> Result<(), StackError> {
        self.record(SimOp::ScanStart, StackCall::ScanStart(*params))?;
        if self.scanning {
            return Err(StackError::InvalidState);
        }
        self.scanning = true;
        Ok(())
    }

    fn gap_scan_stop(&mut self) -> Result<(), StackError> {
        self.record(SimOp::ScanStop, StackCall::ScanStop)?;
        self.scanning = false;
        Ok(())
    }

    fn advertising_init(
        &mut self,
        data: &[u8],
        _params: &AdvertisingParams,
    ) -> Result<(), StackError> {
        self.record(
            SimOp::AdvertisingInit,
            StackCall::AdvertisingInit {
                data: data.to_vec(),
            },
        )
    }

    fn advertising_start(&mut self, mode: AdvMode) -> Result<(), StackError> {
        self.record(SimOp::AdvertisingStart, StackCall::AdvertisingStart(mode))?;
        self.advertising = true;
        Ok(())
    }

    fn advertising_stop(&mut self) -> Result<(), StackError> {
        self.record(SimOp::AdvertisingStop, StackCall::AdvertisingStop)?;
        self.advertising = false;
        Ok(())
    }

    fn user_mem_reply(&mut self, conn_handle: u16) -> Result<(), StackError> {
        self.record(SimOp::UserMemReply, StackCall::UserMemReply(conn_handle))
    }

    fn conn_secure(&mut self, conn_handle: u16) -> Result<(), StackError> {
        self.record(SimOp::ConnSecure, StackCall::ConnSecure(conn_handle))
    }

    fn db_discovery_register(&mut self, uuid: BleUuid) -> Result<(), StackError> {
        self.record(SimOp::DiscoveryRegister, StackCall::DiscoveryRegister(uuid))
    }

    fn db_discovery_start(&mut self, conn_handle: u16) -> Result<(), StackError> {
        self.record(SimOp::DiscoveryStart, StackCall::DiscoveryStart(conn_handle))
    }

    fn set_event_delivery(&mut self, enabled: bool) {
        self.event_delivery = enabled;
    }
}
