// Integration test for the BTP side of the link
//
// A phone connects to the node, enables notifications, writes commands and
// reads lines back, all against the simulated stack.

use parking_lot::Mutex;
use std::sync::Arc;
use ttble_core::ble::event::{
    AuthorizeType, GattsWriteOp, BLE_HCI_REMOTE_USER_TERMINATED_CONNECTION,
};
use ttble_core::ble::gatt::{BLE_CONN_HANDLE_INVALID, HvxType};
use ttble_core::ble::stack::BLE_GAP_SEC_STATUS_PAIRING_NOT_SUPP;
use ttble_core::ble::{GapRole, PeerAddr, SimOp, StackCall, TimeoutSource};
use ttble_core::{BleEvent, Bluetooth, BluetoothConfig, SimStack, StackError};

const PHONE: u16 = 0;

struct Harness {
    bt: Bluetooth<SimStack>,
    from_phone: Arc<Mutex<Vec<Vec<u8>>>>,
}

fn harness(config: BluetoothConfig) -> Harness {
    let from_phone = Arc::new(Mutex::new(Vec::new()));
    let writes = from_phone.clone();
    let mut bt = Bluetooth::new(
        SimStack::new(),
        config,
        Box::new(move |data: &[u8]| writes.lock().push(data.to_vec())),
        Box::new(|_: &[u8]| {}),
    );
    bt.init().expect("Bluetooth init");
    Harness { bt, from_phone }
}

fn phone_connects(bt: &mut Bluetooth<SimStack>) {
    bt.dispatch(&BleEvent::Connected {
        conn_handle: PHONE,
        peer_addr: PeerAddr::new(1, [0x10, 0x20, 0x30, 0x40, 0x50, 0x60]),
        role: GapRole::Peripheral,
    });
}

fn phone_subscribes(bt: &mut Bluetooth<SimStack>, enable: bool) {
    let cccd = bt.btp().rx_handles.cccd_handle;
    bt.dispatch(&BleEvent::GattsWrite {
        conn_handle: PHONE,
        handle: cccd,
        op: GattsWriteOp::WriteReq,
        data: vec![u8::from(enable), 0x00],
    });
}

fn send_line(bt: &mut Bluetooth<SimStack>, line: &str) -> usize {
    line.bytes()
        .map(|b| bt.send_byte(b))
        .filter(|keep_going| !keep_going)
        .count()
}

#[test]
fn test_service_layout() {
    let h = harness(BluetoothConfig::default());
    let btp = h.bt.btp();

    // TX is added after RX: RX decl, value, CCCD, then TX decl, value
    assert_eq!(btp.rx_handles.cccd_handle, btp.rx_handles.value_handle + 1);
    assert_eq!(btp.tx_handles.value_handle, btp.rx_handles.cccd_handle + 2);
    assert_eq!(btp.tx_handles.cccd_handle, 0);

    let calls = h.bt.stack().calls();
    let position = |wanted: &StackCall| calls.iter().position(|c| c == wanted);
    let adv_start = position(&StackCall::AdvertisingStart(ttble_core::ble::AdvMode::Fast))
        .expect("Advertising started");
    let first_scan = calls
        .iter()
        .position(|c| matches!(c, StackCall::ScanStart(_)))
        .expect("Scan started");
    assert!(first_scan < adv_start);
}

#[test]
fn test_phone_session() {
    let mut h = harness(BluetoothConfig::default());
    phone_connects(&mut h.bt);

    let calls = h.bt.stack().calls();
    assert!(calls.contains(&StackCall::ExchangeMtuRequest {
        conn_handle: PHONE,
        mtu: 158
    }));
    assert!(calls.contains(&StackCall::SysAttrSet(PHONE)));
    assert!(!h.bt.can_send());
    assert!(h.bt.send_byte(b'x'));

    phone_subscribes(&mut h.bt, true);
    assert!(h.bt.can_send());

    let tx = h.bt.btp().tx_handles.value_handle;
    h.bt.dispatch(&BleEvent::GattsWrite {
        conn_handle: PHONE,
        handle: tx,
        op: GattsWriteOp::WriteCmd,
        data: b"/date\n".to_vec(),
    });
    assert_eq!(*h.from_phone.lock(), vec![b"/date\n".to_vec()]);

    assert_eq!(send_line(&mut h.bt, "2026-10-19T12:00:00Z\n"), 2);
    let rx = h.bt.btp().rx_handles.value_handle;
    let hvx: Vec<_> = h
        .bt
        .stack()
        .calls()
        .iter()
        .filter_map(|call| match call {
            StackCall::Hvx {
                conn_handle,
                handle,
                hvx_type,
                data,
            } => {
                assert_eq!(*conn_handle, PHONE);
                assert_eq!(*handle, rx);
                assert_eq!(*hvx_type, HvxType::Notification);
                Some(data.clone())
            }
            _ => None,
        })
        .collect();
    assert_eq!(hvx, vec![b"2026-10-19T12:00:00Z".to_vec(), b"\n".to_vec()]);
}

#[test]
fn test_unsubscribe_stops_sending() {
    let mut h = harness(BluetoothConfig::default());
    phone_connects(&mut h.bt);
    phone_subscribes(&mut h.bt, true);
    phone_subscribes(&mut h.bt, false);

    assert!(!h.bt.can_send());
    assert_eq!(send_line(&mut h.bt, "lost\n"), 0);
    assert!(h.bt.stack().notifications().is_empty());
}

#[test]
fn test_failed_notification_is_dropped() {
    let mut h = harness(BluetoothConfig::default());
    phone_connects(&mut h.bt);
    phone_subscribes(&mut h.bt, true);

    h.bt.stack_mut().fail_next(SimOp::Hvx, StackError::Busy);
    assert_eq!(send_line(&mut h.bt, "first\n"), 1);
    assert_eq!(send_line(&mut h.bt, "second\n"), 1);

    // both were attempted; the first payload is not retried
    assert_eq!(
        h.bt.stack().notifications(),
        vec![b"first\n".to_vec(), b"second\n".to_vec()]
    );
}

#[test]
fn test_disconnect_discards_partial_line() {
    let mut h = harness(BluetoothConfig::default());
    phone_connects(&mut h.bt);
    phone_subscribes(&mut h.bt, true);
    assert_eq!(send_line(&mut h.bt, "half"), 0);

    h.bt.dispatch(&BleEvent::Disconnected {
        conn_handle: PHONE,
        reason: BLE_HCI_REMOTE_USER_TERMINATED_CONNECTION,
    });
    assert_eq!(h.bt.btp().conn_handle(), BLE_CONN_HANDLE_INVALID);
    assert!(!h.bt.btp().is_notification_enabled());

    phone_connects(&mut h.bt);
    phone_subscribes(&mut h.bt, true);
    assert_eq!(send_line(&mut h.bt, "whole\n"), 1);
    assert_eq!(h.bt.stack().notifications(), vec![b"whole\n".to_vec()]);
}

#[test]
fn test_peripheral_housekeeping() {
    let mut h = harness(BluetoothConfig::default());
    phone_connects(&mut h.bt);
    h.bt.stack_mut().clear_calls();

    h.bt.dispatch(&BleEvent::SecParamsRequest { conn_handle: PHONE });
    h.bt.dispatch(&BleEvent::GattsSysAttrMissing { conn_handle: PHONE });
    h.bt.dispatch(&BleEvent::UserMemRequest { conn_handle: PHONE });
    h.bt.dispatch(&BleEvent::GattsExchangeMtuRequest {
        conn_handle: PHONE,
        client_rx_mtu: 247,
    });
    h.bt.dispatch(&BleEvent::GattsRwAuthorizeRequest {
        conn_handle: PHONE,
        auth_type: AuthorizeType::Write,
        op: GattsWriteOp::WriteReq,
    });

    assert_eq!(
        h.bt.stack().calls(),
        &[
            StackCall::SecParamsReply {
                conn_handle: PHONE,
                status: BLE_GAP_SEC_STATUS_PAIRING_NOT_SUPP,
            },
            StackCall::SysAttrSet(PHONE),
            StackCall::UserMemReply(PHONE),
            StackCall::ExchangeMtuReply {
                conn_handle: PHONE,
                mtu: 158,
            },
        ]
    );
}

#[test]
fn test_gatt_timeout_disconnects_phone() {
    let mut h = harness(BluetoothConfig {
        central_enabled: false,
        ..Default::default()
    });
    phone_connects(&mut h.bt);
    h.bt.dispatch(&BleEvent::GattsTimeout { conn_handle: PHONE });

    assert_eq!(
        h.bt.stack().disconnects(),
        vec![(PHONE, BLE_HCI_REMOTE_USER_TERMINATED_CONNECTION)]
    );
}

#[test]
fn test_peripheral_only_node() {
    let mut h = harness(BluetoothConfig {
        central_enabled: false,
        ..Default::default()
    });
    assert!(h.bt.btc().is_none());
    assert!(!h.bt.is_scanning());
    assert!(!h
        .bt
        .stack()
        .calls()
        .iter()
        .any(|c| matches!(c, StackCall::ScanStart(_))));

    h.bt.dispatch(&BleEvent::Timeout {
        conn_handle: BLE_CONN_HANDLE_INVALID,
        source: TimeoutSource::Advertising,
    });
    assert!(h.bt.is_advertising());
}

#[test]
fn test_phone_keeps_node_awake() {
    let mut h = harness(BluetoothConfig {
        optimize_power: true,
        ..Default::default()
    });
    assert!(h.bt.optimize_power());

    phone_connects(&mut h.bt);
    assert!(!h.bt.optimize_power());
    h.bt.dispatch(&BleEvent::Timeout {
        conn_handle: BLE_CONN_HANDLE_INVALID,
        source: TimeoutSource::Advertising,
    });
    assert!(h.bt.is_advertising());
}

#[test]
fn test_events_ignored_after_drop() {
    let mut h = harness(BluetoothConfig::default());
    h.bt.drop_link();
    h.bt.stack_mut().clear_calls();

    phone_connects(&mut h.bt);
    assert!(h.bt.stack().calls().is_empty());
    assert_eq!(h.bt.session_id(), 0);
}

#[test]
fn test_invalid_config_rejected_at_init() {
    let mut bt = Bluetooth::new(
        SimStack::new(),
        BluetoothConfig {
            max_mtu: 10,
            ..Default::default()
        },
        Box::new(|_: &[u8]| {}),
        Box::new(|_: &[u8]| {}),
    );
    assert!(bt.init().is_err());
    assert!(bt.stack().calls().is_empty());
}

#[test]
fn test_phone_connect_resumes_scan() {
    let mut h = harness(BluetoothConfig {
        optimize_power: true,
        ..Default::default()
    });
    assert!(!h.bt.is_scanning());
    h.bt.stack_mut().clear_calls();

    phone_connects(&mut h.bt);
    assert!(h.bt.is_scanning());
    assert!(h.bt.stack().is_scanning());
    assert!(h
        .bt
        .stack()
        .calls()
        .iter()
        .any(|c| matches!(c, StackCall::ScanStart(_))));
}
