//! Outbound text for the phone
//!
//! Log text is held in a bounded ring and fed to the link one byte at a time
//! by a periodic task. The task stops feeding for the rest of a tick as soon
//! as the link reports that a packet went out.
//!
//! When both locks are needed, lock the link before the outbox.

use super::link::Bluetooth;
use super::pump::SharedLink;
use super::stack::SoftDevice;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Bytes held before further text is discarded
pub const OUTBOX_CAPACITY: usize = 1024;

/// Drain period of [`spawn_outbox`]
pub const OUTBOX_PERIOD: Duration = Duration::from_millis(50);

pub type SharedOutbox = Arc<Mutex<Outbox>>;

#[derive(Debug)]
pub struct Outbox {
    buf: VecDeque<u8>,
    capacity: usize,
    last_session: u32,
    started: Instant,
    overruns: usize,
}

impl Outbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
            last_session: 0,
            started: Instant::now(),
            overruns: 0,
        }
    }

    pub fn shared(self) -> SharedOutbox {
        Arc::new(Mutex::new(self))
    }

    /// Queue text for the phone and return how many bytes were taken.
    ///
    /// Nothing is queued unless a phone is listening and power is not being
    /// optimised. The first write of a new phone session queues a welcome
    /// line ahead of the text and keeps the radio up from then on.
    pub fn write<S: SoftDevice>(&mut self, link: &mut Bluetooth<S>, text: &str) -> usize {
        if !link.can_send() {
            return 0;
        }
        self.welcome(link);
        if link.optimize_power() {
            return 0;
        }
        self.push(text.as_bytes())
    }

    fn welcome<S: SoftDevice>(&mut self, link: &mut Bluetooth<S>) {
        let session = link.session_id();
        if session == self.last_session {
            return;
        }
        self.last_session = session;

        link.power_stay_suboptimal();
        if link.optimize_power() {
            return;
        }
        let line = format!(
            "{} alive {} on ttble {}\n",
            link.config().device_address,
            uptime_text(self.started.elapsed().as_secs()),
            env!("CARGO_PKG_VERSION"),
        );
        debug!("Welcoming session {:08x}", session);
        self.push(line.as_bytes());
    }

    fn push(&mut self, bytes: &[u8]) -> usize {
        let room = self.capacity.saturating_sub(self.buf.len());
        let taken = bytes.len().min(room);
        self.buf.extend(&bytes[..taken]);
        if taken < bytes.len() {
            self.overruns += 1;
            trace!("Outbox full; {} bytes discarded", bytes.len() - taken);
        }
        taken
    }

    /// Hand queued bytes to the link until it asks for a pause or the ring
    /// is empty. Returns the number of bytes handed over.
    pub fn drain<S: SoftDevice>(&mut self, link: &mut Bluetooth<S>) -> usize {
        let mut sent = 0;
        while let Some(byte) = self.buf.pop_front() {
            sent += 1;
            if !link.send_byte(byte) {
                break;
            }
        }
        sent
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Writes that did not fit
    pub fn overruns(&self) -> usize {
        self.overruns
    }
}

impl Default for Outbox {
    fn default() -> Self {
        Self::new(OUTBOX_CAPACITY)
    }
}

/// "1d 2h 3m 4s", leaving out leading units that are zero
pub fn uptime_text(secs: u64) -> String {
    let (days, hrs, mins, secs) = (
        secs / 86_400,
        secs / 3_600 % 24,
        secs / 60 % 60,
        secs % 60,
    );
    let mut out = String::new();
    if days > 0 {
        out.push_str(&format!("{}d ", days));
    }
    if hrs > 0 {
        out.push_str(&format!("{}h ", hrs));
    }
    if mins > 0 {
        out.push_str(&format!("{}m ", mins));
    }
    out.push_str(&format!("{}s", secs));
    out
}

/// One tick of the drain task; None once the link has been dropped
fn drain_tick<S: SoftDevice>(link: &SharedLink<S>, outbox: &SharedOutbox) -> Option<usize> {
    let mut link = link.lock();
    if link.is_dropped() {
        return None;
    }
    let drained = outbox.lock().drain(&mut link);
    Some(drained)
}

/// Drain `outbox` into the link every `period` until the link is dropped.
/// Resolves to the number of bytes handed over.
pub fn spawn_outbox<S>(link: SharedLink<S>, outbox: SharedOutbox, period: Duration) -> JoinHandle<usize>
where
    S: SoftDevice + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        let mut drained = 0;
        loop {
            ticker.tick().await;
            match drain_tick(&link, &outbox) {
                Some(n) => drained += n,
                None => {
                    debug!("Link dropped; outbox stopping");
                    break;
                }
            }
        }
        drained
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::event::{
        BleEvent, GapRole, GattsWriteOp, PeerAddr, BLE_HCI_REMOTE_USER_TERMINATED_CONNECTION,
    };
    use crate::ble::sim::SimStack;
    use crate::config::BluetoothConfig;

    const PHONE: u16 = 2;

    fn link() -> Bluetooth<SimStack> {
        let mut bt = Bluetooth::new(
            SimStack::new(),
            BluetoothConfig {
                device_address: 1234,
                ..Default::default()
            },
            Box::new(|_: &[u8]| {}),
            Box::new(|_: &[u8]| {}),
        );
        bt.init().expect("Init");
        bt
    }

    fn phone_listens(bt: &mut Bluetooth<SimStack>) {
        bt.dispatch(&BleEvent::Connected {
            conn_handle: PHONE,
            peer_addr: PeerAddr::new(1, [7; 6]),
            role: GapRole::Peripheral,
        });
        let cccd = bt.btp().rx_handles.cccd_handle;
        bt.dispatch(&BleEvent::GattsWrite {
            conn_handle: PHONE,
            handle: cccd,
            op: GattsWriteOp::WriteReq,
            data: vec![0x01, 0x00],
        });
    }

    fn queued(outbox: &Outbox) -> String {
        String::from_utf8(outbox.buf.iter().copied().collect()).expect("UTF-8")
    }

    #[test]
    fn test_nothing_queued_without_phone() {
        let mut bt = link();
        let mut outbox = Outbox::default();
        assert_eq!(outbox.write(&mut bt, "lost\n"), 0);
        assert!(outbox.is_empty());
    }

    #[test]
    fn test_welcome_once_per_session() {
        let mut bt = link();
        let mut outbox = Outbox::default();
        phone_listens(&mut bt);

        assert_eq!(outbox.write(&mut bt, "one\n"), 4);
        assert_eq!(outbox.write(&mut bt, "two\n"), 4);
        let text = queued(&outbox);
        assert!(text.starts_with("1234 alive 0s on ttble "));
        assert!(text.ends_with("\none\ntwo\n"));
        assert_eq!(text.matches("alive").count(), 1);

        bt.dispatch(&BleEvent::Disconnected {
            conn_handle: PHONE,
            reason: BLE_HCI_REMOTE_USER_TERMINATED_CONNECTION,
        });
        phone_listens(&mut bt);
        outbox.write(&mut bt, "");
        assert_eq!(queued(&outbox).matches("alive").count(), 2);
    }

    #[test]
    fn test_welcome_keeps_radio_up() {
        let mut bt = Bluetooth::new(
            SimStack::new(),
            BluetoothConfig {
                optimize_power: true,
                ..Default::default()
            },
            Box::new(|_: &[u8]| {}),
            Box::new(|_: &[u8]| {}),
        );
        bt.init().expect("Init");
        phone_listens(&mut bt);

        let mut outbox = Outbox::default();
        outbox.write(&mut bt, "hi\n");
        assert!(!bt.optimize_power());
        assert!(queued(&outbox).ends_with("hi\n"));
    }

    #[test]
    fn test_forced_power_optimisation_drops_output() {
        let mut bt = link();
        phone_listens(&mut bt);
        bt.force_optimize_power();

        let mut outbox = Outbox::default();
        assert_eq!(outbox.write(&mut bt, "quiet\n"), 0);
        assert!(outbox.is_empty());
    }

    #[test]
    fn test_drain_pauses_after_each_packet() {
        let mut bt = link();
        phone_listens(&mut bt);
        let mut outbox = Outbox::default();
        outbox.write(&mut bt, "a\nb\n");
        let expected = queued(&outbox);

        let mut drains = 0;
        while !outbox.is_empty() {
            assert!(outbox.drain(&mut bt) > 0);
            drains += 1;
            assert_eq!(bt.stack().notifications().len(), drains);
        }
        assert!(drains >= 3);

        let sent: Vec<u8> = bt.stack().notifications().concat();
        assert_eq!(String::from_utf8(sent).expect("UTF-8"), expected);
    }

    #[test]
    fn test_overflow_is_discarded() {
        let mut bt = link();
        phone_listens(&mut bt);
        let mut outbox = Outbox::new(64);
        outbox.write(&mut bt, "");
        let welcome = outbox.len();

        let taken = outbox.write(&mut bt, &"x".repeat(100));
        assert_eq!(taken, 64 - welcome);
        assert_eq!(outbox.len(), 64);
        assert_eq!(outbox.overruns(), 1);
        assert_eq!(outbox.write(&mut bt, "y"), 0);
    }

    #[test]
    fn test_uptime_text() {
        assert_eq!(uptime_text(0), "0s");
        assert_eq!(uptime_text(60), "1m 0s");
        assert_eq!(uptime_text(3_661), "1h 1m 1s");
        assert_eq!(uptime_text(86_400 + 5), "1d 5s");
    }

    #[tokio::test]
    async fn test_outbox_task_drains_until_drop() {
        let mut bt = link();
        phone_listens(&mut bt);
        let link = Arc::new(Mutex::new(bt));
        let outbox = Outbox::default().shared();

        let total = {
            let mut bt = link.lock();
            let mut outbox = outbox.lock();
            outbox.write(&mut bt, "first line\nsecond line\n");
            outbox.len()
        };

        let task = spawn_outbox(link.clone(), outbox.clone(), Duration::from_millis(1));
        for _ in 0..100 {
            if outbox.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert!(outbox.lock().is_empty());
        assert!(link
            .lock()
            .stack()
            .notifications()
            .contains(&b"second line\n".to_vec()));

        link.lock().drop_link();
        let drained = task.await.expect("Outbox task");
        assert_eq!(drained, total);
    }
}
