//! Async event pump
//!
//! The stack produces events from its own context; they are sent down an
//! mpsc channel and applied to the shared link by a single task.

use super::discovery::DiscoveryEvent;
use super::event::BleEvent;
use super::link::Bluetooth;
use super::stack::SoftDevice;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Capacity of the channel returned by [`event_channel`]
pub const EVENT_QUEUE_DEPTH: usize = 32;

/// Anything the stack reports to the application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StackEvent {
    Ble(BleEvent),
    Discovery(DiscoveryEvent),
}

impl From<BleEvent> for StackEvent {
    fn from(event: BleEvent) -> Self {
        StackEvent::Ble(event)
    }
}

impl From<DiscoveryEvent> for StackEvent {
    fn from(event: DiscoveryEvent) -> Self {
        StackEvent::Discovery(event)
    }
}

/// A link shared between the pump and the rest of the application
pub type SharedLink<S> = Arc<Mutex<Bluetooth<S>>>;

pub fn event_channel() -> (mpsc::Sender<StackEvent>, mpsc::Receiver<StackEvent>) {
    mpsc::channel(EVENT_QUEUE_DEPTH)
}

/// Apply one event; false once the link has been dropped
fn apply<S: SoftDevice>(link: &SharedLink<S>, event: StackEvent) -> bool {
    let mut link = link.lock();
    if link.is_dropped() {
        return false;
    }
    match event {
        StackEvent::Ble(event) => link.dispatch(&event),
        StackEvent::Discovery(event) => {
            if let Some(btc_event) = link.on_discovery(&event) {
                debug!("BTC event {:?}", btc_event.evt_type);
            }
        }
    }
    true
}

/// Run the pump until the channel closes or the link is dropped.
/// Resolves to the number of events applied.
pub fn spawn_event_pump<S>(
    link: SharedLink<S>,
    mut rx: mpsc::Receiver<StackEvent>,
) -> JoinHandle<usize>
where
    S: SoftDevice + 'static,
{
    tokio::spawn(async move {
        let mut applied = 0;
        while let Some(event) = rx.recv().await {
            if !apply(&link, event) {
                debug!("Link dropped; event pump stopping");
                break;
            }
            applied += 1;
        }
        applied
    })
}
