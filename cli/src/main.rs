// ttble: BLE transport toolbox
//
// Checks and queries the documentation navtree of the transport, prints its
// UUIDs, and replays connection scenarios against the simulated stack.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;
use ttble_core::ble::discovery::{DiscoveredCharacteristic, DiscoveredService};
use ttble_core::ble::event::{GapRole, GattsWriteOp, PeerAddr};
use ttble_core::ble::gatt::{
    BLE_CONN_HANDLE_INVALID, BTP_MAX_DATA_LEN, NRF_BLE_MAX_MTU_SIZE,
};
use ttble_core::ble::uuid::{
    BLE_UUID_BTP_RX_CHARACTERISTIC, BLE_UUID_BTP_SERVICE, BLE_UUID_BTP_TX_CHARACTERISTIC,
    BTC_RX_CHAR_UUID, BTC_SERVICE_UUID, BTP_BASE_UUID,
};
use ttble_core::ble::{
    adv, event_channel, spawn_event_pump, spawn_outbox, Outbox, Uuid128, OUTBOX_PERIOD,
};
use ttble_core::docindex::{self, NavChildren, NavIndex};
use ttble_core::{BleEvent, Bluetooth, DiscoveryEvent, SimStack, StackEvent};

#[derive(Parser)]
#[command(name = "ttble")]
#[command(about = "ttble: BTP/BTC Bluetooth transport toolbox", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Work with the documentation navtree
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },
    /// Show the service and characteristic UUIDs
    Uuid,
    /// Replay a phone session (and optionally a BTC session) on the simulated stack
    Simulate {
        /// Also connect out to a simulated BTC peripheral
        #[arg(short, long)]
        central: bool,
        /// Line the node sends to the phone
        #[arg(short, long, default_value = "$STATUS,OK")]
        line: String,
    },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum IndexAction {
    /// Validate a navtree file
    Check { path: Option<PathBuf> },
    /// List every symbol
    List { path: Option<PathBuf> },
    /// Find one symbol
    Lookup {
        symbol: String,
        #[arg(short, long)]
        path: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Index { action } => cmd_index(action),
        Commands::Uuid => cmd_uuid(),
        Commands::Simulate { central, line } => cmd_simulate(central, line).await,
        Commands::Config { action } => cmd_config(action),
    }
}

fn index_path(path: Option<PathBuf>) -> Result<PathBuf> {
    match path {
        Some(path) => Ok(path),
        None => config::Config::load()?
            .index_path
            .map(PathBuf::from)
            .context("No navtree given and no index_path configured"),
    }
}

fn cmd_index(action: IndexAction) -> Result<()> {
    match action {
        IndexAction::Check { path } => {
            let path = index_path(path)?;
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let violations = docindex::check(&text).context("Failed to parse navtree")?;

            if violations.is_empty() {
                let index = NavIndex::parse(&text)?;
                println!(
                    "{} {} ({} entries)",
                    "✓".green(),
                    path.display(),
                    index.len()
                );
            } else {
                for violation in &violations {
                    println!("  {} {}", "✗".red(), violation);
                }
                anyhow::bail!("{} violation(s) in {}", violations.len(), path.display());
            }
        }

        IndexAction::List { path } => {
            let index = NavIndex::load(index_path(path)?)?;
            for (path, entry) in index.symbols() {
                let kind = match &entry.children {
                    NavChildren::Leaf => String::new(),
                    NavChildren::Inline(children) => format!(" ({} members)", children.len()),
                    NavChildren::External(reference) => format!(" -> {}", reference),
                };
                println!(
                    "  {:<18} {:<36} {}{}",
                    path.dimmed(),
                    entry.name.bright_cyan(),
                    entry.link.as_deref().unwrap_or("-"),
                    kind
                );
            }
        }

        IndexAction::Lookup { symbol, path } => {
            let index = NavIndex::load(index_path(path)?)?;
            let entry = index
                .lookup(&symbol)
                .with_context(|| format!("Symbol not found: {}", symbol))?;
            println!("{}", entry.name.bold());
            println!("  Page:   {}", entry.page().unwrap_or("-"));
            println!("  Anchor: {}", entry.anchor().unwrap_or("-"));
            if let NavChildren::Inline(children) = &entry.children {
                for child in children {
                    println!("  • {}", child.name.bright_cyan());
                }
            }
        }
    }

    Ok(())
}

fn print_uuid(label: &str, uuid: &Uuid128) {
    println!(
        "  {:<16} {}  shortcut 0x{:04X}  bytes {}",
        label,
        uuid.to_uuid().to_string().bright_yellow(),
        uuid.shortcut(),
        hex::encode(uuid.0)
    );
}

fn cmd_uuid() -> Result<()> {
    println!("{}", "BTP (peripheral)".bold());
    print_uuid("base", &BTP_BASE_UUID);
    print_uuid("service", &BTP_BASE_UUID.with_shortcut(BLE_UUID_BTP_SERVICE));
    print_uuid(
        "tx (write)",
        &BTP_BASE_UUID.with_shortcut(BLE_UUID_BTP_TX_CHARACTERISTIC),
    );
    print_uuid(
        "rx (notify)",
        &BTP_BASE_UUID.with_shortcut(BLE_UUID_BTP_RX_CHARACTERISTIC),
    );
    println!();
    println!("{}", "BTC (central)".bold());
    print_uuid("service", &BTC_SERVICE_UUID);
    print_uuid("rx (notify)", &BTC_RX_CHAR_UUID);
    println!();
    println!(
        "Max payload {} bytes, MTU offered {}",
        BTP_MAX_DATA_LEN, NRF_BLE_MAX_MTU_SIZE
    );
    Ok(())
}

const PHONE_HANDLE: u16 = 0;
const BTC_HANDLE: u16 = 1;

async fn cmd_simulate(central: bool, line: String) -> Result<()> {
    let mut bt_config = config::Config::load()?.bluetooth;
    bt_config.central_enabled = bt_config.central_enabled || central;

    let from_phone = Arc::new(Mutex::new(Vec::new()));
    let from_btc = Arc::new(Mutex::new(Vec::new()));
    let phone_sink = from_phone.clone();
    let btc_sink = from_btc.clone();

    let mut link = Bluetooth::new(
        SimStack::new(),
        bt_config,
        Box::new(move |data: &[u8]| phone_sink.lock().extend_from_slice(data)),
        Box::new(move |data: &[u8]| btc_sink.lock().extend_from_slice(data)),
    );
    link.init().context("Bluetooth init failed")?;

    let rx_cccd = link.btp().rx_handles.cccd_handle;
    let tx_value = link.btp().tx_handles.value_handle;
    let btc_uuids = link.btc().map(|btc| (btc.service_uuid, btc.rx_uuid));

    let link = Arc::new(Mutex::new(link));
    let (tx, rx) = event_channel();
    let pump = spawn_event_pump(link.clone(), rx);

    let mut events: Vec<StackEvent> = vec![
        BleEvent::Connected {
            conn_handle: PHONE_HANDLE,
            peer_addr: PeerAddr::new(1, [0x11, 0x22, 0x33, 0x44, 0x55, 0x66]),
            role: GapRole::Peripheral,
        }
        .into(),
        BleEvent::GattsWrite {
            conn_handle: PHONE_HANDLE,
            handle: rx_cccd,
            op: GattsWriteOp::WriteReq,
            data: vec![0x01, 0x00],
        }
        .into(),
        BleEvent::GattsWrite {
            conn_handle: PHONE_HANDLE,
            handle: tx_value,
            op: GattsWriteOp::WriteCmd,
            data: b"/status\n".to_vec(),
        }
        .into(),
    ];

    if central {
        if let Some((service_uuid, rx_uuid)) = btc_uuids {
            let peer = PeerAddr::new(0, [0xA1, 0xB2, 0xC3, 0xD4, 0xE5, 0xF6]);
            let btc_events: [StackEvent; 5] = [
                BleEvent::AdvReport {
                    peer_addr: peer,
                    rssi: -60,
                    data: adv::build_adv_data("bGeigie", &[BTC_SERVICE_UUID])?,
                }
                .into(),
                BleEvent::Connected {
                    conn_handle: BTC_HANDLE,
                    peer_addr: peer,
                    role: GapRole::Central,
                }
                .into(),
                DiscoveryEvent::Complete {
                    conn_handle: BTC_HANDLE,
                    service: DiscoveredService {
                        srv_uuid: service_uuid,
                        characteristics: vec![DiscoveredCharacteristic {
                            uuid: rx_uuid,
                            handle_decl: 0x10,
                            handle_value: 0x11,
                            cccd_handle: 0x12,
                        }],
                    },
                }
                .into(),
                BleEvent::GattcWriteRsp {
                    conn_handle: BTC_HANDLE,
                    handle: 0x12,
                }
                .into(),
                BleEvent::GattcHvx {
                    conn_handle: BTC_HANDLE,
                    handle: 0x11,
                    data: b"$BNRDD,204,42,A\r\n".to_vec(),
                }
                .into(),
            ];
            events.extend(btc_events);
        }
    }

    debug!("Replaying {} stack events", events.len());
    for event in events {
        tx.send(event).await.context("Event pump stopped early")?;
    }
    drop(tx);
    let applied = pump.await.context("Event pump failed")?;

    let outbox = Outbox::default().shared();
    let queued = {
        let mut link = link.lock();
        let mut outbox = outbox.lock();
        outbox.write(&mut link, &line) + outbox.write(&mut link, "\n")
    };
    let drainer = spawn_outbox(link.clone(), outbox.clone(), OUTBOX_PERIOD);
    while !outbox.lock().is_empty() {
        tokio::time::sleep(OUTBOX_PERIOD).await;
    }
    drainer.abort();

    let mut link = link.lock();
    let session = link.session_id();
    let packets = link.stack().notifications().len();

    println!("{}", "Simulation".bold());
    println!("  Events applied:  {}", applied);
    println!("  Session id:      {:08x}", session);
    println!("  Phone wrote:     {:?}", String::from_utf8_lossy(&from_phone.lock()));
    println!("  Line queued:     {} bytes", queued);
    println!("  Packets sent:    {}", packets);
    if central {
        let btc_handle = link.btc_conn_handle();
        println!(
            "  BTC link:        {}",
            if btc_handle == BLE_CONN_HANDLE_INVALID {
                "down".red().to_string()
            } else {
                format!("0x{:04x}", btc_handle).green().to_string()
            }
        );
        println!("  BTC sent:        {:?}", String::from_utf8_lossy(&from_btc.lock()));
    }
    println!();

    println!("{}", "Stack calls".bold());
    for call in link.stack().calls() {
        println!("  {:?}", call);
    }

    link.drop_link();
    Ok(())
}

fn cmd_config(action: ConfigAction) -> Result<()> {
    let mut config = config::Config::load()?;

    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), value);
        }

        ConfigAction::Get { key } => {
            if let Some(value) = config.get(&key) {
                println!("{} = {}", key.bright_cyan(), value);
            } else {
                anyhow::bail!("Unknown config key: {}", key);
            }
        }

        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            println!();

            for (key, value) in config.list() {
                println!("  {:<20} {}", key.bright_cyan(), value);
            }
        }
    }

    Ok(())
}
