//! Demo driver for the commissioning policy layer
//!
//! Runs the full link runtime against in-process collaborators and plays
//! a scripted session: a central connects and bonds, subscribes, scans,
//! submits credentials, drops the link to show the reconnection ladder,
//! and finally erases the device.

mod mock;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use commission_core::{
    AccessOp, AddrType, AttributeId, ChannelId, Debouncer, LinkEvent, LinkRuntime, MemoryStore,
    PeerAddress, PeerIdentity, PolicyConfig,
};

use mock::{ConsoleDisplay, SimTransport, SimWifi};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Advertised device name
    #[arg(long, default_value = "commissioner")]
    device_name: String,

    /// Scan-response device identifier
    #[arg(long, default_value = "CMSN")]
    device_id: String,

    /// Pairing window length in seconds
    #[arg(long, default_value_t = 60)]
    pairing_window_secs: u64,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = PolicyConfig::new()
        .with_device_name(cli.device_name)
        .with_device_id(cli.device_id)
        .with_pairing_window(Duration::from_secs(cli.pairing_window_secs));

    let transport = Arc::new(SimTransport::new(PeerAddress::new([
        0x3C, 0x71, 0xBF, 0x4A, 0x2D, 0xE0,
    ])));
    let (runtime, events) = LinkRuntime::new(
        config,
        Box::new(MemoryStore::new()),
        transport,
        Arc::new(SimWifi),
        Arc::new(ConsoleDisplay),
    );
    let runtime = tokio::spawn(runtime.run());

    let central = PeerIdentity::new(
        PeerAddress::new([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]),
        AddrType::Random,
    );
    let step = Duration::from_millis(400);

    info!("--- central connects and bonds ---");
    events
        .send(LinkEvent::ConnectionEstablished { peer: central })
        .ok();
    events
        .send(LinkEvent::PairingComplete { peer: central })
        .ok();
    tokio::time::sleep(step).await;

    info!("--- central subscribes; scan runs automatically ---");
    events
        .send(LinkEvent::SubscriptionChanged {
            channel: ChannelId::Status,
            enabled: true,
        })
        .ok();
    events
        .send(LinkEvent::SubscriptionChanged {
            channel: ChannelId::ScanResult,
            enabled: true,
        })
        .ok();
    tokio::time::sleep(step).await;

    info!("--- central submits credentials ---");
    events
        .send(LinkEvent::AttributeAccess {
            attribute: AttributeId::Characteristic(ChannelId::CredentialSubmit),
            op: AccessOp::WriteCharacteristic,
            payload: b"demo-net/demo-pass".to_vec(),
        })
        .ok();
    tokio::time::sleep(step).await;

    info!("--- link drops; reconnection ladder runs ---");
    events
        .send(LinkEvent::Disconnected {
            reason: "supervision timeout".to_string(),
        })
        .ok();
    tokio::time::sleep(step).await;
    events
        .send(LinkEvent::ConnectFailed {
            reason: "direct attempt timed out".to_string(),
        })
        .ok();
    tokio::time::sleep(step).await;
    events
        .send(LinkEvent::AdvertisementObserved { peer: central })
        .ok();
    events
        .send(LinkEvent::ConnectionEstablished { peer: central })
        .ok();
    tokio::time::sleep(step).await;

    info!("--- held button (pairing window, then erase) ---");
    // Replay a 5.2 s hold through the debouncer the way the input
    // sampling task would: medium fires at 2 s, long at 5 s
    let t0 = std::time::Instant::now();
    let mut debouncer = Debouncer::new(
        Duration::from_millis(50),
        Duration::from_secs(2),
        Duration::from_secs(5),
        t0,
    );
    let mut t = t0;
    for _ in 0..520 {
        t += Duration::from_millis(10);
        if let Some(press) = debouncer.sample(true, t) {
            events.send(LinkEvent::Button(press)).ok();
        }
    }
    tokio::time::sleep(step).await;

    drop(events);
    runtime.await.ok();
    info!("demo session complete");
}

/// Setup logging based on verbosity level
fn setup_logging(verbose: bool) {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
