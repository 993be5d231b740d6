//! Attach to a debug router and follow the topology.
//!
//! Usage: cargo run --example attach -- ws://127.0.0.1:19783 room-1 [--debug] [--no-wait]

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use devtools_bridge::{DebugHost, Endpoint, HostOptions, Result, TopologyEvent};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Types
// ============================================================================

/// Command-line arguments.
#[derive(Debug, Clone)]
struct Args {
    address: String,
    room: String,
    debug: bool,
    no_wait: bool,
}

impl Args {
    /// Parse command-line arguments.
    fn parse() -> Self {
        let args: Vec<String> = std::env::args().skip(1).collect();
        let mut positional = args.iter().filter(|a| !a.starts_with("--"));
        Self {
            address: positional
                .next()
                .cloned()
                .unwrap_or_else(|| "ws://127.0.0.1:19783".to_owned()),
            room: positional.next().cloned().unwrap_or_else(|| "default".to_owned()),
            debug: args.iter().any(|a| a == "--debug"),
            no_wait: args.iter().any(|a| a == "--no-wait"),
        }
    }
}

// ============================================================================
// Functions
// ============================================================================

/// Initialize tracing/logging.
fn init_logging(debug: bool) {
    let filter = if debug {
        "devtools_bridge=debug"
    } else {
        "devtools_bridge=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.debug);

    let host = DebugHost::builder()
        .options(HostOptions::new().with_connect_timeout(Duration::from_secs(5)))
        .build()?;

    let mut events = host.topology().subscribe();
    host.start(Endpoint::new(&args.address, &args.room)).await?;
    println!("[Attach] Connected to {} (room {})", args.address, args.room);

    if args.no_wait {
        println!("[--no-wait] Skipping wait");
        host.stop().await;
        return Ok(());
    }

    println!("Press Ctrl+C to exit...");
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(TopologyEvent::DevicesChanged { added, removed }) => {
                    println!("[Devices] +{added:?} -{removed:?}");
                }
                Ok(TopologyEvent::ActiveDeviceChanged { device_id }) => {
                    println!("[Devices] active: {device_id:?}");
                }
                Ok(TopologyEvent::SessionsChanged { device_id }) => {
                    for session in host.topology().sessions(&device_id) {
                        println!("        [{}] {} {}", session.id, session.kind.as_str(), session.url);
                    }
                }
                Ok(TopologyEvent::SessionSelected { device_id, session_id }) => {
                    println!("[Sessions] {device_id} selected {session_id:?}");
                }
                Err(e) => println!("[Events] {e}"),
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    host.stop().await;
    Ok(())
}
