//! Live pressure monitoring example
//!
//! Run with: cargo run --example monitor -- AA:BB:CC:DD:EE:FF

use btleplug::api::{Central, ScanFilter};
use m5600_ble::{
    BtleplugConnector, DeviceAddress, Result, SessionConfig, SessionEvent, SessionManager,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let Some(address) = std::env::args().nth(1) else {
        eprintln!("Usage: cargo run --example monitor -- <AA:BB:CC:DD:EE:FF>");
        return Ok(());
    };
    // Fail early on a typo instead of after the scan.
    let target = DeviceAddress::parse(&address)?;

    println!("Pressure Monitor");
    println!("================\n");

    let connector = BtleplugConnector::new().await?;

    // The adapter only resolves peripherals it has seen advertising.
    println!("Scanning for {}...", target);
    connector.adapter().start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(Duration::from_secs(5)).await;
    connector.adapter().stop_scan().await?;

    let session = Arc::new(SessionManager::with_config(
        connector,
        SessionConfig::default().with_read_on_ready(true),
    ));
    session.spawn_event_loop()?;

    let mut events = session.subscribe();
    session.connect(&address)?;

    println!("Press Ctrl+C to exit.\n");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nExiting...");
                break;
            }
            event = events.recv() => match event {
                Ok(SessionEvent::StateChanged { state, .. }) => println!("[{}]", state),
                Ok(SessionEvent::ServicesReady { subscribed, .. }) => {
                    println!("Streaming {:?}", subscribed);
                }
                Ok(SessionEvent::ReadingAvailable { reading, .. }) => {
                    println!(
                        "{:7.2} psi ({:5.3} bar)  {:5.1}°C ({:5.1}°F)  battery {:3}%  {}",
                        reading.pressure_psi,
                        reading.pressure_bar(),
                        reading.temperature_celsius,
                        reading.temperature_fahrenheit(),
                        reading.battery_percent,
                        reading.formatted_timestamp()
                    );
                }
                Ok(SessionEvent::Error { error, .. }) => println!("Error: {}", error),
                Ok(SessionEvent::Disconnected { address }) => {
                    println!("Disconnected from {}", address);
                    break;
                }
                Ok(SessionEvent::Connected { address }) => println!("Connected to {}", address),
                Err(RecvError::Lagged(missed)) => println!("({} events missed)", missed),
                Err(RecvError::Closed) => break,
            }
        }
    }

    session.disconnect();
    // Give the link a moment to report the disconnect.
    tokio::time::sleep(Duration::from_millis(500)).await;
    session.close();

    Ok(())
}
