//! Basic example: find the nearest supported scale and stream its weight
//!
//! Run with: cargo run --example scan_and_weigh

use brewscale_ble::{
    BlePeripheralTransport, DriverRegistry, Error, Result, Scale, ScaleScanner, ScanEvent,
    Transport,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("brewscale_ble=debug".parse().unwrap()),
        )
        .init();

    println!("Starting scale discovery...");
    println!("Make sure your scale is powered on!\n");

    let registry = Arc::new(DriverRegistry::with_default_plugins());
    let scanner = ScaleScanner::new().await?;

    // Print every device the scanner sees, flagging the supported ones.
    let mut scan_events = scanner.subscribe();
    let printer_registry = Arc::clone(&registry);
    let printer = tokio::spawn(async move {
        while let Ok(event) = scan_events.recv().await {
            if let ScanEvent::Discovered(device) = event {
                let name = if device.name.is_empty() {
                    "<no name>"
                } else {
                    &device.name
                };
                let marker = if printer_registry.is_supported(&device) {
                    "  <- supported"
                } else {
                    ""
                };
                println!("  {} [{}] RSSI: {:?}{}", name, device.address, device.rssi, marker);
            }
        }
    });

    scanner.start_scan().await?;
    println!("Scanning for up to 30 seconds...\n");

    let device = scanner
        .wait_for_match(&registry, Duration::from_secs(30))
        .await?;
    scanner.stop_scan().await?;
    printer.abort();

    println!("\nFound supported scale: {} [{}]", device.name, device.address);

    let peripheral = scanner
        .peripheral_for(&device.address)
        .ok_or_else(|| Error::ConnectionFailed {
            reason: "peripheral dropped out of scan results".to_string(),
        })?;
    let transport: Arc<dyn Transport> = Arc::new(BlePeripheralTransport::new(peripheral));
    let driver = registry.create(&device, Arc::clone(&transport))?;
    let scale = Scale::new(driver, transport.as_ref());

    println!("Connecting with the {} driver...", scale.id());
    scale.connect().await?;
    println!("Connected! Streaming weight.");
    println!("Press Ctrl+C to exit.\n");

    let _weights = scale.on_weight_updated(|grams| {
        println!("  {:8.2} g", grams);
    });
    let _logs = scale.on_log_line(|line| {
        println!("  [driver] {line}");
    });

    // The update tick drives keep-alives and reconnection.
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nExiting...");
                break;
            }
            _ = tokio::time::sleep(Duration::from_secs(1)) => {
                scale.update().await;
            }
        }
    }

    scale.disconnect().await?;
    println!("Done!");

    Ok(())
}
