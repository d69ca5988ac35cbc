//! Tare example: connect to the nearest supported scale, zero it, then
//! watch the reading settle
//!
//! Run with: cargo run --example tare

use brewscale_ble::{
    BlePeripheralTransport, DriverRegistry, Error, Result, Scale, ScaleScanner, Transport,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (minimal)
    tracing_subscriber::fmt().with_env_filter("warn").init();

    println!("Tare");
    println!("====\n");
    println!("Looking for a supported scale...\n");

    let registry = DriverRegistry::with_default_plugins();
    let scanner = ScaleScanner::new().await?;
    scanner.start_scan().await?;

    let device = scanner
        .wait_for_match(&registry, Duration::from_secs(30))
        .await?;
    scanner.stop_scan().await?;

    let label = if device.name.is_empty() {
        device.address.clone()
    } else {
        device.name.clone()
    };
    println!("Found {label}");
    println!("Connecting...\n");

    let peripheral = scanner
        .peripheral_for(&device.address)
        .ok_or_else(|| Error::ConnectionFailed {
            reason: "peripheral dropped out of scan results".to_string(),
        })?;
    let transport: Arc<dyn Transport> = Arc::new(BlePeripheralTransport::new(peripheral));
    let driver = registry.create(&device, Arc::clone(&transport))?;
    let scale = Scale::new(driver, transport.as_ref());
    scale.connect().await?;

    // Give the first weight frames a moment to arrive.
    for _ in 0..3 {
        scale.update().await;
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    println!("Before tare: {:8.2} g", scale.weight());

    println!("Taring...\n");
    scale.tare().await?;

    // Watch the reading settle back to zero.
    for _ in 0..5 {
        scale.update().await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        let battery = scale
            .battery()
            .map(|percent| format!("{percent}%"))
            .unwrap_or_else(|| "unknown".to_string());
        println!("  {:8.2} g  (battery: {})", scale.weight(), battery);
    }

    scale.disconnect().await?;
    println!("\nDone!");

    Ok(())
}
