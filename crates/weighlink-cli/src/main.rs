//! Weighlink device supervisor.
//!
//! Loads device descriptors, registers a simulated driver for each one and
//! prints every notification as a JSON line until the run time elapses or
//! Ctrl-C is pressed.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use weighlink_core::{DeviceId, DeviceType, ProtocolType};
use weighlink_hardware::config::{DescriptorSet, DeviceDescriptor, ManagerConfig};
use weighlink_hardware::mock::MockDriver;
use weighlink_hardware::notify::{ChannelSink, Notification};
use weighlink_hardware::{DeviceManager, DeviceMetadata, ProtocolSettings};

#[derive(Debug, Parser)]
#[command(name = "weighlink", version, about = "Supervise weighing station devices")]
struct Cli {
    /// JSON file with device descriptors; two demo devices are used if omitted
    #[arg(short, long, env = "WEIGHLINK_DESCRIPTORS")]
    descriptors: Option<PathBuf>,

    /// Stop after this many seconds (0 runs until Ctrl-C)
    #[arg(long, default_value_t = 0)]
    run_for: u64,

    /// Connect and poll the drivers instead of running them in demo mode
    #[arg(long)]
    live: bool,

    /// Notification queue capacity
    #[arg(long, default_value_t = 1024)]
    queue: usize,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let descriptors = match &cli.descriptors {
        Some(path) => DescriptorSet::from_json_file(path)
            .with_context(|| format!("failed to load descriptors from {}", path.display()))?,
        None => demo_descriptors()?,
    };

    let (sink, notifications) = ChannelSink::new(cli.queue);
    let printer = tokio::spawn(print_notifications(notifications));

    let manager = DeviceManager::new(sink, ManagerConfig::default());
    for descriptor in &descriptors.devices {
        register(&manager, descriptor)
            .with_context(|| format!("failed to register {}", descriptor.id))?;
    }
    info!(devices = manager.device_count(), "Devices registered");

    if cli.live {
        for (id, result) in manager.connect_all().await {
            if let Err(e) = result {
                warn!(device_id = %id, error = %e, "Connect failed");
            }
        }
        for (id, result) in manager.start_all().await {
            if let Err(e) = result {
                warn!(device_id = %id, error = %e, "Start failed");
            }
        }
    } else {
        for id in manager.device_ids() {
            manager
                .enter_demo(&id)
                .await
                .with_context(|| format!("failed to enter demo mode on {id}"))?;
        }
    }

    wait_for_exit(cli.run_for).await?;

    for (id, status) in manager.statuses() {
        info!(device_id = %id, state = %status.state, received = status.received_count, "Final status");
    }
    manager.shutdown().await;
    drop(manager);
    printer.await.context("notification printer failed")?;

    Ok(())
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn register(manager: &DeviceManager<ChannelSink>, descriptor: &DeviceDescriptor) -> Result<()> {
    let name = descriptor.metadata.name.clone();

    match descriptor.metadata.device_type {
        DeviceType::Scale => {
            let (driver, _handle) = MockDriver::scale(name);
            manager.register_from_descriptor(descriptor, driver)?;
        }
        DeviceType::Scanner => {
            let (driver, _handle) = MockDriver::scanner(name);
            manager.register_from_descriptor(descriptor, driver)?;
        }
        DeviceType::Sensor => {
            let (driver, _handle) = MockDriver::<f64>::new(descriptor.metadata.clone());
            let driver = driver.with_simulator(|tick| 20.0 + (tick % 10) as f64 * 0.1);
            manager.register_from_descriptor(descriptor, driver)?;
        }
    }
    Ok(())
}

fn demo_descriptors() -> Result<DescriptorSet> {
    let descriptor = |id: &str, device_type: DeviceType, name: &str| -> Result<DeviceDescriptor> {
        Ok(DeviceDescriptor {
            id: DeviceId::new(id)?,
            metadata: DeviceMetadata::new(device_type, name, ProtocolType::Simulated),
            protocol: ProtocolSettings::Simulated,
            reconnection: Default::default(),
            filter: Default::default(),
            polling_interval: Duration::from_millis(500),
            connection_timeout: Duration::from_secs(5),
        })
    };

    let set = DescriptorSet {
        devices: vec![
            descriptor("scale-1", DeviceType::Scale, "Dock 1 weighbridge")?,
            descriptor("gate-scanner", DeviceType::Scanner, "Gate scanner")?,
        ],
    };
    set.validate()?;
    Ok(set)
}

async fn print_notifications(mut notifications: mpsc::Receiver<Notification>) {
    while let Some(notification) = notifications.recv().await {
        match serde_json::to_string(&notification) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!(error = %e, "Cannot encode notification"),
        }
    }
}

async fn wait_for_exit(run_for: u64) -> Result<()> {
    if run_for == 0 {
        tokio::signal::ctrl_c().await.context("failed to listen for Ctrl-C")?;
        info!("Interrupted");
        return Ok(());
    }

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for Ctrl-C")?;
            info!("Interrupted");
        }
        () = tokio::time::sleep(Duration::from_secs(run_for)) => {
            info!(seconds = run_for, "Run time elapsed");
        }
    }
    Ok(())
}
