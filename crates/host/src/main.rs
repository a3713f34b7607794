//! usb-descdump
//!
//! Registers the emulated devices of a host configuration and prints the
//! descriptor streams a guest would read from each of them.

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use common::setup_logging;
use host::{
    Device, DeviceRegistry, HostConfig, StallHandler, TableDevice, TransferWorker, UsbError,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "usb-descdump")]
#[command(author, version, about = "Dump guest-visible USB descriptor streams")]
#[command(long_about = "
Loads the emulated devices listed in a host configuration and prints, for each
device, the legacy descriptor stream and the targeted stream of every
interface and alternate setting, as hex.

EXAMPLES:
    # Use the default configuration
    usb-descdump

    # Use a specific configuration
    usb-descdump --config ~/devices/wiimote.toml
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let path = HostConfig::default_path();
        HostConfig::default()
            .save(&path)
            .context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = match args.config.as_deref() {
        Some(path) => {
            let path = PathBuf::from(shellexpand::tilde(path).as_ref());
            HostConfig::load(Some(path)).context("Failed to load configuration")?
        }
        None => HostConfig::load_or_default(),
    };

    let log_level = args.log_level.as_deref().unwrap_or(&config.host.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;
    info!("usb-descdump v{}", env!("CARGO_PKG_VERSION"));

    let mut registry = DeviceRegistry::new();
    for table in config.devices {
        let id = registry.assign(table.vendor_id, table.product_id, table.bus, table.port)?;
        let mut device = TableDevice::new(id, table);
        if config.worker.enabled {
            device = device.with_worker(TransferWorker::spawn(Arc::new(StallHandler)));
        }
        registry.attach(Box::new(device))?;
    }

    if registry.is_empty() {
        println!("No devices configured.");
        return Ok(());
    }

    for id in registry.ids() {
        let device = registry.get(id)?;
        dump_device(device).with_context(|| format!("Failed to encode device {}", id))?;
    }

    Ok(())
}

fn dump_device(device: &dyn Device) -> Result<()> {
    let usb = |e: UsbError| anyhow!("{} ({})", e, device.error_name(e.code()));

    println!(
        "Device {} [{:04x}:{:04x}] {:?}",
        device.id(),
        device.vid().map_err(usb)?,
        device.pid().map_err(usb)?,
        device.kind()
    );
    println!("  v4: {}", hex(&device.descriptors_v4().map_err(usb)?));

    let configurations = device.configurations().map_err(usb)?;
    for index in 0..configurations.len() {
        let index = u8::try_from(index).context("Too many configurations")?;
        for interface in device.interfaces(index).map_err(usb)? {
            let (number, alt) = (interface.interface_number, interface.alternate_setting);
            debug!("Encoding interface {} alternate setting {}", number, alt);
            println!(
                "  v5 interface {} alt {}: {}",
                number,
                alt,
                hex(&device.descriptors_v5(number, alt).map_err(usb)?)
            );
        }
    }

    Ok(())
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
