use std::{thread, time::Duration};

use anyhow::{Error, Result};
use log::*;

use si7021::{
    bus::linux::LinuxPeripheralManager,
    event::{self, SensorEvent},
    Si7021,
};

#[toml_cfg::toml_config]
pub struct Config {
    #[default("/dev/i2c-1")]
    i2c_bus: &'static str,
    #[default(2000)]
    poll_interval_ms: u64,
    // 0 keeps polling forever
    #[default(0)]
    samples: u64,
}

fn main() -> Result<()> {
    env_logger::init();
    let cfg = CONFIG;

    info!("Opening Si7021 on {}...", cfg.i2c_bus);
    let mut manager = LinuxPeripheralManager;
    let sensor = Si7021::open(&mut manager, cfg.i2c_bus)
        .map_err(|e| Error::msg(format!("{e}")))?;

    let mut sink = |event: SensorEvent| match serde_json::to_string(&event) {
        Ok(line) => println!("{line}"),
        Err(e) => warn!("Failed to encode {:?}: {}", event, e),
    };

    event::announce(&mut sink);

    let mut taken = 0;
    while cfg.samples == 0 || taken < cfg.samples {
        if let Err(e) = event::poll(&sensor, &mut sink) {
            warn!("Reading sensor failed: {}", e);
        }
        taken += 1;
        thread::sleep(Duration::from_millis(cfg.poll_interval_ms));
    }

    info!("Closing sensor...");
    sensor.close().map_err(|e| Error::msg(format!("{e}")))?;
    Ok(())
}
