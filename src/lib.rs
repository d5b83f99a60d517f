//! Driver for the Silicon Labs Si7021 humidity and temperature sensor.

pub mod bus;
pub mod event;
pub mod si7021;

pub use bus::{BusDevice, I2cDevice, PeripheralManager};
pub use event::{SensorEvent, SensorKind};
pub use si7021::{compensate_humidity, compensate_temperature, Error, Si7021, I2C_ADDRESS};
