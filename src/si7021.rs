use std::{
    fmt::{Debug, Display, Formatter},
    sync::{Mutex, MutexGuard, PoisonError},
};

use bitfield::bitfield;
use log::{debug, error, warn};

use crate::bus::{I2cDevice, PeripheralManager};

/// I2C address of the sensor.
pub const I2C_ADDRESS: u8 = 0x40;

// Reset value of RH/T user register 1, used to identify the chip.
pub const CHIP_ID: u8 = 0x3A;

// Measure Relative Humidity, Hold Master Mode
const MEASRH_HOLD_CMD: u8 = 0xE5;
// Measure Relative Humidity, No Hold Master Mode
#[allow(dead_code)]
const MEASRH_NOHOLD_CMD: u8 = 0xF5;
// Measure Temperature, Hold Master Mode
const MEASTEMP_HOLD_CMD: u8 = 0xE3;
// Measure Temperature, No Hold Master Mode
#[allow(dead_code)]
const MEASTEMP_NOHOLD_CMD: u8 = 0xF3;
// Read Temperature Value from Previous RH Measurement
#[allow(dead_code)]
const READPREVTEMP_CMD: u8 = 0xE0;
// Reset
const RESET_CMD: u8 = 0xFE;
// Write RH/T User Register 1
const WRITERHT_REG_CMD: u8 = 0xE6;
// Read RH/T User Register 1
const READRHT_REG_CMD: u8 = 0xE7;
// Write Heater Control Register
const WRITEHEATER_REG_CMD: u8 = 0x51;
// Read Heater Control Register
const READHEATER_REG_CMD: u8 = 0x11;
// Read Electronic ID 1st Byte
#[allow(dead_code)]
const ID1_CMD: [u8; 2] = [0xFA, 0x0F];
// Read Electronic ID 2nd Byte
#[allow(dead_code)]
const ID2_CMD: [u8; 2] = [0xFC, 0xC9];
// Read Firmware Revision
#[allow(dead_code)]
const FIRMVERS_CMD: [u8; 2] = [0x84, 0xB8];

/// Minimum temperature in Celsius the sensor can measure.
pub const MIN_TEMP_C: f32 = -10.0;
/// Maximum temperature in Celsius the sensor can measure.
pub const MAX_TEMP_C: f32 = 85.0;
/// Minimum relative humidity in percent the sensor is specified for.
pub const MIN_HUMIDITY_RH: f32 = 0.0;
/// Maximum relative humidity in percent the sensor is specified for.
pub const MAX_HUMIDITY_RH: f32 = 80.0;
/// Maximum power consumption in micro-amperes when measuring temperature.
pub const MAX_POWER_CONSUMPTION_TEMP_UA: f32 = 120.0;
/// Maximum power consumption in micro-amperes when measuring humidity.
pub const MAX_POWER_CONSUMPTION_HUMIDITY_UA: f32 = 180.0;
/// Maximum bus frequency in kHz.
pub const MAX_FREQ_KHZ: f32 = 400.0;
/// Minimum bus frequency in kHz.
pub const MIN_FREQ_KHZ: f32 = 100.0;

const HEATER_CURRENT_MASK: u8 = 0x0F;

/// Driver for the Si7021 humidity and temperature sensor.
///
/// Every read is a fresh bus transaction. The device handle and the scratch
/// buffer live behind one lock, so concurrent reads from several threads are
/// serialized.
pub struct Si7021<D>
where
    D: I2cDevice,
{
    state: Mutex<State<D>>,
}

struct State<D> {
    device: Option<D>,
    buffer: [u8; 2],
}

impl<D> Si7021<D>
where
    D: I2cDevice,
{
    /// Opens the sensor on `bus` and verifies its identity.
    ///
    /// The device handle is closed again if the sensor cannot be verified.
    pub fn open<M>(manager: &mut M, bus: &str) -> Result<Self, Error<D::Error>>
    where
        M: PeripheralManager<Device = D>,
    {
        let device = manager.open_i2c_device(bus, I2C_ADDRESS).map_err(|e| {
            error!("si7021: failed to open {}: {:?}", bus, e);
            Error::Bus(e)
        })?;
        Self::new(device)
    }

    /// Creates a driver on an already opened device handle.
    ///
    /// Resets the device and checks the chip id. On failure the handle is
    /// closed before the error is returned.
    pub fn new(mut device: D) -> Result<Self, Error<D::Error>> {
        match connect(&mut device) {
            Ok(()) => Ok(Self {
                state: Mutex::new(State {
                    device: Some(device),
                    buffer: [0u8; 2],
                }),
            }),
            Err(e) => {
                if let Err(close_err) = device.close() {
                    warn!("si7021: failed to close device after {}: {:?}", e, close_err);
                }
                Err(e)
            }
        }
    }

    /// Returns `true` until the driver has been closed.
    pub fn is_connected(&self) -> bool {
        self.lock().device.is_some()
    }

    /// Reads the current temperature in degrees Celsius.
    pub fn read_temperature(&self) -> Result<f32, Error<D::Error>> {
        self.read_sample(MEASTEMP_HOLD_CMD)
            .map(|raw| compensate_temperature(raw.into()))
    }

    /// Reads the current relative humidity in percent.
    pub fn read_humidity(&self) -> Result<f32, Error<D::Error>> {
        self.read_sample(MEASRH_HOLD_CMD)
            .map(|raw| compensate_humidity(raw.into()))
    }

    /// Returns the contents of RH/T user register 1.
    pub fn user_register(&self) -> Result<UserRegister, Error<D::Error>> {
        let mut state = self.lock();
        let device = connected(&mut state.device)?;
        Ok(UserRegister(device.read_reg_byte(READRHT_REG_CMD)?))
    }

    /// Sets the measurement resolution, keeping the other user register bits.
    pub fn set_resolution(&self, resolution: Resolution) -> Result<(), Error<D::Error>> {
        self.modify_user_register(|reg| reg.set_resolution(resolution))
    }

    /// Switches the on-chip heater on or off.
    pub fn set_heater_enabled(&self, enabled: bool) -> Result<(), Error<D::Error>> {
        self.modify_user_register(|reg| reg.set_heater_enabled(enabled))
    }

    /// Returns the contents of the heater control register.
    pub fn heater_register(&self) -> Result<HeaterRegister, Error<D::Error>> {
        let mut state = self.lock();
        let device = connected(&mut state.device)?;
        Ok(HeaterRegister(device.read_reg_byte(READHEATER_REG_CMD)?))
    }

    /// Sets the heater current level in the range 0-15.
    ///
    /// Values above 15 are clamped.
    pub fn set_heater_current(&self, level: u8) -> Result<(), Error<D::Error>> {
        let mut state = self.lock();
        let device = connected(&mut state.device)?;
        let mut reg = HeaterRegister(device.read_reg_byte(READHEATER_REG_CMD)?);
        reg.set_heater_current(level.min(HEATER_CURRENT_MASK));
        device.write_reg_byte(WRITEHEATER_REG_CMD, reg.0)?;
        Ok(())
    }

    /// Closes the driver and the underlying device.
    ///
    /// The handle is dropped from the driver even when closing it fails.
    /// Closing an already closed driver does nothing.
    pub fn close(&self) -> Result<(), Error<D::Error>> {
        let device = self.lock().device.take();
        match device {
            Some(device) => {
                debug!("si7021: closing device");
                device.close().map_err(Error::Bus)
            }
            None => Ok(()),
        }
    }

    fn read_sample(&self, command: u8) -> Result<u16, Error<D::Error>> {
        let mut state = self.lock();
        let State { device, buffer } = &mut *state;
        let device = connected(device)?;

        // Hold master mode: the transfer stalls until the conversion is done.
        // msb[7:0] lsb[7:0], the trailing checksum byte is not read
        device.read_reg_buffer(command, buffer).map_err(|e| {
            error!("si7021: measurement {:#04x} failed: {:?}", command, e);
            Error::Bus(e)
        })?;
        Ok(as_u16(buffer[0], buffer[1]))
    }

    fn modify_user_register<F>(&self, f: F) -> Result<(), Error<D::Error>>
    where
        F: FnOnce(&mut UserRegister),
    {
        let mut state = self.lock();
        let device = connected(&mut state.device)?;
        let mut reg = UserRegister(device.read_reg_byte(READRHT_REG_CMD)?);
        f(&mut reg);
        device.write_reg_byte(WRITERHT_REG_CMD, reg.0)?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, State<D>> {
        // The state holds no invariant a panicking reader could break.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<D> Drop for Si7021<D>
where
    D: I2cDevice,
{
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("si7021: failed to close device on drop: {}", e);
        }
    }
}

fn connect<D: I2cDevice>(device: &mut D) -> Result<(), Error<D::Error>> {
    debug!("si7021: resetting...");
    device.write_byte(RESET_CMD)?;

    let chip_id = device.read_reg_byte(READRHT_REG_CMD)?;
    debug!("si7021: chip id {:#04x}", chip_id);
    if chip_id != CHIP_ID {
        return Err(Error::WrongDevice(chip_id));
    }
    Ok(())
}

fn connected<D: I2cDevice>(device: &mut Option<D>) -> Result<&mut D, Error<D::Error>> {
    device.as_mut().ok_or(Error::InvalidState)
}

/// Converts a raw temperature code into degrees Celsius.
///
/// Compensation formula from the Si7021-A20 datasheet, section 5.1.2.
pub fn compensate_temperature(raw: u32) -> f32 {
    ((175.72 * raw as f32) / 65536.0) - 46.85
}

/// Converts a raw humidity code into percent relative humidity.
///
/// Compensation formula from the Si7021-A20 datasheet, section 5.1.1.
pub fn compensate_humidity(raw: u32) -> f32 {
    ((125.0 * raw as f32) / 65536.0) - 6.0
}

/// Converts two bytes into a u16
fn as_u16(hi: u8, lo: u8) -> u16 {
    ((hi as u16) << 8) | (lo as u16)
}

bitfield! {
    /// RH/T user register 1.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct UserRegister(u8);
    impl Debug;
    pub bool, res1, set_res1: 7;
    pub bool, vdd_low, _: 6;
    pub bool, heater_enabled, set_heater_enabled: 2;
    pub bool, res0, set_res0: 0;
}

impl UserRegister {
    pub fn resolution(&self) -> Resolution {
        Resolution::from_bits(self.res1(), self.res0())
    }

    pub fn set_resolution(&mut self, resolution: Resolution) {
        let (res1, res0) = resolution.bits();
        self.set_res1(res1);
        self.set_res0(res0);
    }
}

bitfield! {
    /// Heater control register.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct HeaterRegister(u8);
    impl Debug;
    pub u8, heater_current, set_heater_current: 3, 0;
}

/// Measurement resolution of humidity and temperature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// 12 bit humidity, 14 bit temperature.
    Rh12Temp14,
    /// 8 bit humidity, 12 bit temperature.
    Rh8Temp12,
    /// 10 bit humidity, 13 bit temperature.
    Rh10Temp13,
    /// 11 bit humidity, 11 bit temperature.
    Rh11Temp11,
}

impl Resolution {
    fn from_bits(res1: bool, res0: bool) -> Self {
        match (res1, res0) {
            (false, false) => Self::Rh12Temp14,
            (false, true) => Self::Rh8Temp12,
            (true, false) => Self::Rh10Temp13,
            (true, true) => Self::Rh11Temp11,
        }
    }

    fn bits(self) -> (bool, bool) {
        match self {
            Self::Rh12Temp14 => (false, false),
            Self::Rh8Temp12 => (false, true),
            Self::Rh10Temp13 => (true, false),
            Self::Rh11Temp11 => (true, true),
        }
    }
}

/// Describes errors returned by the Si7021 driver
#[derive(Debug)]
pub enum Error<E: Debug> {
    /// The bus transaction failed (not acknowledged, timed out or rejected)
    Bus(E),
    /// The chip id read at connect time did not match the Si7021
    ///
    /// Carries the id that was read instead.
    WrongDevice(u8),
    /// The driver has been closed
    InvalidState,
}

impl<E: Debug> Display for Error<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        use Error::*;
        match self {
            Bus(error) => write!(f, "Bus error: {:?}", error),
            WrongDevice(id) => write!(
                f,
                "Wrong chip: expected id {:#04x}, got {:#04x}",
                CHIP_ID, id
            ),
            InvalidState => f.write_str("I2C device not open"),
        }
    }
}

impl<E: Debug> std::error::Error for Error<E> {}

impl<E: Debug> From<E> for Error<E> {
    fn from(error: E) -> Self {
        Error::Bus(error)
    }
}
