use core::fmt::Debug;

use embedded_hal::blocking::i2c::*;

/// A peripheral endpoint on a two-wire bus, already bound to its 7-bit address.
///
/// The driver only ever talks to the device through this capability, so any
/// transport (a real bus, a mock, a bridge chip) can stand in for the hardware.
pub trait I2cDevice {
    type Error: Debug;

    /// Sends a bare one-byte command.
    fn write_byte(&mut self, command: u8) -> Result<(), Self::Error>;

    /// Writes `value` into `register`.
    fn write_reg_byte(&mut self, register: u8, value: u8) -> Result<(), Self::Error>;

    /// Reads a single byte from `register`.
    fn read_reg_byte(&mut self, register: u8) -> Result<u8, Self::Error>;

    /// Writes `register` and fills `buffer` from the same transaction.
    fn read_reg_buffer(&mut self, register: u8, buffer: &mut [u8]) -> Result<(), Self::Error>;

    /// Releases the device handle.
    fn close(self) -> Result<(), Self::Error>
    where
        Self: Sized;
}

/// Hands out device handles for a named bus.
pub trait PeripheralManager {
    type Device: I2cDevice;

    fn open_i2c_device(
        &mut self,
        bus: &str,
        address: u8,
    ) -> Result<Self::Device, <Self::Device as I2cDevice>::Error>;
}

/// An `embedded-hal` blocking I2C bus pinned to one device address.
pub struct BusDevice<T>
where
    T: WriteRead + Write,
{
    i2c: T,
    address: u8,
}

impl<T> BusDevice<T>
where
    T: WriteRead + Write,
{
    pub fn new(i2c: T, address: u8) -> Self {
        Self { i2c, address }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    /// Releases the underlying I2C bus.
    pub fn release(self) -> T {
        self.i2c
    }
}

impl<I2C, E> I2cDevice for BusDevice<I2C>
where
    I2C: Write<Error = E> + WriteRead<Error = E>,
    E: Debug,
{
    type Error = E;

    fn write_byte(&mut self, command: u8) -> Result<(), E> {
        self.i2c.write(self.address, &[command])
    }

    fn write_reg_byte(&mut self, register: u8, value: u8) -> Result<(), E> {
        self.i2c.write(self.address, &[register, value])
    }

    fn read_reg_byte(&mut self, register: u8) -> Result<u8, E> {
        let mut buffer = [0u8; 1];
        self.i2c
            .write_read(self.address, &[register], &mut buffer)?;
        Ok(buffer[0])
    }

    fn read_reg_buffer(&mut self, register: u8, buffer: &mut [u8]) -> Result<(), E> {
        self.i2c.write_read(self.address, &[register], buffer)
    }

    fn close(self) -> Result<(), E> {
        drop(self.release());
        Ok(())
    }
}

#[cfg(feature = "linux")]
pub mod linux {
    use linux_embedded_hal::{i2cdev::linux::LinuxI2CError, I2cdev};
    use log::debug;

    use super::{BusDevice, PeripheralManager};

    /// Opens devices on Linux `i2c-dev` character devices such as `/dev/i2c-1`.
    #[derive(Debug, Default)]
    pub struct LinuxPeripheralManager;

    impl PeripheralManager for LinuxPeripheralManager {
        type Device = BusDevice<I2cdev>;

        fn open_i2c_device(
            &mut self,
            bus: &str,
            address: u8,
        ) -> Result<BusDevice<I2cdev>, LinuxI2CError> {
            debug!("opening {} at {:#04x}", bus, address);
            let i2c = I2cdev::new(bus)?;
            Ok(BusDevice::new(i2c, address))
        }
    }
}

#[cfg(test)]
mod tests {
    use embedded_hal_mock::i2c::{Mock as I2cMock, Transaction};
    use embedded_hal_mock::MockError;
    use std::io::ErrorKind;

    use super::*;

    const ADDRESS: u8 = 0x40;

    #[test]
    fn write_byte_sends_single_command() {
        let expectations = [Transaction::write(ADDRESS, vec![0xFE])];
        let mut device = BusDevice::new(I2cMock::new(&expectations), ADDRESS);

        device.write_byte(0xFE).unwrap();

        device.release().done();
    }

    #[test]
    fn register_reads_use_write_read() {
        let expectations = [
            Transaction::write_read(ADDRESS, vec![0xE7], vec![0x3A]),
            Transaction::write_read(ADDRESS, vec![0xE3], vec![0x66, 0x4C]),
        ];
        let mut device = BusDevice::new(I2cMock::new(&expectations), ADDRESS);

        assert_eq!(device.read_reg_byte(0xE7).unwrap(), 0x3A);
        let mut buffer = [0u8; 2];
        device.read_reg_buffer(0xE3, &mut buffer).unwrap();
        assert_eq!(buffer, [0x66, 0x4C]);

        device.release().done();
    }

    #[test]
    fn register_write_prefixes_register() {
        let expectations = [Transaction::write(ADDRESS, vec![0x51, 0x0F])];
        let mut device = BusDevice::new(I2cMock::new(&expectations), ADDRESS);

        device.write_reg_byte(0x51, 0x0F).unwrap();

        device.release().done();
    }

    #[test]
    fn bus_errors_are_propagated() {
        let expectations = [Transaction::write_read(ADDRESS, vec![0xE7], vec![0x00])
            .with_error(MockError::Io(ErrorKind::Other))];
        let mut device = BusDevice::new(I2cMock::new(&expectations), ADDRESS);

        assert!(device.read_reg_byte(0xE7).is_err());

        device.release().done();
    }
}
