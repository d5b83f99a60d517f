//! Plain sensor events for hosts that forward readings to an event sink.

use serde::Serialize;

use crate::bus::I2cDevice;
use crate::si7021::{Error, Si7021};

/// The two measurands of the Si7021.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Temperature,
    Humidity,
}

impl SensorKind {
    pub const ALL: [SensorKind; 2] = [SensorKind::Temperature, SensorKind::Humidity];

    pub fn unit(&self) -> &'static str {
        match self {
            SensorKind::Temperature => "°C",
            SensorKind::Humidity => "%RH",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SensorEvent {
    /// A sensor of this kind became available.
    Connected { kind: SensorKind },
    Reading { kind: SensorKind, value: f32 },
}

pub trait EventSink {
    fn publish(&mut self, event: SensorEvent);
}

impl<F> EventSink for F
where
    F: FnMut(SensorEvent),
{
    fn publish(&mut self, event: SensorEvent) {
        self(event)
    }
}

impl<D> Si7021<D>
where
    D: I2cDevice,
{
    /// Reads a fresh value for `kind`.
    pub fn read(&self, kind: SensorKind) -> Result<f32, Error<D::Error>> {
        match kind {
            SensorKind::Temperature => self.read_temperature(),
            SensorKind::Humidity => self.read_humidity(),
        }
    }
}

/// Publishes a `Connected` event for every measurand of the sensor.
pub fn announce<S: EventSink>(sink: &mut S) {
    for kind in SensorKind::ALL {
        sink.publish(SensorEvent::Connected { kind });
    }
}

/// Reads every measurand once and publishes the readings.
///
/// Stops at the first failed read; readings taken before it are already published.
pub fn poll<D, S>(driver: &Si7021<D>, sink: &mut S) -> Result<(), Error<D::Error>>
where
    D: I2cDevice,
    S: EventSink,
{
    for kind in SensorKind::ALL {
        let value = driver.read(kind)?;
        sink.publish(SensorEvent::Reading { kind, value });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::si7021::tests::FakeDevice;
    use crate::si7021::{compensate_humidity, compensate_temperature};

    #[test]
    fn announce_publishes_both_kinds() {
        let mut events = Vec::new();

        announce(&mut |event| events.push(event));

        assert_eq!(
            events,
            vec![
                SensorEvent::Connected {
                    kind: SensorKind::Temperature
                },
                SensorEvent::Connected {
                    kind: SensorKind::Humidity
                },
            ]
        );
    }

    #[test]
    fn poll_publishes_tagged_readings() {
        let driver = Si7021::new(FakeDevice::new()).unwrap();
        let mut events = Vec::new();

        poll(&driver, &mut |event| events.push(event)).unwrap();

        assert_eq!(
            events,
            vec![
                SensorEvent::Reading {
                    kind: SensorKind::Temperature,
                    value: compensate_temperature(0x664C),
                },
                SensorEvent::Reading {
                    kind: SensorKind::Humidity,
                    value: compensate_humidity(0x664C),
                },
            ]
        );
    }

    #[test]
    fn poll_after_close_publishes_nothing() {
        let driver = Si7021::new(FakeDevice::new()).unwrap();
        driver.close().unwrap();
        let mut events = Vec::new();

        let result = poll(&driver, &mut |event| events.push(event));

        assert!(matches!(result, Err(Error::InvalidState)));
        assert!(events.is_empty());
    }

    #[test]
    fn events_serialize_with_tag() {
        let event = SensorEvent::Reading {
            kind: SensorKind::Humidity,
            value: 56.5,
        };

        let json = serde_json::to_string(&event).unwrap();

        assert_eq!(json, r#"{"event":"reading","kind":"humidity","value":56.5}"#);
    }
}
