//! Environmental sensor sources.

use std::ops::RangeInclusive;

use rand::Rng;

use crate::wire::SensorData;

/// Temperature range of the synthesized sensor, °C.
const TEMPERATURE_RANGE: RangeInclusive<i16> = -45..=45;

/// Brightness range of the synthesized sensor, lux.
const BRIGHTNESS_RANGE: RangeInclusive<u16> = 350..=550;

/// Where a slave's readings come from when the master polls.
pub trait SensorSource: Send {
    /// Take a fresh reading.
    fn sample(&mut self) -> SensorData;
}

/// Reference source drawing uniform readings, standing in for real hardware.
pub struct RandomSensor;

impl SensorSource for RandomSensor {
    fn sample(&mut self) -> SensorData {
        let mut rng = rand::thread_rng();
        SensorData {
            temperature: rng.gen_range(TEMPERATURE_RANGE),
            brightness: rng.gen_range(BRIGHTNESS_RANGE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readings_stay_in_range() {
        let mut sensor = RandomSensor;
        for _ in 0..200 {
            let reading = sensor.sample();
            assert!(TEMPERATURE_RANGE.contains(&reading.temperature));
            assert!(BRIGHTNESS_RANGE.contains(&reading.brightness));
        }
    }
}
