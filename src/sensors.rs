//! ==============================================================================
//! sensors.rs - bundled samplers
//! ==============================================================================
//!
//! ```text
//! purpose:
//!     ready-made `Sampler` implementations so the agent runs without an
//!     application around it. a datapoint is matched on its "name" property.
//!
//!     - VirtualSampler: simulated readings, for demos and integration runs
//!         temperature -> uniform in [-50, 100)
//!         humidity    -> uniform in [0, 100)
//!         image       -> a tiny file written to the work directory
//!     - GroveSampler: grove starter kit sensors wired to the analog header
//!         grove_temperature -> A0, thermistor
//!         grove_light       -> A1
//!         grove_sound       -> A2
//!         image             -> webcam frame
//!     - SmartFarmSampler: the smartfarm kit, serial field sensors plus light
//!         temperature -> modbus slave 3 register 1 on "mbdev", /10
//!         humidity    -> modbus slave 3 register 0 on "mbdev", /10
//!         pm2d5index  -> pms frame on "sdev", ug/m3
//!         pm10index   -> pms frame on "sdev", ug/m3
//!         light       -> A2
//!         image       -> webcam frame
//!       an integer "pin" property overrides the default analog pin.
//!
//! relationships:
//!     - implements: sampler.rs (Sampler)
//!     - uses: hal.rs (analog pins, webcam, serial), fieldbus.rs (pms frames)
//! ```
//!
//! ==============================================================================

use crate::domain::{now_ms, Datapoint, Sample};
use crate::fieldbus::parse_pms_frame;
use crate::hal::{raw_to_volts, HardwareProvider};
use crate::sampler::Sampler;

use anyhow::{anyhow, Result};
use rand::Rng;
use std::path::{Path, PathBuf};

pub const DEFAULT_WEBCAM_RESOLUTION: &str = "1280x720";

// ==============================================================================
// virtual sensors
// ==============================================================================

pub struct VirtualSampler {
    workdir: PathBuf,
}

impl VirtualSampler {
    pub fn new<P: Into<PathBuf>>(workdir: P) -> Self {
        Self { workdir: workdir.into() }
    }
}

impl Sampler for VirtualSampler {
    fn sample(&self, datapoint: &Datapoint) -> Result<Sample> {
        let mut rng = rand::thread_rng();
        match datapoint.name() {
            "temperature" => Ok(Sample::Numeric(rng.gen_range(-50.0..100.0))),
            "humidity" => Ok(Sample::Numeric(rng.gen_range(0.0..100.0))),
            "image" => {
                let file = self.workdir.join(format!("image_{}", now_ms()));
                std::fs::write(&file, b"abc")
                    .map_err(|e| anyhow!("Failed to write {}: {}", file.display(), e))?;
                Ok(Sample::File(file))
            }
            other => Err(anyhow!("no virtual sensor named {:?}", other)),
        }
    }
}

// ==============================================================================
// grove kit on analog pins
// ==============================================================================

pub struct GroveSampler<H: HardwareProvider> {
    hal: H,
    workdir: PathBuf,
    resolution: String,
}

impl<H: HardwareProvider> GroveSampler<H> {
    pub fn new<P: Into<PathBuf>>(hal: H, workdir: P, resolution: &str) -> Self {
        Self { hal, workdir: workdir.into(), resolution: resolution.to_string() }
    }
}

/// 10-bit reading of the datapoint's analog pin
fn read_pin<H: HardwareProvider>(hal: &H, datapoint: &Datapoint, default_pin: u8) -> Result<u32> {
    let pin = match datapoint.prop_i64("pin") {
        Some(p) => u8::try_from(p).map_err(|_| anyhow!("analog pin out of range: {}", p))?,
        None => default_pin,
    };
    let raw = hal.analog_read(pin)?;
    tracing::debug!("A{} voltage: {:1.2}V", pin, raw_to_volts(raw));
    // the sensors are specified against a 10-bit converter
    Ok(raw / 4)
}

fn capture<H: HardwareProvider>(hal: &H, workdir: &Path, resolution: &str) -> Result<Sample> {
    let file = workdir.join(format!("image_{}.jpg", now_ms()));
    hal.capture_image(&file, resolution)?;
    Ok(Sample::File(file))
}

/// grove temperature sensor v1.2: thermistor with B = 3975 and R0 = 10k
pub fn thermistor_celsius(reading: u32) -> Result<f64> {
    if reading == 0 || reading >= 1023 {
        return Err(anyhow!("thermistor reading out of range: {}", reading));
    }
    const B: f64 = 3975.0;
    let resistance = f64::from(1023 - reading) * 10000.0 / f64::from(reading);
    Ok(1.0 / ((resistance / 10000.0).ln() / B + 1.0 / 298.15) - 273.15)
}

impl<H: HardwareProvider + 'static> Sampler for GroveSampler<H> {
    fn sample(&self, datapoint: &Datapoint) -> Result<Sample> {
        match datapoint.name() {
            "grove_temperature" => {
                let t = thermistor_celsius(read_pin(&self.hal, datapoint, 0)?)?;
                tracing::debug!("The temperature is: {:2.2} c", t);
                Ok(Sample::Numeric(t))
            }
            "grove_light" => Ok(Sample::Numeric(f64::from(read_pin(&self.hal, datapoint, 1)?))),
            "grove_sound" => Ok(Sample::Numeric(f64::from(read_pin(&self.hal, datapoint, 2)?))),
            "image" => capture(&self.hal, &self.workdir, &self.resolution),
            other => Err(anyhow!("no grove sensor named {:?}", other)),
        }
    }
}

// ==============================================================================
// smartfarm kit: rs485 climate sensor, particulate sensor, light
// ==============================================================================

/// slave address of the rs485 temperature / humidity sensor
pub const CLIMATE_SENSOR_SLAVE: u8 = 3;
pub const HUMIDITY_REGISTER: u16 = 0;
pub const TEMPERATURE_REGISTER: u16 = 1;
/// extra attempts after a failed register read
pub const MODBUS_READ_RETRIES: u32 = 6;
/// serial bytes gathered per particulate reading, two frames' worth
pub const PMS_READ_LEN: usize = 50;

pub struct SmartFarmSampler<H: HardwareProvider> {
    hal: H,
    workdir: PathBuf,
    resolution: String,
}

impl<H: HardwareProvider> SmartFarmSampler<H> {
    pub fn new<P: Into<PathBuf>>(hal: H, workdir: P, resolution: &str) -> Self {
        Self { hal, workdir: workdir.into(), resolution: resolution.to_string() }
    }

    /// sensor register in tenths, retried on failure
    fn read_climate(&self, datapoint: &Datapoint, register: u16) -> Result<f64> {
        let device = datapoint
            .prop_str("mbdev")
            .ok_or_else(|| anyhow!("datapoint {:?} has no \"mbdev\"", datapoint.name()))?;

        let mut attempt = 0;
        let raw = loop {
            match self.hal.read_holding_register(device, CLIMATE_SENSOR_SLAVE, register) {
                Ok(raw) => break raw,
                Err(e) if attempt < MODBUS_READ_RETRIES => {
                    attempt += 1;
                    tracing::debug!("mbsensor read error, retry {}: {:#}", attempt, e);
                }
                Err(e) => {
                    let at = format!("{} slave {} register {}", device, CLIMATE_SENSOR_SLAVE, register);
                    return Err(e.context(at));
                }
            }
        };
        // the sensor reports signed tenths
        Ok(f64::from(raw as i16) / 10.0)
    }

    fn read_particulates(&self, datapoint: &Datapoint) -> Result<crate::fieldbus::PmReading> {
        let device = datapoint
            .prop_str("sdev")
            .ok_or_else(|| anyhow!("datapoint {:?} has no \"sdev\"", datapoint.name()))?;
        let bytes = self.hal.read_serial(device, PMS_READ_LEN)?;
        parse_pms_frame(&bytes).map_err(|e| e.context(device.to_string()))
    }
}

impl<H: HardwareProvider + 'static> Sampler for SmartFarmSampler<H> {
    fn sample(&self, datapoint: &Datapoint) -> Result<Sample> {
        match datapoint.name() {
            "temperature" => {
                let t = self.read_climate(datapoint, TEMPERATURE_REGISTER)?;
                tracing::debug!("Temperature is {:2.2} C degree", t);
                Ok(Sample::Numeric(t))
            }
            "humidity" => {
                let h = self.read_climate(datapoint, HUMIDITY_REGISTER)?;
                tracing::debug!("Humidity is {:2.2} percent", h);
                Ok(Sample::Numeric(h))
            }
            "pm2d5index" => Ok(Sample::Numeric(f64::from(self.read_particulates(datapoint)?.pm2_5))),
            "pm10index" => Ok(Sample::Numeric(f64::from(self.read_particulates(datapoint)?.pm10))),
            "light" => Ok(Sample::Numeric(f64::from(read_pin(&self.hal, datapoint, 2)?))),
            "image" => capture(&self.hal, &self.workdir, &self.resolution),
            other => Err(anyhow!("no smartfarm sensor named {:?}", other)),
        }
    }
}
