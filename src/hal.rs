//! ==============================================================================
//! hal.rs - Hardware Abstraction Layer
//! ==============================================================================
//!
//! ```text
//! purpose:
//!     the raw hardware the bundled samplers talk to: analog input pins, a
//!     usb webcam, modbus rtu slaves and streaming serial sensors. abstracts away the difference between running on the board
//!     (feature = "hardware") and a development machine (mock).
//!
//! design philosophy:
//!     - "Compile Anywhere": the agent builds and runs on any host.
//!     - on the board, analog pins are read from the iio sysfs nodes and the
//!       webcam is driven by `fswebcam`, exactly what the board image ships.
//!     - serial devices are opened per read at 9600 8N1 through `serialport`
//!       and closed again, so a wedged adapter recovers on the next sample.
//!
//! relationships:
//!     - used by: sensors.rs (GroveSampler, SmartFarmSampler)
//!     - uses: fieldbus.rs (modbus / pms frame encoding)
//! ```
//!
//! ==============================================================================

use anyhow::Result;
use std::path::Path;

pub trait HardwareProvider: Send + Sync {
    /// raw 12-bit conversion of analog input `pin` (0..=4095 for 0..5V)
    fn analog_read(&self, pin: u8) -> Result<u32>;
    /// grab one frame from the webcam into `path`
    fn capture_image(&self, path: &Path, resolution: &str) -> Result<()>;
    /// one holding register of modbus rtu `slave` on serial `device`
    fn read_holding_register(&self, device: &str, slave: u8, register: u16) -> Result<u16>;
    /// up to `max_len` bytes of whatever a serial sensor on `device` is sending
    fn read_serial(&self, device: &str, max_len: usize) -> Result<Vec<u8>>;
}

/// line speed of every serial sensor in the kit
pub const SERIAL_BAUD_RATE: u32 = 9600;

/// full scale of the board's analog-to-digital converter
pub const ADC_FULL_SCALE: u32 = 4096;

/// volts on an analog pin for a raw reading (5V reference)
pub fn raw_to_volts(raw: u32) -> f64 {
    f64::from(raw) * 5.0 / f64::from(ADC_FULL_SCALE)
}

// ==============================================================================================
// MOCK IMPLEMENTATION (For Non-Hardware Build)
// ==============================================================================================
#[cfg(not(feature = "hardware"))]
use std::collections::HashMap;
#[cfg(not(feature = "hardware"))]
use std::sync::Mutex;

#[cfg(not(feature = "hardware"))]
pub struct Hal {
    analog: Mutex<HashMap<u8, u32>>,
    registers: Mutex<HashMap<(String, u8, u16), u16>>,
    /// register reads that fail before the next one succeeds
    register_failures: Mutex<u32>,
    serial: Mutex<HashMap<String, Vec<u8>>>,
}

#[cfg(not(feature = "hardware"))]
impl Hal {
    pub fn new() -> Self {
        tracing::info!("Using MOCK HAL (No hardware access)");
        Self {
            analog: Mutex::new(HashMap::new()),
            registers: Mutex::new(HashMap::new()),
            register_failures: Mutex::new(0),
            serial: Mutex::new(HashMap::new()),
        }
    }

    /// pin a mock analog input to a fixed raw value
    pub fn set_analog(&self, pin: u8, raw: u32) {
        let mut analog = self.analog.lock().unwrap_or_else(|e| e.into_inner());
        analog.insert(pin, raw);
    }

    /// give a mock modbus slave a register value
    pub fn set_register(&self, device: &str, slave: u8, register: u16, value: u16) {
        let mut registers = self.registers.lock().unwrap_or_else(|e| e.into_inner());
        registers.insert((device.to_string(), slave, register), value);
    }

    /// make the next `count` register reads time out
    pub fn fail_register_reads(&self, count: u32) {
        *self.register_failures.lock().unwrap_or_else(|e| e.into_inner()) = count;
    }

    /// bytes a mock serial sensor sends on every read
    pub fn set_serial(&self, device: &str, bytes: &[u8]) {
        let mut serial = self.serial.lock().unwrap_or_else(|e| e.into_inner());
        serial.insert(device.to_string(), bytes.to_vec());
    }
}

#[cfg(not(feature = "hardware"))]
impl HardwareProvider for Hal {
    fn analog_read(&self, pin: u8) -> Result<u32> {
        let analog = self.analog.lock().unwrap_or_else(|e| e.into_inner());
        // unset pins sit at mid scale
        let raw = analog.get(&pin).copied().unwrap_or(ADC_FULL_SCALE / 2);
        tracing::debug!("[MOCK ANALOG] Pin {} raw {}", pin, raw);
        Ok(raw)
    }

    fn capture_image(&self, path: &Path, resolution: &str) -> Result<()> {
        tracing::debug!("[MOCK WEBCAM] {} @ {}", path.display(), resolution);
        std::fs::write(path, b"\xFF\xD8\xFF\xD9")?;
        Ok(())
    }

    fn read_holding_register(&self, device: &str, slave: u8, register: u16) -> Result<u16> {
        {
            let mut failures = self.register_failures.lock().unwrap_or_else(|e| e.into_inner());
            if *failures > 0 {
                *failures -= 1;
                return Err(anyhow::anyhow!("[MOCK MODBUS] {} slave {}: timed out", device, slave));
            }
        }
        let registers = self.registers.lock().unwrap_or_else(|e| e.into_inner());
        let value = registers
            .get(&(device.to_string(), slave, register))
            .copied()
            .ok_or_else(|| anyhow::anyhow!("[MOCK MODBUS] {} slave {} has no register {}", device, slave, register))?;
        tracing::debug!("[MOCK MODBUS] {} slave {} reg {:#04x} = {:#06x}", device, slave, register, value);
        Ok(value)
    }

    fn read_serial(&self, device: &str, max_len: usize) -> Result<Vec<u8>> {
        let serial = self.serial.lock().unwrap_or_else(|e| e.into_inner());
        let bytes = serial
            .get(device)
            .ok_or_else(|| anyhow::anyhow!("[MOCK SERIAL] nothing on {}", device))?;
        Ok(bytes.iter().take(max_len).copied().collect())
    }
}

// ==============================================================================================
// REAL IMPLEMENTATION (On the board)
// ==============================================================================================
#[cfg(feature = "hardware")]
pub struct Hal {}

#[cfg(feature = "hardware")]
impl Hal {
    pub fn new() -> Self {
        tracing::info!("Using REAL HARDWARE HAL (sysfs iio + fswebcam)");
        Self {}
    }
}

#[cfg(feature = "hardware")]
impl HardwareProvider for Hal {
    fn analog_read(&self, pin: u8) -> Result<u32> {
        let node = format!("/sys/bus/iio/devices/iio:device0/in_voltage{}_raw", pin);
        let text = std::fs::read_to_string(&node)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", node, e))?;
        let raw = text
            .trim()
            .parse::<u32>()
            .map_err(|e| anyhow::anyhow!("Bad value in {}: {} (got: {})", node, e, text.trim()))?;
        Ok(raw)
    }

    fn capture_image(&self, path: &Path, resolution: &str) -> Result<()> {
        use std::process::Command;

        let output = Command::new("fswebcam")
            .args(["-r", resolution, "--save"])
            .arg(path)
            .output()
            .map_err(|e| anyhow::anyhow!("Failed to run fswebcam: {}", e))?;

        if !output.status.success() || !path.exists() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow::anyhow!("fswebcam error: {}", stderr.trim()));
        }
        Ok(())
    }
    fn read_holding_register(&self, device: &str, slave: u8, register: u16) -> Result<u16> {
        use crate::fieldbus::{parse_read_holding_response, read_holding_request, read_holding_response_len};
        use std::io::{Read, Write};

        let mut port = open_serial(device, Duration::from_millis(500))?;
        // stale bytes from an earlier, abandoned exchange would shift the frame
        port.clear(serialport::ClearBuffer::Input)?;
        port.write_all(&read_holding_request(slave, register, 1))?;
        port.flush()?;

        let mut frame = vec![0u8; read_holding_response_len(1)];
        // an exception reply is shorter; take what arrived and let the parser judge it
        let mut got = 0;
        while got < frame.len() {
            match port.read(&mut frame[got..]) {
                Ok(0) => break,
                Ok(n) => got += n,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => break,
                Err(e) => return Err(e.into()),
            }
        }
        frame.truncate(got);
        let values = parse_read_holding_response(slave, 1, &frame)?;
        values.first().copied().ok_or_else(|| anyhow::anyhow!("empty modbus response"))
    }

    fn read_serial(&self, device: &str, max_len: usize) -> Result<Vec<u8>> {
        use std::io::Read;

        let mut port = open_serial(device, Duration::from_secs(5))?;
        port.clear(serialport::ClearBuffer::Input)?;
        let mut buf = vec![0u8; max_len];
        let mut got = 0;
        while got < max_len {
            match port.read(&mut buf[got..]) {
                Ok(0) => break,
                Ok(n) => got += n,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => break,
                Err(e) => return Err(e.into()),
            }
        }
        buf.truncate(got);
        Ok(buf)
    }
}

#[cfg(feature = "hardware")]
use std::time::Duration;

#[cfg(feature = "hardware")]
fn open_serial(device: &str, timeout: Duration) -> Result<Box<dyn serialport::SerialPort>> {
    use serialport::{DataBits, FlowControl, Parity, StopBits};

    serialport::new(device, SERIAL_BAUD_RATE)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(timeout)
        .open()
        .map_err(|e| anyhow::anyhow!("Failed to open {}: {}", device, e))
}

impl Default for Hal {
    fn default() -> Self {
        Self::new()
    }
}
