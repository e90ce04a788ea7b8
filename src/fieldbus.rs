//! ==============================================================================
//! fieldbus.rs - serial sensor wire formats
//! ==============================================================================
//!
//! ```text
//! purpose:
//!     byte-level encoding for the two serial sensor families the smartfarm
//!     kit uses. no i/o happens here, the HAL moves the bytes.
//!
//!     - modbus rtu (rs485 temperature / humidity sensor)
//!         request  [slave, 0x03, reg hi, reg lo, count hi, count lo, crc lo, crc hi]
//!         response [slave, 0x03, byte count, data..., crc lo, crc hi]
//!         error    [slave, 0x83, exception code, crc lo, crc hi]
//!     - pms particulate sensors (plantower style, streaming at 9600 baud)
//!         [0x42, 0x4D, len hi, len lo, data..., sum hi, sum lo]
//!         pm2.5 at bytes 6-7, pm10 at bytes 8-9 of the frame
//!
//! relationships:
//!     - used by: hal.rs (real serial access), sensors.rs (SmartFarmSampler)
//! ```
//!
//! ==============================================================================

use anyhow::{anyhow, Result};

const READ_HOLDING_REGISTERS: u8 = 0x03;
const EXCEPTION_FLAG: u8 = 0x80;

/// CRC-16/MODBUS (reflected 0xA001, seed 0xFFFF)
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ 0xA001 } else { crc >> 1 };
        }
    }
    crc
}

/// "read holding registers" request frame
pub fn read_holding_request(slave: u8, register: u16, count: u16) -> [u8; 8] {
    let mut frame = [0u8; 8];
    frame[0] = slave;
    frame[1] = READ_HOLDING_REGISTERS;
    frame[2..4].copy_from_slice(&register.to_be_bytes());
    frame[4..6].copy_from_slice(&count.to_be_bytes());
    let crc = crc16(&frame[..6]);
    frame[6..8].copy_from_slice(&crc.to_le_bytes());
    frame
}

/// length of a successful response carrying `count` registers
pub fn read_holding_response_len(count: u16) -> usize {
    5 + 2 * usize::from(count)
}

/// register values out of a response frame
pub fn parse_read_holding_response(slave: u8, count: u16, frame: &[u8]) -> Result<Vec<u16>> {
    if frame.len() < 5 {
        return Err(anyhow!("modbus response too short: {} bytes", frame.len()));
    }
    let (body, tail) = frame.split_at(frame.len() - 2);
    let crc = u16::from_le_bytes([tail[0], tail[1]]);
    if crc16(body) != crc {
        return Err(anyhow!("modbus response crc mismatch"));
    }
    if body[0] != slave {
        return Err(anyhow!("modbus response from slave {}, expected {}", body[0], slave));
    }
    if body[1] == READ_HOLDING_REGISTERS | EXCEPTION_FLAG {
        return Err(anyhow!("modbus exception code {:#04x}", body[2]));
    }
    if body[1] != READ_HOLDING_REGISTERS {
        return Err(anyhow!("unexpected modbus function {:#04x}", body[1]));
    }

    let byte_count = usize::from(body[2]);
    let data = &body[3..];
    if byte_count != 2 * usize::from(count) || data.len() != byte_count {
        return Err(anyhow!("modbus response carries {} data bytes, expected {}", data.len(), 2 * count));
    }
    Ok(data.chunks_exact(2).map(|w| u16::from_be_bytes([w[0], w[1]])).collect())
}

// ==============================================================================
// pms particulate frames
// ==============================================================================

const PMS_HEADER: [u8; 2] = [0x42, 0x4D];

/// standard-atmosphere concentrations in ug/m3
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PmReading {
    pub pm2_5: u16,
    pub pm10: u16,
}

/// first valid frame in a chunk of serial input
///
/// the sensor streams continuously, so the chunk usually starts mid-frame.
/// frames with a bad checksum are skipped.
pub fn parse_pms_frame(bytes: &[u8]) -> Result<PmReading> {
    let mut start = 0;
    while let Some(offset) = bytes[start..].windows(2).position(|w| w == PMS_HEADER.as_slice()) {
        let at = start + offset;
        start = at + 1;

        let frame = &bytes[at..];
        if frame.len() < 4 {
            break;
        }
        let total = 4 + usize::from(u16::from_be_bytes([frame[2], frame[3]]));
        if total < 12 || frame.len() < total {
            continue;
        }
        let frame = &frame[..total];
        let sum = frame[..total - 2].iter().fold(0u16, |acc, &b| acc.wrapping_add(u16::from(b)));
        if sum != u16::from_be_bytes([frame[total - 2], frame[total - 1]]) {
            tracing::debug!("pms frame at byte {} fails its checksum", at);
            continue;
        }
        return Ok(PmReading {
            pm2_5: u16::from_be_bytes([frame[6], frame[7]]),
            pm10: u16::from_be_bytes([frame[8], frame[9]]),
        });
    }
    Err(anyhow!("no complete pms frame in {} bytes", bytes.len()))
}
