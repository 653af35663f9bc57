//! Numeric primitives shared by every validator (spec §4.1): Protected
//! Identifier computation, LIN classic/enhanced checksums, big/little-endian
//! bitfield extraction with sign extension, and linear signal scaling.
//!
//! Grounded in the teacher crate's LIN frame/PID arithmetic
//! (`src/lin/frame.rs::protected_id`, `calculate_classic_checksum`,
//! `calculate_enhanced_checksum`) and its CAN bit-extraction helpers
//! (`src/can.rs::extract_le`, `extract_be`, `sign_extend`), generalized from
//! fixed-frame logging structs into free functions over raw `&[u8]` the
//! analyzer can call per log record.

use thiserror::Error;

/// Byte order a signal is packed in, matching DBC/LDF conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Intel / little-endian.
    LittleEndian,
    /// Motorola / big-endian.
    BigEndian,
}

/// Errors from the numeric primitives.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NumericError {
    /// A LIN frame id was outside the valid [0,63] range for PID computation.
    #[error("frame id {0} out of range for PID (0-63)")]
    IdOutOfRange(u8),
}

/// Computes the LIN Protected Identifier for a frame id in `[0, 63]`.
///
/// `P0 = b0^b1^b2^b4`, `P1 = !(b1^b3^b4^b5)`, `PID = id | P0<<6 | P1<<7`.
pub fn protected_id(frame_id: u8) -> Result<u8, NumericError> {
    if frame_id > 0x3F {
        return Err(NumericError::IdOutOfRange(frame_id));
    }
    let id = frame_id as u32;
    let bit = |n: u32| (id >> n) & 1;
    let p0 = bit(0) ^ bit(1) ^ bit(2) ^ bit(4);
    let p1 = !(bit(1) ^ bit(3) ^ bit(4) ^ bit(5)) & 1;
    Ok((id | (p0 << 6) | (p1 << 7)) as u8)
}

/// Splits a PID byte into `(frame_id, parity_ok)`.
pub fn check_pid_parity(pid: u8) -> (u8, bool) {
    let id = pid & 0x3F;
    let expected = protected_id(id).expect("id masked to 6 bits is always in range");
    (id, expected == pid)
}

/// LIN classic checksum: sum all data bytes, folding carries, then invert.
/// Empty data yields `0xFF`.
pub fn classic_checksum(data: &[u8]) -> u8 {
    let mut sum: u32 = data.iter().map(|&b| b as u32).sum();
    while sum > 0xFF {
        sum = (sum & 0xFF) + (sum >> 8);
    }
    (!sum & 0xFF) as u8
}

/// LIN enhanced checksum: classic checksum of `[pid] + data`.
pub fn enhanced_checksum(pid: u8, data: &[u8]) -> u8 {
    let mut with_pid = Vec::with_capacity(data.len() + 1);
    with_pid.push(pid);
    with_pid.extend_from_slice(data);
    classic_checksum(&with_pid)
}

/// Extracts a raw unsigned bitfield from `data` starting at `start_bit` for
/// `length` bits, in the given byte order.
pub fn extract_raw(data: &[u8], start_bit: u16, length: u16, order: ByteOrder) -> u64 {
    if length == 0 {
        return 0;
    }
    match order {
        ByteOrder::BigEndian => extract_be(data, start_bit, length),
        ByteOrder::LittleEndian => extract_le(data, start_bit, length),
    }
}

fn extract_be(data: &[u8], start_bit: u16, length: u16) -> u64 {
    let mut value: u64 = 0;
    for i in 0..length {
        let bit_index = 8 * (start_bit / 8) + (7 - start_bit % 8) + i;
        let byte_index = (bit_index / 8) as usize;
        let bit_in_byte = 7 - (bit_index % 8);
        let bit = data
            .get(byte_index)
            .map(|&b| (b >> bit_in_byte) & 1)
            .unwrap_or(0) as u64;
        value = (value << 1) | bit;
    }
    value
}

fn extract_le(data: &[u8], start_bit: u16, length: u16) -> u64 {
    let byte_count = data.len().min(8);
    let mut whole: u64 = 0;
    for (i, &b) in data.iter().take(byte_count).enumerate() {
        whole |= (b as u64) << (8 * i);
    }
    let shifted = if start_bit >= 64 { 0 } else { whole >> start_bit };
    let mask = if length >= 64 {
        u64::MAX
    } else {
        (1u64 << length) - 1
    };
    shifted & mask
}

/// Sign-extends a `length`-bit raw value read as unsigned.
pub fn sign_extend(raw: u64, length: u16) -> i64 {
    if length == 0 || length >= 64 {
        return raw as i64;
    }
    let sign_bit = 1u64 << (length - 1);
    if raw & sign_bit != 0 {
        (raw as i64) - (1i64 << length)
    } else {
        raw as i64
    }
}

/// Linear scaling: `phys = raw * factor + offset`.
pub fn scale(raw: f64, factor: f64, offset: f64) -> f64 {
    raw * factor + offset
}

/// Compares two physical values for equality within spec's fixed epsilon.
pub fn physical_eq(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6
}
