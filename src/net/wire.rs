//! Byte-level message encoding.
//!
//! Little-endian fixed-width primitives plus the quantized game types the
//! delta codec uses: positions in 1/8-unit steps, angles as 16-bit binary
//! degrees. Byte order is fixed little-endian regardless of host.

use crate::util::vec3::Vec3;

/// World units per wire position step
const POSITION_SCALE: f32 = 8.0;
/// 360 degrees mapped onto 16 bits
const ANGLE_SCALE: f32 = 65536.0 / 360.0;

#[inline]
pub fn angle_to_wire(degrees: f32) -> u16 {
    ((degrees * ANGLE_SCALE) as i32 & 0xffff) as u16
}

#[inline]
pub fn wire_to_angle(value: u16) -> f32 {
    value as f32 / ANGLE_SCALE
}

#[inline]
pub fn position_to_wire(value: f32) -> i16 {
    (value * POSITION_SCALE)
        .round()
        .clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

#[inline]
pub fn wire_to_position(value: i16) -> f32 {
    value as f32 / POSITION_SCALE
}

/// Bounded write cursor over an outgoing message.
///
/// A write that would exceed the cap is dropped whole and latches the
/// overflow flag, so the buffer never holds a partial field and a
/// truncated message stays well-formed up to the last complete write.
#[derive(Debug)]
pub struct MessageWriter {
    buf: Vec<u8>,
    max: usize,
    overflowed: bool,
}

impl MessageWriter {
    pub fn new(max: usize) -> Self {
        Self {
            buf: Vec::with_capacity(max.min(2048)),
            max,
            overflowed: false,
        }
    }

    fn put(&mut self, bytes: &[u8]) {
        if self.buf.len() + bytes.len() > self.max {
            self.overflowed = true;
            return;
        }
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_u8(&mut self, value: u8) {
        self.put(&[value]);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.put(&value.to_le_bytes());
    }

    pub fn write_i16(&mut self, value: i16) {
        self.put(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.put(&value.to_le_bytes());
    }

    pub fn write_i32(&mut self, value: i32) {
        self.put(&value.to_le_bytes());
    }

    pub fn write_data(&mut self, data: &[u8]) {
        self.put(data);
    }

    /// Length-prefixed UTF-8 string; dropped whole on overflow
    pub fn write_string(&mut self, value: &str) {
        let bytes = value.as_bytes();
        debug_assert!(bytes.len() <= u16::MAX as usize, "string too long for wire");
        if self.buf.len() + 2 + bytes.len() > self.max {
            self.overflowed = true;
            return;
        }
        self.put(&(bytes.len() as u16).to_le_bytes());
        self.put(bytes);
    }

    /// Quantized position triple, written atomically
    pub fn write_position(&mut self, value: Vec3) {
        let x = position_to_wire(value.x).to_le_bytes();
        let y = position_to_wire(value.y).to_le_bytes();
        let z = position_to_wire(value.z).to_le_bytes();
        self.put(&[x[0], x[1], y[0], y[1], z[0], z[1]]);
    }

    /// Quantized angle triple, written atomically
    pub fn write_angles(&mut self, value: Vec3) {
        let x = angle_to_wire(value.x).to_le_bytes();
        let y = angle_to_wire(value.y).to_le_bytes();
        let z = angle_to_wire(value.z).to_le_bytes();
        self.put(&[x[0], x[1], y[0], y[1], z[0], z[1]]);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.max - self.buf.len()
    }

    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.overflowed = false;
    }
}

/// Read cursor mirroring [`MessageWriter`]; every read returns `None` once
/// the data runs out.
#[derive(Debug)]
pub struct MessageReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> MessageReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    pub fn read(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.position + n > self.data.len() {
            return None;
        }
        let slice = &self.data[self.position..self.position + n];
        self.position += n;
        Some(slice)
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        self.read(1).map(|b| b[0])
    }

    pub fn read_u16(&mut self) -> Option<u16> {
        self.read(2).map(|b| u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_i16(&mut self) -> Option<i16> {
        self.read(2).map(|b| i16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Option<u32> {
        self.read(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_i32(&mut self) -> Option<i32> {
        self.read(4)
            .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_string(&mut self) -> Option<String> {
        let len = self.read_u16()? as usize;
        let bytes = self.read(len)?;
        String::from_utf8(bytes.to_vec()).ok()
    }

    pub fn read_position(&mut self) -> Option<Vec3> {
        let x = self.read_i16()?;
        let y = self.read_i16()?;
        let z = self.read_i16()?;
        Some(Vec3::new(
            wire_to_position(x),
            wire_to_position(y),
            wire_to_position(z),
        ))
    }

    pub fn read_angles(&mut self) -> Option<Vec3> {
        let x = self.read_u16()?;
        let y = self.read_u16()?;
        let z = self.read_u16()?;
        Some(Vec3::new(
            wire_to_angle(x),
            wire_to_angle(y),
            wire_to_angle(z),
        ))
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.position..]
    }

    pub fn has_remaining(&self) -> bool {
        self.position < self.data.len()
    }

    pub fn position(&self) -> usize {
        self.position
    }
}
