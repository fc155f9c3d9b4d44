//! Binary packet codec
//!
//! # Wire Format
//!
//! GrihaIO uses a length-prefixed framing protocol for all TCP communication:
//!
//! ```text
//! ┌──────────────────┬──────────────┬────────────────────┐
//! │ Length (4 bytes) │ Type (1 byte)│ Payload (variable) │
//! │ Big-endian u32   │ Message type │ Big-endian fields  │
//! └──────────────────┴──────────────┴────────────────────┘
//! ```
//!
//! - **Length field**: total frame length, *including* the 4-byte prefix itself
//! - **Byte order**: network byte order (big-endian) throughout
//! - **Maximum frame size**: 1024 bytes (enforced by the connection manager)
//!
//! Strings are encoded as a u32 length equal to the byte count plus the 4-byte
//! length field, followed by the raw UTF-8 bytes; decoders subtract the 4-byte
//! overhead to recover the string length.
//!
//! Outbound packets are built with a zero length placeholder; [`Packet::finish`]
//! seeks back and patches the real frame length once the payload is complete.
//! All reads are bounds checked and return an error instead of touching memory
//! past the recorded size.

use crate::error::{Error, Result};

/// Initial buffer capacity for outbound packets
const INITIAL_CAPACITY: usize = 128;

/// Growable byte buffer with a read/write cursor
#[derive(Debug, Clone)]
pub struct Packet {
    data: Vec<u8>,
    cursor: usize,
    size: usize,
}

impl Packet {
    /// Create an empty packet for writing
    pub fn new() -> Self {
        Self {
            data: Vec::with_capacity(INITIAL_CAPACITY),
            cursor: 0,
            size: 0,
        }
    }

    /// Create a packet that starts a wire frame: a zero length placeholder
    /// followed by the message type byte
    pub fn frame(message_type: u8) -> Self {
        let mut p = Self::new();
        p.append_u32(0);
        p.append_u8(message_type);
        p
    }

    /// Wrap received bytes for reading
    pub fn from_bytes(src: &[u8]) -> Self {
        Self {
            data: src.to_vec(),
            cursor: 0,
            size: src.len(),
        }
    }

    /// Logical size in bytes (high-water mark of the cursor)
    pub fn size(&self) -> usize {
        self.size
    }

    /// Current cursor position
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Bytes up to the logical size
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.size]
    }

    /// Reposition the cursor, e.g. to patch a previously written field.
    /// Positions past the current size are rejected.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.size {
            return Err(Error::InvalidPacket(format!(
                "seek to {} past size {}",
                pos, self.size
            )));
        }
        self.cursor = pos;
        Ok(())
    }

    /// Patch the leading length field with the total frame size and return
    /// the wire bytes. Only valid on packets started with [`Packet::frame`].
    pub fn finish(mut self) -> Vec<u8> {
        let len = self.size as u32;
        self.data[0..4].copy_from_slice(&len.to_be_bytes());
        self.data.truncate(self.size);
        self.data
    }

    fn write(&mut self, bytes: &[u8]) {
        let end = self.cursor + bytes.len();
        if end > self.data.len() {
            // Geometric growth keeps appends amortised O(1)
            let mut capacity = self.data.capacity().max(INITIAL_CAPACITY);
            while capacity < end {
                capacity *= 2;
            }
            self.data.reserve(capacity - self.data.len());
            self.data.resize(end, 0);
        }
        self.data[self.cursor..end].copy_from_slice(bytes);
        self.cursor = end;
        if self.cursor > self.size {
            self.size = self.cursor;
        }
    }

    fn read(&mut self, len: usize) -> Result<&[u8]> {
        if self.cursor + len > self.size {
            return Err(Error::PacketTruncated {
                needed: len,
                offset: self.cursor,
                available: self.size.saturating_sub(self.cursor),
            });
        }
        let slice = &self.data[self.cursor..self.cursor + len];
        self.cursor += len;
        Ok(slice)
    }

    /// Append a single byte
    pub fn append_u8(&mut self, v: u8) {
        self.write(&[v]);
    }

    /// Append a big-endian u16
    pub fn append_u16(&mut self, v: u16) {
        self.write(&v.to_be_bytes());
    }

    /// Append a big-endian u32
    pub fn append_u32(&mut self, v: u32) {
        self.write(&v.to_be_bytes());
    }

    /// Append a big-endian u64
    pub fn append_u64(&mut self, v: u64) {
        self.write(&v.to_be_bytes());
    }

    /// Append an i32 in its two's-complement big-endian form
    pub fn append_i32(&mut self, v: i32) {
        self.append_u32(v as u32);
    }

    /// Append an IEEE-754 float as its big-endian bit pattern
    pub fn append_f32(&mut self, v: f32) {
        self.append_u32(v.to_bits());
    }

    /// Append a length-prefixed string. The prefix counts the string bytes
    /// plus the 4-byte prefix itself.
    pub fn append_string(&mut self, s: &str) {
        self.append_u32(s.len() as u32 + 4);
        self.write(s.as_bytes());
    }

    /// Read a single byte
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read(1)?[0])
    }

    /// Read a big-endian u16
    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.read(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    /// Read a big-endian u32
    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.read(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a big-endian u64
    pub fn read_u64(&mut self) -> Result<u64> {
        let b = self.read(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Ok(u64::from_be_bytes(buf))
    }

    /// Read an i32
    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    /// Read an IEEE-754 float
    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    /// Read a length-prefixed string
    pub fn read_string(&mut self) -> Result<String> {
        let prefixed = self.read_u32()? as usize;
        let len = prefixed.checked_sub(4).ok_or_else(|| {
            Error::InvalidPacket(format!("string length {} below prefix overhead", prefixed))
        })?;
        let bytes = self.read(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::InvalidPacket("string is not valid UTF-8".into()))
    }
}

impl Default for Packet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_roundtrip() {
        let mut p = Packet::new();
        p.append_u8(0xAB);
        p.append_u16(0xBEEF);
        p.append_u32(0xDEAD_BEEF);
        p.append_u64(0x0123_4567_89AB_CDEF);
        p.append_i32(-42);
        p.append_f32(3.5);

        let mut r = Packet::from_bytes(p.as_bytes());
        assert_eq!(r.read_u8().unwrap(), 0xAB);
        assert_eq!(r.read_u16().unwrap(), 0xBEEF);
        assert_eq!(r.read_u32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(r.read_u64().unwrap(), 0x0123_4567_89AB_CDEF);
        assert_eq!(r.read_i32().unwrap(), -42);
        assert_eq!(r.read_f32().unwrap(), 3.5);
    }

    #[test]
    fn test_big_endian_on_wire() {
        let mut p = Packet::new();
        p.append_u32(0x0102_0304);
        assert_eq!(p.as_bytes(), &[0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_string_prefix_includes_overhead() {
        let mut p = Packet::new();
        p.append_string("Volume");
        // Prefix counts the 4 prefix bytes plus 6 string bytes
        assert_eq!(&p.as_bytes()[0..4], &[0, 0, 0, 10]);
        assert_eq!(p.size(), 10);

        let mut r = Packet::from_bytes(p.as_bytes());
        assert_eq!(r.read_string().unwrap(), "Volume");
    }

    #[test]
    fn test_empty_string() {
        let mut p = Packet::new();
        p.append_string("");
        let mut r = Packet::from_bytes(p.as_bytes());
        assert_eq!(r.read_string().unwrap(), "");
    }

    #[test]
    fn test_read_past_end_is_error() {
        let mut r = Packet::from_bytes(&[0x01, 0x02]);
        assert!(r.read_u32().is_err());
        // Cursor must not advance on a failed read
        assert_eq!(r.read_u16().unwrap(), 0x0102);
    }

    #[test]
    fn test_bogus_string_length_is_error() {
        let mut p = Packet::new();
        p.append_u32(2); // below the 4-byte overhead
        let mut r = Packet::from_bytes(p.as_bytes());
        assert!(r.read_string().is_err());
    }

    #[test]
    fn test_seek_patches_field() {
        let mut p = Packet::new();
        p.append_u32(0);
        p.append_u8(7);
        p.append_string("payload");
        let total = p.size();

        p.seek(0).unwrap();
        p.append_u32(total as u32);
        assert_eq!(p.size(), total); // patching does not extend

        let mut r = Packet::from_bytes(p.as_bytes());
        assert_eq!(r.read_u32().unwrap() as usize, total);
    }

    #[test]
    fn test_seek_past_size_rejected() {
        let mut p = Packet::new();
        p.append_u32(1);
        assert!(p.seek(5).is_err());
        assert!(p.seek(4).is_ok());
    }

    #[test]
    fn test_frame_finish_backfills_length() {
        let mut p = Packet::frame(3);
        p.append_u32(0x0300_0101);
        let bytes = p.finish();
        assert_eq!(bytes.len(), 9);
        assert_eq!(&bytes[0..4], &[0, 0, 0, 9]);
        assert_eq!(bytes[4], 3);
    }

    #[test]
    fn test_growth_beyond_initial_capacity() {
        let mut p = Packet::new();
        for i in 0..100 {
            p.append_u64(i);
        }
        assert_eq!(p.size(), 800);
        let mut r = Packet::from_bytes(p.as_bytes());
        for i in 0..100 {
            assert_eq!(r.read_u64().unwrap(), i);
        }
    }
}
