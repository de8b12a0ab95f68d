//! Little-endian wire reader/writer for PTP payloads.
//!
//! Every multi-byte integer on the wire is little-endian. Strings are
//! length-prefixed UCS-2LE with a trailing NUL counted in the prefix; arrays
//! carry a `u32` element count. All reads are bounds-checked against the
//! remaining buffer: a declared length that overruns the payload is a device
//! bug and must surface as [`Error::InvalidData`], never as a panic.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// Bounds-checked reader over a borrowed wire payload.
pub struct WireReader<'a> {
    buf: &'a [u8],
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        WireReader { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn need(&self, n: usize, what: &str) -> Result<()> {
        if self.buf.len() < n {
            return Err(Error::invalid_data(format!(
                "truncated {what}: need {n} bytes, {} remaining",
                self.buf.len()
            )));
        }
        Ok(())
    }

    pub fn u8(&mut self, what: &str) -> Result<u8> {
        self.need(1, what)?;
        Ok(self.buf.get_u8())
    }

    pub fn u16(&mut self, what: &str) -> Result<u16> {
        self.need(2, what)?;
        Ok(self.buf.get_u16_le())
    }

    pub fn u32(&mut self, what: &str) -> Result<u32> {
        self.need(4, what)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn u64(&mut self, what: &str) -> Result<u64> {
        self.need(8, what)?;
        Ok(self.buf.get_u64_le())
    }

    pub fn u128(&mut self, what: &str) -> Result<u128> {
        self.need(16, what)?;
        Ok(self.buf.get_u128_le())
    }

    pub fn skip(&mut self, n: usize, what: &str) -> Result<()> {
        self.need(n, what)?;
        self.buf.advance(n);
        Ok(())
    }

    pub fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        self.need(n, what)?;
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    /// Reads a PTP string: one length byte counting UCS-2 code units
    /// including the trailing NUL; zero means the empty string with no
    /// further bytes.
    pub fn string(&mut self, what: &str) -> Result<String> {
        let units = self.u8(what)? as usize;
        if units == 0 {
            return Ok(String::new());
        }
        let raw = self.take(units * 2, what)?;
        let mut code_units = Vec::with_capacity(units);
        for pair in raw.chunks_exact(2) {
            code_units.push(u16::from_le_bytes([pair[0], pair[1]]));
        }
        match code_units.pop() {
            Some(0) => {}
            _ => {
                return Err(Error::invalid_data(format!("{what}: string missing NUL terminator")));
            }
        }
        String::from_utf16(&code_units)
            .map_err(|_| Error::invalid_data(format!("{what}: string is not valid UTF-16")))
    }

    /// Reads a `u32`-count-prefixed array of `u16` elements.
    pub fn array_u16(&mut self, what: &str) -> Result<Vec<u16>> {
        let count = self.u32(what)? as usize;
        self.need(count * 2, what)?;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(self.buf.get_u16_le());
        }
        Ok(out)
    }

    /// Reads a `u32`-count-prefixed array of `u32` elements.
    pub fn array_u32(&mut self, what: &str) -> Result<Vec<u32>> {
        let count = self.u32(what)? as usize;
        self.need(count * 4, what)?;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(self.buf.get_u32_le());
        }
        Ok(out)
    }

    /// Reads a `u32`-length-prefixed byte array.
    pub fn byte_array(&mut self, what: &str) -> Result<Vec<u8>> {
        let len = self.u32(what)? as usize;
        Ok(self.take(len, what)?.to_vec())
    }
}

/// Writer producing a PTP wire payload.
#[derive(Default)]
pub struct WireWriter {
    buf: BytesMut,
}

impl WireWriter {
    pub fn new() -> Self {
        WireWriter { buf: BytesMut::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        WireWriter {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn u16(&mut self, v: u16) {
        self.buf.put_u16_le(v);
    }

    pub fn u32(&mut self, v: u32) {
        self.buf.put_u32_le(v);
    }

    pub fn u64(&mut self, v: u64) {
        self.buf.put_u64_le(v);
    }

    pub fn u128(&mut self, v: u128) {
        self.buf.put_u128_le(v);
    }

    pub fn bytes(&mut self, v: &[u8]) {
        self.buf.put_slice(v);
    }

    /// Writes a PTP string. The length prefix is a single byte, so the
    /// string may hold at most 254 UTF-16 code units plus the NUL.
    pub fn string(&mut self, s: &str) -> Result<()> {
        if s.is_empty() {
            self.buf.put_u8(0);
            return Ok(());
        }
        let units: Vec<u16> = s.encode_utf16().collect();
        if units.len() > 254 {
            return Err(Error::invalid_data(format!(
                "string too long for wire encoding: {} UTF-16 units",
                units.len()
            )));
        }
        self.buf.put_u8((units.len() + 1) as u8);
        for unit in units {
            self.buf.put_u16_le(unit);
        }
        self.buf.put_u16_le(0);
        Ok(())
    }

    pub fn array_u16(&mut self, values: &[u16]) {
        self.buf.put_u32_le(values.len() as u32);
        for v in values {
            self.buf.put_u16_le(*v);
        }
    }

    pub fn array_u32(&mut self, values: &[u32]) {
        self.buf.put_u32_le(values.len() as u32);
        for v in values {
            self.buf.put_u32_le(*v);
        }
    }

    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitives_roundtrip() {
        let mut w = WireWriter::new();
        w.u8(0xAB);
        w.u16(0x1234);
        w.u32(0xDEADBEEF);
        w.u64(0x0102030405060708);
        w.u128(7);
        let buf = w.finish();

        let mut r = WireReader::new(&buf);
        assert_eq!(r.u8("a").unwrap(), 0xAB);
        assert_eq!(r.u16("b").unwrap(), 0x1234);
        assert_eq!(r.u32("c").unwrap(), 0xDEADBEEF);
        assert_eq!(r.u64("d").unwrap(), 0x0102030405060708);
        assert_eq!(r.u128("e").unwrap(), 7);
        assert!(r.is_empty());
    }

    #[test]
    fn test_little_endian_layout() {
        let mut w = WireWriter::new();
        w.u32(0x1002);
        assert_eq!(&w.finish()[..], &[0x02, 0x10, 0x00, 0x00]);
    }

    #[test]
    fn test_string_roundtrip() {
        for s in ["", "a", "Internal shared storage", "фото.jpg", "日本語"] {
            let mut w = WireWriter::new();
            w.string(s).unwrap();
            let buf = w.finish();
            let mut r = WireReader::new(&buf);
            assert_eq!(r.string("s").unwrap(), s, "roundtrip of {s:?}");
            assert!(r.is_empty());
        }
    }

    #[test]
    fn test_empty_string_is_single_zero_byte() {
        let mut w = WireWriter::new();
        w.string("").unwrap();
        assert_eq!(&w.finish()[..], &[0x00]);
    }

    #[test]
    fn test_string_encoding_layout() {
        // "ab" -> 3 units including NUL, then UCS-2LE a, b, NUL.
        let mut w = WireWriter::new();
        w.string("ab").unwrap();
        assert_eq!(&w.finish()[..], &[0x03, b'a', 0x00, b'b', 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_string_missing_nul_rejected() {
        let buf = [0x02, b'a', 0x00, b'b', 0x00];
        let mut r = WireReader::new(&buf);
        let err = r.string("filename").unwrap_err();
        assert!(matches!(err, Error::InvalidData { .. }), "got {err:?}");
    }

    #[test]
    fn test_string_too_long_rejected() {
        let long: String = std::iter::repeat('x').take(255).collect();
        let mut w = WireWriter::new();
        assert!(w.string(&long).is_err());
    }

    #[test]
    fn test_truncated_read_fails_cleanly() {
        let buf = [0x01, 0x02];
        let mut r = WireReader::new(&buf);
        let err = r.u32("length").unwrap_err();
        match err {
            Error::InvalidData { message } => assert!(message.contains("length"), "{message}"),
            other => panic!("expected InvalidData, got {other:?}"),
        }
    }

    #[test]
    fn test_declared_length_exceeding_buffer_fails() {
        // Array claims 1000 elements but only two bytes follow.
        let mut w = WireWriter::new();
        w.u32(1000);
        w.u16(0xFFFF);
        let buf = w.finish();
        let mut r = WireReader::new(&buf);
        assert!(r.array_u32("handles").is_err());
    }

    #[test]
    fn test_arrays_roundtrip() {
        let mut w = WireWriter::new();
        w.array_u16(&[0x1001, 0x1002]);
        w.array_u32(&[0x10, 0x11, 0x12]);
        w.array_u16(&[]);
        let buf = w.finish();

        let mut r = WireReader::new(&buf);
        assert_eq!(r.array_u16("ops").unwrap(), vec![0x1001, 0x1002]);
        assert_eq!(r.array_u32("handles").unwrap(), vec![0x10, 0x11, 0x12]);
        assert_eq!(r.array_u16("empty").unwrap(), Vec::<u16>::new());
        assert!(r.is_empty());
    }

    #[test]
    fn test_byte_array_roundtrip() {
        let mut w = WireWriter::new();
        w.u32(3);
        w.bytes(&[9, 8, 7]);
        let buf = w.finish();
        let mut r = WireReader::new(&buf);
        assert_eq!(r.byte_array("value").unwrap(), vec![9, 8, 7]);
    }
}
