//! Big-endian typed access over message payloads.
//!
//! Every multi-byte integer on the wire is big-endian. Strings and byte
//! fields carry a u32 length prefix; UUIDs are 16 raw bytes in network
//! order; header maps are a u16 count of `(u16 code, bytes value)`
//! pairs.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Cursor over a message payload with checked big-endian reads.
#[derive(Debug, Clone)]
pub struct PacketReader {
    buf: Bytes,
}

impl PacketReader {
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn ensure(&self, n: usize, what: &str) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(Error::Protocol(format!(
                "truncated message: need {n} bytes for {what}, have {}",
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        self.ensure(1, "u8")?;
        Ok(self.buf.get_u8())
    }

    pub fn get_i16(&mut self) -> Result<i16> {
        self.ensure(2, "i16")?;
        Ok(self.buf.get_i16())
    }

    pub fn get_u16(&mut self) -> Result<u16> {
        self.ensure(2, "u16")?;
        Ok(self.buf.get_u16())
    }

    pub fn get_i32(&mut self) -> Result<i32> {
        self.ensure(4, "i32")?;
        Ok(self.buf.get_i32())
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        self.ensure(4, "u32")?;
        Ok(self.buf.get_u32())
    }

    pub fn get_i64(&mut self) -> Result<i64> {
        self.ensure(8, "i64")?;
        Ok(self.buf.get_i64())
    }

    pub fn get_u64(&mut self) -> Result<u64> {
        self.ensure(8, "u64")?;
        Ok(self.buf.get_u64())
    }

    pub fn get_f32(&mut self) -> Result<f32> {
        self.ensure(4, "f32")?;
        Ok(self.buf.get_f32())
    }

    pub fn get_f64(&mut self) -> Result<f64> {
        self.ensure(8, "f64")?;
        Ok(self.buf.get_f64())
    }

    pub fn get_uuid(&mut self) -> Result<Uuid> {
        self.ensure(16, "uuid")?;
        let mut raw = [0u8; 16];
        self.buf.copy_to_slice(&mut raw);
        Ok(Uuid::from_bytes(raw))
    }

    /// Read exactly `n` raw bytes.
    pub fn get_bytes(&mut self, n: usize) -> Result<Bytes> {
        self.ensure(n, "bytes")?;
        Ok(self.buf.copy_to_bytes(n))
    }

    /// Read a u32 length-prefixed byte field.
    pub fn get_len_bytes(&mut self) -> Result<Bytes> {
        let n = self.get_u32()? as usize;
        self.get_bytes(n)
    }

    /// Read a u32 length-prefixed UTF-8 string.
    pub fn get_str(&mut self) -> Result<String> {
        let raw = self.get_len_bytes()?;
        String::from_utf8(raw.to_vec())
            .map_err(|e| Error::Protocol(format!("invalid utf-8 in string field: {e}")))
    }

    /// Read a header map: u16 count of (u16 code, length-prefixed value).
    pub fn get_headers(&mut self) -> Result<Vec<(u16, Bytes)>> {
        let n = self.get_u16()? as usize;
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            let code = self.get_u16()?;
            let value = self.get_len_bytes()?;
            out.push((code, value));
        }
        Ok(out)
    }

    /// Consume everything left in the payload.
    pub fn rest(&mut self) -> Bytes {
        let n = self.buf.remaining();
        self.buf.copy_to_bytes(n)
    }
}

/// Builder for message payloads; the big-endian mirror of
/// [`PacketReader`].
#[derive(Debug, Default)]
pub struct PacketWriter {
    buf: BytesMut,
}

impl PacketWriter {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(256),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn put_i16(&mut self, v: i16) {
        self.buf.put_i16(v);
    }

    pub fn put_u16(&mut self, v: u16) {
        self.buf.put_u16(v);
    }

    pub fn put_i32(&mut self, v: i32) {
        self.buf.put_i32(v);
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.put_u32(v);
    }

    pub fn put_i64(&mut self, v: i64) {
        self.buf.put_i64(v);
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.put_u64(v);
    }

    pub fn put_f32(&mut self, v: f32) {
        self.buf.put_f32(v);
    }

    pub fn put_f64(&mut self, v: f64) {
        self.buf.put_f64(v);
    }

    pub fn put_uuid(&mut self, v: Uuid) {
        self.buf.put_slice(v.as_bytes());
    }

    pub fn put_raw(&mut self, v: &[u8]) {
        self.buf.put_slice(v);
    }

    /// Write a u32 length-prefixed byte field.
    pub fn put_len_bytes(&mut self, v: &[u8]) {
        self.buf.put_u32(v.len() as u32);
        self.buf.put_slice(v);
    }

    /// Write a u32 length-prefixed UTF-8 string.
    pub fn put_str(&mut self, v: &str) {
        self.put_len_bytes(v.as_bytes());
    }

    /// Write a header map: u16 count of (u16 code, length-prefixed value).
    pub fn put_headers(&mut self, headers: &[(u16, &[u8])]) {
        self.buf.put_u16(headers.len() as u16);
        for (code, value) in headers {
            self.buf.put_u16(*code);
            self.put_len_bytes(value);
        }
    }

    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}
