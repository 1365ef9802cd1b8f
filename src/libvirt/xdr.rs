//! Minimal XDR (RFC 4506) codec for the libvirt remote protocol.

use bytes::{Buf, BufMut, BytesMut};

use crate::hypervisor::HypervisorError;

/// Longest string libvirt accepts on the wire (`REMOTE_STRING_MAX`).
pub const STRING_MAX: usize = 4 * 1024 * 1024;

fn padding(len: usize) -> usize {
    (4 - len % 4) % 4
}

/// Appends XDR encoded values to a buffer.
#[derive(Debug, Default)]
pub struct XdrWriter {
    buf: BytesMut,
}

impl XdrWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Unsigned 32-bit integer.
    pub fn put_u32(&mut self, value: u32) -> &mut Self {
        self.buf.put_u32(value);
        self
    }

    /// Signed 32-bit integer.
    pub fn put_i32(&mut self, value: i32) -> &mut Self {
        self.buf.put_i32(value);
        self
    }

    /// Variable length string.
    pub fn put_string(&mut self, value: &str) -> &mut Self {
        self.put_opaque(value.as_bytes())
    }

    /// Variable length opaque data.
    pub fn put_opaque(&mut self, value: &[u8]) -> &mut Self {
        self.buf.put_u32(value.len() as u32);
        self.put_fixed(value)
    }

    /// Fixed length opaque data.
    pub fn put_fixed(&mut self, value: &[u8]) -> &mut Self {
        self.buf.put_slice(value);
        self.buf.put_bytes(0, padding(value.len()));
        self
    }

    /// Optional string (`remote_string`).
    pub fn put_optional_string(&mut self, value: Option<&str>) -> &mut Self {
        match value {
            Some(value) => {
                self.buf.put_u32(1);
                self.put_string(value)
            }
            None => self.put_u32(0),
        }
    }

    /// The encoded bytes.
    pub fn finish(self) -> BytesMut {
        self.buf
    }
}

/// Reads XDR encoded values from a byte slice.
#[derive(Debug)]
pub struct XdrReader<'a> {
    buf: &'a [u8],
}

impl<'a> XdrReader<'a> {
    /// Read from `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Bytes not consumed yet.
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn need(&self, len: usize, what: &str) -> Result<(), HypervisorError> {
        if self.buf.remaining() < len {
            return Err(HypervisorError::Protocol(format!(
                "truncated {what}: need {len} bytes, have {}",
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    /// Unsigned 32-bit integer.
    pub fn get_u32(&mut self) -> Result<u32, HypervisorError> {
        self.need(4, "u32")?;
        Ok(self.buf.get_u32())
    }

    /// Signed 32-bit integer.
    pub fn get_i32(&mut self) -> Result<i32, HypervisorError> {
        self.need(4, "i32")?;
        Ok(self.buf.get_i32())
    }

    /// Boolean discriminant of an optional value.
    pub fn get_bool(&mut self) -> Result<bool, HypervisorError> {
        match self.get_u32()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(HypervisorError::Protocol(format!(
                "invalid boolean {other}"
            ))),
        }
    }

    /// Variable length string.
    pub fn get_string(&mut self) -> Result<String, HypervisorError> {
        let bytes = self.get_opaque(STRING_MAX)?;
        String::from_utf8(bytes)
            .map_err(|e| HypervisorError::Protocol(format!("invalid utf-8 string: {e}")))
    }

    /// Variable length opaque data of at most `max` bytes.
    pub fn get_opaque(&mut self, max: usize) -> Result<Vec<u8>, HypervisorError> {
        let len = self.get_u32()? as usize;
        if len > max {
            return Err(HypervisorError::Protocol(format!(
                "opaque length {len} exceeds limit {max}"
            )));
        }
        let mut out = vec![0; len];
        self.get_fixed(&mut out)?;
        Ok(out)
    }

    /// Fixed length opaque data filling `out`.
    pub fn get_fixed(&mut self, out: &mut [u8]) -> Result<(), HypervisorError> {
        let padded = out.len() + padding(out.len());
        self.need(padded, "opaque")?;
        self.buf.copy_to_slice(out);
        self.buf.advance(padding(out.len()));
        Ok(())
    }

    /// Optional string (`remote_string`).
    pub fn get_optional_string(&mut self) -> Result<Option<String>, HypervisorError> {
        if self.get_bool()? {
            Ok(Some(self.get_string()?))
        } else {
            Ok(None)
        }
    }

    /// Length prefix of a variable array bounded by `max`.
    pub fn get_array_len(&mut self, max: usize) -> Result<usize, HypervisorError> {
        let len = self.get_u32()? as usize;
        if len > max {
            return Err(HypervisorError::Protocol(format!(
                "array length {len} exceeds limit {max}"
            )));
        }
        Ok(len)
    }
}
