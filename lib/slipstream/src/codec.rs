//! Bitpacked wire codec: fixed-length primitives, length-prefixed byte blocks, range-checked
//! ints, and length-bounded strings, built on top of `flux::shared`'s `SizedWrite`/`SizedRead` +
//! `Serialize`/`Deserialize` traits. Every write checks remaining capacity first and returns
//! `NetworkError::Wait` instead of panicking; every read rejects values that fail their range
//! check rather than trusting the wire.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use flux::shared::{ErrorType, NetworkError, NetworkResult, SizedRead, SizedWrite};
use std::io::{self, Cursor};

pub struct WriteStream<'a> {
    cursor: Cursor<&'a mut [u8]>,
}

impl<'a> WriteStream<'a> {
    #[inline]
    pub fn new(buffer: &'a mut [u8]) -> Self {
        WriteStream { cursor: Cursor::new(buffer) }
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.cursor.position() as usize
    }

    #[inline]
    fn require(&self, bytes: usize) -> NetworkResult<()> {
        if self.cursor.free_capacity() < bytes {
            Err(NetworkError::Wait)
        } else {
            Ok(())
        }
    }

    #[inline]
    pub fn write_u8(&mut self, value: u8) -> NetworkResult<()> {
        self.require(1)?;
        self.cursor.write_u8(value).map_err(NetworkError::from)
    }

    #[inline]
    pub fn write_u16(&mut self, value: u16) -> NetworkResult<()> {
        self.require(2)?;
        self.cursor.write_u16::<BigEndian>(value).map_err(NetworkError::from)
    }

    #[inline]
    pub fn write_u32(&mut self, value: u32) -> NetworkResult<()> {
        self.require(4)?;
        self.cursor.write_u32::<BigEndian>(value).map_err(NetworkError::from)
    }

    #[inline]
    pub fn write_u64(&mut self, value: u64) -> NetworkResult<()> {
        self.require(8)?;
        self.cursor.write_u64::<BigEndian>(value).map_err(NetworkError::from)
    }

    #[inline]
    pub fn write_f32(&mut self, value: f32) -> NetworkResult<()> {
        self.require(4)?;
        self.cursor.write_f32::<BigEndian>(value).map_err(NetworkError::from)
    }

    /// Writes `value` as the smallest unsigned int that can hold `[min, max]`, after checking
    /// `value` actually falls in that range.
    pub fn write_range_u32(&mut self, value: u32, min: u32, max: u32) -> NetworkResult<()> {
        if value < min || value > max {
            return Err(NetworkError::Fatal(ErrorType::Serialization));
        }
        self.write_u32(value - min)
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> NetworkResult<()> {
        self.require(bytes.len())?;
        self.cursor.write_all(bytes).map_err(NetworkError::from)
    }

    /// Writes a 2-byte length prefix followed by the block itself.
    pub fn write_block(&mut self, bytes: &[u8]) -> NetworkResult<()> {
        if bytes.len() > u16::MAX as usize {
            return Err(NetworkError::Fatal(ErrorType::Serialization));
        }
        self.write_u16(bytes.len() as u16)?;
        self.write_bytes(bytes)
    }

    /// Writes a length-bounded UTF-8 string (1-byte length prefix, `max_len` enforced).
    pub fn write_string(&mut self, value: &str, max_len: usize) -> NetworkResult<()> {
        if value.len() > max_len || value.len() > u8::MAX as usize {
            return Err(NetworkError::Fatal(ErrorType::Serialization));
        }
        self.write_u8(value.len() as u8)?;
        self.write_bytes(value.as_bytes())
    }

    #[inline]
    pub fn into_inner(self) -> usize {
        self.position()
    }
}

use std::io::Write as _;

pub struct ReadStream<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> ReadStream<'a> {
    #[inline]
    pub fn new(buffer: &'a [u8]) -> Self {
        ReadStream { cursor: Cursor::new(buffer) }
    }

    #[inline]
    fn require(&self, bytes: usize) -> NetworkResult<()> {
        if self.cursor.remaining_data() < bytes {
            Err(NetworkError::Fatal(ErrorType::Serialization))
        } else {
            Ok(())
        }
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.cursor.remaining_data()
    }

    #[inline]
    pub fn read_u8(&mut self) -> NetworkResult<u8> {
        self.require(1)?;
        self.cursor.read_u8().map_err(NetworkError::from)
    }

    #[inline]
    pub fn read_u16(&mut self) -> NetworkResult<u16> {
        self.require(2)?;
        self.cursor.read_u16::<BigEndian>().map_err(NetworkError::from)
    }

    #[inline]
    pub fn read_u32(&mut self) -> NetworkResult<u32> {
        self.require(4)?;
        self.cursor.read_u32::<BigEndian>().map_err(NetworkError::from)
    }

    #[inline]
    pub fn read_u64(&mut self) -> NetworkResult<u64> {
        self.require(8)?;
        self.cursor.read_u64::<BigEndian>().map_err(NetworkError::from)
    }

    #[inline]
    pub fn read_f32(&mut self) -> NetworkResult<f32> {
        self.require(4)?;
        self.cursor.read_f32::<BigEndian>().map_err(NetworkError::from)
    }

    pub fn read_range_u32(&mut self, min: u32, max: u32) -> NetworkResult<u32> {
        let offset = self.read_u32()?;
        let value = offset
            .checked_add(min)
            .ok_or(NetworkError::Fatal(ErrorType::Serialization))?;
        if value < min || value > max {
            return Err(NetworkError::Fatal(ErrorType::Serialization));
        }
        Ok(value)
    }

    pub fn read_bytes(&mut self, len: usize) -> NetworkResult<Vec<u8>> {
        self.require(len)?;
        let mut buf = vec![0u8; len];
        io::Read::read_exact(&mut self.cursor, &mut buf).map_err(NetworkError::from)?;
        Ok(buf)
    }

    pub fn read_block(&mut self, max_len: usize) -> NetworkResult<Vec<u8>> {
        let len = self.read_u16()? as usize;
        if len > max_len {
            return Err(NetworkError::Fatal(ErrorType::Serialization));
        }
        self.read_bytes(len)
    }

    pub fn read_string(&mut self, max_len: usize) -> NetworkResult<String> {
        let len = self.read_u8()? as usize;
        if len > max_len {
            return Err(NetworkError::Fatal(ErrorType::Serialization));
        }
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes).map_err(|_| NetworkError::Fatal(ErrorType::Serialization))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_round_trip() {
        let mut buf = [0u8; 32];
        let mut w = WriteStream::new(&mut buf);
        w.write_u8(7).unwrap();
        w.write_u16(1000).unwrap();
        w.write_u32(100_000).unwrap();
        w.write_u64(9_000_000_000).unwrap();
        w.write_f32(1.5).unwrap();
        let len = w.into_inner();

        let mut r = ReadStream::new(&buf[..len]);
        assert_eq!(r.read_u8().unwrap(), 7);
        assert_eq!(r.read_u16().unwrap(), 1000);
        assert_eq!(r.read_u32().unwrap(), 100_000);
        assert_eq!(r.read_u64().unwrap(), 9_000_000_000);
        assert_eq!(r.read_f32().unwrap(), 1.5);
    }

    #[test]
    fn range_checked_int_rejects_out_of_range_write() {
        let mut buf = [0u8; 8];
        let mut w = WriteStream::new(&mut buf);
        assert!(w.write_range_u32(500, 0, 10).is_err());
        assert!(w.write_range_u32(5, 0, 10).is_ok());
    }

    #[test]
    fn block_round_trip() {
        let mut buf = [0u8; 32];
        let mut w = WriteStream::new(&mut buf);
        w.write_block(b"hello").unwrap();
        let len = w.into_inner();

        let mut r = ReadStream::new(&buf[..len]);
        assert_eq!(r.read_block(16).unwrap(), b"hello".to_vec());
    }

    #[test]
    fn string_round_trip() {
        let mut buf = [0u8; 32];
        let mut w = WriteStream::new(&mut buf);
        w.write_string("linux", 32).unwrap();
        let len = w.into_inner();

        let mut r = ReadStream::new(&buf[..len]);
        assert_eq!(r.read_string(32).unwrap(), "linux");
    }

    #[test]
    fn write_fails_on_overflow_not_panic() {
        let mut buf = [0u8; 1];
        let mut w = WriteStream::new(&mut buf);
        assert_eq!(w.write_u64(1), Err(NetworkError::Wait));
    }

    #[test]
    fn read_fails_on_truncated_input() {
        let buf = [0u8; 1];
        let mut r = ReadStream::new(&buf);
        assert!(r.read_u64().is_err());
    }
}
