//! Cursor-style binary reader and writer.

use crate::error::{Error, Result};
use bytes::{Buf, BufMut, BytesMut};

/// Reads binary data from a byte slice, tracking position.
pub struct DataReader<'a> {
    data: &'a [u8],
}

impl<'a> DataReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        DataReader { data }
    }

    pub fn remaining(&self) -> usize {
        self.data.len()
    }

    pub fn at_end(&self) -> bool {
        self.data.is_empty()
    }

    fn need(&self, count: usize) -> Result<()> {
        if self.data.len() < count {
            Err(Error::serialization(format!(
                "unexpected end of data, needed {count} more bytes, had {}",
                self.data.len()
            )))
        } else {
            Ok(())
        }
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.need(1)?;
        Ok(self.data.get_u8())
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        self.need(1)?;
        Ok(self.data.get_i8())
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.need(2)?;
        Ok(self.data.get_u16())
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.need(4)?;
        Ok(self.data.get_i32())
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.need(4)?;
        Ok(self.data.get_u32())
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.need(8)?;
        Ok(self.data.get_u64())
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        self.need(4)?;
        Ok(self.data.get_f32())
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        self.need(8)?;
        Ok(self.data.get_f64())
    }

    /// Unsigned base-128 VLQ, low 7 bits per byte, high bit continues.
    pub fn read_vlq_u(&mut self) -> Result<u64> {
        let mut value: u64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = self.read_u8()?;
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
            if shift >= 64 {
                return Err(Error::serialization("vlq quantity overflows 64 bits"));
            }
        }
    }

    /// Signed VLQ via zigzag decoding.
    pub fn read_vlq_i(&mut self) -> Result<i64> {
        let raw = self.read_vlq_u()?;
        Ok(((raw >> 1) as i64) ^ -((raw & 1) as i64))
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>> {
        self.need(count)?;
        let (head, tail) = self.data.split_at(count);
        self.data = tail;
        Ok(head.to_vec())
    }

    /// A VLQ length prefix followed by raw bytes.
    pub fn read_byte_array(&mut self) -> Result<Vec<u8>> {
        let len = self.read_vlq_u()? as usize;
        self.read_bytes(len)
    }

    pub fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_byte_array()?;
        String::from_utf8(bytes).map_err(|e| Error::serialization(format!("invalid utf8: {e}")))
    }

    pub fn read<T: Readable>(&mut self) -> Result<T> {
        T::read(self)
    }

    pub fn read_list<T: Readable>(&mut self) -> Result<Vec<T>> {
        let count = self.read_vlq_u()? as usize;
        let mut out = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            out.push(T::read(self)?);
        }
        Ok(out)
    }
}

/// Writes binary data into a growable buffer.
#[derive(Default)]
pub struct DataWriter {
    buffer: BytesMut,
}

impl DataWriter {
    pub fn new() -> Self {
        DataWriter::default()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer.to_vec()
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buffer.put_u8(v);
    }

    pub fn write_i8(&mut self, v: i8) {
        self.buffer.put_i8(v);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.buffer.put_u8(v as u8);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.buffer.put_u16(v);
    }

    pub fn write_i32(&mut self, v: i32) {
        self.buffer.put_i32(v);
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buffer.put_u32(v);
    }

    pub fn write_u64(&mut self, v: u64) {
        self.buffer.put_u64(v);
    }

    pub fn write_f32(&mut self, v: f32) {
        self.buffer.put_f32(v);
    }

    pub fn write_f64(&mut self, v: f64) {
        self.buffer.put_f64(v);
    }

    pub fn write_vlq_u(&mut self, mut v: u64) {
        loop {
            let mut byte = (v & 0x7f) as u8;
            v >>= 7;
            if v != 0 {
                byte |= 0x80;
            }
            self.buffer.put_u8(byte);
            if v == 0 {
                return;
            }
        }
    }

    pub fn write_vlq_i(&mut self, v: i64) {
        self.write_vlq_u(((v << 1) ^ (v >> 63)) as u64);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buffer.put_slice(bytes);
    }

    pub fn write_byte_array(&mut self, bytes: &[u8]) {
        self.write_vlq_u(bytes.len() as u64);
        self.buffer.put_slice(bytes);
    }

    pub fn write_string(&mut self, s: &str) {
        self.write_byte_array(s.as_bytes());
    }

    pub fn write<T: Writable>(&mut self, value: &T) {
        value.write(self);
    }

    pub fn write_list<T: Writable>(&mut self, values: &[T]) {
        self.write_vlq_u(values.len() as u64);
        for value in values {
            value.write(self);
        }
    }
}

/// A type readable from a [`DataReader`].
pub trait Readable: Sized {
    fn read(reader: &mut DataReader) -> Result<Self>;
}

/// A type writable to a [`DataWriter`].
pub trait Writable {
    fn write(&self, writer: &mut DataWriter);
}

impl Readable for String {
    fn read(reader: &mut DataReader) -> Result<String> {
        reader.read_string()
    }
}

impl Writable for String {
    fn write(&self, writer: &mut DataWriter) {
        writer.write_string(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_round_trip() {
        let mut writer = DataWriter::new();
        writer.write_u8(0xab);
        writer.write_u16(0x1234);
        writer.write_i32(-77);
        writer.write_f32(1.5);
        writer.write_bool(true);
        writer.write_string("skyward");

        let bytes = writer.into_bytes();
        let mut reader = DataReader::new(&bytes);
        assert_eq!(reader.read_u8().unwrap(), 0xab);
        assert_eq!(reader.read_u16().unwrap(), 0x1234);
        assert_eq!(reader.read_i32().unwrap(), -77);
        assert_eq!(reader.read_f32().unwrap(), 1.5);
        assert!(reader.read_bool().unwrap());
        assert_eq!(reader.read_string().unwrap(), "skyward");
        assert!(reader.at_end());
    }

    #[test]
    fn vlq_round_trip() {
        let values = [0i64, 1, -1, 63, -64, 127, 128, -12345, i64::MAX, i64::MIN];
        let mut writer = DataWriter::new();
        for v in values {
            writer.write_vlq_i(v);
        }
        let bytes = writer.into_bytes();
        let mut reader = DataReader::new(&bytes);
        for v in values {
            assert_eq!(reader.read_vlq_i().unwrap(), v);
        }
    }

    #[test]
    fn vlq_small_values_are_one_byte() {
        let mut writer = DataWriter::new();
        writer.write_vlq_u(127);
        assert_eq!(writer.len(), 1);
        writer.write_vlq_u(128);
        assert_eq!(writer.len(), 3);
    }

    #[test]
    fn truncated_data_is_an_error() {
        let mut reader = DataReader::new(&[0x01]);
        assert!(reader.read_u32().is_err());
    }
}
