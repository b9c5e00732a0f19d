use bedrock::colour::Colour;
use bedrock::math::Vec3;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

/// Decode failure for an inbound payload. The packet is dropped; nothing
/// is reported back to the peer.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum WireError {
    UnexpectedEof,
    StringTooLong,
    BadDiscriminant,
}

impl From<std::io::Error> for WireError {
    #[inline]
    fn from(_: std::io::Error) -> WireError {
        WireError::UnexpectedEof
    }
}

pub type WireResult<T> = Result<T, WireError>;

/// Little-endian writer assembling one datagram: a leading RPC id byte
/// followed by the fixed payload schema.
pub struct PacketWriter {
    data: Vec<u8>,
}

impl PacketWriter {
    pub fn new(rpc_id: u8) -> PacketWriter {
        PacketWriter { data: vec![rpc_id] }
    }

    #[inline]
    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.data.push(value);
        self
    }

    #[inline]
    pub fn write_bool(&mut self, value: bool) -> &mut Self {
        self.write_u8(value as u8)
    }

    #[inline]
    pub fn write_u16(&mut self, value: u16) -> &mut Self {
        self.data.write_u16::<LittleEndian>(value).expect("vec write");
        self
    }

    #[inline]
    pub fn write_i16(&mut self, value: i16) -> &mut Self {
        self.data.write_i16::<LittleEndian>(value).expect("vec write");
        self
    }

    #[inline]
    pub fn write_u32(&mut self, value: u32) -> &mut Self {
        self.data.write_u32::<LittleEndian>(value).expect("vec write");
        self
    }

    #[inline]
    pub fn write_i32(&mut self, value: i32) -> &mut Self {
        self.data.write_i32::<LittleEndian>(value).expect("vec write");
        self
    }

    #[inline]
    pub fn write_f32(&mut self, value: f32) -> &mut Self {
        self.data.write_f32::<LittleEndian>(value).expect("vec write");
        self
    }

    #[inline]
    pub fn write_vec3(&mut self, value: Vec3) -> &mut Self {
        self.write_f32(value.x).write_f32(value.y).write_f32(value.z)
    }

    #[inline]
    pub fn write_colour_rgba(&mut self, value: Colour) -> &mut Self {
        self.write_u32(value.rgba())
    }

    #[inline]
    pub fn write_colour_argb(&mut self, value: Colour) -> &mut Self {
        self.write_u32(value.argb())
    }

    /// String with a u8 length prefix, truncated at 255 bytes like the
    /// client does.
    pub fn write_str8(&mut self, value: &str) -> &mut Self {
        let bytes = truncated(value.as_bytes(), u8::max_value() as usize);
        self.write_u8(bytes.len() as u8);
        self.data.extend_from_slice(bytes);
        self
    }

    /// String with a u16 length prefix.
    pub fn write_str16(&mut self, value: &str) -> &mut Self {
        let bytes = truncated(value.as_bytes(), u16::max_value() as usize);
        self.write_u16(bytes.len() as u16);
        self.data.extend_from_slice(bytes);
        self
    }

    #[inline]
    pub fn finish(self) -> Vec<u8> {
        self.data
    }
}

// Truncates at a char boundary so the payload stays valid UTF-8.
fn truncated(bytes: &[u8], limit: usize) -> &[u8] {
    if bytes.len() <= limit {
        return bytes;
    }
    let mut end = limit;
    while end > 0 && (bytes[end] & 0b1100_0000) == 0b1000_0000 {
        end -= 1;
    }
    &bytes[..end]
}

/// Little-endian reader over one inbound payload (the RPC id byte has
/// already been consumed by the dispatch layer).
pub struct PacketReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> PacketReader<'a> {
    pub fn new(payload: &'a [u8]) -> PacketReader<'a> {
        PacketReader {
            cursor: Cursor::new(payload),
        }
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        let len = self.cursor.get_ref().len() as u64;
        (len - self.cursor.position().min(len)) as usize
    }

    #[inline]
    pub fn read_u8(&mut self) -> WireResult<u8> {
        Ok(self.cursor.read_u8()?)
    }

    #[inline]
    pub fn read_bool(&mut self) -> WireResult<bool> {
        Ok(self.read_u8()? != 0)
    }

    #[inline]
    pub fn read_u16(&mut self) -> WireResult<u16> {
        Ok(self.cursor.read_u16::<LittleEndian>()?)
    }

    #[inline]
    pub fn read_i16(&mut self) -> WireResult<i16> {
        Ok(self.cursor.read_i16::<LittleEndian>()?)
    }

    #[inline]
    pub fn read_u32(&mut self) -> WireResult<u32> {
        Ok(self.cursor.read_u32::<LittleEndian>()?)
    }

    #[inline]
    pub fn read_i32(&mut self) -> WireResult<i32> {
        Ok(self.cursor.read_i32::<LittleEndian>()?)
    }

    #[inline]
    pub fn read_f32(&mut self) -> WireResult<f32> {
        Ok(self.cursor.read_f32::<LittleEndian>()?)
    }

    #[inline]
    pub fn read_vec3(&mut self) -> WireResult<Vec3> {
        Ok(Vec3::new(self.read_f32()?, self.read_f32()?, self.read_f32()?))
    }

    #[inline]
    pub fn read_colour_rgba(&mut self) -> WireResult<Colour> {
        Ok(Colour::from_rgba(self.read_u32()?))
    }

    #[inline]
    pub fn read_colour_argb(&mut self) -> WireResult<Colour> {
        Ok(Colour::from_argb(self.read_u32()?))
    }

    pub fn read_str8(&mut self) -> WireResult<String> {
        let len = self.read_u8()? as usize;
        self.read_string(len)
    }

    pub fn read_str16(&mut self) -> WireResult<String> {
        let len = self.read_u16()? as usize;
        self.read_string(len)
    }

    fn read_string(&mut self, len: usize) -> WireResult<String> {
        if self.remaining() < len {
            return Err(WireError::UnexpectedEof);
        }
        let mut bytes = vec![0u8; len];
        std::io::Read::read_exact(&mut self.cursor, &mut bytes)?;
        String::from_utf8(bytes).map_err(|_| WireError::BadDiscriminant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_roundtrip() {
        let mut writer = PacketWriter::new(7);
        writer
            .write_u8(1)
            .write_u16(0x0203)
            .write_u32(0x04050607)
            .write_i32(-9)
            .write_f32(1.5)
            .write_bool(true);
        let data = writer.finish();
        assert_eq!(data[0], 7);

        let mut reader = PacketReader::new(&data[1..]);
        assert_eq!(reader.read_u8().unwrap(), 1);
        assert_eq!(reader.read_u16().unwrap(), 0x0203);
        assert_eq!(reader.read_u32().unwrap(), 0x04050607);
        assert_eq!(reader.read_i32().unwrap(), -9);
        assert_eq!(reader.read_f32().unwrap(), 1.5);
        assert!(reader.read_bool().unwrap());
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_little_endian_layout() {
        let mut writer = PacketWriter::new(0);
        writer.write_u16(0x0102);
        assert_eq!(writer.finish(), vec![0, 0x02, 0x01]);
    }

    #[test]
    fn test_vec3_and_strings() {
        let mut writer = PacketWriter::new(0);
        writer
            .write_vec3(Vec3::new(1.0, 2.0, 3.0))
            .write_str8("abc")
            .write_str16("defg");
        let data = writer.finish();

        let mut reader = PacketReader::new(&data[1..]);
        assert_eq!(reader.read_vec3().unwrap(), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(reader.read_str8().unwrap(), "abc");
        assert_eq!(reader.read_str16().unwrap(), "defg");
    }

    #[test]
    fn test_truncated_read_fails() {
        let mut writer = PacketWriter::new(0);
        writer.write_u32(42);
        let data = writer.finish();

        let mut reader = PacketReader::new(&data[1..3]);
        assert_eq!(reader.read_u32(), Err(WireError::UnexpectedEof));
    }

    #[test]
    fn test_string_length_lies() {
        // Length prefix claims more bytes than the payload carries.
        let payload = [5u8, b'h', b'i'];
        let mut reader = PacketReader::new(&payload);
        assert_eq!(reader.read_str8(), Err(WireError::UnexpectedEof));
    }

    #[test]
    fn test_colour_orders() {
        let colour = Colour::from_rgba(0xAABBCCDD);
        let mut writer = PacketWriter::new(0);
        writer.write_colour_argb(colour).write_colour_rgba(colour);
        let data = writer.finish();

        let mut reader = PacketReader::new(&data[1..]);
        assert_eq!(reader.read_colour_argb().unwrap(), colour);
        assert_eq!(reader.read_colour_rgba().unwrap(), colour);
    }
}
