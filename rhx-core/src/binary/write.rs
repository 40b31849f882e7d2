use byteorder::{LittleEndian, WriteBytesExt};

use crate::binary::QSTRING_NULL;

/// Запись полей заголовка (little-endian) в буфер в памяти.
#[derive(Debug, Default)]
pub struct FieldWriter {
    buf: Vec<u8>,
}

impl FieldWriter {
    pub fn new() -> Self {
        Self::default()
    }

    // Запись в Vec<u8> не может завершиться ошибкой, поэтому результаты
    // WriteBytesExt отбрасываются.

    pub fn i16(
        &mut self,
        v: i16,
    ) -> &mut Self {
        let _ = self.buf.write_i16::<LittleEndian>(v);
        self
    }

    pub fn u32(
        &mut self,
        v: u32,
    ) -> &mut Self {
        let _ = self.buf.write_u32::<LittleEndian>(v);
        self
    }

    pub fn f32(
        &mut self,
        v: f32,
    ) -> &mut Self {
        let _ = self.buf.write_f32::<LittleEndian>(v);
        self
    }

    pub fn flag(
        &mut self,
        v: bool,
    ) -> &mut Self {
        self.i16(v as i16)
    }

    pub fn qstring(
        &mut self,
        s: &str,
    ) -> &mut Self {
        if s.is_empty() {
            return self.u32(QSTRING_NULL);
        }

        let units: Vec<u16> = s.encode_utf16().collect();
        self.u32(units.len() as u32 * 2);

        for u in units {
            let _ = self.buf.write_u16::<LittleEndian>(u);
        }

        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}
