use std::io::{ErrorKind, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use rhx_types::{CodecError, CodecResult, FormatError};

/// Длина QString, означающая пустую (null) строку
pub const QSTRING_NULL: u32 = 0xFFFF_FFFF;

/// Последовательное чтение полей заголовка (little-endian).
///
/// Помнит текущее "место" в заголовке, чтобы ошибки указывали группу/канал.
pub struct FieldReader<R: Read> {
    inner: R,
    location: String,
    consumed: u64,
}

impl<R: Read> FieldReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            location: String::from("header"),
            consumed: 0,
        }
    }

    /// Устанавливает контекст для сообщений об ошибках.
    pub fn set_location<S: Into<String>>(
        &mut self,
        location: S,
    ) {
        self.location = location.into();
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Сколько байт прочитано с момента создания.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    pub fn i16(
        &mut self,
        field: &str,
    ) -> CodecResult<i16> {
        let v = self.inner.read_i16::<LittleEndian>();
        self.finish(v, 2, field)
    }

    pub fn u32(
        &mut self,
        field: &str,
    ) -> CodecResult<u32> {
        let v = self.inner.read_u32::<LittleEndian>();
        self.finish(v, 4, field)
    }

    pub fn f32(
        &mut self,
        field: &str,
    ) -> CodecResult<f32> {
        let v = self.inner.read_f32::<LittleEndian>();
        self.finish(v, 4, field)
    }

    /// `i16`, интерпретируемый как логический флаг.
    pub fn flag(
        &mut self,
        field: &str,
    ) -> CodecResult<bool> {
        Ok(self.i16(field)? != 0)
    }

    /// `i16` в диапазоне `lo..=hi`.
    pub fn bounded_i16(
        &mut self,
        field: &str,
        lo: i16,
        hi: i16,
    ) -> CodecResult<i16> {
        let v = self.i16(field)?;

        if v < lo || v > hi {
            return Err(FormatError::invalid_field(
                format!("{}: {field}", self.location),
                format!("{v} is outside {lo}..={hi}"),
            )
            .into());
        }

        Ok(v)
    }

    /// Строка Qt: `u32` длина в байтах, затем UTF-16LE.
    pub fn qstring(
        &mut self,
        field: &str,
    ) -> CodecResult<String> {
        let len = self.u32(field)?;

        if len == QSTRING_NULL {
            return Ok(String::new());
        }

        if len % 2 != 0 || len > 1 << 16 {
            return Err(FormatError::invalid_field(
                format!("{}: {field}", self.location),
                format!("bad string length {len}"),
            )
            .into());
        }

        let mut units = Vec::with_capacity(len as usize / 2);

        for _ in 0..len / 2 {
            let v = self.inner.read_u16::<LittleEndian>();
            units.push(self.finish(v, 2, field)?);
        }

        Ok(String::from_utf16_lossy(&units))
    }

    fn finish<T>(
        &mut self,
        v: std::io::Result<T>,
        size: u64,
        field: &str,
    ) -> CodecResult<T> {
        match v {
            Ok(v) => {
                self.consumed += size;
                Ok(v)
            }
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                Err(FormatError::truncated(format!("{}: {field}", self.location)).into())
            }
            Err(e) => Err(CodecError::Io(e)),
        }
    }
}
