use std::path::PathBuf;

use thiserror::Error;

/// Результат разбора заголовка.
pub type FormatResult<T> = std::result::Result<T, FormatError>;

/// Результат операций кодека (заголовок + файлы данных).
pub type CodecResult<T> = std::result::Result<T, CodecError>;

/// Ошибки формата заголовка. Всегда фатальны: открытие записи прерывается.
#[derive(Debug, Error)]
pub enum FormatError {
    /// Неизвестное магическое число (ни RHD, ни RHS)
    #[error("Bad magic number: 0x{0:08x}")]
    BadMagic(u32),

    /// Несовместимая версия формата
    #[error("Unsupported version: {major}.{minor}")]
    UnsupportedVersion { major: i16, minor: i16 },

    /// Поле вне допустимого диапазона
    #[error("Invalid field at {location}: {message}")]
    InvalidField { location: String, message: String },

    /// Не удалось определить поколение контроллера
    #[error("Unknown board mode: {0}")]
    UnknownBoardMode(i16),

    /// Заголовок оборван
    #[error("Truncated header at {location}")]
    Truncated { location: String },
}

/// Ошибки кодека воспроизведения.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Ошибка заголовка
    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    /// Обязательный файл отсутствует (time.dat или сам заголовок)
    #[error("Missing file: {0}")]
    MissingFile(PathBuf),

    /// Ошибки ввода/вывода (автоконвертируются из std::io::Error)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Не удалось определить или собрать раскладку записи
    #[error("Layout error: {0}")]
    Layout(String),
}

impl FormatError {
    /// Удобные конструкторы
    pub fn invalid_field<L: Into<String>, M: Into<String>>(
        location: L,
        message: M,
    ) -> Self {
        Self::InvalidField {
            location: location.into(),
            message: message.into(),
        }
    }

    pub fn truncated<L: Into<String>>(location: L) -> Self {
        Self::Truncated {
            location: location.into(),
        }
    }
}

impl CodecError {
    pub fn layout<S: Into<String>>(s: S) -> Self {
        Self::Layout(s.into())
    }
}
