use rhx_types::CodecError;
use thiserror::Error;

pub type PlaybackResult<T> = std::result::Result<T, PlaybackError>;

#[derive(Debug, Error)]
pub enum PlaybackError {
    /// Ошибка разбора или чтения записи
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Недопустимые параметры воспроизведения
    #[error("Config error: {0}")]
    Config(String),

    /// Строка позиции не разобрана
    #[error("Invalid position '{0}'")]
    InvalidPosition(String),
}
