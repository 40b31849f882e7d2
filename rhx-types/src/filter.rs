use serde::Serialize;

use crate::{FormatError, FormatResult};

/// Режим режекторного фильтра.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(i16)]
pub enum NotchFilter {
    /// Фильтр выключен
    Off = 0,
    /// 50 Гц
    Hz50 = 1,
    /// 60 Гц
    Hz60 = 2,
}

impl NotchFilter {
    pub fn from_code(v: i16) -> FormatResult<Self> {
        match v {
            0 => Ok(NotchFilter::Off),
            1 => Ok(NotchFilter::Hz50),
            2 => Ok(NotchFilter::Hz60),
            _ => Err(FormatError::invalid_field(
                "notch filter mode",
                format!("unknown code {v}"),
            )),
        }
    }

    pub fn as_code(&self) -> i16 {
        *self as i16
    }

    /// Частота режекции в Гц (`None` если выключен).
    pub fn frequency_hz(&self) -> Option<f64> {
        match self {
            NotchFilter::Off => None,
            NotchFilter::Hz50 => Some(50.0),
            NotchFilter::Hz60 => Some(60.0),
        }
    }
}
