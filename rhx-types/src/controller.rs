use serde::Serialize;

/// Магическое число заголовка RHD-файлов
pub const RHD_HEADER_MAGIC: u32 = 0xC691_2702;

/// Магическое число заголовка RHS-файлов
pub const RHS_HEADER_MAGIC: u32 = 0xD691_27AC;

/// Режим платы, которым RHX помечает USB3 Recording Controller
pub const BOARD_MODE_RECORD_USB3: i16 = 13;

/// Семейство заголовка (определяется магическим числом).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HeaderFamily {
    /// Только запись (RHD2000)
    Rhd,
    /// Запись + стимуляция (RHS2000)
    Rhs,
}

/// Поколение контроллера. Определяет раскладку wire-блока.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum ControllerType {
    /// RHD USB interface board / eval board (USB 2.0)
    RecordUsb2 = 0,
    /// RHD Recording Controller (USB 3.0)
    RecordUsb3 = 1,
    /// RHS Stim/Recording Controller
    StimRecord = 2,
}

impl HeaderFamily {
    pub fn from_magic(magic: u32) -> Option<Self> {
        match magic {
            RHD_HEADER_MAGIC => Some(HeaderFamily::Rhd),
            RHS_HEADER_MAGIC => Some(HeaderFamily::Rhs),
            _ => None,
        }
    }

    pub fn magic(&self) -> u32 {
        match self {
            HeaderFamily::Rhd => RHD_HEADER_MAGIC,
            HeaderFamily::Rhs => RHS_HEADER_MAGIC,
        }
    }

    /// Расширение файла заголовка.
    pub fn extension(&self) -> &'static str {
        match self {
            HeaderFamily::Rhd => "rhd",
            HeaderFamily::Rhs => "rhs",
        }
    }
}

impl ControllerType {
    pub fn is_stim(&self) -> bool {
        matches!(self, ControllerType::StimRecord)
    }

    /// Каналов усилителя на один поток данных.
    pub fn channels_per_stream(&self) -> usize {
        match self {
            ControllerType::StimRecord => 16,
            _ => 32,
        }
    }

    /// Слотов aux-команд на поток.
    pub fn aux_command_slots(&self) -> usize {
        match self {
            ControllerType::StimRecord => 4,
            _ => 3,
        }
    }

    /// 8-байтовое магическое число wire-блока.
    pub fn wire_magic(&self) -> u64 {
        match self {
            ControllerType::RecordUsb2 => 0xC691_1999_2702_1942,
            ControllerType::RecordUsb3 => 0xD7A2_2AAA_3813_2A53,
            ControllerType::StimRecord => 0x8D54_2C8A_4971_2F0B,
        }
    }

    /// Количество filler-слов после данных усилителей.
    pub fn filler_words(
        &self,
        num_streams: usize,
    ) -> usize {
        match self {
            ControllerType::RecordUsb2 => num_streams,
            ControllerType::RecordUsb3 => num_streams % 4,
            ControllerType::StimRecord => 0,
        }
    }

    /// Значение-заглушка для аналоговых входов/выходов.
    ///
    /// USB2-платы оцифровывают АЦП в диапазоне 0..3.3 В (ноль = 0), остальные
    /// используют offset-binary (ноль = 32768).
    pub fn analog_placeholder(&self) -> u16 {
        match self {
            ControllerType::RecordUsb2 => 0,
            _ => 32_768,
        }
    }
}
