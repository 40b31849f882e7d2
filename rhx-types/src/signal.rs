use serde::Serialize;

use crate::{ControllerType, HeaderFamily};

/// Заглушка для 16-битных offset-binary каналов усилителя
pub const AMPLIFIER_PLACEHOLDER: u16 = 32_768;

/// Заглушка для 10-битного DC-усилителя (середина шкалы)
pub const DC_AMPLIFIER_PLACEHOLDER: u16 = 512;

/// Файл временных меток (обязателен для per-signal-type и per-channel)
pub const TIME_FILE_NAME: &str = "time.dat";

/// Категория сигнала.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SignalType {
    Amplifier,
    DcAmplifier,
    Stim,
    AuxInput,
    SupplyVoltage,
    AnalogIn,
    AnalogOut,
    DigitalIn,
    DigitalOut,
}

impl SignalType {
    /// Все категории в порядке файлов per-signal-type.
    pub const ALL: [SignalType; 9] = [
        SignalType::Amplifier,
        SignalType::DcAmplifier,
        SignalType::Stim,
        SignalType::AuxInput,
        SignalType::SupplyVoltage,
        SignalType::AnalogIn,
        SignalType::AnalogOut,
        SignalType::DigitalIn,
        SignalType::DigitalOut,
    ];

    /// Декодирует код типа сигнала из заголовка.
    ///
    /// DC-усилитель и стимуляция в заголовке не встречаются: они выводятся из
    /// каналов усилителя.
    pub fn from_header_code(
        family: HeaderFamily,
        code: i16,
    ) -> Option<Self> {
        match (family, code) {
            (_, 0) => Some(SignalType::Amplifier),
            (HeaderFamily::Rhd, 1) => Some(SignalType::AuxInput),
            (HeaderFamily::Rhd, 2) => Some(SignalType::SupplyVoltage),
            (_, 3) => Some(SignalType::AnalogIn),
            (HeaderFamily::Rhd, 4) => Some(SignalType::DigitalIn),
            (HeaderFamily::Rhd, 5) => Some(SignalType::DigitalOut),
            (HeaderFamily::Rhs, 4) => Some(SignalType::AnalogOut),
            (HeaderFamily::Rhs, 5) => Some(SignalType::DigitalIn),
            (HeaderFamily::Rhs, 6) => Some(SignalType::DigitalOut),
            _ => None,
        }
    }

    /// Обратное преобразование (для записи заголовка).
    pub fn header_code(
        &self,
        family: HeaderFamily,
    ) -> Option<i16> {
        match (family, self) {
            (_, SignalType::Amplifier) => Some(0),
            (HeaderFamily::Rhd, SignalType::AuxInput) => Some(1),
            (HeaderFamily::Rhd, SignalType::SupplyVoltage) => Some(2),
            (_, SignalType::AnalogIn) => Some(3),
            (HeaderFamily::Rhd, SignalType::DigitalIn) => Some(4),
            (HeaderFamily::Rhd, SignalType::DigitalOut) => Some(5),
            (HeaderFamily::Rhs, SignalType::AnalogOut) => Some(4),
            (HeaderFamily::Rhs, SignalType::DigitalIn) => Some(5),
            (HeaderFamily::Rhs, SignalType::DigitalOut) => Some(6),
            _ => None,
        }
    }

    /// Имя файла в раскладке per-signal-type.
    pub fn signal_file_name(&self) -> &'static str {
        match self {
            SignalType::Amplifier => "amplifier.dat",
            SignalType::DcAmplifier => "dcamplifier.dat",
            SignalType::Stim => "stim.dat",
            SignalType::AuxInput => "auxiliary.dat",
            SignalType::SupplyVoltage => "supply.dat",
            SignalType::AnalogIn => "analogin.dat",
            SignalType::AnalogOut => "analogout.dat",
            SignalType::DigitalIn => "digitalin.dat",
            SignalType::DigitalOut => "digitalout.dat",
        }
    }

    /// Префикс имени файла в раскладке per-channel.
    pub fn channel_file_prefix(&self) -> &'static str {
        match self {
            SignalType::Amplifier => "amp",
            SignalType::DcAmplifier => "dc",
            SignalType::Stim => "stim",
            SignalType::AuxInput => "aux",
            SignalType::SupplyVoltage => "vdd",
            SignalType::AnalogIn
            | SignalType::AnalogOut
            | SignalType::DigitalIn
            | SignalType::DigitalOut => "board",
        }
    }

    /// Имя файла канала, например `amp-A-000.dat`.
    pub fn channel_file_name(
        &self,
        native_name: &str,
    ) -> String {
        format!("{}-{}.dat", self.channel_file_prefix(), native_name)
    }

    /// Значение, подставляемое вместо несохранённого канала.
    pub fn placeholder(
        &self,
        controller: ControllerType,
    ) -> u16 {
        match self {
            SignalType::Amplifier => AMPLIFIER_PLACEHOLDER,
            SignalType::DcAmplifier => DC_AMPLIFIER_PLACEHOLDER,
            SignalType::AnalogIn | SignalType::AnalogOut => controller.analog_placeholder(),
            SignalType::Stim
            | SignalType::AuxInput
            | SignalType::SupplyVoltage
            | SignalType::DigitalIn
            | SignalType::DigitalOut => 0,
        }
    }

    pub fn is_digital(&self) -> bool {
        matches!(self, SignalType::DigitalIn | SignalType::DigitalOut)
    }
}

/// Имена файлов, по которым распознаётся раскладка per-signal-type.
///
/// `time.dat` сюда не входит: он есть и в раскладке per-channel.
pub fn per_signal_type_file_names() -> impl Iterator<Item = &'static str> {
    SignalType::ALL.iter().map(|s| s.signal_file_name())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_codes_round_trip() {
        for family in [HeaderFamily::Rhd, HeaderFamily::Rhs] {
            for code in 0..8 {
                if let Some(t) = SignalType::from_header_code(family, code) {
                    assert_eq!(t.header_code(family), Some(code), "{family:?} {code}");
                }
            }
        }
    }

    #[test]
    fn test_family_specific_codes() {
        assert_eq!(
            SignalType::from_header_code(HeaderFamily::Rhd, 1),
            Some(SignalType::AuxInput)
        );
        assert_eq!(SignalType::from_header_code(HeaderFamily::Rhs, 1), None);
        assert_eq!(
            SignalType::from_header_code(HeaderFamily::Rhs, 4),
            Some(SignalType::AnalogOut)
        );
        assert_eq!(SignalType::from_header_code(HeaderFamily::Rhd, 6), None);
    }

    #[test]
    fn test_placeholders() {
        let c = ControllerType::RecordUsb2;

        assert_eq!(SignalType::Amplifier.placeholder(c), 32_768);
        assert_eq!(SignalType::DcAmplifier.placeholder(c), 512);
        assert_eq!(SignalType::AuxInput.placeholder(c), 0);
        assert_eq!(SignalType::DigitalIn.placeholder(c), 0);
        assert_eq!(SignalType::AnalogIn.placeholder(c), 0);
        assert_eq!(
            SignalType::AnalogIn.placeholder(ControllerType::StimRecord),
            32_768
        );
    }

    #[test]
    fn test_channel_file_name() {
        assert_eq!(
            SignalType::Amplifier.channel_file_name("A-000"),
            "amp-A-000.dat"
        );
        assert_eq!(
            SignalType::DigitalIn.channel_file_name("DIGITAL-IN-01"),
            "board-DIGITAL-IN-01.dat"
        );
    }

    #[test]
    fn test_detection_names_exclude_time() {
        let names: Vec<_> = per_signal_type_file_names().collect();

        assert_eq!(names.len(), 9);
        assert!(!names.contains(&TIME_FILE_NAME));
        assert!(names.contains(&"dcamplifier.dat"));
    }
}
