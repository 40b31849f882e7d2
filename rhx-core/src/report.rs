use std::{fmt, path::PathBuf};

/// Некритичная проблема, обнаруженная при открытии записи.
#[derive(Debug, Clone, PartialEq)]
pub enum OpenWarning {
    /// Файл категории или канала отсутствует: его каналы заполняются заглушкой
    MissingFile { path: PathBuf, channels: Vec<String> },
    /// Самый короткий файл ограничивает число выборок
    ShortFile {
        path: PathBuf,
        samples: u64,
        longest: u64,
    },
    /// Флаг DC-усилителя в заголовке исправлен по размеру данных
    DcAmplifierFlagCorrected,
    /// Цепочка файлов прервана: следующий файл не подходит
    ChainBroken { path: PathBuf, reason: String },
}

/// Сводка открытия записи: раскладка, файлы, предупреждения.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpenReport {
    pub files_opened: usize,
    pub warnings: Vec<OpenWarning>,
}

impl OpenReport {
    pub fn warn(
        &mut self,
        w: OpenWarning,
    ) {
        log::warn!("{w}");
        self.warnings.push(w);
    }

    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    /// Предупреждение о коротком файле, если оно есть.
    pub fn short_file(&self) -> Option<&OpenWarning> {
        self.warnings
            .iter()
            .find(|w| matches!(w, OpenWarning::ShortFile { .. }))
    }
}

impl fmt::Display for OpenWarning {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            OpenWarning::MissingFile { path, channels } => {
                write!(f, "missing file {}", path.display())?;
                if !channels.is_empty() {
                    write!(f, " ({} channels filled with placeholder)", channels.len())?;
                }
                Ok(())
            }
            OpenWarning::ShortFile {
                path,
                samples,
                longest,
            } => write!(
                f,
                "playback limited by short file {}: {samples} of {longest} samples",
                path.display()
            ),
            OpenWarning::DcAmplifierFlagCorrected => {
                write!(f, "DC amplifier data found despite header flag")
            }
            OpenWarning::ChainBroken { path, reason } => {
                write!(f, "not continuing into {}: {reason}", path.display())
            }
        }
    }
}

impl fmt::Display for OpenReport {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        writeln!(f, "Files opened: {}", self.files_opened)?;

        if self.warnings.is_empty() {
            return writeln!(f, "No warnings");
        }

        for w in &self.warnings {
            writeln!(f, "  - {w}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_file_message_names_file() {
        let w = OpenWarning::ShortFile {
            path: PathBuf::from("/rec/amp-A-000.dat"),
            samples: 100,
            longest: 150,
        };

        let text = w.to_string();
        assert!(text.contains("amp-A-000.dat"));
        assert!(text.contains("100 of 150"));
    }

    #[test]
    fn test_report_display_lists_warnings() {
        let mut r = OpenReport::default();
        assert!(r.is_clean());

        r.warn(OpenWarning::MissingFile {
            path: PathBuf::from("supply.dat"),
            channels: vec!["A-VDD1".into()],
        });

        let text = r.to_string();
        assert!(text.contains("missing file supply.dat"));
        assert!(!r.is_clean());
        assert!(r.short_file().is_none());
    }
}
