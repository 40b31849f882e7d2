//! Per-signal-type раскладка: файл на категорию сигнала.
//!
//! Элемент файла категории = одна выборка всех её включённых каналов в
//! порядке заголовка. Цифровые входы/выходы хранятся одним словом `u16` на
//! выборку, метки времени `time.dat` как `i32`.

use std::path::PathBuf;

use log::info;
use rhx_types::{
    AcquisitionDescriptor, ChannelDescriptor, CodecError, CodecResult, SignalType,
    TIME_FILE_NAME,
};

use crate::{
    format::{DataFile, FormatCore, FormatManager, FormatNotice, RecordingLayout},
    frame::SampleFrame,
    report::OpenWarning,
};

/// Файл одной категории сигнала.
#[derive(Debug)]
struct CategoryFile {
    signal: SignalType,
    channels: Vec<ChannelDescriptor>,
    file: DataFile,
    words: Vec<u16>,
}

/// Менеджер per-signal-type раскладки.
pub struct PerSignalTypeManager {
    core: FormatCore,
    time: DataFile,
    categories: Vec<CategoryFile>,
}

/// Каналы, которые должны присутствовать в файле категории.
///
/// Для цифровых сигналов возвращает все включённые линии (файл хранит слово).
fn expected_channels(
    desc: &AcquisitionDescriptor,
    signal: SignalType,
    dc_file_present: bool,
) -> Vec<ChannelDescriptor> {
    let wanted = match signal {
        SignalType::DcAmplifier => {
            desc.controller.is_stim() && (desc.dc_amplifier_saved || dc_file_present)
        }
        SignalType::Stim => desc.controller.is_stim(),
        _ => true,
    };

    if !wanted {
        return Vec::new();
    }

    desc.enabled_channels(signal).cloned().collect()
}

impl PerSignalTypeManager {
    pub fn open(
        dir: PathBuf,
        mut desc: AcquisitionDescriptor,
    ) -> CodecResult<Self> {
        let time_path = dir.join(TIME_FILE_NAME);
        if !time_path.is_file() {
            return Err(CodecError::MissingFile(time_path));
        }
        let time = DataFile::open(&time_path, 4)?;

        let dc_present = dir.join(SignalType::DcAmplifier.signal_file_name()).is_file();
        let mut warnings = Vec::new();
        let mut missing = Vec::new();
        let mut categories = Vec::new();

        for signal in SignalType::ALL {
            let channels = expected_channels(&desc, signal, dc_present);

            if channels.is_empty() {
                continue;
            }

            let path = dir.join(signal.signal_file_name());

            if !path.is_file() {
                warnings.push(OpenWarning::MissingFile {
                    path,
                    channels: channels.iter().map(|c| c.native_name.clone()).collect(),
                });
                missing.push(signal);
                continue;
            }

            let words = if signal.is_digital() { 1 } else { channels.len() };

            categories.push(CategoryFile {
                signal,
                channels,
                file: DataFile::open(&path, 2 * words)?,
                words: vec![0; words],
            });
        }

        let dc_found = dc_present && !desc.dc_amplifier_saved && desc.controller.is_stim();
        if dc_found {
            desc.dc_amplifier_saved = true;
            desc.dc_amplifier_flag_corrected = true;
        }

        // Каналы отсутствующих категорий удаляются из дескриптора. Число
        // потоков не пересчитывается: раскладка wire-блока не меняется.
        for signal in &missing {
            match signal {
                SignalType::DcAmplifier => desc.dc_amplifier_saved = false,
                SignalType::Stim => {}
                other => {
                    for ch in desc.channels_mut().filter(|c| c.signal_type == *other) {
                        ch.enabled = false;
                        ch.saved = false;
                    }
                }
            }
        }

        let mut core = FormatCore::new(desc, dir);

        if dc_found {
            core.notices.push(FormatNotice::DcAmplifierDataFound);
        }
        for w in warnings {
            core.warn(w);
        }

        let mut m = Self {
            core,
            time,
            categories,
        };

        m.core.report.files_opened = 1 + m.categories.len();
        m.clamp_to_shortest(true)?;

        info!(
            "Per-signal-type recording: {} category files, {} samples",
            m.categories.len(),
            m.core.total_samples
        );

        Ok(m)
    }

    /// Пересчитывает число выборок по самому короткому файлу.
    fn clamp_to_shortest(
        &mut self,
        report: bool,
    ) -> CodecResult<()> {
        let mut shortest = (self.time.samples(), self.time.path().to_path_buf());
        let mut longest = self.time.samples();

        for c in &self.categories {
            let n = c.file.samples();
            longest = longest.max(n);
            if n < shortest.0 {
                shortest = (n, c.file.path().to_path_buf());
            }
        }

        let (total, path) = shortest;

        if report && total < longest {
            self.core.warn(OpenWarning::ShortFile {
                path,
                samples: total,
                longest,
            });
        }

        let grew = total != self.core.total_samples;
        self.core.total_samples = total;

        if total > 0 && (grew || report) {
            self.core.first_timestamp = self.time.read_i32_at(0)? as i64;
            self.core.last_timestamp = self.time.read_i32_at(total - 1)? as i64;
        }

        Ok(())
    }
}

impl FormatManager for PerSignalTypeManager {
    fn core(&self) -> &FormatCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FormatCore {
        &mut self.core
    }

    fn layout(&self) -> RecordingLayout {
        RecordingLayout::PerSignalType
    }

    fn load_frame(
        &mut self,
        frame: &mut SampleFrame,
    ) -> CodecResult<()> {
        let pos = self.core.position;

        if pos >= self.core.total_samples {
            return Err(CodecError::Io(std::io::ErrorKind::UnexpectedEof.into()));
        }

        self.time.seek_sample(pos)?;
        frame.timestamp = self.time.read_i32()?;

        for c in &mut self.categories {
            c.file.seek_sample(pos)?;
            c.file.read_u16s(&mut c.words)?;

            match c.signal {
                SignalType::DigitalIn => frame.digital_in = c.words[0],
                SignalType::DigitalOut => frame.digital_out = c.words[0],
                signal => {
                    for (ch, &v) in c.channels.iter().zip(&c.words) {
                        let v = if signal == SignalType::Amplifier {
                            v ^ 0x8000
                        } else {
                            v
                        };
                        frame.set(signal, ch, v);
                    }
                }
            }
        }

        self.core.position += 1;

        Ok(())
    }

    fn jump_to_timestamp(
        &mut self,
        target: i64,
    ) -> CodecResult<i64> {
        let total = self.core.total_samples;

        if total == 0 {
            self.core.position = 0;
            return Ok(self.core.first_timestamp);
        }

        let target = self.core.clamp_timestamp(target);
        let index = ((target - self.core.first_timestamp) as u64).min(total - 1);

        self.core.position = index;

        Ok(self.time.read_i32_at(index)? as i64)
    }

    fn update_end_of_data(&mut self) -> CodecResult<()> {
        self.time.measure()?;
        for c in &mut self.categories {
            c.file.measure()?;
        }

        self.clamp_to_shortest(false)
    }
}
