//! Менеджеры раскладок записи на диске.
//!
//! Каждая раскладка читает один кадр за вызов [`FormatManager::load_frame`] и
//! выдаёт блоки в общем wire-формате через [`FormatManager::read_raw_blocks`].

use std::{
    fmt,
    path::{Path, PathBuf},
};

use log::info;
use rhx_types::{
    per_signal_type_file_names, AcquisitionDescriptor, ChannelDescriptor, CodecResult,
    SignalType,
};

use crate::{
    data_block::{encode_sample, STIM_MAGNITUDE_MASK},
    frame::SampleFrame,
    header::read_header_file,
    report::{OpenReport, OpenWarning},
    tail::{CancelToken, RetryPolicy},
};

pub mod data_file;
pub mod per_channel;
pub mod per_signal_type;
pub mod traditional;

pub use data_file::*;
pub use per_channel::*;
pub use per_signal_type::*;
pub use traditional::*;

/// Раскладка записи на диске.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingLayout {
    /// Один файл: заголовок и блоки данных
    Traditional,
    /// Файл на категорию сигнала + time.dat
    PerSignalType,
    /// Файл на канал + time.dat
    PerChannel,
}

/// Уведомление для потребителя (вместо колбэков в UI).
#[derive(Debug, Clone, PartialEq)]
pub enum FormatNotice {
    Warning(String),
    /// Данные DC-усилителя обнаружены, хотя заголовок их не заявлял
    DcAmplifierDataFound,
    /// Первая стимуляция на канале
    StimulationDetected { channel: String, current_ua: f64 },
    /// Открыт следующий файл цепочки
    SegmentOpened { index: usize, path: PathBuf },
}

/// Параметры открытия менеджера.
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Опрос растущих файлов
    pub retry: RetryPolicy,
    pub cancel: CancelToken,
    /// Склеивать последовательные traditional-файлы
    pub follow_chain: bool,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            cancel: CancelToken::new(),
            follow_chain: true,
        }
    }
}

/// Состояние, общее для всех раскладок.
#[derive(Debug)]
pub struct FormatCore {
    pub desc: AcquisitionDescriptor,
    pub dir: PathBuf,
    pub report: OpenReport,
    pub notices: Vec<FormatNotice>,
    /// Выборок, доступных для чтения от начала записи
    pub total_samples: u64,
    /// Номер следующей выборки
    pub position: u64,
    pub first_timestamp: i64,
    pub last_timestamp: i64,
    stim_channels: Vec<ChannelDescriptor>,
    stim_seen: Vec<bool>,
}

impl FormatCore {
    pub fn new(
        desc: AcquisitionDescriptor,
        dir: PathBuf,
    ) -> Self {
        let stim_channels: Vec<_> = if desc.controller.is_stim() {
            desc.enabled_channels(SignalType::Stim).cloned().collect()
        } else {
            Vec::new()
        };

        Self {
            stim_seen: vec![false; stim_channels.len()],
            stim_channels,
            desc,
            dir,
            report: OpenReport::default(),
            notices: Vec::new(),
            total_samples: 0,
            position: 0,
            first_timestamp: 0,
            last_timestamp: 0,
        }
    }

    /// Предупреждение в отчёт и в очередь уведомлений.
    pub fn warn(
        &mut self,
        w: OpenWarning,
    ) {
        self.notices.push(FormatNotice::Warning(w.to_string()));
        self.report.warn(w);
    }

    pub fn samples_available(&self) -> u64 {
        self.total_samples.saturating_sub(self.position)
    }

    pub fn clamp_timestamp(
        &self,
        target: i64,
    ) -> i64 {
        target.clamp(self.first_timestamp, self.last_timestamp.max(self.first_timestamp))
    }

    /// Сообщает о первой ненулевой стимуляции на каждом канале.
    pub fn observe_stimulation(
        &mut self,
        frame: &SampleFrame,
    ) {
        let step = self.desc.stim.step_size as f64;

        for (i, ch) in self.stim_channels.iter().enumerate() {
            if self.stim_seen[i] {
                continue;
            }

            let magnitude = frame.get(SignalType::Stim, ch).unwrap_or(0) & STIM_MAGNITUDE_MASK;

            if magnitude != 0 {
                self.stim_seen[i] = true;
                self.notices.push(FormatNotice::StimulationDetected {
                    channel: ch.native_name.clone(),
                    current_ua: magnitude as f64 * step * 1e6,
                });
            }
        }
    }
}

/// Общий контракт раскладок записи.
pub trait FormatManager: Send {
    fn core(&self) -> &FormatCore;

    fn core_mut(&mut self) -> &mut FormatCore;

    fn layout(&self) -> RecordingLayout;

    /// Читает выборку в позиции курсора в `frame` и сдвигает курсор на 1.
    ///
    /// Слоты несохранённых каналов не трогаются (в них заглушка).
    fn load_frame(
        &mut self,
        frame: &mut SampleFrame,
    ) -> CodecResult<()>;

    /// Переходит к метке времени (с ограничением по границам записи).
    /// Возвращает фактически достигнутую метку.
    fn jump_to_timestamp(
        &mut self,
        target: i64,
    ) -> CodecResult<i64>;

    /// Перемеряет конец данных (файлы могут расти).
    fn update_end_of_data(&mut self) -> CodecResult<()>;

    /// Менеджер сам ждёт новых данных в `read_raw_blocks`.
    fn tails_live(&self) -> bool {
        false
    }

    /// Номер открытого файла в цепочке (только traditional).
    fn current_segment(&self) -> Option<usize> {
        None
    }

    fn descriptor(&self) -> &AcquisitionDescriptor {
        &self.core().desc
    }

    fn report(&self) -> &OpenReport {
        &self.core().report
    }

    fn first_timestamp(&self) -> i64 {
        self.core().first_timestamp
    }

    fn last_timestamp(&self) -> i64 {
        self.core().last_timestamp
    }

    fn total_samples(&self) -> u64 {
        self.core().total_samples
    }

    fn position(&self) -> u64 {
        self.core().position
    }

    /// Метка времени следующей выборки (по номеру выборки).
    fn current_timestamp(&self) -> i64 {
        self.core().first_timestamp + self.core().position as i64
    }

    fn samples_available(&self) -> u64 {
        self.core().samples_available()
    }

    fn blocks_available(&self) -> u64 {
        self.samples_available() / self.core().desc.samples_per_block as u64
    }

    fn drain_notices(&mut self) -> Vec<FormatNotice> {
        std::mem::take(&mut self.core_mut().notices)
    }

    /// Выдаёт `n` полных wire-блоков в `out`. Возвращает число записанных
    /// байт: 0, если данных меньше чем на `n` блоков. Частичных блоков нет.
    fn read_raw_blocks(
        &mut self,
        n: usize,
        frame: &mut SampleFrame,
        out: &mut Vec<u8>,
    ) -> CodecResult<usize> {
        self.update_end_of_data()?;

        if n == 0 || self.blocks_available() < n as u64 {
            return Ok(0);
        }

        emit_blocks(self, n, frame, out)
    }
}

/// Сериализует `n` блоков. При ошибке чтения `out` и курсор возвращаются в
/// исходное состояние.
pub fn emit_blocks<M: FormatManager + ?Sized>(
    manager: &mut M,
    n: usize,
    frame: &mut SampleFrame,
    out: &mut Vec<u8>,
) -> CodecResult<usize> {
    let start = out.len();
    let position = manager.core().position;
    let s = manager.core().desc.samples_per_block;

    for _ in 0..n {
        for t in 0..s {
            if let Err(e) = manager.load_frame(frame) {
                out.truncate(start);
                manager.core_mut().position = position;
                return Err(e);
            }

            manager.core_mut().observe_stimulation(frame);
            encode_sample(frame, t, out);
        }
    }

    Ok(out.len() - start)
}

/// Определяет раскладку записи (первое совпадение).
pub fn detect_layout(
    desc: &AcquisitionDescriptor,
    dir: &Path,
) -> RecordingLayout {
    if desc.data_size > 0 {
        return RecordingLayout::Traditional;
    }

    if per_signal_type_file_names().any(|name| dir.join(name).is_file()) {
        return RecordingLayout::PerSignalType;
    }

    RecordingLayout::PerChannel
}

/// Каталог записи по пути к файлу заголовка.
pub fn recording_dir(header_path: &Path) -> PathBuf {
    match header_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Открывает запись: разбирает заголовок, определяет раскладку и создаёт
/// соответствующий менеджер.
pub fn open_format_manager<P: AsRef<Path>>(
    header_path: P,
    options: ManagerOptions,
) -> CodecResult<Box<dyn FormatManager>> {
    let path = header_path.as_ref();
    let desc = read_header_file(path)?;
    let dir = recording_dir(path);
    let layout = detect_layout(&desc, &dir);

    info!(
        "Opening {}: {:?} {:?} v{}, {} Hz, {} streams, layout {layout}",
        path.display(),
        desc.family,
        desc.controller,
        desc.version,
        desc.sample_rate,
        desc.num_data_streams,
    );

    let manager: Box<dyn FormatManager> = match layout {
        RecordingLayout::Traditional => Box::new(TraditionalManager::open(path, desc, &options)?),
        RecordingLayout::PerSignalType => Box::new(PerSignalTypeManager::open(dir, desc)?),
        RecordingLayout::PerChannel => Box::new(PerChannelManager::open(dir, desc, options)?),
    };

    Ok(manager)
}

impl fmt::Display for RecordingLayout {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let s = match self {
            RecordingLayout::Traditional => "traditional",
            RecordingLayout::PerSignalType => "per-signal-type",
            RecordingLayout::PerChannel => "per-channel",
        };

        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use rhx_types::{ControllerType, FileVersion, HeaderFamily};

    use super::*;

    #[test]
    fn test_detect_layout_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut desc = AcquisitionDescriptor::new(
            HeaderFamily::Rhd,
            ControllerType::RecordUsb3,
            FileVersion::new(3, 0),
            30_000.0,
        );

        assert_eq!(detect_layout(&desc, dir.path()), RecordingLayout::PerChannel);

        std::fs::write(dir.path().join("time.dat"), [0u8; 4]).unwrap();
        assert_eq!(detect_layout(&desc, dir.path()), RecordingLayout::PerChannel);

        std::fs::write(dir.path().join("supply.dat"), b"").unwrap();
        assert_eq!(detect_layout(&desc, dir.path()), RecordingLayout::PerSignalType);

        desc.data_size = 480;
        assert_eq!(detect_layout(&desc, dir.path()), RecordingLayout::Traditional);
    }

    #[test]
    fn test_recording_dir_of_bare_name() {
        assert_eq!(recording_dir(Path::new("info.rhd")), PathBuf::from("."));
        assert_eq!(recording_dir(Path::new("/a/b/info.rhd")), PathBuf::from("/a/b"));
    }

    #[test]
    fn test_stimulation_notice_once_per_channel() {
        let mut desc = AcquisitionDescriptor::new(
            HeaderFamily::Rhs,
            ControllerType::StimRecord,
            FileVersion::new(3, 0),
            30_000.0,
        );
        desc.stim.step_size = 2e-6;
        desc.groups.push(rhx_types::ChannelGroup::new(
            "Port A",
            "A",
            vec![ChannelDescriptor::new("A-004", SignalType::Amplifier, 0, 4)],
        ));
        desc.refresh_data_streams();

        let mut core = FormatCore::new(desc.clone(), PathBuf::from("."));
        let mut frame = SampleFrame::new(&desc);
        let ch = desc.channels().next().unwrap().clone();

        core.observe_stimulation(&frame);
        assert!(core.notices.is_empty());

        frame.set(SignalType::Stim, &ch, 3);
        core.observe_stimulation(&frame);
        core.observe_stimulation(&frame);

        assert_eq!(core.notices.len(), 1);
        match &core.notices[0] {
            FormatNotice::StimulationDetected {
                channel,
                current_ua,
            } => {
                assert_eq!(channel, "A-004");
                assert!((current_ua - 6.0).abs() < 1e-6);
            }
            other => panic!("unexpected notice {other:?}"),
        }
    }
}
