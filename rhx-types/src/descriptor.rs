use serde::Serialize;

use crate::{ChannelDescriptor, ChannelGroup, ControllerType, HeaderFamily, NotchFilter, SignalType};

/// Максимальное количество групп каналов в заголовке
pub const MAX_CHANNEL_GROUPS: usize = 12;

/// Версия формата файла (`major.minor`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct FileVersion {
    pub major: i16,
    pub minor: i16,
}

/// Полосы пропускания усилителя (желаемые и фактические), Гц.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Bandwidth {
    pub actual_dsp_cutoff: f32,
    pub actual_lower: f32,
    pub actual_lower_settle: f32,
    pub actual_upper: f32,
    pub desired_dsp_cutoff: f32,
    pub desired_lower: f32,
    pub desired_lower_settle: f32,
    pub desired_upper: f32,
}

/// Параметры стимуляции (в RHD-заголовках отсутствуют: нули / false).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct StimParameters {
    pub amp_settle_mode: i16,
    pub charge_recovery_mode: i16,
    /// Шаг тока стимуляции, А
    pub step_size: f32,
    pub charge_recovery_current_limit: f32,
    pub charge_recovery_target_voltage: f32,
}

/// Описание сессии записи, полученное из заголовка.
///
/// После разбора не меняется, за исключением самокоррекции (например, флаг
/// `dc_amplifier_saved`, который старые записи выставляли ненадёжно).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AcquisitionDescriptor {
    pub family: HeaderFamily,
    pub controller: ControllerType,
    pub version: FileVersion,
    /// Частота дискретизации, Гц
    pub sample_rate: f32,
    /// Выборок в одном блоке данных (60 для RHD v1, иначе 128)
    pub samples_per_block: usize,
    pub dsp_enabled: bool,
    pub bandwidth: Bandwidth,
    pub notch: NotchFilter,
    pub desired_impedance_test_frequency: f32,
    pub actual_impedance_test_frequency: f32,
    pub stim: StimParameters,
    pub notes: [String; 3],
    /// Сохранены ли данные DC-усилителя (только RHS)
    pub dc_amplifier_saved: bool,
    /// Флаг `dc_amplifier_saved` был исправлен по фактическому размеру данных
    pub dc_amplifier_flag_corrected: bool,
    pub num_temp_sensors: u16,
    /// Режим платы (есть только в новых заголовках)
    pub board_mode: Option<i16>,
    pub reference_channel: Option<String>,
    pub groups: Vec<ChannelGroup>,
    /// Количество потоков данных (1 + максимальный `board_stream`)
    pub num_data_streams: usize,
    /// Размер заголовка в байтах
    pub header_size: u64,
    /// Размер области данных сразу после заголовка
    pub data_size: u64,
    pub num_data_blocks: u64,
    /// Метка времени первой выборки (0 если данных нет)
    pub first_timestamp: i64,
    /// Метка времени последней выборки последнего полного блока
    pub last_timestamp: i64,
}

impl FileVersion {
    pub fn new(
        major: i16,
        minor: i16,
    ) -> Self {
        Self { major, minor }
    }

    pub fn at_least(
        &self,
        major: i16,
        minor: i16,
    ) -> bool {
        (self.major, self.minor) >= (major, minor)
    }
}

impl std::fmt::Display for FileVersion {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl AcquisitionDescriptor {
    /// Пустой дескриптор без каналов. Используется писателем и тестами.
    pub fn new(
        family: HeaderFamily,
        controller: ControllerType,
        version: FileVersion,
        sample_rate: f32,
    ) -> Self {
        let samples_per_block = if family == HeaderFamily::Rhd && version.major == 1 {
            60
        } else {
            128
        };

        Self {
            family,
            controller,
            version,
            sample_rate,
            samples_per_block,
            dsp_enabled: false,
            bandwidth: Bandwidth::default(),
            notch: NotchFilter::Off,
            desired_impedance_test_frequency: 0.0,
            actual_impedance_test_frequency: 0.0,
            stim: StimParameters::default(),
            notes: Default::default(),
            dc_amplifier_saved: false,
            dc_amplifier_flag_corrected: false,
            num_temp_sensors: 0,
            board_mode: None,
            reference_channel: None,
            groups: Vec::new(),
            num_data_streams: 1,
            header_size: 0,
            data_size: 0,
            num_data_blocks: 0,
            first_timestamp: 0,
            last_timestamp: 0,
        }
    }

    /// Все каналы во всех группах в порядке заголовка.
    pub fn channels(&self) -> impl Iterator<Item = &ChannelDescriptor> {
        self.groups.iter().flat_map(|g| g.channels.iter())
    }

    pub fn channels_mut(&mut self) -> impl Iterator<Item = &mut ChannelDescriptor> {
        self.groups.iter_mut().flat_map(|g| g.channels.iter_mut())
    }

    /// Включённые каналы данного типа в порядке заголовка (= порядок на диске).
    ///
    /// DC-усилитель и стимуляция повторяют каналы усилителя.
    pub fn enabled_channels(
        &self,
        signal: SignalType,
    ) -> impl Iterator<Item = &ChannelDescriptor> {
        let source = match signal {
            SignalType::DcAmplifier | SignalType::Stim => SignalType::Amplifier,
            other => other,
        };

        self.channels()
            .filter(move |c| c.enabled && c.signal_type == source)
    }

    pub fn num_enabled(
        &self,
        signal: SignalType,
    ) -> usize {
        self.enabled_channels(signal).count()
    }

    /// Байт на одну выборку канала усилителя в блоке traditional-формата.
    pub fn bytes_per_amplifier_sample(&self) -> usize {
        let mut bytes = 2;

        if self.controller.is_stim() {
            bytes += 2;
        }

        if self.dc_amplifier_saved {
            bytes += 2;
        }

        bytes
    }

    /// Размер одного блока данных на диске (traditional-формат).
    ///
    /// Детерминированная функция количества включённых каналов и поколения
    /// контроллера.
    pub fn bytes_per_data_block(&self) -> usize {
        let s = self.samples_per_block;
        let mut bytes = 4 * s;

        bytes += s * self.bytes_per_amplifier_sample() * self.num_enabled(SignalType::Amplifier);
        bytes += (s / 4) * 2 * self.num_enabled(SignalType::AuxInput);
        bytes += 2 * self.num_enabled(SignalType::SupplyVoltage);
        bytes += s
            * 2
            * (self.num_enabled(SignalType::AnalogIn) + self.num_enabled(SignalType::AnalogOut));
        bytes += 2 * self.num_temp_sensors as usize;

        if self.num_enabled(SignalType::DigitalIn) > 0 {
            bytes += 2 * s;
        }

        if self.num_enabled(SignalType::DigitalOut) > 0 {
            bytes += 2 * s;
        }

        bytes
    }

    /// Длительность одного блока, секунды.
    pub fn block_period_secs(&self) -> f64 {
        self.samples_per_block as f64 / self.sample_rate as f64
    }

    /// Пересчитывает количество потоков данных по каналам.
    pub fn refresh_data_streams(&mut self) {
        self.num_data_streams = self
            .channels()
            .filter(|c| {
                c.enabled
                    && matches!(
                        c.signal_type,
                        SignalType::Amplifier | SignalType::AuxInput | SignalType::SupplyVoltage
                    )
            })
            .map(|c| c.stream() + 1)
            .max()
            .unwrap_or(1);
    }

    /// Проверяет, что `other` описывает ту же конфигурацию записи.
    ///
    /// Используется для склейки последовательных файлов. Заметки, импедансы,
    /// пользовательские имена и настройки триггеров не сравниваются.
    pub fn same_acquisition(
        &self,
        other: &AcquisitionDescriptor,
    ) -> bool {
        if self.family != other.family
            || self.controller != other.controller
            || self.version != other.version
            || self.sample_rate != other.sample_rate
            || self.samples_per_block != other.samples_per_block
            || self.dsp_enabled != other.dsp_enabled
            || self.bandwidth != other.bandwidth
            || self.notch != other.notch
            || self.stim != other.stim
            || self.dc_amplifier_saved != other.dc_amplifier_saved
            || self.num_temp_sensors != other.num_temp_sensors
            || self.board_mode != other.board_mode
            || self.groups.len() != other.groups.len()
        {
            return false;
        }

        self.groups.iter().zip(&other.groups).all(|(a, b)| {
            a.prefix == b.prefix
                && a.enabled == b.enabled
                && a.channels.len() == b.channels.len()
                && a.channels
                    .iter()
                    .zip(&b.channels)
                    .all(|(x, y)| x.same_identity(y))
        })
    }
}
