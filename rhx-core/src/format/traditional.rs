//! Traditional-раскладка: один файл, заголовок и блоки фиксированного шага.
//!
//! Секции блока идут по каналам: сначала все выборки канала 0, затем
//! канала 1 и т.д. (каналы в порядке заголовка):
//!
//! ```text
//! timestamps      S × i32
//! amplifier       n_amp × S × i16      (дополнительный код)
//! dc amplifier    n_amp × S × u16      (RHS, если сохранён)
//! stim            n_amp × S × u16      (RHS)
//! aux input       n_aux × S/4 × u16    (RHD)
//! supply voltage  n_supply × u16       (RHD)
//! temperature     n_temp × i16         (RHD)
//! analog in       n_adc × S × u16
//! analog out      n_dac × S × u16      (RHS)
//! digital in      S × u16              (если есть включённые линии)
//! digital out     S × u16              (если есть включённые линии)
//! ```
//!
//! Длинные записи разбиваются на несколько файлов. Следующий файл цепочки
//! должен иметь совместимый заголовок и начинаться через 1..3 выборки после
//! конца предыдущего (допускается потеря до двух выборок).

use std::{
    fs::{self, File},
    io::{Read, Seek, SeekFrom},
    path::{Path, PathBuf},
};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use log::{debug, info};
use rhx_types::{
    AcquisitionDescriptor, ChannelDescriptor, CodecError, CodecResult, SignalType,
};

use crate::{
    format::{FormatCore, FormatManager, FormatNotice, ManagerOptions, RecordingLayout},
    frame::SampleFrame,
    header::read_header_file,
    report::OpenWarning,
};

/// Допустимый разрыв меток времени между файлами цепочки
const MAX_CHAIN_GAP: i64 = 3;

/// Один файл цепочки.
#[derive(Debug, Clone)]
struct Segment {
    path: PathBuf,
    header_size: u64,
    num_blocks: u64,
    first_timestamp: i64,
    last_timestamp: i64,
    /// Глобальный номер первого блока сегмента
    start_block: u64,
}

/// Количество каналов по секциям блока.
#[derive(Debug, Clone)]
struct BlockLayout {
    samples: usize,
    amplifier: Vec<ChannelDescriptor>,
    dc_amplifier: bool,
    stim: bool,
    aux: Vec<ChannelDescriptor>,
    supply: Vec<ChannelDescriptor>,
    temp_sensors: usize,
    analog_in: Vec<ChannelDescriptor>,
    analog_out: Vec<ChannelDescriptor>,
    digital_in: bool,
    digital_out: bool,
}

/// Разобранный блок, из которого выдаются выборки.
#[derive(Debug, Default)]
struct BlockBuffer {
    timestamps: Vec<i32>,
    amplifier: Vec<u16>,
    dc_amplifier: Vec<u16>,
    stim: Vec<u16>,
    aux: Vec<u16>,
    supply: Vec<u16>,
    temperature: Vec<u16>,
    analog_in: Vec<u16>,
    analog_out: Vec<u16>,
    digital_in: Vec<u16>,
    digital_out: Vec<u16>,
}

/// Менеджер traditional-раскладки (включая цепочки файлов).
pub struct TraditionalManager {
    core: FormatCore,
    options: ManagerOptions,
    layout: BlockLayout,
    bytes_per_block: u64,
    segments: Vec<Segment>,
    current: usize,
    file: File,
    file_offset: u64,
    raw: Vec<u8>,
    block: BlockBuffer,
    loaded_block: Option<u64>,
    rejected: Vec<PathBuf>,
}

impl BlockLayout {
    fn new(desc: &AcquisitionDescriptor) -> Self {
        let list = |t| desc.enabled_channels(t).cloned().collect::<Vec<_>>();
        let stim = desc.controller.is_stim();

        Self {
            samples: desc.samples_per_block,
            amplifier: list(SignalType::Amplifier),
            dc_amplifier: desc.dc_amplifier_saved,
            stim,
            aux: list(SignalType::AuxInput),
            supply: list(SignalType::SupplyVoltage),
            temp_sensors: desc.num_temp_sensors as usize,
            analog_in: list(SignalType::AnalogIn),
            analog_out: list(SignalType::AnalogOut),
            digital_in: desc.num_enabled(SignalType::DigitalIn) > 0,
            digital_out: desc.num_enabled(SignalType::DigitalOut) > 0,
        }
    }
}

impl BlockBuffer {
    fn parse(
        &mut self,
        raw: &[u8],
        l: &BlockLayout,
    ) {
        let s = l.samples;
        let n_amp = l.amplifier.len();

        self.timestamps.resize(s, 0);
        LittleEndian::read_i32_into(&raw[..4 * s], &mut self.timestamps);
        let mut off = 4 * s;

        let mut words = |dst: &mut Vec<u16>, count: usize| {
            dst.resize(count, 0);
            LittleEndian::read_u16_into(&raw[off..off + 2 * count], dst);
            off += 2 * count;
        };

        words(&mut self.amplifier, s * n_amp);
        for v in &mut self.amplifier {
            *v ^= 0x8000;
        }

        words(&mut self.dc_amplifier, if l.dc_amplifier { s * n_amp } else { 0 });
        words(&mut self.stim, if l.stim { s * n_amp } else { 0 });
        words(&mut self.aux, (s / 4) * l.aux.len());
        words(&mut self.supply, l.supply.len());
        words(&mut self.temperature, l.temp_sensors);
        words(&mut self.analog_in, s * l.analog_in.len());
        words(&mut self.analog_out, s * l.analog_out.len());
        words(&mut self.digital_in, if l.digital_in { s } else { 0 });
        words(&mut self.digital_out, if l.digital_out { s } else { 0 });
    }

    fn fill(
        &self,
        i: usize,
        l: &BlockLayout,
        frame: &mut SampleFrame,
    ) {
        frame.timestamp = self.timestamps[i];

        let s = l.samples;
        for (k, ch) in l.amplifier.iter().enumerate() {
            frame.set(SignalType::Amplifier, ch, self.amplifier[k * s + i]);

            if l.dc_amplifier {
                frame.set(SignalType::DcAmplifier, ch, self.dc_amplifier[k * s + i]);
            }
            if l.stim {
                frame.set(SignalType::Stim, ch, self.stim[k * s + i]);
            }
        }

        for (k, ch) in l.aux.iter().enumerate() {
            frame.set(SignalType::AuxInput, ch, self.aux[k * (s / 4) + i / 4]);
        }

        for (k, ch) in l.supply.iter().enumerate() {
            frame.set(SignalType::SupplyVoltage, ch, self.supply[k]);
        }

        for (dst, &src) in frame.temperature.iter_mut().zip(&self.temperature) {
            *dst = src;
        }

        for (k, ch) in l.analog_in.iter().enumerate() {
            frame.set(SignalType::AnalogIn, ch, self.analog_in[k * s + i]);
        }

        for (k, ch) in l.analog_out.iter().enumerate() {
            frame.set(SignalType::AnalogOut, ch, self.analog_out[k * s + i]);
        }

        if l.digital_in {
            frame.digital_in = self.digital_in[i];
        }
        if l.digital_out {
            frame.digital_out = self.digital_out[i];
        }
    }
}

impl TraditionalManager {
    /// Открывает файл и (если разрешено) сразу собирает цепочку продолжений.
    pub fn open<P: AsRef<Path>>(
        path: P,
        desc: AcquisitionDescriptor,
        options: &ManagerOptions,
    ) -> CodecResult<Self> {
        let path = path.as_ref().to_path_buf();
        let dir = super::recording_dir(&path);
        let layout = BlockLayout::new(&desc);
        let bytes_per_block = desc.bytes_per_data_block() as u64;
        let file = File::open(&path)?;

        let first = Segment {
            path,
            header_size: desc.header_size,
            num_blocks: desc.num_data_blocks,
            first_timestamp: desc.first_timestamp,
            last_timestamp: desc.last_timestamp,
            start_block: 0,
        };

        let corrected = desc.dc_amplifier_flag_corrected;
        let mut core = FormatCore::new(desc, dir);

        if corrected {
            core.warn(OpenWarning::DcAmplifierFlagCorrected);
            if core.desc.dc_amplifier_saved {
                core.notices.push(FormatNotice::DcAmplifierDataFound);
            }
        }

        let mut m = Self {
            core,
            options: options.clone(),
            raw: vec![0; bytes_per_block as usize],
            layout,
            bytes_per_block,
            segments: vec![first],
            current: 0,
            file,
            file_offset: 0,
            block: BlockBuffer::default(),
            loaded_block: None,
            rejected: Vec::new(),
        };

        if m.options.follow_chain {
            while let Some(seg) = m.find_continuation()? {
                m.append_segment(seg);
            }
        }

        m.refresh_totals();
        m.core.report.files_opened = m.segments.len();

        info!(
            "Traditional recording: {} file(s), {} blocks, timestamps {}..={}",
            m.segments.len(),
            m.total_blocks(),
            m.core.first_timestamp,
            m.core.last_timestamp
        );

        Ok(m)
    }

    /// Количество файлов в цепочке.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn segment_paths(&self) -> impl Iterator<Item = &Path> {
        self.segments.iter().map(|s| s.path.as_path())
    }

    fn total_blocks(&self) -> u64 {
        self.segments
            .last()
            .map(|s| s.start_block + s.num_blocks)
            .unwrap_or(0)
    }

    fn refresh_totals(&mut self) {
        let s = self.layout.samples as u64;

        self.core.total_samples = self.total_blocks() * s;

        if let Some(first) = self.segments.first() {
            self.core.first_timestamp = first.first_timestamp;
        }

        if let Some(last) = self.segments.iter().rev().find(|s| s.num_blocks > 0) {
            self.core.last_timestamp = last.last_timestamp;
        }
    }

    fn append_segment(
        &mut self,
        mut seg: Segment,
    ) {
        seg.start_block = self.total_blocks();
        debug!(
            "Continuation file {} (first timestamp {})",
            seg.path.display(),
            seg.first_timestamp
        );
        self.segments.push(seg);
        self.core.report.files_opened = self.segments.len();
    }

    /// Ищет следующий файл цепочки среди файлов каталога с тем же расширением.
    fn find_continuation(&mut self) -> CodecResult<Option<Segment>> {
        let Some(last) = self.segments.last() else {
            return Ok(None);
        };

        if last.num_blocks == 0 {
            return Ok(None);
        }

        let ext = self.core.desc.family.extension();
        let mut siblings: Vec<PathBuf> = fs::read_dir(&self.core.dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.is_file()
                    && p.extension()
                        .map(|e| e.to_string_lossy().eq_ignore_ascii_case(ext))
                        .unwrap_or(false)
            })
            .collect();
        siblings.sort();

        let last_name = last.path.file_name();
        let Some(pos) = siblings.iter().position(|p| p.file_name() == last_name) else {
            return Ok(None);
        };
        let Some(candidate) = siblings.get(pos + 1).cloned() else {
            return Ok(None);
        };

        if self.rejected.contains(&candidate) {
            return Ok(None);
        }

        let last_ts = last.last_timestamp;

        let next = match read_header_file(&candidate) {
            Ok(d) => d,
            Err(e) => {
                debug!("{} is not a continuation: {e}", candidate.display());
                self.rejected.push(candidate);
                return Ok(None);
            }
        };

        if !self.core.desc.same_acquisition(&next) {
            debug!("{} has a different header", candidate.display());
            self.rejected.push(candidate);
            return Ok(None);
        }

        // Файл может ещё записываться: данных пока нет.
        if next.num_data_blocks == 0 {
            return Ok(None);
        }

        let gap = next.first_timestamp - last_ts;
        if !(1..=MAX_CHAIN_GAP).contains(&gap) {
            self.core.warn(OpenWarning::ChainBroken {
                path: candidate.clone(),
                reason: format!("timestamp gap {gap}"),
            });
            self.rejected.push(candidate);
            return Ok(None);
        }

        Ok(Some(Segment {
            path: candidate,
            header_size: next.header_size,
            num_blocks: next.num_data_blocks,
            first_timestamp: next.first_timestamp,
            last_timestamp: next.last_timestamp,
            start_block: 0,
        }))
    }

    fn segment_of_block(
        &self,
        block: u64,
    ) -> Option<usize> {
        self.segments
            .iter()
            .position(|s| block >= s.start_block && block < s.start_block + s.num_blocks)
    }

    fn load_block(
        &mut self,
        block: u64,
    ) -> CodecResult<()> {
        let seg_index = self.segment_of_block(block).ok_or_else(|| {
            CodecError::layout(format!("block {block} is beyond the end of the recording"))
        })?;

        if seg_index != self.current {
            self.file = File::open(&self.segments[seg_index].path)?;
            self.file_offset = 0;
            self.current = seg_index;

            let path = self.segments[seg_index].path.clone();
            info!("Playing {} (file {} of chain)", path.display(), seg_index + 1);
            self.core.notices.push(FormatNotice::SegmentOpened {
                index: seg_index,
                path,
            });
        }

        let seg = &self.segments[seg_index];
        let offset = seg.header_size + (block - seg.start_block) * self.bytes_per_block;

        if offset != self.file_offset {
            self.file.seek(SeekFrom::Start(offset))?;
        }

        if let Err(e) = self.file.read_exact(&mut self.raw) {
            // Позиция файла после неполного чтения неизвестна.
            self.file_offset = u64::MAX;
            return Err(e.into());
        }
        self.file_offset = offset + self.bytes_per_block;

        self.block.parse(&self.raw, &self.layout);
        self.loaded_block = Some(block);

        Ok(())
    }
}

impl FormatManager for TraditionalManager {
    fn core(&self) -> &FormatCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FormatCore {
        &mut self.core
    }

    fn layout(&self) -> RecordingLayout {
        RecordingLayout::Traditional
    }

    fn current_segment(&self) -> Option<usize> {
        Some(self.current)
    }

    fn load_frame(
        &mut self,
        frame: &mut SampleFrame,
    ) -> CodecResult<()> {
        if self.core.samples_available() == 0 {
            return Err(CodecError::Io(std::io::ErrorKind::UnexpectedEof.into()));
        }

        let s = self.layout.samples as u64;
        let block = self.core.position / s;

        if self.loaded_block != Some(block) {
            self.load_block(block)?;
        }

        self.block
            .fill((self.core.position % s) as usize, &self.layout, frame);
        self.core.position += 1;

        Ok(())
    }

    /// Переходит к началу блока, содержащего `target`.
    fn jump_to_timestamp(
        &mut self,
        target: i64,
    ) -> CodecResult<i64> {
        let target = self.core.clamp_timestamp(target);
        let s = self.layout.samples as u64;

        self.loaded_block = None;

        let Some(seg_index) = self
            .segments
            .iter()
            .rposition(|seg| seg.num_blocks > 0 && seg.first_timestamp <= target)
            .or_else(|| self.segments.iter().position(|seg| seg.num_blocks > 0))
        else {
            self.core.position = 0;
            return Ok(self.core.first_timestamp);
        };

        let seg = &self.segments[seg_index];
        let local = ((target - seg.first_timestamp).max(0) as u64 / s).min(seg.num_blocks - 1);
        let block = seg.start_block + local;

        self.load_block(block)?;
        self.core.position = block * s;

        Ok(self.block.timestamps.first().copied().unwrap_or(0) as i64)
    }

    fn update_end_of_data(&mut self) -> CodecResult<()> {
        let bpb = self.bytes_per_block;
        let s = self.layout.samples as u64;

        if let Some(last) = self.segments.last_mut() {
            let len = fs::metadata(&last.path)?.len();
            let blocks = len.saturating_sub(last.header_size) / bpb;

            if blocks > last.num_blocks {
                let mut f = File::open(&last.path)?;

                if last.num_blocks == 0 {
                    f.seek(SeekFrom::Start(last.header_size))?;
                    last.first_timestamp = f.read_i32::<LittleEndian>()? as i64;
                }

                f.seek(SeekFrom::Start(
                    last.header_size + (blocks - 1) * bpb + 4 * (s - 1),
                ))?;
                last.last_timestamp = f.read_i32::<LittleEndian>()? as i64;
                last.num_blocks = blocks;
            }
        }

        if self.options.follow_chain && self.core.samples_available() == 0 {
            if let Some(seg) = self.find_continuation()? {
                self.append_segment(seg);
            }
        }

        self.refresh_totals();

        Ok(())
    }
}
