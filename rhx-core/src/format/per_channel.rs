//! Per-channel раскладка: файл на каждый канал.
//!
//! Поддерживает чтение записи, которую параллельно дописывает другой процесс:
//! длины файлов перемеряются перед каждой порцией чтения, а при нехватке
//! данных менеджер ждёт их появления в пределах [`RetryPolicy`](crate::tail::RetryPolicy).

use std::path::PathBuf;

use log::{debug, info};
use rhx_types::{
    AcquisitionDescriptor, ChannelDescriptor, CodecError, CodecResult, SignalType,
    TIME_FILE_NAME,
};

use crate::{
    format::{
        emit_blocks, DataFile, FileArena, FormatCore, FormatManager, FormatNotice,
        ManagerOptions, RecordingLayout,
    },
    frame::SampleFrame,
    report::OpenWarning,
};

/// Менеджер per-channel раскладки.
pub struct PerChannelManager {
    core: FormatCore,
    options: ManagerOptions,
    time: DataFile,
    arena: FileArena,
}

/// Какие файлы положены каналу: основной сигнал и (для RHS) DC и стимуляция.
fn channel_signals(
    desc: &AcquisitionDescriptor,
    ch: &ChannelDescriptor,
    with_dc: bool,
) -> Vec<SignalType> {
    let mut signals = vec![ch.signal_type];

    if ch.signal_type == SignalType::Amplifier && desc.controller.is_stim() {
        if with_dc {
            signals.push(SignalType::DcAmplifier);
        }
        signals.push(SignalType::Stim);
    }

    signals
}

impl PerChannelManager {
    pub fn open(
        dir: PathBuf,
        mut desc: AcquisitionDescriptor,
        options: ManagerOptions,
    ) -> CodecResult<Self> {
        let time_path = dir.join(TIME_FILE_NAME);
        if !time_path.is_file() {
            return Err(CodecError::MissingFile(time_path));
        }
        let time = DataFile::open(&time_path, 4)?;

        let channels: Vec<ChannelDescriptor> = desc.channels().filter(|c| c.enabled).cloned().collect();

        let dc_found = desc.controller.is_stim()
            && !desc.dc_amplifier_saved
            && channels.iter().any(|c| {
                c.signal_type == SignalType::Amplifier
                    && dir
                        .join(SignalType::DcAmplifier.channel_file_name(&c.native_name))
                        .is_file()
            });

        if dc_found {
            desc.dc_amplifier_saved = true;
            desc.dc_amplifier_flag_corrected = true;
        }

        let mut arena = FileArena::new();
        let mut warnings = Vec::new();
        let mut unsaved = Vec::new();

        for ch in &channels {
            for signal in channel_signals(&desc, ch, desc.dc_amplifier_saved) {
                let path = dir.join(signal.channel_file_name(&ch.native_name));

                let file = if path.is_file() {
                    Some(DataFile::open(&path, 2)?)
                } else {
                    warnings.push(OpenWarning::MissingFile {
                        path,
                        channels: vec![ch.native_name.clone()],
                    });
                    if signal == ch.signal_type {
                        unsaved.push(ch.native_name.clone());
                    }
                    None
                };

                arena.insert(signal, ch.clone(), file);
            }
        }

        for ch in desc.channels_mut() {
            if unsaved.contains(&ch.native_name) {
                ch.saved = false;
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
            options,
            time,
            arena,
        };

        m.core.report.files_opened = 1 + m.arena.files().len();
        m.clamp_to_shortest(true)?;

        info!(
            "Per-channel recording: {} channel files ({} slots), {} samples",
            m.arena.files().len(),
            m.arena.slots().len(),
            m.core.total_samples
        );

        Ok(m)
    }

    /// Файлы каналов (для диагностики).
    pub fn arena(&self) -> &FileArena {
        &self.arena
    }

    fn clamp_to_shortest(
        &mut self,
        report: bool,
    ) -> CodecResult<()> {
        let time_samples = self.time.samples();
        let longest = self.arena.longest_samples().max(time_samples);

        let (total, path) = match self.arena.shortest() {
            Some((i, n)) if n < time_samples => (n, self.arena.files()[i].path().to_path_buf()),
            _ => (time_samples, self.time.path().to_path_buf()),
        };

        if report && total < longest {
            self.core.warn(OpenWarning::ShortFile {
                path,
                samples: total,
                longest,
            });
        }

        let previous = self.core.total_samples;
        self.core.total_samples = total;

        if total > 0 && (total != previous || report) {
            if report || previous == 0 {
                self.core.first_timestamp = self.time.read_i32_at(0)? as i64;
            }
            self.core.last_timestamp = self.time.read_i32_at(total - 1)? as i64;
        }

        Ok(())
    }
}

impl FormatManager for PerChannelManager {
    fn core(&self) -> &FormatCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FormatCore {
        &mut self.core
    }

    fn layout(&self) -> RecordingLayout {
        RecordingLayout::PerChannel
    }

    fn tails_live(&self) -> bool {
        true
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

        let (slots, files) = self.arena.parts_mut();

        for slot in slots {
            let Some(i) = slot.file else {
                continue;
            };
            let f = &mut files[i];

            f.seek_sample(pos)?;
            let v = f.read_u16()?;
            let v = if slot.signal == SignalType::Amplifier {
                v ^ 0x8000
            } else {
                v
            };

            frame.set(slot.signal, &slot.channel, v);
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
        self.arena.seek_all(index)?;

        Ok(self.time.read_i32_at(index)? as i64)
    }

    fn update_end_of_data(&mut self) -> CodecResult<()> {
        self.time.measure()?;
        self.arena.measure_all()?;

        let before = self.core.total_samples;
        self.clamp_to_shortest(false)?;

        if self.core.total_samples != before {
            debug!(
                "End of data moved: {before} -> {} samples",
                self.core.total_samples
            );
        }

        Ok(())
    }

    /// При нехватке данных ждёт их появления (файлы могут дописываться),
    /// не дольше `retry.timeout`.
    fn read_raw_blocks(
        &mut self,
        n: usize,
        frame: &mut SampleFrame,
        out: &mut Vec<u8>,
    ) -> CodecResult<usize> {
        if n == 0 {
            return Ok(0);
        }

        let retry = self.options.retry;
        let cancel = self.options.cancel.clone();

        let ready = retry.poll(&cancel, || {
            self.update_end_of_data()?;
            Ok((self.blocks_available() >= n as u64).then_some(()))
        })?;

        if ready.is_none() {
            return Ok(0);
        }

        emit_blocks(self, n, frame, out)
    }
}
