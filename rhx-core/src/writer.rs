//! Запись сессии в любой из трёх раскладок.
//!
//! Байтовая раскладка зеркальна чтению: всё, что записано здесь, читается
//! соответствующим менеджером формата без потерь.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use log::debug;
use rhx_types::{
    AcquisitionDescriptor, ChannelDescriptor, CodecResult, SignalType, TIME_FILE_NAME,
};

use crate::{format::RecordingLayout, frame::SampleFrame, header::serialize_header};

/// Накопитель секций одного traditional-блока.
#[derive(Debug, Default)]
struct BlockAccumulator {
    samples: usize,
    timestamps: Vec<u8>,
    amplifier: Vec<u8>,
    dc_amplifier: Vec<u8>,
    stim: Vec<u8>,
    aux: Vec<u8>,
    supply: Vec<u8>,
    temperature: Vec<u8>,
    analog_in: Vec<u8>,
    analog_out: Vec<u8>,
    digital_in: Vec<u8>,
    digital_out: Vec<u8>,
}

enum Sink {
    Traditional {
        out: BufWriter<File>,
        block: BlockAccumulator,
    },
    PerSignalType {
        time: BufWriter<File>,
        files: Vec<(SignalType, Vec<ChannelDescriptor>, BufWriter<File>)>,
    },
    PerChannel {
        time: BufWriter<File>,
        files: Vec<(SignalType, ChannelDescriptor, BufWriter<File>)>,
    },
}

/// Писатель сессии записи.
pub struct SessionWriter {
    desc: AcquisitionDescriptor,
    header_path: PathBuf,
    sink: Sink,
    samples_written: u64,
    blocks_written: u64,
}

fn put(
    buf: &mut Vec<u8>,
    v: u16,
) {
    buf.extend_from_slice(&v.to_le_bytes());
}

/// Переставляет секцию из порядка "выборка, канал" (как копится по кадрам)
/// в порядок "канал, выборка", в котором секция лежит на диске.
fn channel_major(
    section: &[u8],
    samples: usize,
    channels: usize,
) -> Vec<u8> {
    if section.len() != 2 * samples * channels {
        return section.to_vec();
    }

    let mut out = Vec::with_capacity(section.len());

    for k in 0..channels {
        for i in 0..samples {
            let at = 2 * (i * channels + k);
            out.extend_from_slice(&section[at..at + 2]);
        }
    }

    out
}

fn create(path: &Path) -> CodecResult<BufWriter<File>> {
    Ok(BufWriter::new(File::create(path)?))
}

/// Диск хранит усилитель в дополнительном коде, кадр в offset-binary.
fn disk_value(
    signal: SignalType,
    v: u16,
) -> u16 {
    if signal == SignalType::Amplifier {
        v ^ 0x8000
    } else {
        v
    }
}

impl SessionWriter {
    /// Создаёт файл заголовка и файлы данных выбранной раскладки. Данные
    /// per-signal-type и per-channel пишутся в каталог файла заголовка.
    pub fn create<P: AsRef<Path>>(
        header_path: P,
        desc: &AcquisitionDescriptor,
        layout: RecordingLayout,
    ) -> CodecResult<Self> {
        let header_path = header_path.as_ref().to_path_buf();
        let dir = crate::format::recording_dir(&header_path);

        let mut header = create(&header_path)?;
        header.write_all(&serialize_header(desc))?;

        let sink = match layout {
            RecordingLayout::Traditional => Sink::Traditional {
                out: header,
                block: BlockAccumulator::default(),
            },
            RecordingLayout::PerSignalType => {
                header.flush()?;
                let mut files = Vec::new();

                for signal in SignalType::ALL {
                    let wanted = match signal {
                        SignalType::DcAmplifier => {
                            desc.controller.is_stim() && desc.dc_amplifier_saved
                        }
                        SignalType::Stim => desc.controller.is_stim(),
                        _ => true,
                    };
                    let channels: Vec<_> = desc.enabled_channels(signal).cloned().collect();

                    if wanted && !channels.is_empty() {
                        let f = create(&dir.join(signal.signal_file_name()))?;
                        files.push((signal, channels, f));
                    }
                }

                Sink::PerSignalType {
                    time: create(&dir.join(TIME_FILE_NAME))?,
                    files,
                }
            }
            RecordingLayout::PerChannel => {
                header.flush()?;
                let mut files = Vec::new();

                for ch in desc.channels().filter(|c| c.enabled) {
                    let mut signals = vec![ch.signal_type];

                    if ch.signal_type == SignalType::Amplifier && desc.controller.is_stim() {
                        if desc.dc_amplifier_saved {
                            signals.push(SignalType::DcAmplifier);
                        }
                        signals.push(SignalType::Stim);
                    }

                    for signal in signals {
                        let f = create(&dir.join(signal.channel_file_name(&ch.native_name)))?;
                        files.push((signal, ch.clone(), f));
                    }
                }

                Sink::PerChannel {
                    time: create(&dir.join(TIME_FILE_NAME))?,
                    files,
                }
            }
        };

        debug!("Writing {layout} session to {}", header_path.display());

        Ok(Self {
            desc: desc.clone(),
            header_path,
            sink,
            samples_written: 0,
            blocks_written: 0,
        })
    }

    /// Записывает одну выборку.
    ///
    /// Traditional-раскладка копит выборки до полного блока. Aux-входы
    /// берутся из каждой четвёртой выборки, питание и температура из первой
    /// выборки блока.
    pub fn write_frame(
        &mut self,
        frame: &SampleFrame,
    ) -> CodecResult<()> {
        let desc = &self.desc;

        match &mut self.sink {
            Sink::Traditional { out, block } => {
                let i = block.samples;
                let s = desc.samples_per_block;

                block.timestamps.extend_from_slice(&frame.timestamp.to_le_bytes());

                for ch in desc.enabled_channels(SignalType::Amplifier) {
                    let v = frame.get(SignalType::Amplifier, ch).unwrap_or(0);
                    put(&mut block.amplifier, v ^ 0x8000);

                    if desc.dc_amplifier_saved {
                        put(
                            &mut block.dc_amplifier,
                            frame.get(SignalType::DcAmplifier, ch).unwrap_or(0),
                        );
                    }
                    if desc.controller.is_stim() {
                        put(&mut block.stim, frame.get(SignalType::Stim, ch).unwrap_or(0));
                    }
                }

                if i % 4 == 0 {
                    for ch in desc.enabled_channels(SignalType::AuxInput) {
                        put(&mut block.aux, frame.get(SignalType::AuxInput, ch).unwrap_or(0));
                    }
                }

                if i == 0 {
                    for ch in desc.enabled_channels(SignalType::SupplyVoltage) {
                        put(
                            &mut block.supply,
                            frame.get(SignalType::SupplyVoltage, ch).unwrap_or(0),
                        );
                    }
                    for k in 0..desc.num_temp_sensors as usize {
                        put(&mut block.temperature, frame.temperature.get(k).copied().unwrap_or(0));
                    }
                }

                for ch in desc.enabled_channels(SignalType::AnalogIn) {
                    put(&mut block.analog_in, frame.get(SignalType::AnalogIn, ch).unwrap_or(0));
                }
                for ch in desc.enabled_channels(SignalType::AnalogOut) {
                    put(&mut block.analog_out, frame.get(SignalType::AnalogOut, ch).unwrap_or(0));
                }
                if desc.num_enabled(SignalType::DigitalIn) > 0 {
                    put(&mut block.digital_in, frame.digital_in);
                }
                if desc.num_enabled(SignalType::DigitalOut) > 0 {
                    put(&mut block.digital_out, frame.digital_out);
                }

                block.samples += 1;

                if block.samples == s {
                    let n_amp = desc.num_enabled(SignalType::Amplifier);
                    let n_aux = desc.num_enabled(SignalType::AuxInput);
                    let n_adc = desc.num_enabled(SignalType::AnalogIn);
                    let n_dac = desc.num_enabled(SignalType::AnalogOut);

                    out.write_all(&block.timestamps)?;
                    out.write_all(&channel_major(&block.amplifier, s, n_amp))?;
                    out.write_all(&channel_major(&block.dc_amplifier, s, n_amp))?;
                    out.write_all(&channel_major(&block.stim, s, n_amp))?;
                    out.write_all(&channel_major(&block.aux, s / 4, n_aux))?;
                    out.write_all(&block.supply)?;
                    out.write_all(&block.temperature)?;
                    out.write_all(&channel_major(&block.analog_in, s, n_adc))?;
                    out.write_all(&channel_major(&block.analog_out, s, n_dac))?;
                    out.write_all(&block.digital_in)?;
                    out.write_all(&block.digital_out)?;

                    *block = BlockAccumulator::default();
                    self.blocks_written += 1;
                }
            }
            Sink::PerSignalType { time, files } => {
                time.write_all(&frame.timestamp.to_le_bytes())?;

                for (signal, channels, f) in files.iter_mut() {
                    match signal {
                        SignalType::DigitalIn => f.write_all(&frame.digital_in.to_le_bytes())?,
                        SignalType::DigitalOut => f.write_all(&frame.digital_out.to_le_bytes())?,
                        signal => {
                            for ch in channels.iter() {
                                let v = disk_value(*signal, frame.get(*signal, ch).unwrap_or(0));
                                f.write_all(&v.to_le_bytes())?;
                            }
                        }
                    }
                }
            }
            Sink::PerChannel { time, files } => {
                time.write_all(&frame.timestamp.to_le_bytes())?;

                for (signal, ch, f) in files.iter_mut() {
                    let v = disk_value(*signal, frame.get(*signal, ch).unwrap_or(0));
                    f.write_all(&v.to_le_bytes())?;
                }
            }
        }

        self.samples_written += 1;

        Ok(())
    }

    /// Сбрасывает буферы на диск (читатель увидит записанные выборки).
    pub fn flush(&mut self) -> CodecResult<()> {
        match &mut self.sink {
            Sink::Traditional { out, .. } => out.flush()?,
            Sink::PerSignalType { time, files } => {
                for (_, _, f) in files.iter_mut() {
                    f.flush()?;
                }
                time.flush()?;
            }
            Sink::PerChannel { time, files } => {
                for (_, _, f) in files.iter_mut() {
                    f.flush()?;
                }
                time.flush()?;
            }
        }

        Ok(())
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    /// Полных блоков (только traditional).
    pub fn blocks_written(&self) -> u64 {
        self.blocks_written
    }

    pub fn header_path(&self) -> &Path {
        &self.header_path
    }

    /// Завершает запись. Неполный traditional-блок отбрасывается.
    pub fn finish(mut self) -> CodecResult<PathBuf> {
        if let Sink::Traditional { block, .. } = &self.sink {
            if block.samples > 0 {
                debug!("Dropping incomplete block of {} samples", block.samples);
            }
        }

        self.flush()?;

        Ok(self.header_path)
    }
}
