//! Wire-формат блока данных контроллера.
//!
//! Блок состоит из `S` выборок фиксированного размера. Все слова `u16`
//! little-endian. Раскладка выборки зависит от поколения контроллера:
//!
//! ```text
//! RHD (USB2 / USB3, 32 канала на поток)
//!   magic u64 | timestamp i32
//!   aux[3][streams]           слот 0 температура, 1 aux-вход, 2 питание
//!   amplifier[32][streams]
//!   filler[streams | streams % 4]
//!   analog_in[8] | digital_in | digital_out
//!
//! RHS (16 каналов на поток)
//!   magic u64 | timestamp i32
//!   aux[4][streams] × u32     слот 0, младшее слово: маска compliance limit
//!   (amplifier, dc)[16][streams]
//!   stim_on, polarity, amp_settle, charge_recovery  [streams] каждое
//!   analog_out[8] | analog_in[8] | digital_in | digital_out
//! ```

use byteorder::{ByteOrder, LittleEndian};
use rhx_types::{AcquisitionDescriptor, CodecError, CodecResult, ControllerType};

use crate::frame::{SampleFrame, AUX_INPUTS_PER_STREAM, BOARD_ANALOG_LINES};

/// Размер magic + timestamp
pub const WIRE_PREAMBLE_SIZE: usize = 8 + 4;

pub const STIM_MAGNITUDE_MASK: u16 = 0x00FF;
pub const STIM_POLARITY_BIT: u16 = 1 << 8;
pub const STIM_AMP_SETTLE_BIT: u16 = 1 << 13;
pub const STIM_CHARGE_RECOVERY_BIT: u16 = 1 << 14;
pub const STIM_COMPLIANCE_BIT: u16 = 1 << 15;

/// Индексы слов статуса стимуляции в RHS-выборке.
pub const STIM_STATUS_ON: usize = 0;
pub const STIM_STATUS_POLARITY: usize = 1;
pub const STIM_STATUS_AMP_SETTLE: usize = 2;
pub const STIM_STATUS_CHARGE_RECOVERY: usize = 3;

/// Размер одной wire-выборки в байтах.
pub fn wire_bytes_per_sample(
    controller: ControllerType,
    num_streams: usize,
) -> usize {
    let words = match controller {
        ControllerType::RecordUsb2 | ControllerType::RecordUsb3 => {
            controller.aux_command_slots() * num_streams
                + controller.channels_per_stream() * num_streams
                + controller.filler_words(num_streams)
                + BOARD_ANALOG_LINES
                + 2
        }
        ControllerType::StimRecord => {
            2 * controller.aux_command_slots() * num_streams
                + 2 * controller.channels_per_stream() * num_streams
                + 4 * num_streams
                + 2 * BOARD_ANALOG_LINES
                + 2
        }
    };

    WIRE_PREAMBLE_SIZE + 2 * words
}

/// Размер wire-блока для данной записи.
pub fn wire_block_size(desc: &AcquisitionDescriptor) -> usize {
    desc.samples_per_block * wire_bytes_per_sample(desc.controller, desc.num_data_streams)
}

/// Сериализует кадр как выборку номер `sample` внутри блока.
///
/// Номер выборки нужен RHD: aux-входы передаются по одному за выборку в
/// цикле из четырёх.
pub fn encode_sample(
    frame: &SampleFrame,
    sample: usize,
    out: &mut Vec<u8>,
) {
    let streams = frame.num_streams;
    let cps = frame.channels_per_stream;

    out.extend_from_slice(&frame.controller.wire_magic().to_le_bytes());
    out.extend_from_slice(&frame.timestamp.to_le_bytes());

    let mut put = |w: u16| out.extend_from_slice(&w.to_le_bytes());

    match frame.controller {
        ControllerType::RecordUsb2 | ControllerType::RecordUsb3 => {
            for s in 0..streams {
                put(frame.temperature_for_stream(s));
            }

            let aux = sample % 4;
            for s in 0..streams {
                put(if (1..=AUX_INPUTS_PER_STREAM).contains(&aux) {
                    frame.aux_input[s * AUX_INPUTS_PER_STREAM + aux - 1]
                } else {
                    0
                });
            }

            for s in 0..streams {
                put(frame.supply_voltage[s]);
            }

            for c in 0..cps {
                for s in 0..streams {
                    put(frame.amplifier[s * cps + c]);
                }
            }

            for _ in 0..frame.controller.filler_words(streams) {
                put(0);
            }

            for v in frame.analog_in {
                put(v);
            }
        }
        ControllerType::StimRecord => {
            for slot in 0..frame.controller.aux_command_slots() {
                for s in 0..streams {
                    let low = if slot == 0 {
                        stim_status_word(frame, s, |w| w & STIM_COMPLIANCE_BIT != 0)
                    } else {
                        0
                    };
                    put(low);
                    put(0);
                }
            }

            for c in 0..cps {
                for s in 0..streams {
                    put(frame.amplifier[s * cps + c]);
                    put(frame.dc_amplifier[s * cps + c]);
                }
            }

            let tests: [fn(u16) -> bool; 4] = [
                |w| w & STIM_MAGNITUDE_MASK != 0,
                |w| w & STIM_POLARITY_BIT != 0,
                |w| w & STIM_AMP_SETTLE_BIT != 0,
                |w| w & STIM_CHARGE_RECOVERY_BIT != 0,
            ];

            for test in tests {
                for s in 0..streams {
                    put(stim_status_word(frame, s, test));
                }
            }

            for v in frame.analog_out {
                put(v);
            }
            for v in frame.analog_in {
                put(v);
            }
        }
    }

    put(frame.digital_in);
    put(frame.digital_out);
}

/// Упаковывает признак по 16 каналам потока: бит `c` = канал `c`.
fn stim_status_word(
    frame: &SampleFrame,
    stream: usize,
    test: impl Fn(u16) -> bool,
) -> u16 {
    let cps = frame.channels_per_stream;

    frame.stim[stream * cps..(stream + 1) * cps]
        .iter()
        .enumerate()
        .filter(|&(_, &w)| test(w))
        .fold(0u16, |acc, (c, _)| acc | (1 << c))
}

/// Разобранный wire-блок.
///
/// Массивы по выборкам лежат подряд: `amplifier[(t * channels + c) * streams + s]`.
#[derive(Debug, Clone, PartialEq)]
pub struct DataBlock {
    pub controller: ControllerType,
    pub num_streams: usize,
    pub samples: usize,
    pub timestamps: Vec<i32>,
    /// `[sample][channel][stream]`
    pub amplifier: Vec<u16>,
    /// `[sample][channel][stream]`, пусто для RHD
    pub dc_amplifier: Vec<u16>,
    /// Младшие слова aux-слотов `[sample][slot][stream]`
    pub aux: Vec<u16>,
    /// `[sample][status][stream]`, пусто для RHD
    pub stim_status: Vec<u16>,
    /// `[sample][line]`
    pub analog_in: Vec<u16>,
    /// `[sample][line]`, пусто для RHD
    pub analog_out: Vec<u16>,
    pub digital_in: Vec<u16>,
    pub digital_out: Vec<u16>,
}

impl DataBlock {
    /// Разбирает один блок из `samples` выборок.
    pub fn decode(
        controller: ControllerType,
        num_streams: usize,
        samples: usize,
        bytes: &[u8],
    ) -> CodecResult<Self> {
        let per_sample = wire_bytes_per_sample(controller, num_streams);
        let expected = per_sample * samples;

        if bytes.len() < expected {
            return Err(CodecError::layout(format!(
                "wire block too short: {} < {expected} bytes",
                bytes.len()
            )));
        }

        let cps = controller.channels_per_stream();
        let slots = controller.aux_command_slots();
        let stim = controller.is_stim();

        let mut block = Self {
            controller,
            num_streams,
            samples,
            timestamps: Vec::with_capacity(samples),
            amplifier: Vec::with_capacity(samples * cps * num_streams),
            dc_amplifier: Vec::new(),
            aux: Vec::with_capacity(samples * slots * num_streams),
            stim_status: Vec::new(),
            analog_in: Vec::with_capacity(samples * BOARD_ANALOG_LINES),
            analog_out: Vec::new(),
            digital_in: Vec::with_capacity(samples),
            digital_out: Vec::with_capacity(samples),
        };

        for t in 0..samples {
            let raw = &bytes[t * per_sample..(t + 1) * per_sample];

            let magic = LittleEndian::read_u64(&raw[0..8]);
            if magic != controller.wire_magic() {
                return Err(CodecError::layout(format!(
                    "bad wire magic 0x{magic:016x} at sample {t}"
                )));
            }

            block.timestamps.push(LittleEndian::read_i32(&raw[8..12]));

            let mut words = raw[WIRE_PREAMBLE_SIZE..]
                .chunks_exact(2)
                .map(LittleEndian::read_u16);
            let mut next = || words.next().unwrap_or(0);

            if stim {
                for _ in 0..slots * num_streams {
                    block.aux.push(next());
                    next();
                }
                for _ in 0..cps * num_streams {
                    block.amplifier.push(next());
                    block.dc_amplifier.push(next());
                }
                for _ in 0..4 * num_streams {
                    block.stim_status.push(next());
                }
                for _ in 0..BOARD_ANALOG_LINES {
                    block.analog_out.push(next());
                }
            } else {
                for _ in 0..slots * num_streams {
                    block.aux.push(next());
                }
                for _ in 0..cps * num_streams {
                    block.amplifier.push(next());
                }
                for _ in 0..controller.filler_words(num_streams) {
                    next();
                }
            }

            for _ in 0..BOARD_ANALOG_LINES {
                block.analog_in.push(next());
            }

            block.digital_in.push(next());
            block.digital_out.push(next());
        }

        Ok(block)
    }

    /// Разбирает последовательность блоков записи.
    pub fn decode_all(
        desc: &AcquisitionDescriptor,
        bytes: &[u8],
    ) -> CodecResult<Vec<Self>> {
        let size = wire_block_size(desc);

        bytes
            .chunks(size)
            .map(|chunk| {
                Self::decode(
                    desc.controller,
                    desc.num_data_streams,
                    desc.samples_per_block,
                    chunk,
                )
            })
            .collect()
    }

    /// Значение усилителя (offset-binary).
    pub fn amplifier_at(
        &self,
        sample: usize,
        stream: usize,
        channel: usize,
    ) -> Option<u16> {
        let cps = self.controller.channels_per_stream();

        if stream >= self.num_streams || channel >= cps {
            return None;
        }

        self.amplifier
            .get((sample * cps + channel) * self.num_streams + stream)
            .copied()
    }

    pub fn dc_amplifier_at(
        &self,
        sample: usize,
        stream: usize,
        channel: usize,
    ) -> Option<u16> {
        let cps = self.controller.channels_per_stream();

        if stream >= self.num_streams || channel >= cps {
            return None;
        }

        self.dc_amplifier
            .get((sample * cps + channel) * self.num_streams + stream)
            .copied()
    }

    /// Младшее слово aux-слота.
    pub fn aux_at(
        &self,
        sample: usize,
        slot: usize,
        stream: usize,
    ) -> Option<u16> {
        let slots = self.controller.aux_command_slots();

        if stream >= self.num_streams || slot >= slots {
            return None;
        }

        self.aux
            .get((sample * slots + slot) * self.num_streams + stream)
            .copied()
    }

    /// Слово статуса стимуляции (`STIM_STATUS_*`), только RHS.
    pub fn stim_status_at(
        &self,
        sample: usize,
        status: usize,
        stream: usize,
    ) -> Option<u16> {
        if stream >= self.num_streams || status >= 4 {
            return None;
        }

        self.stim_status
            .get((sample * 4 + status) * self.num_streams + stream)
            .copied()
    }

    /// Маска каналов, достигших compliance limit (RHS, aux-слот 0).
    pub fn compliance_mask(
        &self,
        sample: usize,
        stream: usize,
    ) -> Option<u16> {
        if !self.controller.is_stim() {
            return None;
        }

        self.aux_at(sample, 0, stream)
    }

    pub fn analog_in_at(
        &self,
        sample: usize,
        line: usize,
    ) -> Option<u16> {
        if line >= BOARD_ANALOG_LINES {
            return None;
        }

        self.analog_in.get(sample * BOARD_ANALOG_LINES + line).copied()
    }

    pub fn analog_out_at(
        &self,
        sample: usize,
        line: usize,
    ) -> Option<u16> {
        if line >= BOARD_ANALOG_LINES {
            return None;
        }

        self.analog_out.get(sample * BOARD_ANALOG_LINES + line).copied()
    }
}
