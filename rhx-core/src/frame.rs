use rhx_types::{AcquisitionDescriptor, ChannelDescriptor, ControllerType, SignalType};

/// Aux-входов на поток (RHD)
pub const AUX_INPUTS_PER_STREAM: usize = 3;

/// Линий аналоговых входов/выходов на плате
pub const BOARD_ANALOG_LINES: usize = 8;

/// Один временной срез всех сигналов.
///
/// Создаётся один раз на сессию и переиспользуется: менеджеры форматов
/// перезаписывают только слоты сохранённых каналов, остальные слоты хранят
/// заглушку, выставленную в [`SampleFrame::reset`].
///
/// Значения усилителя хранятся в offset-binary (как в wire-формате).
#[derive(Debug, Clone, PartialEq)]
pub struct SampleFrame {
    pub controller: ControllerType,
    pub timestamp: i32,
    pub num_streams: usize,
    pub channels_per_stream: usize,
    /// `[stream][channel]`
    pub amplifier: Vec<u16>,
    /// `[stream][channel]`, только RHS
    pub dc_amplifier: Vec<u16>,
    /// Слово стимуляции `[stream][channel]`, только RHS
    pub stim: Vec<u16>,
    /// `[stream][aux]`
    pub aux_input: Vec<u16>,
    /// `[stream]`
    pub supply_voltage: Vec<u16>,
    /// По одному значению на датчик
    pub temperature: Vec<u16>,
    pub analog_in: [u16; BOARD_ANALOG_LINES],
    pub analog_out: [u16; BOARD_ANALOG_LINES],
    pub digital_in: u16,
    pub digital_out: u16,
}

impl SampleFrame {
    pub fn new(desc: &AcquisitionDescriptor) -> Self {
        let streams = desc.num_data_streams.max(1);
        let cps = desc.controller.channels_per_stream();

        let mut frame = Self {
            controller: desc.controller,
            timestamp: 0,
            num_streams: streams,
            channels_per_stream: cps,
            amplifier: vec![0; streams * cps],
            dc_amplifier: vec![0; streams * cps],
            stim: vec![0; streams * cps],
            aux_input: vec![0; streams * AUX_INPUTS_PER_STREAM],
            supply_voltage: vec![0; streams],
            temperature: vec![0; desc.num_temp_sensors as usize],
            analog_in: [0; BOARD_ANALOG_LINES],
            analog_out: [0; BOARD_ANALOG_LINES],
            digital_in: 0,
            digital_out: 0,
        };

        frame.reset();
        frame
    }

    /// Заполняет все слоты значениями-заглушками.
    pub fn reset(&mut self) {
        let c = self.controller;

        self.timestamp = 0;
        self.amplifier.fill(SignalType::Amplifier.placeholder(c));
        self.dc_amplifier.fill(SignalType::DcAmplifier.placeholder(c));
        self.stim.fill(SignalType::Stim.placeholder(c));
        self.aux_input.fill(SignalType::AuxInput.placeholder(c));
        self.supply_voltage.fill(SignalType::SupplyVoltage.placeholder(c));
        self.temperature.fill(0);
        self.analog_in.fill(SignalType::AnalogIn.placeholder(c));
        self.analog_out.fill(SignalType::AnalogOut.placeholder(c));
        self.digital_in = 0;
        self.digital_out = 0;
    }

    /// Индекс слота канала в массиве своей категории.
    ///
    /// `None`, если канал выходит за пределы кадра (такие значения
    /// отбрасываются).
    pub fn slot(
        &self,
        signal: SignalType,
        channel: &ChannelDescriptor,
    ) -> Option<usize> {
        let stream = channel.stream();
        let idx = channel.in_stream_index();

        if stream >= self.num_streams {
            return None;
        }

        match signal {
            SignalType::Amplifier | SignalType::DcAmplifier | SignalType::Stim => {
                (idx < self.channels_per_stream).then_some(stream * self.channels_per_stream + idx)
            }
            SignalType::AuxInput => {
                (idx < AUX_INPUTS_PER_STREAM).then_some(stream * AUX_INPUTS_PER_STREAM + idx)
            }
            SignalType::SupplyVoltage => Some(stream),
            SignalType::AnalogIn | SignalType::AnalogOut => {
                (idx < BOARD_ANALOG_LINES).then_some(idx)
            }
            SignalType::DigitalIn | SignalType::DigitalOut => (idx < 16).then_some(idx),
        }
    }

    /// Записывает значение канала. Для цифровых сигналов `value` трактуется
    /// как состояние одной линии (0 / не 0).
    pub fn set(
        &mut self,
        signal: SignalType,
        channel: &ChannelDescriptor,
        value: u16,
    ) {
        let Some(slot) = self.slot(signal, channel) else {
            return;
        };

        match signal {
            SignalType::Amplifier => self.amplifier[slot] = value,
            SignalType::DcAmplifier => self.dc_amplifier[slot] = value,
            SignalType::Stim => self.stim[slot] = value,
            SignalType::AuxInput => self.aux_input[slot] = value,
            SignalType::SupplyVoltage => self.supply_voltage[slot] = value,
            SignalType::AnalogIn => self.analog_in[slot] = value,
            SignalType::AnalogOut => self.analog_out[slot] = value,
            SignalType::DigitalIn => set_bit(&mut self.digital_in, slot, value != 0),
            SignalType::DigitalOut => set_bit(&mut self.digital_out, slot, value != 0),
        }
    }

    /// Читает значение канала (для цифровых: 0 или 1).
    pub fn get(
        &self,
        signal: SignalType,
        channel: &ChannelDescriptor,
    ) -> Option<u16> {
        let slot = self.slot(signal, channel)?;

        let v = match signal {
            SignalType::Amplifier => self.amplifier[slot],
            SignalType::DcAmplifier => self.dc_amplifier[slot],
            SignalType::Stim => self.stim[slot],
            SignalType::AuxInput => self.aux_input[slot],
            SignalType::SupplyVoltage => self.supply_voltage[slot],
            SignalType::AnalogIn => self.analog_in[slot],
            SignalType::AnalogOut => self.analog_out[slot],
            SignalType::DigitalIn => (self.digital_in >> slot) & 1,
            SignalType::DigitalOut => (self.digital_out >> slot) & 1,
        };

        Some(v)
    }

    pub fn temperature_for_stream(
        &self,
        stream: usize,
    ) -> u16 {
        self.temperature.get(stream).copied().unwrap_or(0)
    }
}

fn set_bit(
    word: &mut u16,
    bit: usize,
    on: bool,
) {
    if on {
        *word |= 1 << bit;
    } else {
        *word &= !(1 << bit);
    }
}
