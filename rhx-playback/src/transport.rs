//! Контроллер, за которым вместо платы стоит запись на диске.
//!
//! Настройки, которые у живого контроллера уходят в регистры FPGA, здесь
//! сохраняются в теневых регистрах. Регистры и читатель под разными
//! мьютексами: чтение может ждать новых данных до таймаута повтора, и
//! настройки в это время не блокируются.

use log::{debug, warn};
use parking_lot::Mutex;
use rhx_core::{wire_block_size, DataBlock};
use rhx_types::AcquisitionDescriptor;

use crate::{PlaybackConfig, PlaybackReader, PlaybackResult};

/// Портов SPI на плате
pub const MAX_PORTS: usize = 8;

/// Каналов ЦАП на плате
pub const MAX_DACS: usize = 8;

/// Теневая копия регистров контроллера.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ShadowRegisters {
    pub cable_delays: [u32; MAX_PORTS],
    pub stream_enabled: Vec<bool>,
    pub dac_enabled: [bool; MAX_DACS],
    /// `(stream, channel)` источника для каждого ЦАП
    pub dac_source: [(usize, usize); MAX_DACS],
    pub dac_gain: u16,
    pub ttl_out: u16,
    pub led_display: [bool; 8],
    pub dsp_settle: bool,
    pub continuous_run: bool,
    pub max_time_step: u32,
}

/// Файловый контроллер с интерфейсом живого.
pub struct PlaybackTransport {
    descriptor: AcquisitionDescriptor,
    reader: Mutex<PlaybackReader>,
    registers: Mutex<ShadowRegisters>,
}

impl PlaybackTransport {
    pub fn new(reader: PlaybackReader) -> Self {
        let registers = ShadowRegisters {
            stream_enabled: vec![true; reader.descriptor().num_data_streams],
            continuous_run: true,
            ..ShadowRegisters::default()
        };

        Self {
            descriptor: reader.descriptor().clone(),
            reader: Mutex::new(reader),
            registers: Mutex::new(registers),
        }
    }

    pub fn from_config(config: PlaybackConfig) -> PlaybackResult<Self> {
        Ok(Self::new(PlaybackReader::open(config)?))
    }

    /// Устройство всегда "подключено".
    pub fn open(&self) -> bool {
        true
    }

    /// Данные забираются опросом, запуск не нужен.
    pub fn run(&self) {}

    pub fn is_running(&self) -> bool {
        false
    }

    pub fn flush(&self) {}

    /// Доступ к читателю под его мьютексом (навигация, подписка).
    pub fn with_reader<R>(
        &self,
        f: impl FnOnce(&mut PlaybackReader) -> R,
    ) -> R {
        f(&mut self.reader.lock())
    }

    pub fn descriptor(&self) -> AcquisitionDescriptor {
        self.descriptor.clone()
    }

    pub fn sample_rate(&self) -> f32 {
        self.descriptor.sample_rate
    }

    pub fn num_data_streams(&self) -> usize {
        self.descriptor.num_data_streams
    }

    /// Слов `u16`, готовых к чтению (полные блоки).
    pub fn num_words_in_fifo(&self) -> u64 {
        let block_words = wire_block_size(&self.descriptor) as u64 / 2;

        self.reader.lock().blocks_available() * block_words
    }

    /// Читает `n` блоков в wire-формате. 0 байт = блоки ещё не готовы или
    /// запись закончилась.
    pub fn read_data_blocks_raw(
        &self,
        n: usize,
        out: &mut Vec<u8>,
    ) -> PlaybackResult<usize> {
        self.reader.lock().read_raw_blocks(n, out)
    }

    /// Читает и разбирает `n` блоков. Пустой вектор = блоки не готовы.
    pub fn read_data_blocks(
        &self,
        n: usize,
    ) -> PlaybackResult<Vec<DataBlock>> {
        let mut buf = Vec::new();

        if self.reader.lock().read_raw_blocks(n, &mut buf)? == 0 {
            return Ok(Vec::new());
        }

        Ok(DataBlock::decode_all(&self.descriptor, &buf)?)
    }

    pub fn registers(&self) -> ShadowRegisters {
        self.registers.lock().clone()
    }

    ////////////////////////////////////////////////////////////////////////////
    // Настройки платы: только теневые регистры
    ////////////////////////////////////////////////////////////////////////////

    pub fn set_cable_delay(
        &self,
        port: usize,
        delay: u32,
    ) {
        match self.registers.lock().cable_delays.get_mut(port) {
            Some(d) => *d = delay,
            None => warn!("Cable delay for unknown port {port} ignored"),
        }
    }

    pub fn enable_data_stream(
        &self,
        stream: usize,
        enabled: bool,
    ) {
        match self.registers.lock().stream_enabled.get_mut(stream) {
            Some(e) => *e = enabled,
            None => warn!("Data stream {stream} does not exist in this recording"),
        }
    }

    pub fn enable_dac(
        &self,
        dac: usize,
        enabled: bool,
    ) {
        match self.registers.lock().dac_enabled.get_mut(dac) {
            Some(e) => *e = enabled,
            None => warn!("Unknown DAC {dac} ignored"),
        }
    }

    pub fn select_dac_source(
        &self,
        dac: usize,
        stream: usize,
        channel: usize,
    ) {
        match self.registers.lock().dac_source.get_mut(dac) {
            Some(s) => *s = (stream, channel),
            None => warn!("Unknown DAC {dac} ignored"),
        }
    }

    pub fn set_dac_gain(
        &self,
        gain: u16,
    ) {
        self.registers.lock().dac_gain = gain;
    }

    pub fn set_ttl_out(
        &self,
        word: u16,
    ) {
        self.registers.lock().ttl_out = word;
    }

    pub fn set_led_display(
        &self,
        leds: [bool; 8],
    ) {
        self.registers.lock().led_display = leds;
    }

    pub fn set_dsp_settle(
        &self,
        enabled: bool,
    ) {
        self.registers.lock().dsp_settle = enabled;
    }

    pub fn set_continuous_run_mode(
        &self,
        continuous: bool,
    ) {
        self.registers.lock().continuous_run = continuous;
    }

    pub fn set_max_time_step(
        &self,
        steps: u32,
    ) {
        self.registers.lock().max_time_step = steps;
    }

    /// Частота задаётся записью; запрос другой частоты игнорируется.
    pub fn set_sample_rate(
        &self,
        rate: f32,
    ) -> bool {
        let actual = self.sample_rate();

        if rate != actual {
            debug!("Sample rate {rate} Hz requested, recording runs at {actual} Hz");
        }

        rate == actual
    }
}
