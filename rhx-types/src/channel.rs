use serde::Serialize;

use crate::SignalType;

/// Описание одного канала из заголовка.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelDescriptor {
    /// Системное имя (`A-000`, `A-AUX1`, `DIGITAL-IN-01`)
    pub native_name: String,
    /// Пользовательское имя
    pub custom_name: String,
    pub native_order: i16,
    pub custom_order: i16,
    pub signal_type: SignalType,
    /// Канал включён в заголовке
    pub enabled: bool,
    /// Индекс канала на чипе (для board-сигналов: номер линии)
    pub chip_channel: i16,
    /// Поток команд (только RHS)
    pub command_stream: i16,
    /// Поток данных на плате
    pub board_stream: i16,
    pub voltage_trigger_mode: i16,
    pub voltage_threshold: i16,
    pub digital_trigger_channel: i16,
    pub digital_edge_polarity: i16,
    pub impedance_magnitude: f32,
    pub impedance_phase: f32,
    /// Данные канала реально присутствуют на диске.
    ///
    /// Отличается от `enabled`: канал может быть включён в заголовке, но
    /// отсутствовать среди файлов per-channel.
    pub saved: bool,
}

/// Группа каналов (порт A, B, ... или board-сигналы).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelGroup {
    pub name: String,
    pub prefix: String,
    pub enabled: bool,
    pub num_amplifier_channels: u16,
    pub channels: Vec<ChannelDescriptor>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl ChannelDescriptor {
    /// Создаёт включённый канал с нейтральными значениями служебных полей.
    pub fn new(
        native_name: &str,
        signal_type: SignalType,
        board_stream: i16,
        chip_channel: i16,
    ) -> Self {
        Self {
            native_name: native_name.to_string(),
            custom_name: native_name.to_string(),
            native_order: chip_channel,
            custom_order: chip_channel,
            signal_type,
            enabled: true,
            chip_channel,
            command_stream: board_stream,
            board_stream,
            voltage_trigger_mode: 0,
            voltage_threshold: 0,
            digital_trigger_channel: 0,
            digital_edge_polarity: 0,
            impedance_magnitude: 0.0,
            impedance_phase: 0.0,
            saved: true,
        }
    }

    /// Индекс потока данных.
    pub fn stream(&self) -> usize {
        self.board_stream.max(0) as usize
    }

    /// Индекс канала внутри потока / линии на плате.
    ///
    /// Aux-входы RHD нумеруются на чипе как 32..34.
    pub fn in_stream_index(&self) -> usize {
        let c = self.chip_channel.max(0) as usize;

        match self.signal_type {
            SignalType::AuxInput if c >= 32 => c - 32,
            _ => c,
        }
    }

    /// Совпадение "идентичности" канала без учёта пользовательских полей
    /// (имя, триггеры, импеданс).
    pub fn same_identity(
        &self,
        other: &ChannelDescriptor,
    ) -> bool {
        self.native_name == other.native_name
            && self.signal_type == other.signal_type
            && self.enabled == other.enabled
            && self.chip_channel == other.chip_channel
            && self.board_stream == other.board_stream
            && self.command_stream == other.command_stream
            && self.native_order == other.native_order
    }
}

impl ChannelGroup {
    pub fn new(
        name: &str,
        prefix: &str,
        channels: Vec<ChannelDescriptor>,
    ) -> Self {
        let num_amplifier_channels = channels
            .iter()
            .filter(|c| c.signal_type == SignalType::Amplifier)
            .count() as u16;

        Self {
            name: name.to_string(),
            prefix: prefix.to_string(),
            enabled: true,
            num_amplifier_channels,
            channels,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aux_in_stream_index() {
        let mut aux = ChannelDescriptor::new("A-AUX2", SignalType::AuxInput, 0, 33);
        assert_eq!(aux.in_stream_index(), 1);

        aux.chip_channel = 2;
        assert_eq!(aux.in_stream_index(), 2);
    }

    #[test]
    fn test_same_identity_ignores_custom_fields() {
        let a = ChannelDescriptor::new("A-000", SignalType::Amplifier, 0, 0);
        let mut b = a.clone();
        b.custom_name = "hippocampus".to_string();
        b.impedance_magnitude = 1.2e6;
        b.voltage_threshold = -70;

        assert!(a.same_identity(&b));

        b.board_stream = 1;
        assert!(!a.same_identity(&b));
    }

    #[test]
    fn test_group_counts_amplifiers() {
        let g = ChannelGroup::new(
            "Port A",
            "A",
            vec![
                ChannelDescriptor::new("A-000", SignalType::Amplifier, 0, 0),
                ChannelDescriptor::new("A-001", SignalType::Amplifier, 0, 1),
                ChannelDescriptor::new("A-AUX1", SignalType::AuxInput, 0, 32),
            ],
        );

        assert_eq!(g.num_amplifier_channels, 2);
    }
}
