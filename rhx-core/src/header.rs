//! Разбор версионированного заголовка RHD/RHS.
//!
//! Все многобайтовые числа хранятся в порядке little-endian, строки в формате
//! QString (длина в байтах + UTF-16LE). Набор полей зависит от семейства
//! (RHD/RHS) и версии файла:
//!
//! ```text
//! magic u32 | major i16 | minor i16 | sample_rate f32 | dsp_enabled i16
//! actual  cutoff, lower, [RHS lower_settle], upper   f32
//! desired cutoff, lower, [RHS lower_settle], upper   f32
//! notch i16 | impedance freq desired f32, actual f32
//! [RHS] amp_settle i16, charge_recovery i16, step f32, limit f32, target f32
//! note1..3 | [RHS] dc_saved i16 | [RHD>=1.1] temp sensors i16
//! [RHS | RHD>=1.3] board_mode i16 | [RHS | RHD>=2.0] reference channel
//! num_groups i16, группы, каналы
//! ```

use std::{
    fs::File,
    io::{BufReader, Cursor, Read, Seek, SeekFrom},
    path::Path,
};

use byteorder::{LittleEndian, ReadBytesExt};
use rhx_types::{
    AcquisitionDescriptor, Bandwidth, ChannelDescriptor, ChannelGroup, CodecError, CodecResult,
    ControllerType, FileVersion, FormatError, FormatResult, HeaderFamily, NotchFilter, SignalType,
    StimParameters, BOARD_MODE_RECORD_USB3, MAX_CHANNEL_GROUPS,
};

use crate::binary::{FieldReader, FieldWriter};

/// Максимум каналов в одной группе
pub const MAX_CHANNELS_PER_GROUP: i16 = 2048;

/// Разбирает заголовок из буфера в памяти.
///
/// Если за заголовком следуют блоки данных (traditional-формат), из них
/// читаются первая и последняя метки времени.
pub fn parse_header(bytes: &[u8]) -> FormatResult<AcquisitionDescriptor> {
    parse_header_from(Cursor::new(bytes)).map_err(|e| match e {
        CodecError::Format(f) => f,
        other => FormatError::truncated(other.to_string()),
    })
}

/// Открывает файл заголовка и разбирает его. Дескриптор файла не удерживается.
pub fn read_header_file<P: AsRef<Path>>(path: P) -> CodecResult<AcquisitionDescriptor> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => CodecError::MissingFile(path.to_path_buf()),
        _ => CodecError::Io(e),
    })?;

    parse_header_from(BufReader::new(file))
}

/// Разбирает заголовок из произвольного потока с произвольным доступом.
pub fn parse_header_from<R: Read + Seek>(mut reader: R) -> CodecResult<AcquisitionDescriptor> {
    let mut desc = {
        let mut fr = FieldReader::new(&mut reader);
        let mut desc = read_fields(&mut fr)?;
        desc.header_size = fr.consumed();
        desc
    };

    let total_len = reader.seek(SeekFrom::End(0))?;
    desc.data_size = total_len.saturating_sub(desc.header_size);

    correct_dc_amplifier_flag(&mut reader, &mut desc)?;

    let bpb = desc.bytes_per_data_block() as u64;
    desc.num_data_blocks = desc.data_size / bpb;

    if desc.num_data_blocks > 0 {
        let (first, last) = read_timestamp_range(&mut reader, &desc)?;
        desc.first_timestamp = first;
        desc.last_timestamp = last;
    }

    Ok(desc)
}

/// Читает метки времени первой выборки и последней выборки последнего полного
/// блока traditional-файла.
pub fn read_timestamp_range<R: Read + Seek>(
    reader: &mut R,
    desc: &AcquisitionDescriptor,
) -> CodecResult<(i64, i64)> {
    if desc.num_data_blocks == 0 {
        return Ok((0, 0));
    }

    let bpb = desc.bytes_per_data_block() as u64;
    let s = desc.samples_per_block as u64;

    reader.seek(SeekFrom::Start(desc.header_size))?;
    let first = reader.read_i32::<LittleEndian>()? as i64;

    let last_block = desc.header_size + (desc.num_data_blocks - 1) * bpb;
    reader.seek(SeekFrom::Start(last_block + 4 * (s - 1)))?;
    let last = reader.read_i32::<LittleEndian>()? as i64;

    Ok((first, last))
}

/// Определяет поколение контроллера по цепочке признаков.
///
/// RHS → StimRecord; RHD v2 и v1 → USB2; иначе по режиму платы.
pub fn resolve_controller(
    family: HeaderFamily,
    version: FileVersion,
    board_mode: Option<i16>,
) -> FormatResult<ControllerType> {
    if family == HeaderFamily::Rhs {
        return Ok(ControllerType::StimRecord);
    }

    if version.major == 2 || version.major == 1 {
        return Ok(ControllerType::RecordUsb2);
    }

    match board_mode {
        Some(BOARD_MODE_RECORD_USB3) => Ok(ControllerType::RecordUsb3),
        Some(0..=2) => Ok(ControllerType::RecordUsb2),
        Some(m) => Err(FormatError::UnknownBoardMode(m)),
        None => Err(FormatError::UnknownBoardMode(-1)),
    }
}

/// Проверяет шаг блока по данным: метка времени в начале второго блока
/// должна быть на `samples_per_block` больше первой. `None`, если до второго
/// блока данных нет.
fn stride_is_consistent<R: Read + Seek>(
    reader: &mut R,
    desc: &AcquisitionDescriptor,
    stride: u64,
) -> CodecResult<Option<bool>> {
    if desc.data_size < stride + 4 {
        return Ok(None);
    }

    reader.seek(SeekFrom::Start(desc.header_size))?;
    let first = reader.read_i32::<LittleEndian>()? as i64;

    reader.seek(SeekFrom::Start(desc.header_size + stride))?;
    let second = reader.read_i32::<LittleEndian>()? as i64;

    Ok(Some(second == first + desc.samples_per_block as i64))
}

/// Исправляет флаг DC-усилителя по содержимому данных.
///
/// Старые RHS-записи выставляли флаг ненадёжно. Флаг инвертируется, только
/// если шаг с инвертированным флагом согласуется с метками времени, а
/// заявленный нет. Недописанный последний блок на решение не влияет.
fn correct_dc_amplifier_flag<R: Read + Seek>(
    reader: &mut R,
    desc: &mut AcquisitionDescriptor,
) -> CodecResult<()> {
    if desc.family != HeaderFamily::Rhs || desc.data_size == 0 {
        return Ok(());
    }

    let stated_stride = desc.bytes_per_data_block() as u64;
    let stated = stride_is_consistent(reader, desc, stated_stride)?;

    if stated == Some(true) {
        return Ok(());
    }

    desc.dc_amplifier_saved = !desc.dc_amplifier_saved;
    let toggled_stride = desc.bytes_per_data_block() as u64;
    let toggled = stride_is_consistent(reader, desc, toggled_stride)?;

    // Ровно один блок: второй метки нет, остаётся только размер.
    let only_block = toggled.is_none() && desc.data_size % toggled_stride == 0;

    if toggled == Some(true) || (stated == Some(false) && only_block) {
        desc.dc_amplifier_flag_corrected = true;
    } else {
        desc.dc_amplifier_saved = !desc.dc_amplifier_saved;
    }

    Ok(())
}

fn read_fields<R: Read>(fr: &mut FieldReader<R>) -> CodecResult<AcquisitionDescriptor> {
    let magic = fr.u32("magic number")?;
    let family = HeaderFamily::from_magic(magic).ok_or(FormatError::BadMagic(magic))?;
    let is_rhs = family == HeaderFamily::Rhs;

    let major = fr.i16("main version")?;
    let minor = fr.i16("secondary version")?;

    if !(1..=3).contains(&major) {
        return Err(FormatError::UnsupportedVersion { major, minor }.into());
    }

    let version = FileVersion::new(major, minor);

    let sample_rate = fr.f32("sample rate")?;

    if !sample_rate.is_finite() || sample_rate <= 0.0 {
        return Err(
            FormatError::invalid_field("sample rate", format!("{sample_rate} Hz")).into(),
        );
    }

    let dsp_enabled = fr.flag("dsp enabled")?;

    let mut bw = Bandwidth {
        actual_dsp_cutoff: fr.f32("actual dsp cutoff")?,
        actual_lower: fr.f32("actual lower bandwidth")?,
        ..Default::default()
    };
    if is_rhs {
        bw.actual_lower_settle = fr.f32("actual lower settle bandwidth")?;
    }
    bw.actual_upper = fr.f32("actual upper bandwidth")?;
    bw.desired_dsp_cutoff = fr.f32("desired dsp cutoff")?;
    bw.desired_lower = fr.f32("desired lower bandwidth")?;
    if is_rhs {
        bw.desired_lower_settle = fr.f32("desired lower settle bandwidth")?;
    }
    bw.desired_upper = fr.f32("desired upper bandwidth")?;

    let notch = NotchFilter::from_code(fr.i16("notch filter mode")?)?;

    let desired_impedance_test_frequency = fr.f32("desired impedance test frequency")?;
    let actual_impedance_test_frequency = fr.f32("actual impedance test frequency")?;

    let mut stim = StimParameters::default();
    if is_rhs {
        stim.amp_settle_mode = fr.i16("amp settle mode")?;
        stim.charge_recovery_mode = fr.i16("charge recovery mode")?;
        stim.step_size = fr.f32("stim step size")?;
        stim.charge_recovery_current_limit = fr.f32("charge recovery current limit")?;
        stim.charge_recovery_target_voltage = fr.f32("charge recovery target voltage")?;
    }

    let notes = [fr.qstring("note 1")?, fr.qstring("note 2")?, fr.qstring("note 3")?];

    let dc_amplifier_saved = if is_rhs {
        fr.flag("dc amplifier data saved")?
    } else {
        false
    };

    let num_temp_sensors = if !is_rhs && version.at_least(1, 1) {
        fr.bounded_i16("temperature sensors", 0, 16)? as u16
    } else {
        0
    };

    let board_mode = if is_rhs || version.at_least(1, 3) {
        Some(fr.i16("board mode")?)
    } else {
        None
    };

    let reference_channel = if is_rhs || version.at_least(2, 0) {
        Some(fr.qstring("reference channel")?)
    } else {
        None
    };

    let controller = resolve_controller(family, version, board_mode)?;

    let mut desc = AcquisitionDescriptor::new(family, controller, version, sample_rate);
    desc.dsp_enabled = dsp_enabled;
    desc.bandwidth = bw;
    desc.notch = notch;
    desc.desired_impedance_test_frequency = desired_impedance_test_frequency;
    desc.actual_impedance_test_frequency = actual_impedance_test_frequency;
    desc.stim = stim;
    desc.notes = notes;
    desc.dc_amplifier_saved = dc_amplifier_saved;
    desc.num_temp_sensors = num_temp_sensors;
    desc.board_mode = board_mode;
    desc.reference_channel = reference_channel;

    let num_groups = fr.bounded_i16("number of signal groups", 0, MAX_CHANNEL_GROUPS as i16)?;

    for g in 0..num_groups {
        fr.set_location(format!("group {g}"));
        desc.groups.push(read_group(fr, family, g)?);
    }

    desc.refresh_data_streams();

    Ok(desc)
}

fn read_group<R: Read>(
    fr: &mut FieldReader<R>,
    family: HeaderFamily,
    g: i16,
) -> CodecResult<ChannelGroup> {
    let name = fr.qstring("name")?;
    let prefix = fr.qstring("prefix")?;
    let enabled = fr.flag("enabled")?;
    let num_channels = fr.bounded_i16("number of channels", 0, MAX_CHANNELS_PER_GROUP)?;
    let num_amplifier_channels = fr.bounded_i16("number of amplifier channels", 0, num_channels)?;

    let mut channels = Vec::new();

    if enabled && num_channels > 0 {
        channels.reserve(num_channels as usize);

        for c in 0..num_channels {
            fr.set_location(format!("group {g}, channel {c}"));
            channels.push(read_channel(fr, family)?);
        }
    }

    Ok(ChannelGroup {
        name,
        prefix,
        enabled,
        num_amplifier_channels: num_amplifier_channels as u16,
        channels,
    })
}

fn read_channel<R: Read>(
    fr: &mut FieldReader<R>,
    family: HeaderFamily,
) -> CodecResult<ChannelDescriptor> {
    let native_name = fr.qstring("native name")?;
    let custom_name = fr.qstring("custom name")?;
    let native_order = fr.i16("native order")?;
    let custom_order = fr.i16("custom order")?;

    let code = fr.i16("signal type")?;
    let signal_type = SignalType::from_header_code(family, code).ok_or_else(|| {
        FormatError::invalid_field(
            format!("{}: signal type", fr.location()),
            format!("code {code} is not valid for {family:?}"),
        )
    })?;

    let enabled = fr.flag("channel enabled")?;
    let chip_channel = fr.bounded_i16("chip channel", 0, i16::MAX)?;
    let command_stream = if family == HeaderFamily::Rhs {
        fr.bounded_i16("command stream", 0, i16::MAX)?
    } else {
        0
    };
    let board_stream = fr.bounded_i16("board stream", 0, i16::MAX)?;

    Ok(ChannelDescriptor {
        native_name,
        custom_name,
        native_order,
        custom_order,
        signal_type,
        enabled,
        chip_channel,
        command_stream,
        board_stream,
        voltage_trigger_mode: fr.i16("voltage trigger mode")?,
        voltage_threshold: fr.i16("voltage threshold")?,
        digital_trigger_channel: fr.i16("digital trigger channel")?,
        digital_edge_polarity: fr.i16("digital edge polarity")?,
        impedance_magnitude: fr.f32("impedance magnitude")?,
        impedance_phase: fr.f32("impedance phase")?,
        saved: true,
    })
}

/// Сериализует заголовок в байты (зеркально [`parse_header`]).
///
/// Каналы с типом, которого нет в семействе (DC, стимуляция), записываются
/// как каналы усилителя.
pub fn serialize_header(desc: &AcquisitionDescriptor) -> Vec<u8> {
    let is_rhs = desc.family == HeaderFamily::Rhs;
    let v = desc.version;
    let bw = &desc.bandwidth;
    let mut w = FieldWriter::new();

    w.u32(desc.family.magic())
        .i16(v.major)
        .i16(v.minor)
        .f32(desc.sample_rate)
        .flag(desc.dsp_enabled)
        .f32(bw.actual_dsp_cutoff)
        .f32(bw.actual_lower);
    if is_rhs {
        w.f32(bw.actual_lower_settle);
    }
    w.f32(bw.actual_upper)
        .f32(bw.desired_dsp_cutoff)
        .f32(bw.desired_lower);
    if is_rhs {
        w.f32(bw.desired_lower_settle);
    }
    w.f32(bw.desired_upper)
        .i16(desc.notch.as_code())
        .f32(desc.desired_impedance_test_frequency)
        .f32(desc.actual_impedance_test_frequency);

    if is_rhs {
        let s = &desc.stim;
        w.i16(s.amp_settle_mode)
            .i16(s.charge_recovery_mode)
            .f32(s.step_size)
            .f32(s.charge_recovery_current_limit)
            .f32(s.charge_recovery_target_voltage);
    }

    for note in &desc.notes {
        w.qstring(note);
    }

    if is_rhs {
        w.flag(desc.dc_amplifier_saved);
    }
    if !is_rhs && v.at_least(1, 1) {
        w.i16(desc.num_temp_sensors as i16);
    }
    if is_rhs || v.at_least(1, 3) {
        w.i16(desc.board_mode.unwrap_or(match desc.controller {
            ControllerType::RecordUsb3 => BOARD_MODE_RECORD_USB3,
            _ => 0,
        }));
    }
    if is_rhs || v.at_least(2, 0) {
        w.qstring(desc.reference_channel.as_deref().unwrap_or(""));
    }

    w.i16(desc.groups.len() as i16);

    for g in &desc.groups {
        w.qstring(&g.name)
            .qstring(&g.prefix)
            .flag(g.enabled)
            .i16(g.channels.len() as i16)
            .i16(g.num_amplifier_channels as i16);

        if !g.enabled {
            continue;
        }

        for c in &g.channels {
            let code = c.signal_type.header_code(desc.family).unwrap_or(0);

            w.qstring(&c.native_name)
                .qstring(&c.custom_name)
                .i16(c.native_order)
                .i16(c.custom_order)
                .i16(code)
                .flag(c.enabled)
                .i16(c.chip_channel);
            if is_rhs {
                w.i16(c.command_stream);
            }
            w.i16(c.board_stream)
                .i16(c.voltage_trigger_mode)
                .i16(c.voltage_threshold)
                .i16(c.digital_trigger_channel)
                .i16(c.digital_edge_polarity)
                .f32(c.impedance_magnitude)
                .f32(c.impedance_phase);
        }
    }

    w.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rhd(
        major: i16,
        minor: i16,
    ) -> AcquisitionDescriptor {
        let mut d = AcquisitionDescriptor::new(
            HeaderFamily::Rhd,
            ControllerType::RecordUsb2,
            FileVersion::new(major, minor),
            20_000.0,
        );
        d.notch = NotchFilter::Hz60;
        d.notes[0] = "bench test".to_string();
        d.groups.push(ChannelGroup::new(
            "Port A",
            "A",
            vec![
                ChannelDescriptor::new("A-000", SignalType::Amplifier, 0, 0),
                ChannelDescriptor::new("A-001", SignalType::Amplifier, 0, 1),
            ],
        ));
        d.refresh_data_streams();
        d
    }

    fn with_blocks(
        header: Vec<u8>,
        bpb: usize,
        s: usize,
        blocks: usize,
    ) -> Vec<u8> {
        let mut raw = header;
        for b in 0..blocks {
            let mut block = vec![0u8; bpb];
            for i in 0..s {
                let ts = (1_000 + b * s + i) as i32;
                block[4 * i..4 * i + 4].copy_from_slice(&ts.to_le_bytes());
            }
            raw.extend_from_slice(&block);
        }
        raw
    }

    #[test]
    fn test_rhd_v1_two_blocks() {
        let d = rhd(1, 0);
        let raw = with_blocks(serialize_header(&d), 480, 60, 2);

        let parsed = parse_header(&raw).unwrap();

        assert_eq!(parsed.controller, ControllerType::RecordUsb2);
        assert_eq!(parsed.samples_per_block, 60);
        assert_eq!(parsed.bytes_per_data_block(), 480);
        assert_eq!(parsed.num_data_blocks, 2);
        assert_eq!(parsed.first_timestamp, 1_000);
        assert_eq!(parsed.last_timestamp, 1_119);
        assert_eq!(parsed.notch, NotchFilter::Hz60);
        assert_eq!(parsed.notes[0], "bench test");
        assert_eq!(parsed.board_mode, None);
    }

    #[test]
    fn test_partial_trailing_block_ignored() {
        let d = rhd(1, 0);
        let mut raw = with_blocks(serialize_header(&d), 480, 60, 3);
        raw.truncate(raw.len() - 10);

        let parsed = parse_header(&raw).unwrap();

        assert_eq!(parsed.num_data_blocks, 2);
        assert_eq!(parsed.last_timestamp, 1_119);
    }

    #[test]
    fn test_header_only_has_no_timestamps() {
        let d = rhd(3, 0);
        let parsed = parse_header(&serialize_header(&d)).unwrap();

        assert_eq!(parsed.num_data_blocks, 0);
        assert_eq!(parsed.data_size, 0);
        assert_eq!(parsed.samples_per_block, 128);
        assert_eq!(parsed.board_mode, Some(0));
        assert_eq!(parsed.reference_channel.as_deref(), Some(""));
    }

    #[test]
    fn test_bad_magic() {
        let mut raw = serialize_header(&rhd(1, 0));
        raw[0] = 0x00;

        assert!(matches!(parse_header(&raw), Err(FormatError::BadMagic(_))));
    }

    #[test]
    fn test_unsupported_version() {
        let mut raw = serialize_header(&rhd(1, 0));
        raw[4..6].copy_from_slice(&9i16.to_le_bytes());

        assert!(matches!(
            parse_header(&raw),
            Err(FormatError::UnsupportedVersion { major: 9, .. })
        ));
    }

    #[test]
    fn test_bad_notch_code() {
        let d = rhd(1, 0);
        let mut raw = serialize_header(&d);
        // magic, версия, частота, dsp, 6 полос
        let notch_off = 4 + 2 + 2 + 4 + 2 + 6 * 4;
        raw[notch_off..notch_off + 2].copy_from_slice(&5i16.to_le_bytes());

        match parse_header(&raw) {
            Err(FormatError::InvalidField { location, .. }) => {
                assert!(location.contains("notch"))
            }
            other => panic!("expected InvalidField, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_signal_type_has_location() {
        let mut d = rhd(1, 0);
        d.groups[0].channels[1].signal_type = SignalType::AnalogOut; // нет в RHD → код 0
        let mut raw = serialize_header(&d);

        // Портим код типа второго канала: ищем с конца.
        // Хвост канала: type, enabled, chip, stream, 4×trigger, 2×f32
        let tail = 2 + 2 + 2 + 2 + 4 * 2 + 2 * 4;
        let pos = raw.len() - tail;
        raw[pos..pos + 2].copy_from_slice(&9i16.to_le_bytes());

        match parse_header(&raw) {
            Err(FormatError::InvalidField { location, .. }) => {
                assert_eq!(location, "group 0, channel 1: signal type")
            }
            other => panic!("expected InvalidField, got {other:?}"),
        }
    }

    #[test]
    fn test_too_many_groups() {
        let d = rhd(1, 0);
        let mut raw = serialize_header(&d);

        let mut d2 = d.clone();
        d2.groups.clear();
        let groups_off = serialize_header(&d2).len() - 2;
        raw[groups_off..groups_off + 2].copy_from_slice(&13i16.to_le_bytes());

        assert!(matches!(
            parse_header(&raw),
            Err(FormatError::InvalidField { .. })
        ));
    }

    #[test]
    fn test_truncated_header() {
        let raw = serialize_header(&rhd(3, 0));

        assert!(matches!(
            parse_header(&raw[..raw.len() - 3]),
            Err(FormatError::Truncated { .. })
        ));
    }

    #[test]
    fn test_controller_resolution_order() {
        let v = |m| FileVersion::new(m, 0);

        assert_eq!(
            resolve_controller(HeaderFamily::Rhs, v(3), Some(99)).unwrap(),
            ControllerType::StimRecord
        );
        assert_eq!(
            resolve_controller(HeaderFamily::Rhd, v(2), Some(13)).unwrap(),
            ControllerType::RecordUsb2
        );
        assert_eq!(
            resolve_controller(HeaderFamily::Rhd, v(1), None).unwrap(),
            ControllerType::RecordUsb2
        );
        assert_eq!(
            resolve_controller(HeaderFamily::Rhd, v(3), Some(13)).unwrap(),
            ControllerType::RecordUsb3
        );
        assert!(matches!(
            resolve_controller(HeaderFamily::Rhd, v(3), Some(7)),
            Err(FormatError::UnknownBoardMode(7))
        ));
    }

    #[test]
    fn test_rhs_fields_round_trip() {
        let mut d = AcquisitionDescriptor::new(
            HeaderFamily::Rhs,
            ControllerType::StimRecord,
            FileVersion::new(3, 0),
            30_000.0,
        );
        d.stim.step_size = 1e-6;
        d.stim.charge_recovery_mode = 1;
        d.bandwidth.desired_lower_settle = 1000.0;
        d.dc_amplifier_saved = true;
        d.board_mode = Some(0);
        d.groups.push(ChannelGroup::new(
            "Port B",
            "B",
            vec![ChannelDescriptor::new("B-003", SignalType::Amplifier, 1, 3)],
        ));
        d.groups.push(ChannelGroup::new(
            "Analog Outputs",
            "ANALOG-OUT",
            vec![ChannelDescriptor::new("ANALOG-OUT-1", SignalType::AnalogOut, 0, 0)],
        ));
        d.refresh_data_streams();

        let parsed = parse_header(&serialize_header(&d)).unwrap();

        assert_eq!(parsed.controller, ControllerType::StimRecord);
        assert_eq!(parsed.stim.step_size, 1e-6);
        assert_eq!(parsed.bandwidth.desired_lower_settle, 1000.0);
        assert!(parsed.dc_amplifier_saved);
        assert_eq!(parsed.num_data_streams, 2);
        assert_eq!(parsed.groups[1].channels[0].signal_type, SignalType::AnalogOut);
        assert!(parsed.same_acquisition(&d));
    }

    #[test]
    fn test_rhd_defaults_neutral_stim_fields() {
        let parsed = parse_header(&serialize_header(&rhd(2, 0))).unwrap();

        assert_eq!(parsed.stim, StimParameters::default());
        assert!(!parsed.dc_amplifier_saved);
    }

    #[test]
    fn test_dc_flag_self_correction() {
        let mut d = AcquisitionDescriptor::new(
            HeaderFamily::Rhs,
            ControllerType::StimRecord,
            FileVersion::new(1, 0),
            30_000.0,
        );
        d.groups.push(ChannelGroup::new(
            "Port A",
            "A",
            vec![ChannelDescriptor::new("A-000", SignalType::Amplifier, 0, 0)],
        ));

        // Данные записаны с DC, а флаг в заголовке сброшен.
        let mut with_dc = d.clone();
        with_dc.dc_amplifier_saved = true;
        let bpb = with_dc.bytes_per_data_block();
        assert_eq!(bpb, 4 * 128 + 128 * 6);

        for blocks in [1, 2] {
            let raw = with_blocks(serialize_header(&d), bpb, 128, blocks);
            let parsed = parse_header(&raw).unwrap();

            assert!(parsed.dc_amplifier_saved, "{blocks} block(s)");
            assert!(parsed.dc_amplifier_flag_corrected);
            assert_eq!(parsed.num_data_blocks, blocks as u64);
        }
    }

    #[test]
    fn test_dc_flag_kept_with_partial_trailing_block() {
        let mut d = AcquisitionDescriptor::new(
            HeaderFamily::Rhs,
            ControllerType::StimRecord,
            FileVersion::new(1, 0),
            30_000.0,
        );
        d.groups.push(ChannelGroup::new(
            "Port A",
            "A",
            vec![ChannelDescriptor::new("A-000", SignalType::Amplifier, 0, 0)],
        ));
        let bpb = d.bytes_per_data_block();
        assert_eq!(bpb, 1_024);

        // Запись ещё идёт: полный блок и начало следующего.
        let header = serialize_header(&d);
        let header_len = header.len();
        let mut raw = with_blocks(header, bpb, 128, 2);
        raw.truncate(header_len + bpb + 256);

        let parsed = parse_header(&raw).unwrap();

        assert!(!parsed.dc_amplifier_saved);
        assert!(!parsed.dc_amplifier_flag_corrected);
        assert_eq!(parsed.bytes_per_data_block(), 1_024);
        assert_eq!(parsed.num_data_blocks, 1);
        assert_eq!(parsed.last_timestamp, 1_127);
    }
}
