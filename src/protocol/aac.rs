use anyhow::Context;

use crate::util::BitReader;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AacProfile {
    Main,
    Lc,
    Ssr,
    Ltp,
    He,
    HeV2,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConfigType {
    Esds,
    AudioSpecific,
}

/// Decoder configuration carried by an AAC sequence header.
#[derive(Debug, Clone, PartialEq)]
pub struct Format {
    pub sample_rate: u32,
    pub samples_per_frame: u32,
    pub profile: AacProfile,
    pub channels: u8,
    pub mpeg_version: u8,
    pub config: Vec<u8>,
    pub config_type: ConfigType,
}

/// Parse an MP4 elementary-stream descriptor down to the
/// AudioSpecificConfig buried in its section 5.
pub fn parse_esds_config(esds: &[u8]) -> anyhow::Result<Format> {
    let mut reader = BitReader::new(esds);

    let section3 = extract_esds_section(&mut reader, 3)?;
    // third byte is the stream priority
    if section3.len() < 3 || section3[2] != 0 {
        anyhow::bail!("invalid esds section 3");
    }

    let section4 = extract_esds_section(&mut reader, 4)?;
    let section6 = extract_esds_section(&mut reader, 6)?;
    if section6.len() != 1 || section6[0] != 0x02 {
        anyhow::bail!("invalid esds section 6");
    }

    if section4.len() < 13 {
        anyhow::bail!("invalid esds section 4 size");
    }
    let mut section_reader = BitReader::new(&section4);
    let object_type_id = section_reader.read_bits(8).context("esds section 4 too short")?;
    let stream_type = section_reader.read_bits(6).context("esds section 4 too short")?;
    let upstream_flag = section_reader.read_bits(1).context("esds section 4 too short")?;
    let reserved_flag = section_reader.read_bits(1).context("esds section 4 too short")?;
    let buffer_size = section_reader.read_bits(24).context("esds section 4 too short")?;

    // mpeg4 audio, stream type audio, no upstream, reserved set, empty buffer
    if object_type_id != 64
        || stream_type != 5
        || upstream_flag != 0
        || reserved_flag != 1
        || buffer_size != 0
    {
        anyhow::bail!("invalid esds section 4");
    }

    // max bitrate and avg bitrate
    if !reader.skip_bits(64) {
        anyhow::bail!("esds payload too short");
    }

    let mut section5_data = vec![0u8; reader.bits_available() / 8];
    if !reader.read_slice(&mut section5_data) {
        anyhow::bail!("invalid esds section 5");
    }

    let mut section_reader = BitReader::new(&section5_data);
    let section5 = extract_esds_section(&mut section_reader, 5)?;

    let mut format = parse_audio_specific_config(&section5)?;
    format.config_type = ConfigType::Esds;
    Ok(format)
}

/// Parse a raw AudioSpecificConfig: object type, sampling-frequency index
/// (with the index-15 custom 24-bit escape), channel configuration and the
/// frame-length flag.
pub fn parse_audio_specific_config(data: &[u8]) -> anyhow::Result<Format> {
    if data.len() < 2 {
        anyhow::bail!("audio specific config is too short");
    }

    let mut reader = BitReader::new(data);
    let profile = reader.read_bits(5).context("config too short")? as u8;
    let frequency_id = reader.read_bits(4).context("config too short")? as u8;

    let sample_rate = if frequency_id == 15 {
        reader.read_bits(24).context("custom frequency too short")? as u32
    } else {
        frequency_from_index(frequency_id)
    };

    let channel_config_id = reader.read_bits(4).context("config too short")? as u8;
    let frame_length_id = reader.read_bits(1).context("config too short")? as u8;

    Ok(Format {
        sample_rate,
        samples_per_frame: samples_per_frame_from_id(frame_length_id),
        profile: profile_from_aot(profile),
        channels: channel_config_id,
        mpeg_version: 4,
        config: data.to_vec(),
        config_type: ConfigType::AudioSpecific,
    })
}

fn frequency_from_index(index: u8) -> u32 {
    match index {
        0 => 96000,
        1 => 88200,
        2 => 64000,
        3 => 48000,
        4 => 44100,
        5 => 32000,
        6 => 24000,
        7 => 22050,
        8 => 16000,
        9 => 12000,
        10 => 11025,
        11 => 8000,
        12 => 7350,
        _ => 0,
    }
}

fn samples_per_frame_from_id(frame_length_id: u8) -> u32 {
    match frame_length_id {
        0 => 1024,
        1 => 960,
        _ => 0,
    }
}

fn profile_from_aot(aot: u8) -> AacProfile {
    match aot {
        1 => AacProfile::Main,
        2 => AacProfile::Lc,
        3 => AacProfile::Ssr,
        4 => AacProfile::Ltp,
        5 => AacProfile::He,
        29 => AacProfile::HeV2,
        _ => AacProfile::Unknown,
    }
}

fn extract_esds_section(reader: &mut BitReader, section: u8) -> anyhow::Result<Vec<u8>> {
    if reader.bits_available() < 5 * 8 {
        anyhow::bail!("esds payload too short");
    }

    let number = reader.read_bits(8).context("esds payload too short")? as u8;
    if number != section {
        anyhow::bail!("invalid esds section number");
    }

    let mut tag = [0u8; 3];
    if !reader.read_slice(&mut tag) || tag != [0x80, 0x80, 0x80] {
        anyhow::bail!("invalid esds type tag");
    }

    let len = reader.read_bits(8).context("esds payload too short")? as usize;
    if reader.bits_available() < 8 * len {
        anyhow::bail!("esds section too short");
    }

    let mut payload = vec![0u8; len];
    if !reader.read_slice(&mut payload) {
        anyhow::bail!("invalid esds section payload");
    }
    Ok(payload)
}
