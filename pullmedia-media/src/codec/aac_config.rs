//! AAC configuration and framing
//!
//! AAC reaches the decoder in one of three framings: ADTS frames, LOAS/LATM
//! multiplexed frames, or raw access units with an out-of-band
//! AudioSpecificConfig. [`AacUnpacker`] detects which one on the first
//! access unit and turns each input into a raw access unit plus the config
//! in force for it.

use crate::extractor::aac::{aac_parse_header, sample_rate_index, SAMPLE_RATES};
use pullmedia_core::{MediaError, MediaResult};

/// MSB-first bit reader over a byte slice
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> BitReader<'a> {
    /// Reader positioned at the first bit of `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Bits consumed so far
    pub fn position(&self) -> usize {
        self.position
    }

    /// Bits left
    pub fn remaining(&self) -> usize {
        self.data.len() * 8 - self.position
    }

    /// Read up to 32 bits
    pub fn read(&mut self, bits: usize) -> MediaResult<u32> {
        if bits > 32 || bits > self.remaining() {
            return Err(MediaError::malformed(format!(
                "bitstream exhausted reading {bits} bits"
            )));
        }
        let mut value = 0u32;
        for _ in 0..bits {
            let byte = self.data[self.position / 8];
            let bit = (byte >> (7 - self.position % 8)) & 1;
            value = (value << 1) | u32::from(bit);
            self.position += 1;
        }
        Ok(value)
    }

    /// Read one bit as a flag
    pub fn read_flag(&mut self) -> MediaResult<bool> {
        Ok(self.read(1)? == 1)
    }

    /// Skip `bits` bits
    pub fn skip(&mut self, bits: usize) -> MediaResult<()> {
        if bits > self.remaining() {
            return Err(MediaError::malformed("bitstream exhausted while skipping"));
        }
        self.position += bits;
        Ok(())
    }

    /// Copy `len` bytes starting at the current (possibly unaligned) bit
    pub fn read_bytes(&mut self, len: usize) -> MediaResult<Vec<u8>> {
        if self.position % 8 == 0 {
            let start = self.position / 8;
            let bytes = self
                .data
                .get(start..start + len)
                .ok_or_else(|| MediaError::malformed("payload extends past frame"))?;
            self.position += len * 8;
            return Ok(bytes.to_vec());
        }
        (0..len).map(|_| self.read(8).map(|b| b as u8)).collect()
    }
}

/// Decoded AudioSpecificConfig fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpecificConfig {
    /// Audio object type (2 = AAC LC, 5 = SBR, 29 = PS)
    pub object_type: u8,
    /// Core sample rate in Hz
    pub sample_rate: u32,
    /// Channel configuration
    pub channel_config: u8,
    /// Output sample rate when SBR is signalled explicitly
    pub extension_sample_rate: Option<u32>,
    /// 960 rather than 1024 samples per frame
    pub short_frame: bool,
}

impl AudioSpecificConfig {
    /// Parse from the bit reader's current position
    pub fn parse_from(reader: &mut BitReader<'_>) -> MediaResult<Self> {
        let mut object_type = read_object_type(reader)?;
        let sample_rate = read_sample_rate(reader)?;
        let channel_config = reader.read(4)? as u8;
        let mut extension_sample_rate = None;
        if object_type == 5 || object_type == 29 {
            extension_sample_rate = Some(read_sample_rate(reader)?);
            object_type = read_object_type(reader)?;
        }

        let mut short_frame = false;
        if matches!(object_type, 1..=4 | 6 | 7 | 17 | 19..=23) {
            short_frame = reader.read_flag()?;
            if reader.read_flag()? {
                // coreCoderDelay
                reader.skip(14)?;
            }
            let extension_flag = reader.read_flag()?;
            if channel_config == 0 {
                return Err(MediaError::unsupported(
                    "AudioSpecificConfig with a program config element",
                ));
            }
            if object_type == 6 || object_type == 20 {
                reader.skip(3)?;
            }
            if extension_flag {
                if object_type == 22 {
                    reader.skip(16)?;
                }
                if matches!(object_type, 17 | 19 | 20 | 23) {
                    reader.skip(3)?;
                }
                reader.skip(1)?;
            }
        } else {
            return Err(MediaError::unsupported(format!(
                "AAC audio object type {object_type}"
            )));
        }

        Ok(Self {
            object_type,
            sample_rate,
            channel_config,
            extension_sample_rate,
            short_frame,
        })
    }

    /// Parse a standalone config blob
    pub fn parse(data: &[u8]) -> MediaResult<Self> {
        Self::parse_from(&mut BitReader::new(data))
    }

    /// Channel count implied by the channel configuration
    pub fn channels(&self) -> u32 {
        match self.channel_config {
            7 => 8,
            n => u32::from(n),
        }
    }

    /// Rate of decoded output
    pub fn output_sample_rate(&self) -> u32 {
        self.extension_sample_rate.unwrap_or(self.sample_rate)
    }

    /// Canonical encoding, escaping non-table sample rates
    pub fn to_bytes(&self) -> Vec<u8> {
        build_audio_specific_config(self.object_type, self.sample_rate, self.channel_config)
    }
}

fn read_object_type(reader: &mut BitReader<'_>) -> MediaResult<u8> {
    let object_type = reader.read(5)?;
    if object_type == 31 {
        return Ok((32 + reader.read(6)?) as u8);
    }
    Ok(object_type as u8)
}

fn read_sample_rate(reader: &mut BitReader<'_>) -> MediaResult<u32> {
    let index = reader.read(4)? as usize;
    if index == 0x0F {
        return reader.read(24);
    }
    SAMPLE_RATES
        .get(index)
        .copied()
        .ok_or_else(|| MediaError::malformed(format!("reserved sampling index {index}")))
}

/// Encode an AudioSpecificConfig for a GA object type
pub fn build_audio_specific_config(
    object_type: u8,
    sample_rate: u32,
    channel_config: u8,
) -> Vec<u8> {
    match sample_rate_index(sample_rate) {
        Some(index) => {
            let value = (u16::from(object_type) << 11)
                | (u16::from(index) << 7)
                | (u16::from(channel_config) << 3);
            value.to_be_bytes().to_vec()
        }
        None => {
            // 5 + 4 + 24 + 4 bits, padded to 40
            let value: u64 = (u64::from(object_type) << 35)
                | (0x0F << 31)
                | (u64::from(sample_rate & 0x00FF_FFFF) << 7)
                | (u64::from(channel_config) << 3);
            value.to_be_bytes()[3..].to_vec()
        }
    }
}

/// Framing of AAC input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AacFraming {
    /// ADTS header on every frame
    Adts,
    /// LOAS AudioSyncStream carrying LATM
    Loas,
    /// Raw access units with out-of-band config
    Raw,
}

impl AacFraming {
    /// Classify one complete access unit by its sync word and declared length
    pub fn detect(access_unit: &[u8]) -> Self {
        if let Ok(header) = aac_parse_header(access_unit) {
            if header.frame_length == access_unit.len() {
                return AacFraming::Adts;
            }
        }
        if access_unit.len() >= 3 && access_unit[0] == 0x56 && access_unit[1] & 0xE0 == 0xE0 {
            let length = (usize::from(access_unit[1] & 0x1F) << 8) | usize::from(access_unit[2]);
            if length + 3 == access_unit.len() {
                return AacFraming::Loas;
            }
        }
        AacFraming::Raw
    }
}

/// One LATM frame split into its parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatmFrame {
    /// Config carried in this frame, if the mux config was not reused
    pub config: Option<AudioSpecificConfig>,
    /// Raw access unit
    pub payload: Vec<u8>,
}

/// Parse one LOAS AudioSyncStream frame (audioMuxVersion 0, one program and layer)
pub fn parse_loas(frame: &[u8]) -> MediaResult<LatmFrame> {
    let mut reader = BitReader::new(frame);
    if reader.read(11)? != 0x2B7 {
        return Err(MediaError::malformed("bad LOAS sync word"));
    }
    let length = reader.read(13)? as usize;
    if length + 3 > frame.len() {
        return Err(MediaError::malformed(format!(
            "LOAS frame declares {length} bytes but {} remain",
            frame.len() - 3
        )));
    }
    let mut reader = BitReader::new(&frame[3..3 + length]);

    let use_same_stream_mux = reader.read_flag()?;
    let mut config = None;
    if !use_same_stream_mux {
        if reader.read_flag()? {
            return Err(MediaError::unsupported("LATM audioMuxVersion 1"));
        }
        let _all_same_time_framing = reader.read_flag()?;
        let sub_frames = reader.read(6)?;
        let programs = reader.read(4)?;
        let layers = reader.read(3)?;
        if sub_frames != 0 || programs != 0 || layers != 0 {
            return Err(MediaError::unsupported(
                "LATM with several sub-frames, programs or layers",
            ));
        }
        config = Some(AudioSpecificConfig::parse_from(&mut reader)?);
        let frame_length_type = reader.read(3)?;
        match frame_length_type {
            0 => reader.skip(8)?, // latmBufferFullness
            _ => {
                return Err(MediaError::unsupported(format!(
                    "LATM frameLengthType {frame_length_type}"
                )))
            }
        }
        if reader.read_flag()? {
            // otherDataLenBits, version 0 form
            reader.skip(8)?;
        }
        if reader.read_flag()? {
            reader.skip(8)?; // crcCheckSum
        }
    }

    let mut payload_length = 0usize;
    loop {
        let byte = reader.read(8)? as usize;
        payload_length += byte;
        if byte != 255 {
            break;
        }
    }
    let payload = reader.read_bytes(payload_length)?;
    Ok(LatmFrame { config, payload })
}

/// Stateful AAC input normalizer
#[derive(Debug, Clone)]
pub struct AacUnpacker {
    framing: Option<AacFraming>,
    config: Option<AudioSpecificConfig>,
}

impl AacUnpacker {
    /// Unpacker with an optional out-of-band config
    pub fn new(codec_specific_data: Option<&[u8]>) -> MediaResult<Self> {
        let config = codec_specific_data
            .map(AudioSpecificConfig::parse)
            .transpose()?;
        Ok(Self {
            framing: None,
            config,
        })
    }

    /// Detected framing, once the first access unit has been seen
    pub fn framing(&self) -> Option<AacFraming> {
        self.framing
    }

    /// Config currently in force
    pub fn config(&self) -> Option<&AudioSpecificConfig> {
        self.config.as_ref()
    }

    /// Raw access unit for `input`, plus whether the config changed
    pub fn unpack(&mut self, input: &[u8]) -> MediaResult<(Vec<u8>, bool)> {
        let framing = *self.framing.get_or_insert_with(|| AacFraming::detect(input));
        let (payload, config) = match framing {
            AacFraming::Adts => {
                let header = aac_parse_header(input)?;
                let payload = input
                    .get(header.header_length..header.frame_length)
                    .ok_or_else(|| MediaError::malformed("ADTS frame truncated"))?;
                let config = AudioSpecificConfig {
                    object_type: header.object_type,
                    sample_rate: header.sample_rate,
                    channel_config: header.channel_config,
                    extension_sample_rate: None,
                    short_frame: false,
                };
                (payload.to_vec(), Some(config))
            }
            AacFraming::Loas => {
                let frame = parse_loas(input)?;
                (frame.payload, frame.config)
            }
            AacFraming::Raw => (input.to_vec(), None),
        };

        let changed = match config {
            Some(config) if self.config != Some(config) => {
                self.config = Some(config);
                true
            }
            _ => false,
        };
        if self.config.is_none() {
            return Err(MediaError::unsupported(
                "raw AAC access units without a codec config",
            ));
        }
        Ok((payload, changed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lc_config() {
        let config = AudioSpecificConfig::parse(&[0x12, 0x10]).unwrap();
        assert_eq!(config.object_type, 2);
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.channels(), 2);
        assert_eq!(config.to_bytes(), vec![0x12, 0x10]);
    }

    #[test]
    fn test_explicit_sbr_config() {
        // AOT 5, 22050 core, stereo, extension 44100, AOT 2
        let config = AudioSpecificConfig::parse(&[0x2B, 0x92, 0x08, 0x00]).unwrap();
        assert_eq!(config.object_type, 2);
        assert_eq!(config.sample_rate, 22050);
        assert_eq!(config.output_sample_rate(), 44100);
    }

    #[test]
    fn test_escaped_sample_rate_roundtrip() {
        let bytes = build_audio_specific_config(2, 44000, 1);
        assert_eq!(bytes.len(), 5);
        let config = AudioSpecificConfig::parse(&bytes).unwrap();
        assert_eq!(config.sample_rate, 44000);
        assert_eq!(config.channel_config, 1);
    }

    fn loas_frame(payload: &[u8]) -> Vec<u8> {
        // useSameStreamMux=0, version=0, allSame=1, subFrames=0, programs=0,
        // layers=0, ASC 0x1210 (16 bits), frameLengthType=0, fullness=0xFF,
        // otherData=0, crc=0, length byte, payload
        let mut bits = String::new();
        bits.push_str("0");
        bits.push_str("0");
        bits.push_str("1");
        bits.push_str("000000");
        bits.push_str("0000");
        bits.push_str("000");
        bits.push_str("0001001000010000");
        bits.push_str("000");
        bits.push_str("11111111");
        bits.push_str("0");
        bits.push_str("0");
        bits.push_str(&format!("{:08b}", payload.len()));
        for byte in payload {
            bits.push_str(&format!("{byte:08b}"));
        }
        while bits.len() % 8 != 0 {
            bits.push('0');
        }
        let body: Vec<u8> = bits
            .as_bytes()
            .chunks(8)
            .map(|chunk| u8::from_str_radix(std::str::from_utf8(chunk).unwrap(), 2).unwrap())
            .collect();
        let mut frame = vec![0x56, 0xE0 | ((body.len() >> 8) as u8 & 0x1F), body.len() as u8];
        frame.extend(body);
        frame
    }

    #[test]
    fn test_parse_loas_frame() {
        let frame = loas_frame(&[0xDE, 0xAD, 0xBE]);
        assert_eq!(AacFraming::detect(&frame), AacFraming::Loas);
        let latm = parse_loas(&frame).unwrap();
        assert_eq!(latm.payload, vec![0xDE, 0xAD, 0xBE]);
        assert_eq!(latm.config.unwrap().sample_rate, 44100);
    }

    #[test]
    fn test_unpacker_strips_adts() {
        let mut frame = vec![0xFF, 0xF1, 0x50, 0x80, 0x01, 0x3F, 0xFC];
        frame.extend_from_slice(&[1, 2, 3]);
        // frame length 10
        frame[3] = 0x80;
        frame[4] = 0x01;
        frame[5] = 0x5F;
        let mut unpacker = AacUnpacker::new(None).unwrap();
        let (payload, changed) = unpacker.unpack(&frame).unwrap();
        assert_eq!(payload, vec![1, 2, 3]);
        assert!(changed);
        assert_eq!(unpacker.framing(), Some(AacFraming::Adts));
        let (_, changed) = unpacker.unpack(&frame).unwrap();
        assert!(!changed);
    }

    #[test]
    fn test_raw_needs_config() {
        let mut unpacker = AacUnpacker::new(None).unwrap();
        assert!(unpacker.unpack(&[0x21, 0x00]).is_err());
        let mut unpacker = AacUnpacker::new(Some(&[0x12, 0x10])).unwrap();
        let (payload, changed) = unpacker.unpack(&[0x21, 0x00]).unwrap();
        assert_eq!(payload, vec![0x21, 0x00]);
        assert!(!changed);
    }
}
