//! Picture size sniffing for MPEG-4 part 2 and H.263 bitstreams
//!
//! Used by the video decoder adapter when the track format carries no width
//! or height: the first access unit (or its codec specific data) is scanned
//! for a VideoObjectLayer header or an H.263 picture header.

use super::aac_config::BitReader;
use pullmedia_core::mime;

/// Standard H.263 source formats
const H263_SOURCE_FORMATS: [(u32, u32); 5] =
    [(128, 96), (176, 144), (352, 288), (704, 576), (1408, 1152)];

/// Width and height found in `data` for a stream of type `mime_type`
pub fn sniff_dimensions(mime_type: &str, data: &[u8]) -> Option<(u32, u32)> {
    match mime_type {
        mime::VIDEO_MPEG4 => find_vol(data).and_then(parse_vol),
        mime::VIDEO_H263 => parse_h263_picture_header(data),
        _ => None,
    }
}

/// Slice starting right after the first VOL start code (`00 00 01 2x`)
fn find_vol(data: &[u8]) -> Option<&[u8]> {
    data.windows(4)
        .position(|w| w[0] == 0 && w[1] == 0 && w[2] == 1 && (0x20..=0x2F).contains(&w[3]))
        .map(|pos| &data[pos + 4..])
}

/// Parse a rectangular VideoObjectLayer header body
pub fn parse_vol(body: &[u8]) -> Option<(u32, u32)> {
    let mut reader = BitReader::new(body);
    reader.skip(1).ok()?; // random_accessible_vol
    reader.skip(8).ok()?; // video_object_type_indication
    let mut verid = 1;
    if reader.read_flag().ok()? {
        verid = reader.read(4).ok()?;
        reader.skip(3).ok()?;
    }
    if reader.read(4).ok()? == 0x0F {
        reader.skip(16).ok()?; // extended pixel aspect ratio
    }
    if reader.read_flag().ok()? {
        reader.skip(3).ok()?; // chroma_format, low_delay
        if reader.read_flag().ok()? {
            reader.skip(79).ok()?; // vbv parameters
        }
    }
    let shape = reader.read(2).ok()?;
    if shape == 3 && verid != 1 {
        reader.skip(4).ok()?;
    }
    if shape != 0 {
        return None;
    }
    if !reader.read_flag().ok()? {
        return None;
    }
    let resolution = reader.read(16).ok()?;
    if !reader.read_flag().ok()? {
        return None;
    }
    if reader.read_flag().ok()? {
        let bits = (32 - resolution.saturating_sub(1).leading_zeros()).max(1) as usize;
        reader.skip(bits).ok()?;
    }
    if !reader.read_flag().ok()? {
        return None;
    }
    let width = reader.read(13).ok()?;
    if !reader.read_flag().ok()? {
        return None;
    }
    let height = reader.read(13).ok()?;
    (width > 0 && height > 0).then_some((width, height))
}

/// Parse an H.263 picture header, including PLUSPTYPE custom formats
pub fn parse_h263_picture_header(data: &[u8]) -> Option<(u32, u32)> {
    let mut reader = BitReader::new(data);
    if reader.read(22).ok()? != 0x20 {
        return None;
    }
    reader.skip(8).ok()?; // temporal reference
    if !reader.read_flag().ok()? || reader.read_flag().ok()? {
        return None;
    }
    reader.skip(3).ok()?; // split screen, document camera, freeze release
    let source_format = reader.read(3).ok()?;
    match source_format {
        1..=5 => Some(H263_SOURCE_FORMATS[source_format as usize - 1]),
        7 => {
            // PLUSPTYPE
            if reader.read(3).ok()? != 1 {
                return None;
            }
            let format = reader.read(3).ok()?;
            reader.skip(15).ok()?; // rest of OPPTYPE
            reader.skip(9).ok()?; // MPPTYPE
            if reader.read_flag().ok()? {
                reader.skip(2).ok()?; // PSBI
            }
            match format {
                1..=5 => Some(H263_SOURCE_FORMATS[format as usize - 1]),
                6 => {
                    reader.skip(4).ok()?; // pixel aspect ratio
                    let width = (reader.read(9).ok()? + 1) * 4;
                    if !reader.read_flag().ok()? {
                        return None;
                    }
                    let height = reader.read(9).ok()? * 4;
                    (height > 0).then_some((width, height))
                }
                _ => None,
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct BitWriter {
        bits: Vec<bool>,
    }

    impl BitWriter {
        fn put(&mut self, value: u32, width: usize) -> &mut Self {
            for i in (0..width).rev() {
                self.bits.push((value >> i) & 1 == 1);
            }
            self
        }

        fn finish(&self) -> Vec<u8> {
            self.bits
                .chunks(8)
                .map(|chunk| {
                    chunk
                        .iter()
                        .enumerate()
                        .fold(0u8, |acc, (i, &bit)| acc | (u8::from(bit) << (7 - i)))
                })
                .collect()
        }
    }

    #[test]
    fn test_vol_dimensions() {
        let mut writer = BitWriter::default();
        writer
            .put(0, 1)
            .put(1, 8)
            .put(0, 1) // no object layer identifier
            .put(1, 4) // square pixels
            .put(0, 1) // no control parameters
            .put(0, 2) // rectangular
            .put(1, 1)
            .put(30, 16)
            .put(1, 1)
            .put(0, 1) // variable vop rate
            .put(1, 1)
            .put(320, 13)
            .put(1, 1)
            .put(240, 13)
            .put(1, 1);
        let mut data = vec![0, 0, 1, 0xB0, 0x01, 0, 0, 1, 0x20];
        data.extend(writer.finish());
        assert_eq!(sniff_dimensions(mime::VIDEO_MPEG4, &data), Some((320, 240)));
    }

    #[test]
    fn test_h263_standard_and_custom_formats() {
        let mut writer = BitWriter::default();
        writer.put(0x20, 22).put(0, 8).put(0b10, 2).put(0, 3).put(2, 3);
        assert_eq!(
            sniff_dimensions(mime::VIDEO_H263, &writer.finish()),
            Some((176, 144))
        );

        let mut writer = BitWriter::default();
        writer
            .put(0x20, 22)
            .put(0, 8)
            .put(0b10, 2)
            .put(0, 3)
            .put(7, 3)
            .put(1, 3) // UFEP
            .put(6, 3) // custom
            .put(0, 15)
            .put(0, 9)
            .put(0, 1) // no CPM
            .put(2, 4)
            .put(159, 9)
            .put(1, 1)
            .put(60, 9);
        assert_eq!(
            parse_h263_picture_header(&writer.finish()),
            Some((640, 240))
        );
    }

    #[test]
    fn test_garbage_has_no_dimensions() {
        assert_eq!(sniff_dimensions(mime::VIDEO_MPEG4, &[0xAB; 32]), None);
        assert_eq!(sniff_dimensions(mime::VIDEO_H263, &[0xFF; 8]), None);
        assert_eq!(sniff_dimensions(mime::VIDEO_AVC, &[0, 0, 1, 0x20]), None);
    }
}
