//! Integration tests for the ADTS and MPEG audio extractors
//!
//! Streams are synthesized in memory so every expectation can be derived from
//! the frame layout.

use pullmedia_core::{
    mime, DataSource, MediaError, MediaSource, MemorySource, MetaKey, ReadOptions, ReadOutcome,
    SeekMode,
};
use pullmedia_media::*;
use std::sync::Arc;

// ============================================================================
// STREAM BUILDERS
// ============================================================================

/// ADTS frame: AAC LC, 44.1 kHz, stereo, zero payload
fn adts_frame(frame_length: usize) -> Vec<u8> {
    let mut frame = vec![
        0xFF,
        0xF1,
        0x50,
        0x80 | ((frame_length >> 11) & 0x03) as u8,
        ((frame_length >> 3) & 0xFF) as u8,
        (((frame_length & 0x07) << 5) as u8) | 0x1F,
        0xFC,
    ];
    frame.resize(frame_length, 0);
    frame
}

fn adts_stream(frames: usize) -> Vec<u8> {
    (0..frames).flat_map(|_| adts_frame(200)).collect()
}

/// MPEG-1 layer III, 128 kbit/s, 44.1 kHz, stereo: 417-byte frames
fn mp3_stream(frames: usize) -> Vec<u8> {
    let mut frame = vec![0u8; 417];
    frame[..4].copy_from_slice(&0xFFFB_9000u32.to_be_bytes());
    frame[4..].iter_mut().for_each(|b| *b = 0x11);
    (0..frames).flat_map(|_| frame.clone()).collect()
}

/// Like [`mp3_stream`], with each frame's index stored in its first payload byte
fn mp3_indexed_stream(frames: usize) -> Vec<u8> {
    let mut data = mp3_stream(frames);
    for (index, frame) in data.chunks_mut(417).enumerate() {
        frame[4] = index as u8;
    }
    data
}

/// Xing tag frame with a linear seek table, followed by indexed audio frames
fn mp3_xing_stream(frames: usize) -> Vec<u8> {
    let mut tag = vec![0u8; 417];
    tag[..4].copy_from_slice(&0xFFFB_9000u32.to_be_bytes());
    // MPEG-1 stereo side info ends at byte 36
    let mut pos = 36;
    for field in [*b"Xing", 7u32.to_be_bytes(), (frames as u32).to_be_bytes()] {
        tag[pos..pos + 4].copy_from_slice(&field);
        pos += 4;
    }
    tag[pos..pos + 4].copy_from_slice(&(((frames + 1) * 417) as u32).to_be_bytes());
    pos += 4;
    for i in 0..100 {
        tag[pos + i] = (i * 256 / 100) as u8;
    }
    tag.extend(mp3_indexed_stream(frames));
    tag
}

fn mp3_frame_time(frame: i64) -> i64 {
    frame * 1152 * 1_000_000 / 44_100
}

/// Read one buffer, returning its time and the frame index in its payload
fn read_indexed(track: &mut impl MediaSource, options: &ReadOptions) -> (i64, i64, Option<i64>) {
    let buffer = track.read(options).unwrap().into_buffer().unwrap();
    (
        buffer.time_us().unwrap(),
        i64::from(buffer.data()[4]),
        buffer.meta().find_i64(MetaKey::TargetTime),
    )
}

fn id3_tag(body: usize) -> Vec<u8> {
    let mut tag = b"ID3\x04\x00\x00".to_vec();
    let size = body as u32;
    tag.extend([
        ((size >> 21) & 0x7F) as u8,
        ((size >> 14) & 0x7F) as u8,
        ((size >> 7) & 0x7F) as u8,
        (size & 0x7F) as u8,
    ]);
    tag.resize(10 + body, 0);
    tag
}

fn memory(data: Vec<u8>) -> Arc<dyn DataSource> {
    Arc::new(MemorySource::new(data))
}

fn frame_time(frame: i64) -> i64 {
    frame * 1024 * 1_000_000 / 44_100
}

// ============================================================================
// ADTS TESTS
// ============================================================================

#[test]
fn test_adts_sniff_and_format() {
    let source = memory(adts_stream(10));
    let sniffed = sniff(source.as_ref()).unwrap();
    assert_eq!(sniffed.mime, mime::CONTAINER_ADTS);

    let extractor = create_extractor(source, ExtractorConfig::default()).unwrap();
    assert_eq!(extractor.count_tracks(), 1);
    let format = extractor.track_format(0).unwrap();
    assert_eq!(format.mime(), Some(mime::AUDIO_AAC));
    assert_eq!(format.find_i32(MetaKey::SampleRate), Some(44_100));
    assert_eq!(format.find_i32(MetaKey::ChannelCount), Some(2));
    assert_eq!(format.find_data(MetaKey::CodecSpecificData), Some(&[0x12, 0x10][..]));
    assert!(format.find_i64(MetaKey::Duration).unwrap() > 0);
    assert!(extractor.track_format(1).is_none());
}

#[test]
fn test_adts_track_reads_every_frame_in_order() {
    let extractor = AacExtractor::new(memory(adts_stream(10)), ExtractorConfig::default());
    let mut track = extractor.track(0).unwrap();
    let format_before = track.format();
    track.start(None).unwrap();

    let mut times = Vec::new();
    loop {
        match track.read(&ReadOptions::new()).unwrap() {
            ReadOutcome::Buffer(buffer) => {
                assert_eq!(buffer.range_length(), 193);
                assert!(buffer.meta().is_sync_frame());
                times.push(buffer.time_us().unwrap());
            }
            ReadOutcome::EndOfStream => break,
            ReadOutcome::FormatChanged => panic!("ADTS track never changes format"),
        }
    }
    assert_eq!(times.len(), 10);
    assert!(times.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(times[9], frame_time(9));
    assert_eq!(*track.format(), *format_before);
    track.stop().unwrap();
}

#[test]
fn test_adts_closest_seek_sets_target_time() {
    let extractor = AacExtractor::new(memory(adts_stream(10)), ExtractorConfig::default());
    let mut track = extractor.track(0).unwrap();
    track.start(None).unwrap();
    let buffer = track
        .read(&ReadOptions::seek_to(100_000, SeekMode::Closest))
        .unwrap()
        .into_buffer()
        .unwrap();
    assert_eq!(buffer.time_us(), Some(frame_time(4)));
    assert_eq!(buffer.meta().find_i64(MetaKey::TargetTime), Some(100_000));

    // a backwards seek may report an earlier time
    let buffer = track
        .read(&ReadOptions::seek_to(0, SeekMode::PreviousSync))
        .unwrap()
        .into_buffer()
        .unwrap();
    assert_eq!(buffer.time_us(), Some(0));
    track.stop().unwrap();
}

#[test]
fn test_adts_skip_beyond_window_is_an_error() {
    let extractor = AacExtractor::new(memory(adts_stream(10)), ExtractorConfig::default());
    let mut track = extractor.track(0).unwrap();
    track.start(None).unwrap();
    assert!(matches!(
        track.read(&ReadOptions::skip_until(2_000_000)),
        Err(MediaError::Unknown { .. })
    ));
    let buffer = track
        .read(&ReadOptions::skip_until(frame_time(3)))
        .unwrap()
        .into_buffer()
        .unwrap();
    assert!(buffer.time_us().unwrap() >= frame_time(3));
    track.stop().unwrap();
}

#[test]
fn test_adts_behind_id3_tag() {
    let mut data = id3_tag(32);
    data.extend(adts_stream(3));
    let extractor = AacExtractor::new(memory(data), ExtractorConfig::default());
    assert!(extractor.is_initialized());
    assert_eq!(aac_frame_size(&MemorySource::new(adts_frame(200)), 0), 200);
}

#[test]
fn test_garbage_yields_no_tracks() {
    let extractor = AacExtractor::new(memory(vec![0x42; 512]), ExtractorConfig::default());
    assert_eq!(extractor.count_tracks(), 0);
    assert!(extractor.track(0).is_err());
    assert!(sniff(&MemorySource::new(vec![0x42; 512])).is_none());
}

#[test]
fn test_track_lifecycle_preconditions() {
    let extractor = AacExtractor::new(memory(adts_stream(2)), ExtractorConfig::default());
    let mut track = extractor.track(0).unwrap();
    assert!(matches!(track.stop(), Err(MediaError::InvalidState { .. })));
    assert!(matches!(
        track.read(&ReadOptions::new()),
        Err(MediaError::InvalidState { .. })
    ));
    track.start(None).unwrap();
    assert!(matches!(track.start(None), Err(MediaError::InvalidState { .. })));
    track.stop().unwrap();
    assert!(matches!(track.stop(), Err(MediaError::InvalidState { .. })));
}

// ============================================================================
// MPEG AUDIO TESTS
// ============================================================================

#[test]
fn test_mp3_sniff_and_read() {
    let source = memory(mp3_stream(8));
    assert_eq!(sniff(source.as_ref()).unwrap().mime, mime::AUDIO_MPEG);

    let extractor = create_extractor(source, ExtractorConfig::default()).unwrap();
    let format = extractor.track_format(0).unwrap();
    assert_eq!(format.mime(), Some(mime::AUDIO_MPEG));
    assert_eq!(format.find_i32(MetaKey::SampleRate), Some(44_100));
    assert_eq!(format.find_i32(MetaKey::SamplesPerFrame), Some(1152));

    let mut track = extractor.track(0).unwrap();
    track.start(None).unwrap();
    let mut count = 0;
    let mut last = -1;
    while let ReadOutcome::Buffer(buffer) = track.read(&ReadOptions::new()).unwrap() {
        assert_eq!(buffer.range_length(), 417);
        let time = buffer.time_us().unwrap();
        assert!(time > last);
        last = time;
        count += 1;
    }
    assert_eq!(count, 8);
    assert_eq!(last, 7 * 1152 * 1_000_000 / 44_100);
    track.stop().unwrap();
}

#[test]
fn test_mp3_skips_leading_garbage() {
    let mut data = vec![0x00, 0x13, 0x37];
    data.extend(mp3_stream(5));
    let extractor = Mp3Extractor::new(memory(data), ExtractorConfig::default());
    assert!(extractor.is_initialized());
    let mut track = extractor.track(0).unwrap();
    track.start(None).unwrap();
    let first = track.read(&ReadOptions::new()).unwrap().into_buffer().unwrap();
    assert_eq!(&first.data()[..2], &[0xFF, 0xFB]);
    assert_eq!(first.time_us(), Some(0));
    track.stop().unwrap();
}

#[test]
fn test_mp3_sniff_needs_two_headers() {
    // one plausible header whose frame runs past the end of the data
    let mut lone = 0xFFFB_9000u32.to_be_bytes().to_vec();
    lone.extend([0u8; 100]);
    assert!(sniff(&MemorySource::new(lone.clone())).is_none());
    assert!(!Mp3Extractor::new(memory(lone), ExtractorConfig::default()).is_initialized());

    // a header followed by one from a different stream layout
    let mut mismatched = mp3_stream(1);
    mismatched.extend(0xFFF3_82C0u32.to_be_bytes());
    mismatched.extend([0u8; 600]);
    assert!(sniff(&MemorySource::new(mismatched)).is_none());

    // two frames are enough
    assert!(sniff(&MemorySource::new(mp3_stream(2))).is_some());
}

#[test]
fn test_sniff_rejects_noise() {
    let mut state: u32 = 0x1234_5678;
    let noise: Vec<u8> = (0..4096)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 24) as u8
        })
        .collect();
    assert!(sniff(&MemorySource::new(noise)).is_none());
}

#[test]
fn test_mp3_seek_lands_on_frame_boundary() {
    let source = memory(mp3_indexed_stream(100));
    let extractor = create_extractor(source, ExtractorConfig::default()).unwrap();
    let mut track = extractor.track(0).unwrap();
    track.start(None).unwrap();

    // frame 3 starts at 78 367us, frame 4 at 104 489us
    let (time, index, target) =
        read_indexed(&mut track, &ReadOptions::seek_to(100_000, SeekMode::PreviousSync));
    assert_eq!((index, time, target), (3, mp3_frame_time(3), None));
    let (time, index, _) = read_indexed(&mut track, &ReadOptions::new());
    assert_eq!((index, time), (4, mp3_frame_time(4)));

    let (time, index, _) =
        read_indexed(&mut track, &ReadOptions::seek_to(100_000, SeekMode::NextSync));
    assert_eq!((index, time), (4, mp3_frame_time(4)));

    let (time, index, target) =
        read_indexed(&mut track, &ReadOptions::seek_to(100_000, SeekMode::Closest));
    assert_eq!((index, time, target), (3, mp3_frame_time(3), Some(100_000)));

    let (time, index, _) =
        read_indexed(&mut track, &ReadOptions::seek_to(0, SeekMode::PreviousSync));
    assert_eq!((index, time), (0, 0));
    track.stop().unwrap();
}

#[test]
fn test_mp3_xing_seek_table() {
    let extractor = Mp3Extractor::new(memory(mp3_xing_stream(100)), ExtractorConfig::default());
    let format = extractor.track_format(0).unwrap();
    assert_eq!(format.find_i64(MetaKey::Duration), Some(mp3_frame_time(100)));

    let mut track = extractor.track(0).unwrap();
    track.start(None).unwrap();
    // playback starts after the tag frame
    let (time, index, _) = read_indexed(&mut track, &ReadOptions::new());
    assert_eq!((index, time), (0, 0));

    for target in [1_000_000, 2_000_000] {
        let (time, index, _) =
            read_indexed(&mut track, &ReadOptions::seek_to(target, SeekMode::PreviousSync));
        assert_eq!(time, mp3_frame_time(index));
        assert!(time <= target);
        assert!(target - time < 2 * mp3_frame_time(1));
        let (next_time, next_index, _) = read_indexed(&mut track, &ReadOptions::new());
        assert_eq!((next_index, next_time), (index + 1, mp3_frame_time(index + 1)));
    }
    track.stop().unwrap();
}
