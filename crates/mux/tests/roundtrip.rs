//! Write movies and parse them back with the inspector.

use std::io::Cursor;

use reel_common::{AudioPlacement, PcmFormat, SampleOrder};
use reel_mux::{inspect_bytes, inspect_file, AudioInput, EditEntry, MovWriter, VideoFrame};

fn jpeg_stub(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    data[0] = 0xFF;
    data[1] = 0xD8;
    data
}

fn tone(rate: u32, millis: u64) -> AudioInput {
    let format = PcmFormat::mono16(rate);
    let bytes = format.bytes_for_millis(millis) as usize;
    AudioInput::from_reader(Cursor::new(vec![0x11u8; bytes]), format)
}

#[test]
fn single_frame_movie_lasts_one_second() {
    let mut writer = MovWriter::new(Cursor::new(Vec::new())).unwrap();
    writer
        .add_video_frame(1000, &VideoFrame::new(1, 1, jpeg_stub(64)))
        .unwrap();
    let bytes = writer.close(true).unwrap().into_inner();

    let movie = inspect_bytes(&bytes).unwrap();
    assert_eq!(movie.timescale, 1000);
    assert_eq!(movie.duration, 1000);
    assert_eq!(movie.tracks.len(), 1);

    let video = &movie.tracks[0];
    assert_eq!(video.handler, "vide");
    assert_eq!(video.sample_format, "jpeg");
    assert_eq!(video.timescale, 1000);
    assert_eq!(video.media_duration, 1000);
    assert_eq!(video.sample_count, 1);
    assert_eq!(video.chunk_offsets, vec![48]);
    assert!(movie.offsets_in_mdat());
}

#[test]
fn patched_mdat_length_matches_bytes_written() {
    let mut writer = MovWriter::new(Cursor::new(Vec::new())).unwrap();
    writer.add_audio_track(tone(8000, 2500), 0, None).unwrap();
    for len in [300, 500, 700] {
        writer
            .add_video_frame(700, &VideoFrame::new(4, 4, jpeg_stub(len)))
            .unwrap();
    }
    let bytes = writer.close(true).unwrap().into_inner();

    let movie = inspect_bytes(&bytes).unwrap();
    let (offset, size) = movie.mdat.unwrap();
    assert_eq!(offset, 32);
    // 16-byte header + frames + 2500 ms of 16-bit mono at 8 kHz
    assert_eq!(size, 16 + 1500 + 40_000);
    assert_eq!(&bytes[offset as usize + size as usize + 4..][..4], b"moov");
}

#[test]
fn sample_tables_account_for_every_sample() {
    let mut writer = MovWriter::new(Cursor::new(Vec::new())).unwrap();
    writer.add_audio_track(tone(22_050, 3300), 0, None).unwrap();
    let durations = [400, 400, 400, 2000, 100, 100];
    for (i, &duration) in durations.iter().enumerate() {
        writer
            .add_video_frame(duration, &VideoFrame::new(8, 6, jpeg_stub(50 + i)))
            .unwrap();
    }
    let bytes = writer.close(true).unwrap().into_inner();
    let movie = inspect_bytes(&bytes).unwrap();
    assert!(movie.offsets_in_mdat());

    let video = &movie.tracks[0];
    assert_eq!(video.sample_count, durations.len() as u64);
    assert_eq!(video.stts_sample_count(), durations.len() as u64);
    assert_eq!(video.stsc_sample_count(), durations.len() as u64);
    assert_eq!(video.stts_duration(), 3400);
    // [400, 400, 400] closes at 1200, [2000] at 2000, [100, 100] at close
    assert_eq!(video.chunk_offsets.len(), 3);

    let audio = &movie.tracks[1];
    assert_eq!(audio.handler, "soun");
    assert_eq!(audio.sample_format, "twos");
    assert_eq!(audio.timescale, 22_050);
    let samples = 22_050 * 3300 / 1000;
    assert_eq!(audio.sample_count, samples);
    assert_eq!(audio.stts_sample_count(), samples);
    assert_eq!(audio.stsc_sample_count(), samples);
    assert_eq!(audio.media_duration, samples);
    assert_eq!(movie.duration, 3400);
}

#[test]
fn hard_stop_leaves_trailing_audio_out() {
    let mut writer = MovWriter::new(Cursor::new(Vec::new())).unwrap();
    writer.add_audio_track(tone(8000, 10_000), 0, None).unwrap();
    writer
        .add_video_frame(1000, &VideoFrame::new(2, 2, jpeg_stub(10)))
        .unwrap();
    let bytes = writer.close(false).unwrap().into_inner();

    let movie = inspect_bytes(&bytes).unwrap();
    // Primed second plus the second pulled by the video chunk
    assert_eq!(movie.tracks[1].sample_count, 16_000);
    assert_eq!(movie.duration, 2000);
}

#[test]
fn segmented_track_carries_edit_list() {
    let mut writer = MovWriter::new(Cursor::new(Vec::new())).unwrap();
    let placements = [
        AudioPlacement::new(1000, 0, 1500),
        AudioPlacement::new(3000, 1500, 500),
    ];
    writer
        .add_segmented_audio_track(tone(44_100, 2000), &placements)
        .unwrap();
    for _ in 0..4 {
        writer
            .add_video_frame(1000, &VideoFrame::new(2, 2, jpeg_stub(10)))
            .unwrap();
    }
    let bytes = writer.close(true).unwrap().into_inner();
    let movie = inspect_bytes(&bytes).unwrap();

    let audio = &movie.tracks[1];
    assert_eq!(
        audio.edits,
        vec![
            EditEntry::skip(1000),
            EditEntry::play(1500, 0),
            EditEntry::skip(500),
            EditEntry::play(500, 66_150),
        ]
    );
    assert_eq!(audio.duration, 3500);
    assert_eq!(movie.duration, 4000);
}

#[test]
fn eight_bit_stereo_is_raw() {
    let format = PcmFormat::new(11_025, 8, 2, SampleOrder::LittleEndian);
    let input = AudioInput::from_reader(Cursor::new(vec![0x80u8; 11_025 * 2]), format);
    let mut writer = MovWriter::new(Cursor::new(Vec::new())).unwrap();
    writer.add_audio_track(input, 0, Some(1000)).unwrap();
    let bytes = writer.close(true).unwrap().into_inner();

    let movie = inspect_bytes(&bytes).unwrap();
    assert_eq!(movie.tracks[1].sample_format, "raw ");
    assert_eq!(movie.tracks[1].sample_count, 11_025);
}

#[test]
fn file_backed_writer_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("story.mov");
    let mut writer = MovWriter::create(&path).unwrap();
    writer
        .add_video_frame(1500, &VideoFrame::new(16, 16, jpeg_stub(200)))
        .unwrap();
    writer.close(true).unwrap();

    let movie = inspect_file(&path).unwrap();
    assert_eq!(movie.duration, 1500);
    let rendered = movie.to_string();
    assert!(rendered.contains("moov"));
    assert!(rendered.contains("track 1 [vide jpeg]"));
}
