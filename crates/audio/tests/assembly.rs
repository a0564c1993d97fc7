//! End-to-end assembly over real WAV files.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, WriteBytesExt};
use reel_audio::{average2, AudioAssembler, Decoders};
use reel_common::{AudioSegment, Frame, SampleRateSetting};

fn write_wav(path: &Path, rate: u32, samples: &[i16]) {
    let mut out = BufWriter::new(File::create(path).unwrap());
    let data_len = samples.len() as u32 * 2;
    out.write_all(b"RIFF").unwrap();
    out.write_u32::<LittleEndian>(36 + data_len).unwrap();
    out.write_all(b"WAVEfmt ").unwrap();
    out.write_u32::<LittleEndian>(16).unwrap();
    out.write_u16::<LittleEndian>(1).unwrap();
    out.write_u16::<LittleEndian>(1).unwrap();
    out.write_u32::<LittleEndian>(rate).unwrap();
    out.write_u32::<LittleEndian>(rate * 2).unwrap();
    out.write_u16::<LittleEndian>(2).unwrap();
    out.write_u16::<LittleEndian>(16).unwrap();
    out.write_all(b"data").unwrap();
    out.write_u32::<LittleEndian>(data_len).unwrap();
    for &s in samples {
        out.write_i16::<LittleEndian>(s).unwrap();
    }
}

fn tone(dir: &Path, name: &str, rate: u32, millis: u64, value: i16) -> PathBuf {
    let path = dir.join(name);
    let count = (u64::from(rate) * millis / 1000) as usize;
    write_wav(&path, rate, &vec![value; count]);
    path
}

fn sample_at(bytes: &[u8], millis: u64, rate: u64) -> i16 {
    let at = (millis * rate / 1000) as usize * 2;
    i16::from_le_bytes([bytes[at], bytes[at + 1]])
}

#[test]
fn two_parallel_segments_mix_across_timeline() {
    let media = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let first = tone(media.path(), "first.wav", 44100, 1500, 1000);
    let second = tone(media.path(), "second.wav", 44100, 2000, -600);

    let frames = vec![
        Frame::new(0, 1000),
        Frame::new(1, 2000)
            .with_audio(AudioSegment::new(&first, 1500))
            .with_audio(AudioSegment::new(&second, 2000)),
        Frame::new(2, 1000),
    ];

    let decoders = Decoders::standard();
    let assembler = AudioAssembler::new(&decoders, scratch.path());
    let combined = assembler.assemble(&frames).unwrap().unwrap();

    assert_eq!(combined.track_count(), 2);
    assert_eq!(combined.format().sample_rate, 44100);
    assert_eq!(combined.duration_ms(), 4000);

    let bytes = std::fs::read(combined.pcm_path()).unwrap();
    assert_eq!(bytes.len(), 352_800);

    // Leading silence on both tracks
    assert_eq!(sample_at(&bytes, 500, 44100), 0);
    // Both segments playing
    assert_eq!(sample_at(&bytes, 1200, 44100), average2(1000, -600));
    // First segment ended at 2500 ms
    assert_eq!(sample_at(&bytes, 2700, 44100), average2(0, -600));
    // Both ended at 3000 ms, trailing silence to the end of the timeline
    assert_eq!(sample_at(&bytes, 3500, 44100), 0);

    combined.close().unwrap();
    assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
}

#[test]
fn automatic_rate_follows_the_most_audio() {
    let media = tempfile::tempdir().unwrap();
    let high_a = tone(media.path(), "high_a.wav", 44100, 1200, 10);
    let high_b = tone(media.path(), "high_b.wav", 44100, 800, 10);
    let low = tone(media.path(), "low.wav", 22050, 500, 10);

    let frames = vec![
        Frame::new(0, 1200).with_audio(AudioSegment::new(&high_a, 1200)),
        Frame::new(1, 800)
            .with_audio(AudioSegment::new(&high_b, 800))
            .with_audio(AudioSegment::new(&low, 500)),
    ];

    let decoders = Decoders::standard();
    let assembler = AudioAssembler::new(&decoders, media.path());
    assert_eq!(assembler.select_sample_rate(&frames), 44100);
}

#[test]
fn mismatched_rates_are_resampled_into_place() {
    let media = tempfile::tempdir().unwrap();
    let low = tone(media.path(), "low.wav", 22050, 1000, 2000);

    let frames = vec![
        Frame::new(0, 250),
        Frame::new(1, 1000).with_audio(AudioSegment::new(&low, 1000)),
    ];

    let decoders = Decoders::standard();
    let assembler =
        AudioAssembler::new(&decoders, media.path()).with_sample_rate(SampleRateSetting::Fixed(44100));
    let combined = assembler.assemble(&frames).unwrap().unwrap();

    assert_eq!(combined.track_count(), 1);
    assert_eq!(combined.duration_ms(), 1250);
    let bytes = std::fs::read(combined.pcm_path()).unwrap();
    assert_eq!(bytes.len(), 110_250);
    assert_eq!(sample_at(&bytes, 100, 44100), 0);
    assert_eq!(sample_at(&bytes, 750, 44100), 2000);
}

#[test]
fn corrupt_segment_leaves_silence_for_its_frame() {
    let media = tempfile::tempdir().unwrap();
    let good = tone(media.path(), "good.wav", 8000, 500, 123);
    let bad = media.path().join("bad.wav");
    std::fs::write(&bad, vec![0u8; 512]).unwrap();

    let frames = vec![
        Frame::new(0, 500).with_audio(AudioSegment::new(&bad, 500)),
        Frame::new(1, 500).with_audio(AudioSegment::new(&good, 500)),
    ];

    let decoders = Decoders::standard();
    let assembler = AudioAssembler::new(&decoders, media.path());
    let combined = assembler.assemble(&frames).unwrap().unwrap();
    assert_eq!(combined.format().sample_rate, 8000);

    let bytes = std::fs::read(combined.pcm_path()).unwrap();
    assert_eq!(bytes.len(), 16_000);
    assert_eq!(sample_at(&bytes, 250, 8000), 0);
    assert_eq!(sample_at(&bytes, 750, 8000), 123);
}
