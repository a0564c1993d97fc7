//! End-to-end exports of small narratives, checked with the movie inspector.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, WriteBytesExt};

use reel_audio::Decoders;
use reel_common::{AudioLayout, AudioSegment, ExportSettings, Frame, Narrative};
use reel_export::{export_mov, ExportJob, ExportProgress, JpegRasterizer};
use reel_mux::{inspect_file, EditEntry};

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

fn tone(dir: &Path, name: &str, rate: u32, millis: u64) -> PathBuf {
    let path = dir.join(name);
    let count = (u64::from(rate) * millis / 1000) as usize;
    write_wav(&path, rate, &vec![1200; count]);
    path
}

fn settings(layout: AudioLayout) -> ExportSettings {
    ExportSettings {
        width: 32,
        height: 24,
        audio_layout: layout,
        ..ExportSettings::default()
    }
}

fn export(narrative: &Narrative, output: &Path) -> PathBuf {
    let mut rasterizer = JpegRasterizer::from_settings(&narrative.settings);
    export_mov(narrative, output, &Decoders::standard(), &mut rasterizer, &mut |_| {})
        .unwrap()
        .unwrap()
}

#[test]
fn combined_audio_becomes_one_track() {
    let media = tempfile::tempdir().unwrap();
    let out_dir = tempfile::tempdir().unwrap();
    let clip = tone(media.path(), "clip.wav", 8000, 1500);

    let narrative = Narrative {
        settings: settings(AudioLayout::Combined),
        frames: vec![
            Frame::new(0, 1000),
            Frame::new(1, 2000).with_audio(AudioSegment::new(&clip, 1500)),
        ],
    };
    let path = export(&narrative, &out_dir.path().join("combined.mov"));

    let movie = inspect_file(&path).unwrap();
    assert!(movie.offsets_in_mdat());
    assert_eq!(movie.duration, 3000);
    assert_eq!(movie.tracks.len(), 2);

    let video = &movie.tracks[0];
    assert_eq!(video.sample_format, "jpeg");
    assert_eq!(video.sample_count, 2);
    assert_eq!(video.stts_duration(), 3000);

    let audio = &movie.tracks[1];
    assert_eq!(audio.handler, "soun");
    assert_eq!(audio.sample_format, "twos");
    assert_eq!(audio.timescale, 8000);
    assert_eq!(audio.sample_count, 24_000);
    assert_eq!(audio.edits, vec![EditEntry::play(3000, 0)]);

    // Temporary PCM is gone once the movie is written
    assert_eq!(std::fs::read_dir(out_dir.path()).unwrap().count(), 1);
}

#[test]
fn segmented_audio_is_placed_with_edit_lists() {
    let media = tempfile::tempdir().unwrap();
    let out_dir = tempfile::tempdir().unwrap();
    let first = tone(media.path(), "first.wav", 8000, 500);
    let second = tone(media.path(), "second.wav", 8000, 300);

    let narrative = Narrative {
        settings: settings(AudioLayout::Segmented),
        frames: vec![
            Frame::new(0, 1000).with_audio(AudioSegment::new(&first, 500)),
            Frame::new(1, 1000),
            Frame::new(2, 1000).with_audio(AudioSegment::new(&second, 300)),
        ],
    };
    let path = export(&narrative, &out_dir.path().join("segmented.mov"));

    let movie = inspect_file(&path).unwrap();
    assert_eq!(movie.duration, 3000);
    assert_eq!(movie.tracks.len(), 2);

    let audio = &movie.tracks[1];
    assert_eq!(audio.sample_count, 6400);
    assert_eq!(
        audio.edits,
        vec![
            EditEntry::play(500, 0),
            EditEntry::skip(1500),
            EditEntry::play(300, 4000),
        ]
    );
    assert_eq!(audio.duration, 2300);
}

#[test]
fn individual_segments_get_their_own_tracks() {
    let media = tempfile::tempdir().unwrap();
    let out_dir = tempfile::tempdir().unwrap();
    let clip = tone(media.path(), "clip.wav", 16_000, 500);

    let narrative = Narrative {
        settings: settings(AudioLayout::Individual),
        frames: vec![
            Frame::new(0, 1000),
            Frame::new(1, 1000).with_audio(AudioSegment::new(&clip, 500)),
        ],
    };
    let path = export(&narrative, &out_dir.path().join("individual.mov"));

    let movie = inspect_file(&path).unwrap();
    assert_eq!(movie.tracks.len(), 2);
    let audio = &movie.tracks[1];
    assert_eq!(audio.timescale, 16_000);
    assert_eq!(audio.sample_count, 8000);
    assert_eq!(audio.edits, vec![EditEntry::skip(1000), EditEntry::play(500, 0)]);
    assert_eq!(audio.duration, 1500);
}

#[test]
fn unreadable_audio_is_left_out() {
    let media = tempfile::tempdir().unwrap();
    let out_dir = tempfile::tempdir().unwrap();
    let broken = media.path().join("broken.wav");
    std::fs::write(&broken, vec![0u8; 256]).unwrap();

    let narrative = Narrative {
        settings: settings(AudioLayout::Individual),
        frames: vec![Frame::new(0, 1000).with_audio(AudioSegment::new(&broken, 1000))],
    };
    let path = export(&narrative, &out_dir.path().join("silent.mov"));

    let movie = inspect_file(&path).unwrap();
    assert_eq!(movie.tracks.len(), 1);
    assert_eq!(movie.duration, 1000);
}

#[test]
fn background_job_writes_the_movie() {
    let media = tempfile::tempdir().unwrap();
    let out_dir = tempfile::tempdir().unwrap();
    let clip = tone(media.path(), "clip.wav", 8000, 1000);
    let output = out_dir.path().join("job.mov");

    let narrative = Narrative {
        settings: settings(AudioLayout::Combined),
        frames: vec![Frame::new(0, 1000).with_audio(AudioSegment::new(&clip, 1000))],
    };
    let rasterizer = Box::new(JpegRasterizer::from_settings(&narrative.settings));
    let job = ExportJob::spawn(narrative, output.clone(), Decoders::standard(), rasterizer).unwrap();
    assert_eq!(job.wait().unwrap(), Some(output.clone()));

    let movie = inspect_file(&output).unwrap();
    assert_eq!(movie.tracks.len(), 2);
    assert_eq!(movie.tracks[1].sample_count, 8000);
}

#[test]
fn progress_reaches_every_frame() {
    let out_dir = tempfile::tempdir().unwrap();
    let narrative = Narrative {
        settings: settings(AudioLayout::Combined),
        frames: vec![Frame::new(0, 400), Frame::new(1, 600)],
    };
    let mut rasterizer = JpegRasterizer::from_settings(&narrative.settings);
    let mut written = Vec::new();
    export_mov(
        &narrative,
        &out_dir.path().join("progress.mov"),
        &Decoders::standard(),
        &mut rasterizer,
        &mut |p| {
            if let ExportProgress::FrameWritten { frame, .. } = p {
                written.push(frame);
            }
        },
    )
    .unwrap();
    assert_eq!(written, vec![0, 1]);
}
