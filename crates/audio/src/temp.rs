//! Scoped temporary PCM files.
//!
//! Every intermediate file is a [`tempfile`] handle: dropping the handle
//! deletes the file, so no exit path leaves PCM behind.

use std::io::{self, BufWriter, Write};
use std::path::Path;

use tempfile::{Builder, NamedTempFile, TempPath};

use crate::error::AssemblyError;

const SILENCE_CHUNK: usize = 8192;

/// Create an empty temporary file in `dir` named `<prefix><random>.pcm`.
pub fn create_temp_pcm(dir: &Path, prefix: &str) -> Result<NamedTempFile, AssemblyError> {
    Builder::new()
        .prefix(prefix)
        .suffix(".pcm")
        .tempfile_in(dir)
        .map_err(|source| AssemblyError::TempFile {
            dir: dir.to_path_buf(),
            source,
        })
}

/// Append-only writer for one track's PCM, counting bytes as it goes.
pub struct TrackFile {
    writer: BufWriter<NamedTempFile>,
    len: u64,
    silence: u8,
}

impl TrackFile {
    /// `silence` is the byte written for gaps (0 for signed 16-bit PCM).
    pub fn create(dir: &Path, prefix: &str, silence: u8) -> Result<Self, AssemblyError> {
        Ok(Self {
            writer: BufWriter::new(create_temp_pcm(dir, prefix)?),
            len: 0,
            silence,
        })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn write_pcm(&mut self, data: &[u8]) -> io::Result<()> {
        self.writer.write_all(data)?;
        self.len += data.len() as u64;
        Ok(())
    }

    pub fn write_silence(&mut self, mut bytes: u64) -> io::Result<()> {
        let block = [self.silence; SILENCE_CHUNK];
        while bytes > 0 {
            let n = bytes.min(SILENCE_CHUNK as u64) as usize;
            self.writer.write_all(&block[..n])?;
            self.len += n as u64;
            bytes -= n as u64;
        }
        Ok(())
    }

    /// Pad with silence until the file is `target` bytes long.
    pub fn pad_to(&mut self, target: u64) -> io::Result<()> {
        if target > self.len {
            self.write_silence(target - self.len)?;
        }
        Ok(())
    }

    /// Flush and close the file, keeping it on disk until the returned
    /// handle is dropped.
    pub fn finish(self) -> io::Result<TempPath> {
        let file = self.writer.into_inner().map_err(|e| e.into_error())?;
        Ok(file.into_temp_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_file_counts_and_pads() {
        let dir = tempfile::tempdir().unwrap();
        let mut track = TrackFile::create(dir.path(), "track-0-", 0).unwrap();
        track.write_pcm(&[1, 2, 3, 4]).unwrap();
        track.pad_to(10_000).unwrap();
        assert_eq!(track.len(), 10_000);
        track.pad_to(8).unwrap();
        assert_eq!(track.len(), 10_000);

        let path = track.finish().unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 10_000);
        assert_eq!(&bytes[..5], &[1, 2, 3, 4, 0]);
    }

    #[test]
    fn dropping_handle_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let track = TrackFile::create(dir.path(), "gone-", 0).unwrap();
        let path = track.finish().unwrap();
        let on_disk = path.to_path_buf();
        assert!(on_disk.exists());
        drop(path);
        assert!(!on_disk.exists());
    }

    #[test]
    fn missing_dir_is_temp_file_error() {
        let err = create_temp_pcm(Path::new("/nonexistent/reel"), "x-").unwrap_err();
        assert!(matches!(err, AssemblyError::TempFile { .. }));
    }
}
