//! RIFF/WAVE linear PCM reader.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};
use reel_common::{PcmBuffer, PcmFormat, SampleOrder};
use tracing::debug;

use super::{finish_pcm, DecodeOptions, PcmDecoder};
use crate::error::DecodeError;

/// Smallest file worth parsing (header plus a token amount of data).
const MIN_FILE_SIZE: u64 = 128;
const MIN_FMT_LEN: u32 = 16;
const MAX_FMT_LEN: u32 = 1024;
const FORMAT_PCM: u16 = 1;

/// Decoder for uncompressed WAV files (8- or 16-bit PCM).
#[derive(Clone, Debug, Default)]
pub struct WavDecoder;

impl WavDecoder {
    pub fn new() -> Self {
        Self
    }
}

/// Parsed `fmt ` chunk plus the location of the sample data.
#[derive(Debug)]
struct WavHeader {
    format: PcmFormat,
    data_len: u32,
}

fn open(path: &Path) -> Result<BufReader<File>, DecodeError> {
    let file = File::open(path).map_err(|source| DecodeError::FileOpen {
        path: path.to_path_buf(),
        source,
    })?;
    let size = file.metadata()?.len();
    if size < MIN_FILE_SIZE {
        return Err(DecodeError::TooSmall { size });
    }
    Ok(BufReader::new(file))
}

/// Read the `data` chunk body from the current position.
///
/// The declared length is bounded by what is left of the file, so streamed
/// or truncated files keep whatever data is present.
fn read_data<R: Read + Seek>(reader: &mut R, declared: u32, file_len: u64) -> io::Result<Vec<u8>> {
    let left = file_len.saturating_sub(reader.stream_position()?);
    let len = u64::from(declared).min(left);
    let mut raw = Vec::with_capacity(len as usize);
    reader.by_ref().take(len).read_to_end(&mut raw)?;
    Ok(raw)
}

/// Parse up to the start of the `data` chunk, leaving `reader` positioned on
/// the first sample byte.
fn read_header<R: Read + Seek>(reader: &mut R) -> Result<WavHeader, DecodeError> {
    let mut tag = [0u8; 4];
    reader.read_exact(&mut tag)?;
    if &tag != b"RIFF" {
        return Err(DecodeError::NotWave);
    }
    let _riff_len = reader.read_u32::<LittleEndian>()?;
    reader.read_exact(&mut tag)?;
    if &tag != b"WAVE" {
        return Err(DecodeError::NotWave);
    }

    let mut format = None;
    loop {
        match reader.read_exact(&mut tag) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(DecodeError::MissingData);
            }
            Err(e) => return Err(e.into()),
        }
        let len = reader.read_u32::<LittleEndian>()?;

        match &tag {
            b"fmt " => {
                if !(MIN_FMT_LEN..=MAX_FMT_LEN).contains(&len) {
                    return Err(DecodeError::BadFmtChunk(len));
                }
                let encoding = reader.read_u16::<LittleEndian>()?;
                if encoding != FORMAT_PCM {
                    return Err(DecodeError::UnsupportedEncoding(encoding));
                }
                let channels = reader.read_u16::<LittleEndian>()?;
                let sample_rate = reader.read_u32::<LittleEndian>()?;
                let _byte_rate = reader.read_u32::<LittleEndian>()?;
                let _block_align = reader.read_u16::<LittleEndian>()?;
                let bits = reader.read_u16::<LittleEndian>()?;
                skip(reader, i64::from(len - MIN_FMT_LEN) + i64::from(len & 1))?;
                format = Some(PcmFormat::new(
                    sample_rate,
                    bits,
                    channels,
                    SampleOrder::LittleEndian,
                ));
            }
            b"data" => {
                let format = format.ok_or(DecodeError::DataBeforeFmt)?;
                return Ok(WavHeader {
                    format,
                    data_len: len,
                });
            }
            _ => skip(reader, i64::from(len) + i64::from(len & 1))?,
        }
    }
}

fn skip<R: Seek>(reader: &mut R, bytes: i64) -> io::Result<()> {
    if bytes > 0 {
        reader.seek(SeekFrom::Current(bytes))?;
    }
    Ok(())
}

fn check_layout(format: &PcmFormat) -> Result<(), DecodeError> {
    if format.channels == 0 || format.sample_rate == 0 {
        return Err(DecodeError::UnsupportedFormat(format!(
            "{} channels at {} Hz",
            format.channels, format.sample_rate
        )));
    }
    match format.bits_per_sample {
        8 | 16 => Ok(()),
        other => Err(DecodeError::UnsupportedBitDepth(other)),
    }
}

/// Widen raw sample bytes to signed 16-bit samples.
fn to_i16(raw: &[u8], bits: u16) -> Vec<i16> {
    if bits == 8 {
        raw.iter().map(|&b| (i16::from(b) - 128) << 8).collect()
    } else {
        raw.chunks_exact(2)
            .map(|p| i16::from_le_bytes([p[0], p[1]]))
            .collect()
    }
}

impl PcmDecoder for WavDecoder {
    fn probe(&self, path: &Path) -> Result<PcmFormat, DecodeError> {
        let mut reader = open(path)?;
        let header = read_header(&mut reader)?;
        check_layout(&header.format)?;
        Ok(PcmFormat {
            bits_per_sample: 16,
            ..header.format
        })
    }

    fn decode(&self, path: &Path, options: &DecodeOptions) -> Result<PcmBuffer, DecodeError> {
        let mut reader = open(path)?;
        let header = read_header(&mut reader)?;
        check_layout(&header.format)?;

        let file_len = reader.get_ref().metadata()?.len();
        let raw = read_data(&mut reader, header.data_len, file_len)?;

        debug!(
            path = %path.display(),
            format = %header.format,
            bytes = raw.len(),
            "Read WAV data"
        );

        let samples = to_i16(&raw, header.format.bits_per_sample);
        Ok(finish_pcm(
            samples,
            header.format.sample_rate,
            header.format.channels,
            options,
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write};

    use byteorder::WriteBytesExt;

    use super::*;

    fn chunk(out: &mut Vec<u8>, id: &[u8; 4], body: &[u8]) {
        out.extend_from_slice(id);
        out.write_u32::<LittleEndian>(body.len() as u32).unwrap();
        out.extend_from_slice(body);
        if body.len() % 2 == 1 {
            out.push(0);
        }
    }

    fn fmt_body(encoding: u16, channels: u16, rate: u32, bits: u16) -> Vec<u8> {
        let mut body = Vec::new();
        body.write_u16::<LittleEndian>(encoding).unwrap();
        body.write_u16::<LittleEndian>(channels).unwrap();
        body.write_u32::<LittleEndian>(rate).unwrap();
        let align = channels * bits / 8;
        body.write_u32::<LittleEndian>(rate * u32::from(align)).unwrap();
        body.write_u16::<LittleEndian>(align).unwrap();
        body.write_u16::<LittleEndian>(bits).unwrap();
        body
    }

    fn riff(chunks: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.write_u32::<LittleEndian>(chunks.len() as u32 + 4).unwrap();
        out.extend_from_slice(b"WAVE");
        out.extend_from_slice(chunks);
        out
    }

    fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = dir.join(name);
        File::create(&path).unwrap().write_all(bytes).unwrap();
        path
    }

    #[test]
    fn header_skips_unknown_chunks() {
        let mut chunks = Vec::new();
        chunk(&mut chunks, b"LIST", b"odd");
        chunk(&mut chunks, b"fmt ", &fmt_body(1, 1, 22050, 16));
        chunk(&mut chunks, b"data", &[0; 8]);
        let header = read_header(&mut Cursor::new(riff(&chunks))).unwrap();
        assert_eq!(header.format, PcmFormat::mono16(22050));
        assert_eq!(header.data_len, 8);
    }

    #[test]
    fn data_before_fmt_is_rejected() {
        let mut chunks = Vec::new();
        chunk(&mut chunks, b"data", &[0; 8]);
        chunk(&mut chunks, b"fmt ", &fmt_body(1, 1, 22050, 16));
        assert!(matches!(
            read_header(&mut Cursor::new(riff(&chunks))),
            Err(DecodeError::DataBeforeFmt)
        ));
    }

    #[test]
    fn bad_fmt_length_is_rejected() {
        let mut chunks = Vec::new();
        chunk(&mut chunks, b"fmt ", &[0; 12]);
        assert!(matches!(
            read_header(&mut Cursor::new(riff(&chunks))),
            Err(DecodeError::BadFmtChunk(12))
        ));
    }

    #[test]
    fn non_pcm_encoding_is_rejected() {
        let mut chunks = Vec::new();
        chunk(&mut chunks, b"fmt ", &fmt_body(3, 1, 22050, 32));
        assert!(matches!(
            read_header(&mut Cursor::new(riff(&chunks))),
            Err(DecodeError::UnsupportedEncoding(3))
        ));
    }

    #[test]
    fn missing_data_chunk() {
        let mut chunks = Vec::new();
        chunk(&mut chunks, b"fmt ", &fmt_body(1, 1, 22050, 16));
        assert!(matches!(
            read_header(&mut Cursor::new(riff(&chunks))),
            Err(DecodeError::MissingData)
        ));
    }

    #[test]
    fn not_riff() {
        let bytes = b"OggS\0\0\0\0WAVE".to_vec();
        assert!(matches!(
            read_header(&mut Cursor::new(bytes)),
            Err(DecodeError::NotWave)
        ));
    }

    #[test]
    fn eight_bit_samples_are_widened() {
        assert_eq!(to_i16(&[0, 128, 255], 8), vec![i16::MIN, 0, 127 << 8]);
    }

    #[test]
    fn decode_small_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "tiny.wav", &[0; 64]);
        assert!(matches!(
            WavDecoder::new().probe(&path),
            Err(DecodeError::TooSmall { size: 64 })
        ));
    }

    #[test]
    fn decode_stereo_to_mono() {
        let dir = tempfile::tempdir().unwrap();
        let mut data = Vec::new();
        for i in 0..100i16 {
            data.write_i16::<LittleEndian>(i * 2).unwrap();
            data.write_i16::<LittleEndian>(i * 4).unwrap();
        }
        let mut chunks = Vec::new();
        chunk(&mut chunks, b"fmt ", &fmt_body(1, 2, 8000, 16));
        chunk(&mut chunks, b"data", &data);
        let path = write_file(dir.path(), "stereo.wav", &riff(&chunks));

        let decoder = WavDecoder::new();
        let probed = decoder.probe(&path).unwrap();
        assert_eq!(probed.channels, 2);
        assert_eq!(probed.sample_rate, 8000);

        let pcm = decoder.decode(&path, &DecodeOptions::mono()).unwrap();
        assert_eq!(pcm.format, PcmFormat::mono16(8000));
        let samples = pcm.to_i16_samples();
        assert_eq!(samples.len(), 100);
        assert_eq!(samples[10], 30);
    }

    #[test]
    fn oversized_data_length_is_bounded_by_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut chunks = Vec::new();
        chunk(&mut chunks, b"fmt ", &fmt_body(1, 1, 8000, 16));
        chunks.extend_from_slice(b"data");
        chunks.write_u32::<LittleEndian>(u32::MAX).unwrap();
        for i in 0..100i16 {
            chunks.write_i16::<LittleEndian>(i).unwrap();
        }
        let bytes = riff(&chunks);
        let path = write_file(dir.path(), "streamed.wav", &bytes);

        let mut reader = Cursor::new(bytes.clone());
        let header = read_header(&mut reader).unwrap();
        assert_eq!(header.data_len, u32::MAX);
        let raw = read_data(&mut reader, header.data_len, bytes.len() as u64).unwrap();
        assert_eq!(raw.len(), 200);
        assert!(raw.capacity() <= bytes.len());

        let pcm = WavDecoder::new().decode(&path, &DecodeOptions::mono()).unwrap();
        let samples = pcm.to_i16_samples();
        assert_eq!(samples.len(), 100);
        assert_eq!(samples[99], 99);
    }

    #[test]
    fn missing_file_is_open_error() {
        let err = WavDecoder::new()
            .probe(Path::new("/nonexistent/voice.wav"))
            .unwrap_err();
        assert!(matches!(err, DecodeError::FileOpen { .. }));
    }
}
