//! Raw PCM format description and in-memory sample buffers.
//!
//! Every stage that touches uncompressed audio (decoders, resampler, track
//! assembly, container writer) passes the byte order along with the bytes,
//! so nothing downstream has to assume one.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Byte order of multi-byte PCM samples.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleOrder {
    #[default]
    LittleEndian,
    BigEndian,
}

/// Layout of an interleaved, signed (16-bit) or unsigned (8-bit) PCM stream.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PcmFormat {
    /// Sample frames per second.
    pub sample_rate: u32,
    /// Bits per sample: 8 (unsigned) or 16 (signed).
    pub bits_per_sample: u16,
    pub channels: u16,
    pub byte_order: SampleOrder,
}

impl PcmFormat {
    pub fn new(sample_rate: u32, bits_per_sample: u16, channels: u16, byte_order: SampleOrder) -> Self {
        Self {
            sample_rate,
            bits_per_sample,
            channels,
            byte_order,
        }
    }

    /// Signed 16-bit little-endian mono, the format of every assembled track.
    pub fn mono16(sample_rate: u32) -> Self {
        Self::new(sample_rate, 16, 1, SampleOrder::LittleEndian)
    }

    pub fn bytes_per_sample(&self) -> u32 {
        u32::from(self.bits_per_sample).div_ceil(8)
    }

    /// Bytes in one sample frame (one sample for every channel).
    pub fn frame_size(&self) -> u32 {
        self.bytes_per_sample() * u32::from(self.channels)
    }

    /// Byte count covering `millis` of audio, rounded up to a whole sample frame.
    ///
    /// For 16-bit mono this is `rate * 2 * ms / 1000`, plus one when odd.
    pub fn bytes_for_millis(&self, millis: u64) -> u64 {
        let frame = u64::from(self.frame_size().max(1));
        let raw = u64::from(self.sample_rate) * frame * millis / 1000;
        raw.div_ceil(frame) * frame
    }

    /// Duration in milliseconds of `bytes` of audio (truncating).
    pub fn millis_for_bytes(&self, bytes: u64) -> u64 {
        let per_second = u64::from(self.sample_rate) * u64::from(self.frame_size());
        if per_second == 0 {
            return 0;
        }
        bytes * 1000 / per_second
    }

    /// Whether the sample rate and bit depth already match `other`.
    pub fn same_rate_and_depth(&self, other: &PcmFormat) -> bool {
        self.sample_rate == other.sample_rate && self.bits_per_sample == other.bits_per_sample
    }
}

impl fmt::Display for PcmFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let order = match self.byte_order {
            SampleOrder::LittleEndian => "le",
            SampleOrder::BigEndian => "be",
        };
        write!(
            f,
            "{}Hz/{}bit/{}ch/{}",
            self.sample_rate, self.bits_per_sample, self.channels, order
        )
    }
}

/// Interleaved PCM bytes together with their format.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PcmBuffer {
    pub format: PcmFormat,
    pub data: Vec<u8>,
}

impl PcmBuffer {
    pub fn new(format: PcmFormat, data: Vec<u8>) -> Self {
        Self { format, data }
    }

    /// Build a 16-bit buffer from signed samples, encoded in `format.byte_order`.
    pub fn from_i16_samples(format: PcmFormat, samples: &[i16]) -> Self {
        let mut data = Vec::with_capacity(samples.len() * 2);
        for &s in samples {
            match format.byte_order {
                SampleOrder::LittleEndian => data.extend_from_slice(&s.to_le_bytes()),
                SampleOrder::BigEndian => data.extend_from_slice(&s.to_be_bytes()),
            }
        }
        Self { format, data }
    }

    /// Decode the bytes as signed 16-bit samples. A trailing odd byte is ignored.
    pub fn to_i16_samples(&self) -> Vec<i16> {
        self.data
            .chunks_exact(2)
            .map(|pair| match self.format.byte_order {
                SampleOrder::LittleEndian => i16::from_le_bytes([pair[0], pair[1]]),
                SampleOrder::BigEndian => i16::from_be_bytes([pair[0], pair[1]]),
            })
            .collect()
    }

    /// Number of whole sample frames held.
    pub fn frames(&self) -> u64 {
        match self.format.frame_size() {
            0 => 0,
            size => self.data.len() as u64 / u64::from(size),
        }
    }

    /// Convert to the requested byte order, swapping sample byte pairs when needed.
    pub fn into_byte_order(mut self, order: SampleOrder) -> Self {
        if self.format.byte_order != order && self.format.bits_per_sample == 16 {
            swap_byte_pairs(&mut self.data);
        }
        self.format.byte_order = order;
        self
    }

    /// Truncate or silence-pad so the buffer covers exactly `millis`.
    pub fn fit_to_millis(&mut self, millis: u64) {
        let target = self.format.bytes_for_millis(millis) as usize;
        let silence = if self.format.bits_per_sample == 8 { 0x80 } else { 0 };
        self.data.resize(target, silence);
    }
}

/// Swap every byte pair in place (16-bit endianness conversion).
///
/// A trailing odd byte is left untouched.
pub fn swap_byte_pairs(data: &mut [u8]) {
    for pair in data.chunks_exact_mut(2) {
        pair.swap(0, 1);
    }
}
