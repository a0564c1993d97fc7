//! Sample rate and bit depth conversion for decoded PCM.
//!
//! Conversion runs in two passes over signed 16-bit samples:
//!
//! 1. When downsampling, a windowed-sinc low-pass filter removes content
//!    above the target Nyquist frequency so it does not alias.
//! 2. A linear interpolator steps through the filtered input at the
//!    target rate.
//!
//! 8-bit unsigned input is widened before the passes and narrowed again
//! afterwards when 8-bit output is requested.

use reel_common::{PcmBuffer, PcmFormat, SampleOrder};
use tracing::debug;

use crate::error::ResampleError;

/// Taps in the anti-alias filter (odd, so the filter has a centre tap).
const FILTER_TAPS: usize = 63;

/// Fraction of the target Nyquist frequency kept by the anti-alias filter.
const CUTOFF_MARGIN: f64 = 0.9;

/// Linear interpolation resampler for interleaved 16-bit audio.
///
/// Keeps the fractional read position and the last input frame between
/// calls to [`process`](Self::process), so a stream can be fed in chunks.
/// [`finish`](Self::finish) emits the output frames still owed once the
/// input has ended.
pub struct Resampler {
    from_rate: u32,
    to_rate: u32,
    channels: u16,
    /// Input frames advanced per output frame.
    step: f64,
    /// Read position relative to the next chunk; `-1.0..0.0` falls between
    /// the previous chunk's last frame and the next chunk's first.
    fractional_pos: f64,
    last_samples: Vec<i16>,
    primed: bool,
}

impl Resampler {
    pub fn new(from_rate: u32, to_rate: u32, channels: u16) -> Result<Self, ResampleError> {
        if from_rate == 0 || to_rate == 0 {
            return Err(ResampleError::InvalidRate {
                from: from_rate,
                to: to_rate,
            });
        }
        if channels == 0 {
            return Err(ResampleError::UnsupportedChannels(channels));
        }
        Ok(Self {
            from_rate,
            to_rate,
            channels,
            step: f64::from(from_rate) / f64::from(to_rate),
            fractional_pos: 0.0,
            last_samples: vec![0; usize::from(channels)],
            primed: false,
        })
    }

    /// Resample a chunk of interleaved samples.
    pub fn process(&mut self, input: &[i16]) -> Vec<i16> {
        let ch = usize::from(self.channels);
        let input_frames = input.len() / ch;
        if input_frames == 0 {
            return Vec::new();
        }
        if self.from_rate == self.to_rate {
            return input[..input_frames * ch].to_vec();
        }

        let estimated = (input_frames as f64 / self.step).ceil() as usize + 1;
        let mut output = Vec::with_capacity(estimated * ch);

        if !self.primed {
            self.last_samples.copy_from_slice(&input[..ch]);
            self.primed = true;
        }

        let sample_at = |frame: isize, c: usize, last: &[i16]| -> f64 {
            if frame < 0 {
                f64::from(last[c])
            } else {
                f64::from(input[frame as usize * ch + c])
            }
        };

        let mut pos = self.fractional_pos;
        // Stop while the right-hand neighbour is still inside this chunk
        while pos.floor() as isize + 1 < input_frames as isize {
            let idx = pos.floor() as isize;
            let frac = pos - idx as f64;
            for c in 0..ch {
                let a = sample_at(idx, c, &self.last_samples);
                let b = sample_at(idx + 1, c, &self.last_samples);
                output.push(clamp_i16(a + (b - a) * frac));
            }
            pos += self.step;
        }

        self.fractional_pos = pos - input_frames as f64;
        self.last_samples
            .copy_from_slice(&input[(input_frames - 1) * ch..input_frames * ch]);

        output
    }

    /// Emit the frames still owed after the last chunk, holding the final
    /// input frame.
    pub fn finish(&mut self) -> Vec<i16> {
        let mut output = Vec::new();
        if !self.primed || self.from_rate == self.to_rate {
            return output;
        }
        while self.fractional_pos < 0.0 {
            output.extend_from_slice(&self.last_samples);
            self.fractional_pos += self.step;
        }
        output
    }
}

/// Windowed-sinc FIR low-pass filter.
pub struct LowPassFilter {
    taps: Vec<f64>,
}

impl LowPassFilter {
    /// Filter passing frequencies below `cutoff`, given as a fraction of the
    /// sample rate (`0.0..0.5`).
    pub fn new(cutoff: f64, num_taps: usize) -> Self {
        let num_taps = num_taps.max(1) | 1;
        let centre = (num_taps / 2) as f64;
        let span = (num_taps - 1).max(1) as f64;
        let mut taps: Vec<f64> = (0..num_taps)
            .map(|n| {
                let x = n as f64 - centre;
                let sinc = if x == 0.0 {
                    2.0 * cutoff
                } else {
                    (2.0 * std::f64::consts::PI * cutoff * x).sin() / (std::f64::consts::PI * x)
                };
                // Blackman window
                let phase = 2.0 * std::f64::consts::PI * n as f64 / span;
                let window = 0.42 - 0.5 * phase.cos() + 0.08 * (2.0 * phase).cos();
                sinc * window
            })
            .collect();

        let gain: f64 = taps.iter().sum();
        if gain.abs() > f64::EPSILON {
            for t in &mut taps {
                *t /= gain;
            }
        }
        Self { taps }
    }

    /// Filter interleaved samples, one channel at a time, with zero-padded
    /// edges and no group delay.
    pub fn apply(&self, input: &[i16], channels: usize) -> Vec<i16> {
        let frames = input.len() / channels.max(1);
        let half = (self.taps.len() / 2) as isize;
        let mut output = vec![0i16; frames * channels];

        for c in 0..channels {
            for i in 0..frames {
                let mut acc = 0.0;
                for (k, tap) in self.taps.iter().enumerate() {
                    let j = i as isize + k as isize - half;
                    if j >= 0 && (j as usize) < frames {
                        acc += tap * f64::from(input[j as usize * channels + c]);
                    }
                }
                output[i * channels + c] = clamp_i16(acc);
            }
        }
        output
    }
}

fn clamp_i16(value: f64) -> i16 {
    value.round().clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16
}

fn widen(pcm: &PcmBuffer) -> Vec<i16> {
    match pcm.format.bits_per_sample {
        8 => pcm.data.iter().map(|&b| (i16::from(b) - 128) << 8).collect(),
        _ => pcm.to_i16_samples(),
    }
}

fn narrow(samples: &[i16], format: PcmFormat) -> PcmBuffer {
    match format.bits_per_sample {
        8 => {
            let data = samples.iter().map(|&s| ((s >> 8) + 128) as u8).collect();
            PcmBuffer::new(format, data)
        }
        _ => PcmBuffer::from_i16_samples(format, samples),
    }
}

/// Convert `pcm` to `to_rate` Hz and `to_bits` bits per sample.
///
/// Channel count and byte order are preserved. A buffer already in the
/// target rate and depth is returned unchanged.
pub fn resample(pcm: &PcmBuffer, to_rate: u32, to_bits: u16) -> Result<PcmBuffer, ResampleError> {
    let from = pcm.format;
    if from.sample_rate == 0 || to_rate == 0 {
        return Err(ResampleError::InvalidRate {
            from: from.sample_rate,
            to: to_rate,
        });
    }
    for bits in [from.bits_per_sample, to_bits] {
        if bits != 8 && bits != 16 {
            return Err(ResampleError::UnsupportedBitDepth(bits));
        }
    }
    if !(1..=2).contains(&from.channels) {
        return Err(ResampleError::UnsupportedChannels(from.channels));
    }
    let frame_size = from.frame_size();
    if pcm.data.len() % frame_size as usize != 0 {
        return Err(ResampleError::Misaligned {
            len: pcm.data.len(),
            frame_size,
        });
    }

    let target = PcmFormat::new(to_rate, to_bits, from.channels, from.byte_order);
    if from.sample_rate == to_rate && from.bits_per_sample == to_bits {
        return Ok(pcm.clone());
    }

    let channels = usize::from(from.channels);
    let mut samples = widen(pcm);

    if to_rate < from.sample_rate {
        let cutoff = 0.5 * f64::from(to_rate) / f64::from(from.sample_rate) * CUTOFF_MARGIN;
        samples = LowPassFilter::new(cutoff, FILTER_TAPS).apply(&samples, channels);
    }

    if to_rate != from.sample_rate {
        let mut resampler = Resampler::new(from.sample_rate, to_rate, from.channels)?;
        let mut out = resampler.process(&samples);
        out.extend(resampler.finish());
        samples = out;
    }

    debug!(
        from = %from,
        to = %target,
        frames = samples.len() / channels,
        "Resampled PCM"
    );

    Ok(narrow(&samples, target))
}

/// [`resample`] into 16-bit little-endian, the assembler's working format.
pub fn resample_to_mono16(pcm: &PcmBuffer, to_rate: u32) -> Result<PcmBuffer, ResampleError> {
    Ok(resample(pcm, to_rate, 16)?.into_byte_order(SampleOrder::LittleEndian))
}
