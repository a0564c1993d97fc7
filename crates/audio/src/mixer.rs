//! Sample-wise averaging of parallel 16-bit little-endian PCM tracks.
//!
//! Tracks are streamed through fixed-size blocks, so mixing a long
//! narrative never holds more than one block per track in memory.

use std::io::{self, Read, Write};

/// Bytes read from each track per mixing round.
pub const MIX_BLOCK_SIZE: usize = 4096;

/// Floor average of two samples without widening.
#[inline]
pub fn average2(a: i16, b: i16) -> i16 {
    (a >> 1) + (b >> 1) + (a & b & 1)
}

/// Average of three samples (truncated toward zero).
#[inline]
pub fn average3(a: i16, b: i16, c: i16) -> i16 {
    ((i32::from(a) + i32::from(b) + i32::from(c)) / 3) as i16
}

/// Average of any number of samples, accumulated in `i32`.
pub fn average_many(samples: &[i16]) -> i16 {
    match samples {
        [] => 0,
        [a] => *a,
        [a, b] => average2(*a, *b),
        [a, b, c] => average3(*a, *b, *c),
        _ => {
            let sum: i32 = samples.iter().map(|&s| i32::from(s)).sum();
            (sum / samples.len() as i32) as i16
        }
    }
}

/// Streams N readers of equal-format PCM into one averaged writer.
///
/// Inputs that end early contribute silence for the rest of the mix, so the
/// output is as long as the longest input.
#[derive(Clone, Debug)]
pub struct BlockMixer {
    block_size: usize,
}

impl Default for BlockMixer {
    fn default() -> Self {
        Self::new(MIX_BLOCK_SIZE)
    }
}

struct Lane {
    buf: Vec<u8>,
    filled: usize,
    eof: bool,
}

impl Lane {
    /// Top the buffer up, retrying short reads until it is full or the
    /// reader is exhausted.
    fn fill<R: Read>(&mut self, reader: &mut R) -> io::Result<()> {
        while self.filled < self.buf.len() && !self.eof {
            match reader.read(&mut self.buf[self.filled..]) {
                Ok(0) => self.eof = true,
                Ok(n) => self.filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn sample(&self, index: usize) -> i16 {
        let at = index * 2;
        if at + 1 < self.filled {
            i16::from_le_bytes([self.buf[at], self.buf[at + 1]])
        } else {
            0
        }
    }

    /// Drop `used` bytes, moving any remainder to the front.
    fn consume(&mut self, used: usize) {
        let used = used.min(self.filled);
        self.buf.copy_within(used..self.filled, 0);
        self.filled -= used;
    }
}

impl BlockMixer {
    /// `block_size` is rounded up to a whole number of samples.
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size: block_size.max(2).next_multiple_of(2),
        }
    }

    /// Mix every reader into `output`, returning the bytes written.
    pub fn mix<R: Read, W: Write>(&self, inputs: &mut [R], output: &mut W) -> io::Result<u64> {
        let mut lanes: Vec<Lane> = inputs
            .iter()
            .map(|_| Lane {
                buf: vec![0; self.block_size],
                filled: 0,
                eof: false,
            })
            .collect();
        let mut out = Vec::with_capacity(self.block_size);
        let mut frame = Vec::with_capacity(inputs.len());
        let mut written = 0u64;

        loop {
            for (lane, reader) in lanes.iter_mut().zip(inputs.iter_mut()) {
                lane.fill(reader)?;
            }

            // Whole samples only; a trailing odd byte waits for the next round
            let usable = lanes.iter().map(|l| l.filled).max().unwrap_or(0) & !1;
            if usable == 0 {
                break;
            }

            out.clear();
            for i in 0..usable / 2 {
                frame.clear();
                frame.extend(lanes.iter().map(|l| l.sample(i)));
                out.extend_from_slice(&average_many(&frame).to_le_bytes());
            }
            output.write_all(&out)?;
            written += out.len() as u64;

            for lane in &mut lanes {
                lane.consume(usable);
            }
        }

        output.flush()?;
        Ok(written)
    }
}
