//! Per-track sample bookkeeping: durations, sizes, chunk grouping and
//! chunk offsets, plus their encoding as `stts`/`stsz`/`stsc`/`stco` atoms.

use crate::atoms::{Atom, Payload};

/// Run-length encoded sample durations (`stts`).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TimeToSample {
    /// (sample count, sample duration) rows.
    entries: Vec<(u32, u32)>,
}

impl TimeToSample {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one sample, merging with the previous row when the duration repeats.
    pub fn add(&mut self, duration: u32) {
        self.add_run(1, duration);
    }

    pub fn add_run(&mut self, count: u32, duration: u32) {
        if count == 0 {
            return;
        }
        match self.entries.last_mut() {
            Some((n, d)) if *d == duration => *n += count,
            _ => self.entries.push((count, duration)),
        }
    }

    pub fn entries(&self) -> &[(u32, u32)] {
        &self.entries
    }

    pub fn sample_count(&self) -> u64 {
        self.entries.iter().map(|&(n, _)| u64::from(n)).sum()
    }

    /// Sum of every sample's duration, in the track's timescale.
    pub fn total_duration(&self) -> u64 {
        self.entries
            .iter()
            .map(|&(n, d)| u64::from(n) * u64::from(d))
            .sum()
    }

    pub fn to_atom(&self) -> Atom {
        let mut payload = Payload::full(0, 0);
        payload.u32(self.entries.len() as u32);
        for &(count, duration) in &self.entries {
            payload.u32(count).u32(duration);
        }
        payload.into_atom(b"stts")
    }
}

/// Sample byte sizes (`stsz`): one size shared by every sample, or one per sample.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SampleSizes {
    Uniform { size: u32, count: u32 },
    Varying(Vec<u32>),
}

impl Default for SampleSizes {
    fn default() -> Self {
        Self::Varying(Vec::new())
    }
}

impl SampleSizes {
    pub fn uniform(size: u32, count: u32) -> Self {
        Self::Uniform { size, count }
    }

    pub fn push(&mut self, sample_size: u32) {
        match self {
            Self::Varying(sizes) => sizes.push(sample_size),
            Self::Uniform { size, count } if *size == sample_size => *count += 1,
            Self::Uniform { size, count } => {
                let mut sizes = vec![*size; *count as usize];
                sizes.push(sample_size);
                *self = Self::Varying(sizes);
            }
        }
    }

    pub fn sample_count(&self) -> u64 {
        match self {
            Self::Uniform { count, .. } => u64::from(*count),
            Self::Varying(sizes) => sizes.len() as u64,
        }
    }

    pub fn total_bytes(&self) -> u64 {
        match self {
            Self::Uniform { size, count } => u64::from(*size) * u64::from(*count),
            Self::Varying(sizes) => sizes.iter().map(|&s| u64::from(s)).sum(),
        }
    }

    pub fn to_atom(&self) -> Atom {
        let mut payload = Payload::full(0, 0);
        match self {
            Self::Uniform { size, count } => {
                payload.u32(*size).u32(*count);
            }
            Self::Varying(sizes) => {
                payload.u32(0).u32(sizes.len() as u32);
                for &size in sizes {
                    payload.u32(size);
                }
            }
        }
        payload.into_atom(b"stsz")
    }
}

/// One `stsc` row: from `first_chunk` (1-based) on, every chunk holds
/// `samples_per_chunk` samples.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ChunkRun {
    pub first_chunk: u32,
    pub samples_per_chunk: u32,
    pub description_id: u32,
}

/// Samples-per-chunk groupings (`stsc`).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SampleToChunk {
    runs: Vec<ChunkRun>,
    chunks: u32,
}

impl SampleToChunk {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the next chunk. A row is only added when the sample count
    /// differs from the previous chunk's.
    pub fn push_chunk(&mut self, samples: u32) {
        self.chunks += 1;
        match self.runs.last() {
            Some(run) if run.samples_per_chunk == samples => {}
            _ => self.runs.push(ChunkRun {
                first_chunk: self.chunks,
                samples_per_chunk: samples,
                description_id: 1,
            }),
        }
    }

    pub fn runs(&self) -> &[ChunkRun] {
        &self.runs
    }

    pub fn chunk_count(&self) -> u32 {
        self.chunks
    }

    /// Samples covered by every chunk recorded so far.
    pub fn sample_count(&self) -> u64 {
        self.runs
            .iter()
            .enumerate()
            .map(|(i, run)| {
                let next = self
                    .runs
                    .get(i + 1)
                    .map_or(self.chunks + 1, |r| r.first_chunk);
                u64::from(next - run.first_chunk) * u64::from(run.samples_per_chunk)
            })
            .sum()
    }

    pub fn to_atom(&self) -> Atom {
        let mut payload = Payload::full(0, 0);
        payload.u32(self.runs.len() as u32);
        for run in &self.runs {
            payload
                .u32(run.first_chunk)
                .u32(run.samples_per_chunk)
                .u32(run.description_id);
        }
        payload.into_atom(b"stsc")
    }
}

/// Absolute file offsets of each chunk (`stco`, or `co64` past 4 GiB).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChunkOffsets(Vec<u64>);

impl ChunkOffsets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, offset: u64) {
        self.0.push(offset);
    }

    pub fn as_slice(&self) -> &[u64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn needs_co64(&self) -> bool {
        self.0.iter().any(|&o| o > u64::from(u32::MAX))
    }

    pub fn to_atom(&self) -> Atom {
        let mut payload = Payload::full(0, 0);
        payload.u32(self.0.len() as u32);
        if self.needs_co64() {
            for &offset in &self.0 {
                payload.u64(offset);
            }
            payload.into_atom(b"co64")
        } else {
            for &offset in &self.0 {
                payload.u32(offset as u32);
            }
            payload.into_atom(b"stco")
        }
    }
}

/// Everything `stbl` needs besides the sample description.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SampleTable {
    pub durations: TimeToSample,
    pub sizes: SampleSizes,
    pub chunks: SampleToChunk,
    pub offsets: ChunkOffsets,
}

impl SampleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// `stts`, `stsc`, `stsz` and the chunk offset atom, in that order.
    pub fn to_atoms(&self) -> Vec<Atom> {
        vec![
            self.durations.to_atom(),
            self.chunks.to_atom(),
            self.sizes.to_atom(),
            self.offsets.to_atom(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::AtomBody;
    use byteorder::{BigEndian, ByteOrder};

    fn data(atom: &Atom) -> &[u8] {
        match atom.body() {
            AtomBody::Data(d) => d,
            AtomBody::Children(_) => panic!("expected a leaf"),
        }
    }

    #[test]
    fn durations_run_length_encode() {
        let mut stts = TimeToSample::new();
        for d in [1000, 1000, 2000, 1000, 1000, 1000] {
            stts.add(d);
        }
        assert_eq!(stts.entries(), &[(2, 1000), (1, 2000), (3, 1000)]);
        assert_eq!(stts.sample_count(), 6);
        assert_eq!(stts.total_duration(), 7000);

        let atom = stts.to_atom();
        assert_eq!(atom.kind(), b"stts");
        assert_eq!(atom.size(), 8 + 8 + 3 * 8);
        assert_eq!(BigEndian::read_u32(&data(&atom)[4..8]), 3);
    }

    #[test]
    fn zero_count_run_is_ignored() {
        let mut stts = TimeToSample::new();
        stts.add_run(0, 5);
        assert!(stts.entries().is_empty());
    }

    #[test]
    fn chunk_runs_compact_equal_counts() {
        let mut stsc = SampleToChunk::new();
        for samples in [44_100, 44_100, 44_100, 22_050, 22_050, 100] {
            stsc.push_chunk(samples);
        }
        assert_eq!(stsc.chunk_count(), 6);
        let firsts: Vec<u32> = stsc.runs().iter().map(|r| r.first_chunk).collect();
        assert_eq!(firsts, vec![1, 4, 6]);
        assert_eq!(stsc.sample_count(), 3 * 44_100 + 2 * 22_050 + 100);
    }

    #[test]
    fn uniform_sizes_encode_without_table() {
        let sizes = SampleSizes::uniform(1, 88_200);
        assert_eq!(sizes.sample_count(), 88_200);
        let atom = sizes.to_atom();
        assert_eq!(atom.size(), 20);
        assert_eq!(BigEndian::read_u32(&data(&atom)[4..8]), 1);
        assert_eq!(BigEndian::read_u32(&data(&atom)[8..12]), 88_200);
    }

    #[test]
    fn varying_sizes_list_every_sample() {
        let mut sizes = SampleSizes::default();
        sizes.push(1200);
        sizes.push(900);
        assert_eq!(sizes.total_bytes(), 2100);
        let atom = sizes.to_atom();
        assert_eq!(atom.size(), 20 + 8);
        assert_eq!(BigEndian::read_u32(&data(&atom)[12..16]), 1200);
    }

    #[test]
    fn uniform_sizes_become_varying_on_mismatch() {
        let mut sizes = SampleSizes::uniform(4, 2);
        sizes.push(4);
        assert_eq!(sizes, SampleSizes::uniform(4, 3));
        sizes.push(6);
        assert_eq!(sizes, SampleSizes::Varying(vec![4, 4, 4, 6]));
    }

    #[test]
    fn chunk_offsets_switch_to_co64() {
        let mut offsets = ChunkOffsets::new();
        offsets.push(48);
        assert_eq!(offsets.to_atom().kind(), b"stco");
        offsets.push(u64::from(u32::MAX) + 10);
        let atom = offsets.to_atom();
        assert_eq!(atom.kind(), b"co64");
        assert_eq!(atom.size(), 16 + 16);
        assert_eq!(BigEndian::read_u64(&data(&atom)[8..16]), 48);
    }

    #[test]
    fn table_atoms_are_in_stbl_order() {
        let table = SampleTable::new();
        let kinds: Vec<[u8; 4]> = table.to_atoms().iter().map(|a| *a.kind()).collect();
        assert_eq!(kinds, vec![*b"stts", *b"stsc", *b"stsz", *b"stco"]);
    }
}
