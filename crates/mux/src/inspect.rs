//! Read-only movie inspector.
//!
//! Walks the atom tree of a finished file (without loading `mdat`),
//! validates that every atom fits inside its parent, and summarises the
//! movie header and each track's sample tables.

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt};

use crate::error::{MuxError, MuxResult};
use crate::mov::EditEntry;
use crate::sample_table::ChunkRun;

const CONTAINERS: [&[u8; 4]; 8] = [
    b"moov", b"trak", b"mdia", b"minf", b"dinf", b"stbl", b"edts", b"udta",
];

/// One parsed atom. Leaf payloads are kept for everything except `mdat`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AtomNode {
    pub kind: [u8; 4],
    pub offset: u64,
    pub size: u64,
    pub header_len: u64,
    pub data: Option<Vec<u8>>,
    pub children: Vec<AtomNode>,
}

impl AtomNode {
    pub fn kind_str(&self) -> String {
        String::from_utf8_lossy(&self.kind).into_owned()
    }

    pub fn child(&self, kind: &[u8; 4]) -> Option<&AtomNode> {
        self.children.iter().find(|c| &c.kind == kind)
    }

    /// Follow a path of child types, e.g. `[b"mdia", b"minf", b"stbl"]`.
    pub fn descend(&self, path: &[&[u8; 4]]) -> Option<&AtomNode> {
        path.iter().try_fold(self, |node, kind| node.child(kind))
    }

    fn payload(&self) -> MuxResult<&[u8]> {
        self.data
            .as_deref()
            .ok_or_else(|| malformed(self, "missing payload"))
    }

    fn render(&self, depth: usize, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:indent$}{} @{} ({} bytes)",
            "",
            self.kind_str(),
            self.offset,
            self.size,
            indent = depth * 2
        )?;
        for child in &self.children {
            child.render(depth + 1, f)?;
        }
        Ok(())
    }
}

fn malformed(node: &AtomNode, reason: impl Into<String>) -> MuxError {
    MuxError::Malformed {
        kind: node.kind_str(),
        offset: node.offset,
        reason: reason.into(),
    }
}

/// Parse the atoms between `start` and `end`, recursing into containers.
pub fn read_atoms<R: Read + Seek>(reader: &mut R, start: u64, end: u64) -> MuxResult<Vec<AtomNode>> {
    let mut nodes = Vec::new();
    let mut pos = start;
    while pos < end {
        if end - pos < 8 {
            return Err(MuxError::Malformed {
                kind: "?".into(),
                offset: pos,
                reason: format!("{} trailing bytes cannot hold a header", end - pos),
            });
        }
        reader.seek(SeekFrom::Start(pos))?;
        let size32 = reader.read_u32::<BigEndian>()?;
        let mut kind = [0u8; 4];
        reader.read_exact(&mut kind)?;
        let (size, header_len) = match size32 {
            0 => (end - pos, 8),
            1 => (reader.read_u64::<BigEndian>()?, 16),
            n => (u64::from(n), 8),
        };

        let mut node = AtomNode {
            kind,
            offset: pos,
            size,
            header_len,
            data: None,
            children: Vec::new(),
        };
        if size < header_len || size > end - pos {
            return Err(malformed(
                &node,
                format!("size {size} does not fit in {} remaining bytes", end - pos),
            ));
        }

        if CONTAINERS.contains(&&kind) {
            node.children = read_atoms(reader, pos + header_len, pos + size)?;
        } else if &kind != b"mdat" {
            let mut data = vec![0u8; (size - header_len) as usize];
            reader.seek(SeekFrom::Start(pos + header_len))?;
            reader.read_exact(&mut data)?;
            node.data = Some(data);
        }
        nodes.push(node);
        pos += size;
    }
    Ok(nodes)
}

/// Sample-table summary of one track.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrackSummary {
    pub track_id: u32,
    /// Handler subtype: `vide` or `soun`.
    pub handler: String,
    /// Sample description format, e.g. `jpeg` or `twos`.
    pub sample_format: String,
    /// Presented duration in the movie timescale (`tkhd`).
    pub duration: u64,
    pub timescale: u32,
    /// Media duration in the track timescale (`mdhd`).
    pub media_duration: u64,
    /// Sample count declared by `stsz`.
    pub sample_count: u64,
    pub time_to_sample: Vec<(u32, u32)>,
    pub chunk_runs: Vec<ChunkRun>,
    pub chunk_offsets: Vec<u64>,
    pub edits: Vec<EditEntry>,
}

impl TrackSummary {
    pub fn stts_sample_count(&self) -> u64 {
        self.time_to_sample.iter().map(|&(n, _)| u64::from(n)).sum()
    }

    pub fn stts_duration(&self) -> u64 {
        self.time_to_sample
            .iter()
            .map(|&(n, d)| u64::from(n) * u64::from(d))
            .sum()
    }

    /// Samples covered by `stsc`, using the chunk offset count as the chunk count.
    pub fn stsc_sample_count(&self) -> u64 {
        let chunks = self.chunk_offsets.len() as u64;
        self.chunk_runs
            .iter()
            .enumerate()
            .map(|(i, run)| {
                let next = self
                    .chunk_runs
                    .get(i + 1)
                    .map_or(chunks + 1, |r| u64::from(r.first_chunk));
                next.saturating_sub(u64::from(run.first_chunk)) * u64::from(run.samples_per_chunk)
            })
            .sum()
    }
}

/// Parsed movie: the atom tree plus header and track summaries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MovieSummary {
    pub atoms: Vec<AtomNode>,
    pub timescale: u32,
    pub duration: u64,
    pub next_track_id: u32,
    /// (offset, size) of the media data atom.
    pub mdat: Option<(u64, u64)>,
    pub tracks: Vec<TrackSummary>,
}

impl MovieSummary {
    /// Whether every chunk offset lands inside the media data payload.
    pub fn offsets_in_mdat(&self) -> bool {
        let Some((offset, size)) = self.mdat else {
            return self.tracks.iter().all(|t| t.chunk_offsets.is_empty());
        };
        let payload = offset + 16..offset + size;
        self.tracks
            .iter()
            .flat_map(|t| &t.chunk_offsets)
            .all(|o| payload.contains(o))
    }
}

impl fmt::Display for MovieSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for node in &self.atoms {
            node.render(0, f)?;
        }
        writeln!(
            f,
            "movie: timescale {} duration {} next track {}",
            self.timescale, self.duration, self.next_track_id
        )?;
        for track in &self.tracks {
            writeln!(
                f,
                "track {} [{} {}]: duration {}, media {}/{}, {} samples (stts {}, stsc {}), {} chunks, {} edits",
                track.track_id,
                track.handler,
                track.sample_format,
                track.duration,
                track.media_duration,
                track.timescale,
                track.sample_count,
                track.stts_sample_count(),
                track.stsc_sample_count(),
                track.chunk_offsets.len(),
                track.edits.len()
            )?;
        }
        Ok(())
    }
}

/// Inspect a movie file on disk.
pub fn inspect_file(path: &Path) -> MuxResult<MovieSummary> {
    let file = File::open(path)?;
    let len = file.metadata()?.len();
    inspect(&mut BufReader::new(file), len)
}

/// Inspect a movie held in memory.
pub fn inspect_bytes(bytes: &[u8]) -> MuxResult<MovieSummary> {
    inspect(&mut Cursor::new(bytes), bytes.len() as u64)
}

pub fn inspect<R: Read + Seek>(reader: &mut R, len: u64) -> MuxResult<MovieSummary> {
    let atoms = read_atoms(reader, 0, len)?;
    let moov = atoms
        .iter()
        .find(|a| &a.kind == b"moov")
        .ok_or_else(|| MuxError::Malformed {
            kind: "moov".into(),
            offset: len,
            reason: "no movie atom".into(),
        })?;
    let mvhd = moov
        .child(b"mvhd")
        .ok_or_else(|| malformed(moov, "no movie header"))?;
    let (timescale, duration, next_track_id) =
        parse_mvhd(mvhd.payload()?).map_err(|e| malformed(mvhd, e.to_string()))?;

    let tracks = moov
        .children
        .iter()
        .filter(|c| &c.kind == b"trak")
        .map(summarize_track)
        .collect::<MuxResult<Vec<_>>>()?;
    let mdat = atoms
        .iter()
        .find(|a| &a.kind == b"mdat")
        .map(|a| (a.offset, a.size));

    Ok(MovieSummary {
        timescale,
        duration,
        next_track_id,
        mdat,
        tracks,
        atoms,
    })
}

fn required<'a>(node: &'a AtomNode, path: &[&[u8; 4]]) -> MuxResult<&'a AtomNode> {
    let found = node.descend(path).ok_or_else(|| {
        let names: Vec<String> = path
            .iter()
            .map(|k| String::from_utf8_lossy(&k[..]).into_owned())
            .collect();
        malformed(node, format!("missing {}", names.join("/")))
    })?;
    Ok(found)
}

/// Run a payload parser, reporting short payloads as malformed atoms.
fn parse_with<T>(node: &AtomNode, parse: impl FnOnce(&mut Cursor<&[u8]>) -> io::Result<T>) -> MuxResult<T> {
    let mut cursor = Cursor::new(node.payload()?);
    parse(&mut cursor).map_err(|e| malformed(node, e.to_string()))
}

fn summarize_track(trak: &AtomNode) -> MuxResult<TrackSummary> {
    let tkhd = required(trak, &[b"tkhd"])?;
    let mdhd = required(trak, &[b"mdia", b"mdhd"])?;
    let hdlr = required(trak, &[b"mdia", b"hdlr"])?;
    let stbl = required(trak, &[b"mdia", b"minf", b"stbl"])?;

    let mut summary = TrackSummary::default();
    (summary.track_id, summary.duration) = parse_with(tkhd, |r| {
        r.seek(SeekFrom::Start(12))?;
        let id = r.read_u32::<BigEndian>()?;
        r.seek(SeekFrom::Start(20))?;
        Ok((id, u64::from(r.read_u32::<BigEndian>()?)))
    })?;
    (summary.timescale, summary.media_duration) = parse_with(mdhd, |r| {
        r.seek(SeekFrom::Start(12))?;
        let scale = r.read_u32::<BigEndian>()?;
        Ok((scale, u64::from(r.read_u32::<BigEndian>()?)))
    })?;
    summary.handler = parse_with(hdlr, |r| {
        r.seek(SeekFrom::Start(8))?;
        read_fourcc(r)
    })?;
    summary.sample_format = parse_with(required(stbl, &[b"stsd"])?, |r| {
        r.seek(SeekFrom::Start(12))?;
        read_fourcc(r)
    })?;

    if let Some(stts) = stbl.child(b"stts") {
        summary.time_to_sample = parse_with(stts, |r| {
            r.seek(SeekFrom::Start(4))?;
            let count = r.read_u32::<BigEndian>()?;
            (0..count)
                .map(|_| Ok((r.read_u32::<BigEndian>()?, r.read_u32::<BigEndian>()?)))
                .collect()
        })?;
    }
    if let Some(stsz) = stbl.child(b"stsz") {
        summary.sample_count = parse_with(stsz, |r| {
            r.seek(SeekFrom::Start(8))?;
            Ok(u64::from(r.read_u32::<BigEndian>()?))
        })?;
    }
    if let Some(stsc) = stbl.child(b"stsc") {
        summary.chunk_runs = parse_with(stsc, |r| {
            r.seek(SeekFrom::Start(4))?;
            let count = r.read_u32::<BigEndian>()?;
            (0..count)
                .map(|_| {
                    Ok(ChunkRun {
                        first_chunk: r.read_u32::<BigEndian>()?,
                        samples_per_chunk: r.read_u32::<BigEndian>()?,
                        description_id: r.read_u32::<BigEndian>()?,
                    })
                })
                .collect()
        })?;
    }
    if let Some(stco) = stbl.child(b"stco") {
        summary.chunk_offsets = parse_with(stco, |r| {
            r.seek(SeekFrom::Start(4))?;
            let count = r.read_u32::<BigEndian>()?;
            (0..count)
                .map(|_| Ok(u64::from(r.read_u32::<BigEndian>()?)))
                .collect()
        })?;
    } else if let Some(co64) = stbl.child(b"co64") {
        summary.chunk_offsets = parse_with(co64, |r| {
            r.seek(SeekFrom::Start(4))?;
            let count = r.read_u32::<BigEndian>()?;
            (0..count).map(|_| r.read_u64::<BigEndian>()).collect()
        })?;
    }
    if let Some(elst) = trak.descend(&[b"edts", b"elst"]) {
        summary.edits = parse_with(elst, |r| {
            r.seek(SeekFrom::Start(4))?;
            let count = r.read_u32::<BigEndian>()?;
            (0..count)
                .map(|_| {
                    let duration = r.read_u32::<BigEndian>()?;
                    let media_time = r.read_i32::<BigEndian>()?;
                    r.read_u32::<BigEndian>()?; // rate
                    Ok(EditEntry {
                        duration,
                        media_time,
                    })
                })
                .collect()
        })?;
    }
    Ok(summary)
}

fn parse_mvhd(data: &[u8]) -> io::Result<(u32, u64, u32)> {
    let mut r = Cursor::new(data);
    r.seek(SeekFrom::Start(12))?;
    let timescale = r.read_u32::<BigEndian>()?;
    let duration = u64::from(r.read_u32::<BigEndian>()?);
    r.seek(SeekFrom::Start(96))?;
    let next = r.read_u32::<BigEndian>()?;
    Ok((timescale, duration, next))
}

fn read_fourcc<R: Read>(r: &mut R) -> io::Result<String> {
    let mut code = [0u8; 4];
    r.read_exact(&mut code)?;
    Ok(String::from_utf8_lossy(&code).into_owned())
}
