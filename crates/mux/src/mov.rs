//! QuickTime atom builders.
//!
//! Every function returns a finished [`Atom`]; the writer assembles them
//! into the `moov` tree once all samples are known.

use reel_common::PcmFormat;

use crate::atoms::{mac_time_now, Atom, Payload, MOVIE_TIMESCALE};
use crate::sample_table::SampleTable;

/// `ftyp` is always 32 bytes so `mdat` starts at a fixed offset.
pub const FTYP_SIZE: u64 = 32;

const BRAND_QT: &[u8; 4] = b"qt  ";
const FTYP_MINOR_VERSION: u32 = 0x2005_0300;

/// Track header flags: enabled | in movie | in preview | in poster.
const TRACK_FLAGS: u32 = 0x0F;

/// `vmhd` graphics mode: dither copy.
const GRAPHICS_MODE_DITHER_COPY: u16 = 0x40;

const JPEG_COMPRESSOR_NAME: &str = "Photo - JPEG";
const SAMPLE_DESCRIPTION_JPEG_LEN: u32 = 86;
const SAMPLE_DESCRIPTION_SOUND_LEN: u32 = 36;

/// One row of an edit list. `media_time` -1 marks an empty (skip) edit.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EditEntry {
    /// Duration in the movie timescale.
    pub duration: u32,
    /// Start inside the media, in the track's own timescale.
    pub media_time: i32,
}

impl EditEntry {
    pub fn skip(duration: u32) -> Self {
        Self {
            duration,
            media_time: -1,
        }
    }

    pub fn play(duration: u32, media_time: i32) -> Self {
        Self {
            duration,
            media_time,
        }
    }
}

pub fn ftyp() -> Atom {
    let mut payload = Payload::new();
    payload
        .bytes(BRAND_QT)
        .u32(FTYP_MINOR_VERSION)
        .bytes(BRAND_QT)
        .zeros(12);
    payload.into_atom(b"ftyp")
}

/// Movie header. `duration` is in the movie timescale.
pub fn mvhd(duration: u64, next_track_id: u32) -> Atom {
    let now = mac_time_now();
    let mut payload = Payload::full(0, 0);
    payload
        .u32(now)
        .u32(now)
        .u32(MOVIE_TIMESCALE)
        .u32(duration as u32)
        .fixed16_16(1.0) // preferred rate
        .fixed8_8(1.0) // preferred volume
        .zeros(10)
        .unity_matrix()
        .zeros(24) // preview, poster, selection and current times
        .u32(next_track_id);
    payload.into_atom(b"mvhd")
}

/// Track header. Video tracks carry their size, sound tracks their volume.
pub fn tkhd(track_id: u32, duration: u64, width: u32, height: u32, volume: f64) -> Atom {
    let now = mac_time_now();
    let mut payload = Payload::full(0, TRACK_FLAGS);
    payload
        .u32(now)
        .u32(now)
        .u32(track_id)
        .u32(0)
        .u32(duration as u32)
        .zeros(8)
        .u16(0) // layer
        .u16(0) // alternate group
        .fixed8_8(volume)
        .u16(0)
        .unity_matrix()
        .fixed16_16(f64::from(width))
        .fixed16_16(f64::from(height));
    payload.into_atom(b"tkhd")
}

pub fn mdhd(timescale: u32, duration: u64) -> Atom {
    let now = mac_time_now();
    let mut payload = Payload::full(0, 0);
    payload
        .u32(now)
        .u32(now)
        .u32(timescale)
        .u32(duration as u32)
        .u16(0) // language
        .u16(0); // quality
    payload.into_atom(b"mdhd")
}

/// Handler reference: `mhlr` (media) or `dhlr` (data) with a subtype.
pub fn hdlr(component_type: &[u8; 4], subtype: &[u8; 4]) -> Atom {
    let mut payload = Payload::full(0, 0);
    payload
        .bytes(component_type)
        .bytes(subtype)
        .u32(0) // manufacturer
        .u32(0)
        .u32(0)
        .u8(0); // empty name
    payload.into_atom(b"hdlr")
}

pub fn vmhd() -> Atom {
    let mut payload = Payload::full(0, 1);
    payload
        .u16(GRAPHICS_MODE_DITHER_COPY)
        .u16(0x8000)
        .u16(0x8000)
        .u16(0x8000);
    payload.into_atom(b"vmhd")
}

pub fn smhd() -> Atom {
    let mut payload = Payload::full(0, 0);
    payload.i16(0).u16(0);
    payload.into_atom(b"smhd")
}

/// Data information: one `alis` reference to this file (flags 1).
pub fn dinf() -> Atom {
    let mut dref = Payload::full(0, 0);
    dref.u32(1).u32(12).bytes(b"alis").u32(1);
    Atom::parent(b"dinf", vec![dref.into_atom(b"dref")])
}

/// Sample description for Photo-JPEG frames of the given size.
pub fn stsd_jpeg(width: u32, height: u32) -> Atom {
    let mut payload = Payload::full(0, 0);
    payload
        .u32(1)
        .u32(SAMPLE_DESCRIPTION_JPEG_LEN)
        .bytes(b"jpeg")
        .zeros(6)
        .u16(1) // data reference index
        .u16(0) // version
        .u16(0) // revision
        .u32(0) // vendor
        .u32(0) // temporal quality
        .u32(0x200) // spatial quality: normal
        .u16(width as u16)
        .u16(height as u16)
        .fixed16_16(72.0)
        .fixed16_16(72.0)
        .u32(0) // data size
        .u16(1) // frames per sample
        .pascal_string(JPEG_COMPRESSOR_NAME, 32)
        .u16(24) // depth
        .i16(-1); // no color table
    payload.into_atom(b"stsd")
}

/// Version-0 sound description: `twos` for signed 16-bit big-endian,
/// `raw ` for unsigned 8-bit.
pub fn stsd_sound(format: &PcmFormat) -> Atom {
    let codec: &[u8; 4] = if format.bits_per_sample > 8 { b"twos" } else { b"raw " };
    // 16.16 field; the exact rate is the media timescale
    let rate = format.sample_rate.min(u32::from(u16::MAX));
    let mut payload = Payload::full(0, 0);
    payload
        .u32(1)
        .u32(SAMPLE_DESCRIPTION_SOUND_LEN)
        .bytes(codec)
        .zeros(6)
        .u16(1) // data reference index
        .u16(0) // version
        .u16(0) // revision
        .u32(0) // vendor
        .u16(format.channels)
        .u16(format.bits_per_sample)
        .u16(0) // compression id
        .u16(0) // packet size
        .u32(rate << 16);
    payload.into_atom(b"stsd")
}

pub fn edts(entries: &[EditEntry]) -> Atom {
    let mut payload = Payload::full(0, 0);
    payload.u32(entries.len() as u32);
    for entry in entries {
        payload
            .u32(entry.duration)
            .i32(entry.media_time)
            .fixed16_16(1.0);
    }
    Atom::parent(b"edts", vec![payload.into_atom(b"elst")])
}

fn stbl(description: Atom, table: &SampleTable) -> Atom {
    let mut children = vec![description];
    children.extend(table.to_atoms());
    Atom::parent(b"stbl", children)
}

/// Video `trak` (JPEG samples in the movie timescale, every sample a sync sample).
pub fn video_trak(track_id: u32, width: u32, height: u32, table: &SampleTable) -> Atom {
    let duration = table.durations.total_duration();
    let minf = Atom::parent(
        b"minf",
        vec![
            vmhd(),
            hdlr(b"dhlr", b"alis"),
            dinf(),
            stbl(stsd_jpeg(width, height), table),
        ],
    );
    let mdia = Atom::parent(
        b"mdia",
        vec![
            mdhd(MOVIE_TIMESCALE, duration),
            hdlr(b"mhlr", b"vide"),
            minf,
        ],
    );
    Atom::parent(
        b"trak",
        vec![tkhd(track_id, duration, width, height, 0.0), mdia],
    )
}

/// Sound `trak`. `duration` is the presented duration in the movie timescale;
/// the media duration is the table's sample count at the sample rate.
pub fn audio_trak(
    track_id: u32,
    format: &PcmFormat,
    duration: u64,
    edits: Option<&[EditEntry]>,
    table: &SampleTable,
) -> Atom {
    let minf = Atom::parent(
        b"minf",
        vec![
            smhd(),
            hdlr(b"dhlr", b"alis"),
            dinf(),
            stbl(stsd_sound(format), table),
        ],
    );
    let mdia = Atom::parent(
        b"mdia",
        vec![
            mdhd(format.sample_rate, table.durations.sample_count()),
            hdlr(b"mhlr", b"soun"),
            minf,
        ],
    );
    let mut children = vec![tkhd(track_id, duration, 0, 0, 1.0)];
    if let Some(entries) = edits {
        children.push(edts(entries));
    }
    children.push(mdia);
    Atom::parent(b"trak", children)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::AtomBody;
    use byteorder::{BigEndian, ByteOrder};
    use reel_common::SampleOrder;

    fn data(atom: &Atom) -> &[u8] {
        match atom.body() {
            AtomBody::Data(d) => d,
            AtomBody::Children(_) => panic!("expected a leaf"),
        }
    }

    #[test]
    fn ftyp_is_32_bytes() {
        let atom = ftyp();
        assert_eq!(atom.size(), FTYP_SIZE);
        let mut buf = Vec::new();
        atom.write_to(&mut buf).unwrap();
        assert_eq!(&buf[8..12], b"qt  ");
        assert_eq!(&buf[12..16], &[0x20, 0x05, 0x03, 0x00]);
        assert_eq!(&buf[16..20], b"qt  ");
        assert!(buf[20..32].iter().all(|&b| b == 0));
    }

    #[test]
    fn header_atom_sizes() {
        assert_eq!(mvhd(1000, 2).size(), 108);
        assert_eq!(tkhd(1, 1000, 640, 480, 0.0).size(), 92);
        assert_eq!(mdhd(1000, 1000).size(), 32);
        assert_eq!(vmhd().size(), 20);
        assert_eq!(smhd().size(), 16);
        assert_eq!(dinf().size(), 36);
    }

    #[test]
    fn mvhd_carries_timescale_and_duration() {
        let atom = mvhd(4000, 3);
        let d = data(&atom);
        assert_eq!(BigEndian::read_u32(&d[12..16]), MOVIE_TIMESCALE);
        assert_eq!(BigEndian::read_u32(&d[16..20]), 4000);
        assert_eq!(BigEndian::read_u32(&d[96..100]), 3);
    }

    #[test]
    fn tkhd_video_dimensions_are_16_16() {
        let atom = tkhd(1, 1000, 640, 480, 0.0);
        let d = data(&atom);
        assert_eq!(&d[0..4], &[0, 0, 0, 0x0F]);
        assert_eq!(BigEndian::read_u32(&d[76..80]), 640 << 16);
        assert_eq!(BigEndian::read_u32(&d[80..84]), 480 << 16);
        assert_eq!(BigEndian::read_i16(&d[36..38]), 0);

        let sound = tkhd(2, 1000, 0, 0, 1.0);
        assert_eq!(BigEndian::read_i16(&data(&sound)[36..38]), 0x100);
    }

    #[test]
    fn jpeg_entry_is_86_bytes() {
        let atom = stsd_jpeg(320, 240);
        let d = data(&atom);
        assert_eq!(atom.size(), 16 + 86);
        assert_eq!(BigEndian::read_u32(&d[8..12]), 86);
        assert_eq!(&d[12..16], b"jpeg");
        assert_eq!(BigEndian::read_u16(&d[40..42]), 320);
        assert_eq!(BigEndian::read_u16(&d[42..44]), 240);
    }

    #[test]
    fn sound_entry_codec_follows_bit_depth() {
        let twos = stsd_sound(&PcmFormat::new(44_100, 16, 1, SampleOrder::BigEndian));
        let d = data(&twos);
        assert_eq!(twos.size(), 16 + 36);
        assert_eq!(&d[12..16], b"twos");
        assert_eq!(BigEndian::read_u16(&d[32..34]), 1);
        assert_eq!(BigEndian::read_u16(&d[34..36]), 16);
        assert_eq!(BigEndian::read_u32(&d[40..44]), 44_100 << 16);

        let raw = stsd_sound(&PcmFormat::new(8000, 8, 2, SampleOrder::LittleEndian));
        assert_eq!(&data(&raw)[12..16], b"raw ");
    }

    #[test]
    fn edit_list_rows() {
        let atom = edts(&[EditEntry::skip(1000), EditEntry::play(1500, 0)]);
        let elst = atom.child(b"elst").unwrap();
        let d = data(elst);
        assert_eq!(BigEndian::read_u32(&d[4..8]), 2);
        assert_eq!(BigEndian::read_i32(&d[12..16]), -1);
        assert_eq!(BigEndian::read_u32(&d[20..24]), 1500);
        assert_eq!(BigEndian::read_u32(&d[28..32]), 1 << 16);
    }

    #[test]
    fn audio_trak_places_edts_before_mdia() {
        let format = PcmFormat::new(8000, 16, 1, SampleOrder::BigEndian);
        let table = SampleTable::new();
        let edits = [EditEntry::play(500, 0)];
        let trak = audio_trak(2, &format, 500, Some(&edits), &table);
        let kinds: Vec<[u8; 4]> = match trak.body() {
            AtomBody::Children(c) => c.iter().map(|a| *a.kind()).collect(),
            AtomBody::Data(_) => unreachable!(),
        };
        assert_eq!(kinds, vec![*b"tkhd", *b"edts", *b"mdia"]);
    }
}
