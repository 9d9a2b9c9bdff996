//! QuickTime container parsing
//!
//! HAP is shipped in QuickTime movies. Only the sample table of the first HAP
//! video track is needed: where each frame lives, how big it is and when it
//! is presented. Everything else in the movie is skipped.

use crate::error::{MediaError, Result};
use crate::source::ByteSource;
use tracing::debug;

/// Sample description fourccs of the HAP family
pub const HAP_FOURCCS: [[u8; 4]; 6] = [*b"Hap1", *b"Hap5", *b"HapY", *b"HapM", *b"HapA", *b"Hap7"];

/// Returns true if `fourcc` names a HAP sample description
pub fn is_hap_fourcc(fourcc: &[u8; 4]) -> bool {
    HAP_FOURCCS.contains(fourcc)
}

/// Atom header: 32-bit size + fourcc, or size 1 with a 64-bit size after
const ATOM_HEADER_LEN: u64 = 8;
const LARGE_ATOM_HEADER_LEN: u64 = 16;

/// One sample (frame) of the track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleEntry {
    /// Absolute file offset
    pub offset: u64,
    /// Size in bytes
    pub size: u32,
    /// Presentation start in media timescale ticks
    pub start: u64,
    /// Duration in media timescale ticks
    pub duration: u32,
}

/// What the player needs from a movie
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovieInfo {
    /// Sample description fourcc
    pub fourcc: [u8; 4],
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Media timescale (ticks per second)
    pub timescale: u32,
    /// Media duration in ticks
    pub duration: u64,
    /// Samples in presentation order
    pub samples: Vec<SampleEntry>,
}

impl MovieInfo {
    /// Fourcc as text
    pub fn fourcc_str(&self) -> String {
        String::from_utf8_lossy(&self.fourcc).into_owned()
    }
}

/// A child atom within a parent's body
struct Atom<'a> {
    kind: [u8; 4],
    body: &'a [u8],
}

/// Iterator over the atoms packed in a buffer
struct Atoms<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Atoms<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn next_atom(&mut self) -> Result<Atom<'a>> {
        let rest = &self.data[self.pos..];
        if rest.len() < ATOM_HEADER_LEN as usize {
            return Err(MediaError::malformed(format!(
                "{} trailing bytes cannot hold an atom header",
                rest.len()
            )));
        }

        let size32 = be_u32(rest, 0)?;
        let kind = fourcc(rest, 4)?;
        let (header_len, size) = match size32 {
            0 => (ATOM_HEADER_LEN as usize, rest.len()),
            1 => {
                let size = be_u64(rest, 8)?;
                let size = usize::try_from(size).map_err(|_| atom_too_large(&kind, size))?;
                (LARGE_ATOM_HEADER_LEN as usize, size)
            }
            n => (ATOM_HEADER_LEN as usize, n as usize),
        };

        if size < header_len || size > rest.len() {
            return Err(MediaError::malformed(format!(
                "atom '{}' of size {} does not fit in {} bytes",
                String::from_utf8_lossy(&kind),
                size,
                rest.len()
            )));
        }

        self.pos += size;
        Ok(Atom {
            kind,
            body: &rest[header_len..size],
        })
    }
}

impl<'a> Iterator for Atoms<'a> {
    type Item = Result<Atom<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.data.len() {
            return None;
        }
        let atom = self.next_atom();
        if atom.is_err() {
            self.pos = self.data.len();
        }
        Some(atom)
    }
}

fn atom_too_large(kind: &[u8; 4], size: u64) -> MediaError {
    MediaError::malformed(format!(
        "atom '{}' of {} bytes is too large",
        String::from_utf8_lossy(kind),
        size
    ))
}

fn find_child<'a>(parent: &'a [u8], kind: &[u8; 4]) -> Result<Option<&'a [u8]>> {
    for atom in Atoms::new(parent) {
        let atom = atom?;
        if &atom.kind == kind {
            return Ok(Some(atom.body));
        }
    }
    Ok(None)
}

fn require_child<'a>(parent: &'a [u8], kind: &[u8; 4]) -> Result<&'a [u8]> {
    find_child(parent, kind)?.ok_or_else(|| {
        MediaError::malformed(format!("missing '{}' atom", String::from_utf8_lossy(kind)))
    })
}

fn slice(data: &[u8], at: usize, len: usize) -> Result<&[u8]> {
    at.checked_add(len)
        .and_then(|end| data.get(at..end))
        .ok_or_else(|| {
            MediaError::malformed(format!(
                "atom of {} bytes is too short for a {} byte field at {}",
                data.len(),
                len,
                at
            ))
        })
}

fn be_u16(data: &[u8], at: usize) -> Result<u16> {
    let b = slice(data, at, 2)?;
    Ok(u16::from_be_bytes([b[0], b[1]]))
}

fn be_u32(data: &[u8], at: usize) -> Result<u32> {
    let b = slice(data, at, 4)?;
    Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

fn be_u64(data: &[u8], at: usize) -> Result<u64> {
    let b = slice(data, at, 8)?;
    Ok(u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
}

fn fourcc(data: &[u8], at: usize) -> Result<[u8; 4]> {
    let b = slice(data, at, 4)?;
    Ok([b[0], b[1], b[2], b[3]])
}

/// Entry table of a full atom: version/flags, u32 count, then `count` entries.
/// `header` is the offset of the count field.
fn table<'a>(body: &'a [u8], header: usize, entry_len: usize) -> Result<(usize, &'a [u8])> {
    let count = be_u32(body, header)? as usize;
    let bytes = count
        .checked_mul(entry_len)
        .ok_or_else(|| MediaError::malformed("table size overflows"))?;
    Ok((count, slice(body, header + 4, bytes)?))
}

/// Find the `moov` atom among the top-level atoms and read its body
fn read_moov(source: &dyn ByteSource) -> Result<Vec<u8>> {
    let total = source.len();
    let mut pos = 0u64;

    while pos + ATOM_HEADER_LEN <= total {
        let mut header = [0u8; 8];
        source.read_at(pos, &mut header)?;
        let kind = [header[4], header[5], header[6], header[7]];

        let (header_len, size) = match u32::from_be_bytes([header[0], header[1], header[2], header[3]]) {
            0 => (ATOM_HEADER_LEN, total - pos),
            1 => {
                if pos + LARGE_ATOM_HEADER_LEN > total {
                    break;
                }
                let mut large = [0u8; 8];
                source.read_at(pos + ATOM_HEADER_LEN, &mut large)?;
                (LARGE_ATOM_HEADER_LEN, u64::from_be_bytes(large))
            }
            n => (ATOM_HEADER_LEN, u64::from(n)),
        };

        if size < header_len || size > total - pos {
            return Err(MediaError::malformed(format!(
                "top-level atom '{}' at {} claims {} bytes, file has {}",
                String::from_utf8_lossy(&kind),
                pos,
                size,
                total - pos
            )));
        }

        if &kind == b"moov" {
            let body_len = usize::try_from(size - header_len)
                .map_err(|_| atom_too_large(&kind, size))?;
            return source.read_range(pos + header_len, body_len);
        }

        debug!(
            "Skipping top-level atom '{}' ({} bytes)",
            String::from_utf8_lossy(&kind),
            size
        );
        pos += size;
    }

    Err(MediaError::malformed("no 'moov' atom"))
}

/// Parse a QuickTime movie and return the sample table of its HAP video track
pub fn parse_movie(source: &dyn ByteSource) -> Result<MovieInfo> {
    let moov = read_moov(source)?;

    let mut other_video: Option<[u8; 4]> = None;
    for atom in Atoms::new(&moov) {
        let atom = atom?;
        if &atom.kind != b"trak" {
            continue;
        }
        match parse_track(atom.body, source.len())? {
            TrackKind::Hap(info) => return Ok(info),
            TrackKind::OtherVideo(fourcc) => {
                other_video.get_or_insert(fourcc);
            }
            TrackKind::NotVideo => {}
        }
    }

    match other_video {
        Some(fourcc) => Err(MediaError::UnsupportedCodec(format!(
            "video track uses '{}', not HAP",
            String::from_utf8_lossy(&fourcc)
        ))),
        None => Err(MediaError::malformed("no video track")),
    }
}

enum TrackKind {
    Hap(MovieInfo),
    OtherVideo([u8; 4]),
    NotVideo,
}

fn parse_track(trak: &[u8], source_len: u64) -> Result<TrackKind> {
    let mdia = require_child(trak, b"mdia")?;
    let hdlr = require_child(mdia, b"hdlr")?;
    if &fourcc(hdlr, 8)? != b"vide" {
        return Ok(TrackKind::NotVideo);
    }

    let stbl = require_child(require_child(mdia, b"minf")?, b"stbl")?;
    let stsd = require_child(stbl, b"stsd")?;
    if be_u32(stsd, 4)? == 0 {
        return Err(MediaError::malformed("empty sample description"));
    }
    // First sample description entry starts after version/flags and count
    let entry = &stsd[8..];
    let codec = fourcc(entry, 4)?;
    if !is_hap_fourcc(&codec) {
        return Ok(TrackKind::OtherVideo(codec));
    }

    let mut width = u32::from(be_u16(entry, 32)?);
    let mut height = u32::from(be_u16(entry, 34)?);
    if width == 0 || height == 0 {
        // Fall back to the track header's 16.16 presentation size
        let tkhd = require_child(trak, b"tkhd")?;
        if tkhd.len() >= 8 {
            width = be_u32(tkhd, tkhd.len() - 8)? >> 16;
            height = be_u32(tkhd, tkhd.len() - 4)? >> 16;
        }
    }
    if width == 0 || height == 0 {
        return Err(MediaError::malformed("video track has no dimensions"));
    }

    let (timescale, duration) = parse_mdhd(require_child(mdia, b"mdhd")?)?;
    let samples = parse_sample_table(stbl, source_len)?;

    let duration = if duration == 0 {
        samples.iter().map(|s| u64::from(s.duration)).sum()
    } else {
        duration
    };

    Ok(TrackKind::Hap(MovieInfo {
        fourcc: codec,
        width,
        height,
        timescale,
        duration,
        samples,
    }))
}

fn parse_mdhd(mdhd: &[u8]) -> Result<(u32, u64)> {
    let version = slice(mdhd, 0, 1)?[0];
    let (timescale, duration) = if version == 1 {
        let duration = be_u64(mdhd, 24)?;
        (be_u32(mdhd, 20)?, if duration == u64::MAX { 0 } else { duration })
    } else {
        let duration = be_u32(mdhd, 16)?;
        (be_u32(mdhd, 12)?, if duration == u32::MAX { 0 } else { u64::from(duration) })
    };
    if timescale == 0 {
        return Err(MediaError::malformed("media timescale is zero"));
    }
    Ok((timescale, duration))
}

fn parse_sample_table(stbl: &[u8], source_len: u64) -> Result<Vec<SampleEntry>> {
    // Sample sizes
    let stsz = require_child(stbl, b"stsz")?;
    let uniform = be_u32(stsz, 4)?;
    let sample_count = be_u32(stsz, 8)? as usize;
    if sample_count == 0 {
        return Err(MediaError::malformed("track has no samples"));
    }
    if uniform != 0 && (sample_count as u64).saturating_mul(u64::from(uniform)) > source_len {
        return Err(MediaError::malformed(format!(
            "{} samples of {} bytes exceed the file size",
            sample_count, uniform
        )));
    }
    let sizes: Vec<u32> = if uniform != 0 {
        vec![uniform; sample_count]
    } else {
        let (_, entries) = table(stsz, 8, 4)?;
        entries
            .chunks_exact(4)
            .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    };

    // Chunk offsets
    let chunk_offsets: Vec<u64> = if let Some(stco) = find_child(stbl, b"stco")? {
        let (_, entries) = table(stco, 4, 4)?;
        entries
            .chunks_exact(4)
            .map(|b| u64::from(u32::from_be_bytes([b[0], b[1], b[2], b[3]])))
            .collect()
    } else if let Some(co64) = find_child(stbl, b"co64")? {
        let (_, entries) = table(co64, 4, 8)?;
        entries
            .chunks_exact(8)
            .map(|b| u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
            .collect()
    } else {
        return Err(MediaError::malformed("missing chunk offset table"));
    };

    // Sample-to-chunk runs: (first chunk, samples per chunk)
    let (_, stsc) = table(require_child(stbl, b"stsc")?, 4, 12)?;
    let runs: Vec<(usize, usize)> = stsc
        .chunks_exact(12)
        .map(|b| {
            (
                u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as usize,
                u32::from_be_bytes([b[4], b[5], b[6], b[7]]) as usize,
            )
        })
        .collect();

    let mut offsets = Vec::with_capacity(sample_count);
    'runs: for (i, &(first_chunk, per_chunk)) in runs.iter().enumerate() {
        let next_first = runs.get(i + 1).map_or(chunk_offsets.len() + 1, |r| r.0);
        if first_chunk == 0 || next_first < first_chunk {
            return Err(MediaError::malformed("sample-to-chunk table is out of order"));
        }
        for chunk in first_chunk..next_first {
            let mut offset = *chunk_offsets.get(chunk - 1).ok_or_else(|| {
                MediaError::malformed(format!("chunk {} has no offset", chunk))
            })?;
            for _ in 0..per_chunk {
                let index = offsets.len();
                if index == sample_count {
                    break 'runs;
                }
                offsets.push(offset);
                offset = offset.checked_add(u64::from(sizes[index])).ok_or_else(|| {
                    MediaError::malformed(format!("chunk {} runs past the 64-bit range", chunk))
                })?;
            }
        }
    }
    if offsets.len() < sample_count {
        return Err(MediaError::malformed(format!(
            "sample-to-chunk table covers {} of {} samples",
            offsets.len(),
            sample_count
        )));
    }

    // Durations, expanded per sample; a short table repeats its last delta
    let (_, stts) = table(require_child(stbl, b"stts")?, 4, 8)?;
    let mut durations = Vec::with_capacity(sample_count);
    for b in stts.chunks_exact(8) {
        let count = u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as usize;
        let delta = u32::from_be_bytes([b[4], b[5], b[6], b[7]]);
        let take = count.min(sample_count - durations.len());
        durations.extend(std::iter::repeat(delta).take(take));
    }
    let last = durations.last().copied().unwrap_or(0);
    durations.resize(sample_count, last);

    let mut start = 0u64;
    let mut samples = Vec::with_capacity(sample_count);
    for ((offset, size), duration) in offsets.into_iter().zip(sizes).zip(durations) {
        if offset.checked_add(u64::from(size)).map_or(true, |end| end > source_len) {
            return Err(MediaError::malformed(format!(
                "sample {} at {} (+{}) lies beyond the end of the {} byte file",
                samples.len(),
                offset,
                size,
                source_len
            )));
        }
        samples.push(SampleEntry {
            offset,
            size,
            start,
            duration,
        });
        start = start.saturating_add(u64::from(duration));
    }

    Ok(samples)
}
