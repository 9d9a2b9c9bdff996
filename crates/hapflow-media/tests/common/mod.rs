//! Shared fixtures: tiny BC1/YCoCg encoders for flat colours, HAP section
//! writers and a QuickTime movie builder.

#![allow(dead_code)]

/// Section type bytes
pub const HAP_RAW_DXT1: u8 = 0xAB;
pub const HAP_SNAPPY_DXT1: u8 = 0xBB;
pub const HAP_SNAPPY_DXT5: u8 = 0xBE;
pub const HAP_SNAPPY_YCOCG: u8 = 0xBF;
pub const HAP_COMPLEX_DXT1: u8 = 0xCB;
pub const HAP_COMPLEX_YCOCG: u8 = 0xCF;

pub fn snappy(data: &[u8]) -> Vec<u8> {
    snap::raw::Encoder::new().compress_vec(data).unwrap()
}

/// Section with a 24-bit length, or the 32-bit form when it does not fit
pub fn hap_section(section_type: u8, body: &[u8]) -> Vec<u8> {
    let len = body.len() as u32;
    let mut out = if len < (1 << 24) {
        vec![len as u8, (len >> 8) as u8, (len >> 16) as u8, section_type]
    } else {
        let mut header = vec![0, 0, 0, section_type];
        header.extend_from_slice(&len.to_le_bytes());
        header
    };
    out.extend_from_slice(body);
    out
}

/// Chunked frame; each chunk is Snappy compressed when `compress` is set
pub fn chunked_frame(section_type: u8, chunks: &[Vec<u8>], compress: bool) -> Vec<u8> {
    let payloads: Vec<Vec<u8>> = chunks
        .iter()
        .map(|c| if compress { snappy(c) } else { c.clone() })
        .collect();
    let marker = if compress { 0x0B } else { 0x0A };

    let compressors = vec![marker; payloads.len()];
    let sizes: Vec<u8> = payloads
        .iter()
        .flat_map(|p| (p.len() as u32).to_le_bytes())
        .collect();

    let mut instructions = hap_section(0x02, &compressors);
    instructions.extend(hap_section(0x03, &sizes));

    let mut body = hap_section(0x01, &instructions);
    for payload in &payloads {
        body.extend_from_slice(payload);
    }
    hap_section(section_type, &body)
}

fn rgb565(r: u8, g: u8, b: u8) -> u16 {
    let q = |v: u8, bits: u32| ((v as f32 / 255.0) * ((1 << bits) - 1) as f32).round() as u16;
    (q(r, 5) << 11) | (q(g, 6) << 5) | q(b, 5)
}

/// BC1 block of one colour
pub fn solid_bc1_block(rgb: [u8; 3]) -> [u8; 8] {
    let [lo, hi] = rgb565(rgb[0], rgb[1], rgb[2]).to_le_bytes();
    [lo, hi, lo, hi, 0, 0, 0, 0]
}

/// HAP Q (scaled YCoCg in BC3) block of one colour, scale 1
pub fn solid_ycocg_block(rgb: [u8; 3]) -> [u8; 16] {
    let [r, g, b] = rgb.map(|c| c as f32 / 255.0);
    let y = r / 4.0 + g / 2.0 + b / 4.0;
    let co = r / 2.0 - b / 2.0;
    let cg = -r / 4.0 + g / 2.0 - b / 4.0;
    let offset = 128.0 / 255.0;

    let to_u8 = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    let color = rgb565(to_u8(co + offset), to_u8(cg + offset), 0);
    let alpha = to_u8(y);

    let [lo, hi] = color.to_le_bytes();
    [alpha, alpha, 0, 0, 0, 0, 0, 0, lo, hi, lo, hi, 0, 0, 0, 0]
}

/// Texture of `width x height` where each 4x4 block takes the colour of its
/// top-left pixel in `rgb_at`
pub fn block_texture<const N: usize>(
    width: u32,
    height: u32,
    encode: fn([u8; 3]) -> [u8; N],
    rgb_at: impl Fn(u32, u32) -> [u8; 3],
) -> Vec<u8> {
    let mut out = Vec::new();
    for by in 0..height.div_ceil(4) {
        for bx in 0..width.div_ceil(4) {
            out.extend_from_slice(&encode(rgb_at(bx * 4, by * 4)));
        }
    }
    out
}

pub const RED: [u8; 3] = [255, 0, 0];
pub const GREEN: [u8; 3] = [0, 255, 0];
pub const BLUE: [u8; 3] = [0, 0, 255];

/// Frame `i` of the RGB cycle: solid red, green or blue
pub fn rgb_cycle_frame(i: usize, width: u32, height: u32) -> Vec<u8> {
    let color = [RED, GREEN, BLUE][i % 3];
    let texture = block_texture(width, height, solid_bc1_block, |_, _| color);
    hap_section(HAP_SNAPPY_DXT1, &snappy(&texture))
}

/// Test card `card`: eight vertical bars, 4-pixel aligned, whose palette
/// rotates by card number
pub fn test_card_rgb(card: usize, x: u32, width: u32) -> [u8; 3] {
    const BARS: [[u8; 3]; 8] = [
        [235, 235, 235],
        [235, 235, 16],
        [16, 235, 235],
        [16, 235, 16],
        [235, 16, 235],
        [235, 16, 16],
        [16, 16, 235],
        [128, 128, 128],
    ];
    let bar_width = (width / 8).max(4);
    let bar = (x / bar_width) as usize;
    BARS[(bar + card) % BARS.len()]
}

/// Read the RGB of pixel (x, y) from an RGBA8 buffer
pub fn pixel(rgba: &[u8], width: u32, x: u32, y: u32) -> [f32; 3] {
    let at = ((y * width + x) * 4) as usize;
    [rgba[at], rgba[at + 1], rgba[at + 2]].map(|c| c as f32 / 255.0)
}

/// Builds minimal QuickTime movies with one HAP video track
pub struct MovieBuilder {
    fourcc: [u8; 4],
    width: u16,
    height: u16,
    timescale: u32,
    sample_delta: u32,
    media_duration: Option<u32>,
    frames: Vec<Vec<u8>>,
    samples_per_chunk: usize,
    co64: bool,
    sound_track: bool,
}

impl MovieBuilder {
    pub fn new(fourcc: &[u8; 4], width: u16, height: u16) -> Self {
        Self {
            fourcc: *fourcc,
            width,
            height,
            timescale: 30,
            sample_delta: 1,
            media_duration: None,
            frames: Vec::new(),
            samples_per_chunk: 1,
            co64: false,
            sound_track: false,
        }
    }

    /// Frame rate as `timescale / sample_delta`
    pub fn rate(mut self, timescale: u32, sample_delta: u32) -> Self {
        self.timescale = timescale;
        self.sample_delta = sample_delta;
        self
    }

    /// Override the media header duration (0 means unknown)
    pub fn media_duration(mut self, ticks: u32) -> Self {
        self.media_duration = Some(ticks);
        self
    }

    pub fn frames(mut self, frames: Vec<Vec<u8>>) -> Self {
        self.frames = frames;
        self
    }

    pub fn samples_per_chunk(mut self, n: usize) -> Self {
        self.samples_per_chunk = n.max(1);
        self
    }

    pub fn co64(mut self) -> Self {
        self.co64 = true;
        self
    }

    pub fn sound_track(mut self) -> Self {
        self.sound_track = true;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let ftyp = atom(b"ftyp", b"qt  \0\0\0\0qt  ");

        let mdat_body: Vec<u8> = self.frames.concat();
        let mdat_start = (ftyp.len() + 8) as u64;
        let mut offsets = Vec::with_capacity(self.frames.len());
        let mut pos = mdat_start;
        for frame in &self.frames {
            offsets.push(pos);
            pos += frame.len() as u64;
        }

        let mut moov_body = Vec::new();
        if self.sound_track {
            moov_body.extend(self.sound_trak());
        }
        moov_body.extend(self.video_trak(&offsets));

        let mut out = ftyp;
        out.extend(atom(b"mdat", &mdat_body));
        out.extend(atom(b"moov", &moov_body));
        out
    }

    fn video_trak(&self, offsets: &[u64]) -> Vec<u8> {
        let count = self.frames.len() as u32;
        let duration = self
            .media_duration
            .unwrap_or(count * self.sample_delta);

        let mut tkhd = vec![0u8; 76];
        tkhd.extend_from_slice(&(u32::from(self.width) << 16).to_be_bytes());
        tkhd.extend_from_slice(&(u32::from(self.height) << 16).to_be_bytes());

        let mut stbl = atom(b"stsd", &self.stsd());
        stbl.extend(full_table(b"stts", &[[count, self.sample_delta]]));
        stbl.extend(self.stsc());
        stbl.extend(self.stsz());
        stbl.extend(self.chunk_offsets(offsets));

        let mut mdia = atom(b"mdhd", &mdhd(self.timescale, duration));
        mdia.extend(hdlr(b"vide"));
        mdia.extend(atom(b"minf", &atom(b"stbl", &stbl)));

        let mut trak = atom(b"tkhd", &tkhd);
        trak.extend(atom(b"mdia", &mdia));
        atom(b"trak", &trak)
    }

    fn sound_trak(&self) -> Vec<u8> {
        let mut mdia = atom(b"mdhd", &mdhd(48000, 48000));
        mdia.extend(hdlr(b"soun"));
        atom(b"trak", &atom(b"mdia", &mdia))
    }

    fn stsd(&self) -> Vec<u8> {
        let mut entry = Vec::new();
        entry.extend_from_slice(&86u32.to_be_bytes());
        entry.extend_from_slice(&self.fourcc);
        entry.extend_from_slice(&[0; 6]);
        entry.extend_from_slice(&1u16.to_be_bytes());
        entry.extend_from_slice(&[0; 16]);
        entry.extend_from_slice(&self.width.to_be_bytes());
        entry.extend_from_slice(&self.height.to_be_bytes());
        entry.extend_from_slice(&[0; 50]);
        assert_eq!(entry.len(), 86);

        let mut body = vec![0u8; 4];
        body.extend_from_slice(&1u32.to_be_bytes());
        body.extend(entry);
        body
    }

    fn stsc(&self) -> Vec<u8> {
        let n = self.samples_per_chunk as u32;
        let count = self.frames.len() as u32;
        let full_chunks = count / n;
        let remainder = count % n;

        let mut entries = Vec::new();
        if full_chunks > 0 {
            entries.push([1, n, 1]);
        }
        if remainder > 0 {
            entries.push([full_chunks + 1, remainder, 1]);
        }
        full_table(b"stsc", &entries)
    }

    fn stsz(&self) -> Vec<u8> {
        let mut body = vec![0u8; 4];
        body.extend_from_slice(&0u32.to_be_bytes());
        body.extend_from_slice(&(self.frames.len() as u32).to_be_bytes());
        for frame in &self.frames {
            body.extend_from_slice(&(frame.len() as u32).to_be_bytes());
        }
        atom(b"stsz", &body)
    }

    fn chunk_offsets(&self, offsets: &[u64]) -> Vec<u8> {
        let chunk_starts: Vec<u64> = offsets
            .iter()
            .step_by(self.samples_per_chunk)
            .copied()
            .collect();

        let mut body = vec![0u8; 4];
        body.extend_from_slice(&(chunk_starts.len() as u32).to_be_bytes());
        for offset in chunk_starts {
            if self.co64 {
                body.extend_from_slice(&offset.to_be_bytes());
            } else {
                body.extend_from_slice(&(offset as u32).to_be_bytes());
            }
        }
        atom(if self.co64 { b"co64" } else { b"stco" }, &body)
    }
}

pub fn atom(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut out = ((body.len() + 8) as u32).to_be_bytes().to_vec();
    out.extend_from_slice(kind);
    out.extend_from_slice(body);
    out
}

fn full_table<const N: usize>(kind: &[u8; 4], entries: &[[u32; N]]) -> Vec<u8> {
    let mut body = vec![0u8; 4];
    body.extend_from_slice(&(entries.len() as u32).to_be_bytes());
    for entry in entries {
        for value in entry {
            body.extend_from_slice(&value.to_be_bytes());
        }
    }
    atom(kind, &body)
}

fn mdhd(timescale: u32, duration: u32) -> Vec<u8> {
    let mut body = vec![0u8; 12];
    body.extend_from_slice(&timescale.to_be_bytes());
    body.extend_from_slice(&duration.to_be_bytes());
    body.extend_from_slice(&[0; 4]);
    body
}

fn hdlr(handler: &[u8; 4]) -> Vec<u8> {
    let mut body = vec![0u8; 4];
    body.extend_from_slice(b"mhlr");
    body.extend_from_slice(handler);
    body.extend_from_slice(&[0; 13]);
    atom(b"hdlr", &body)
}
