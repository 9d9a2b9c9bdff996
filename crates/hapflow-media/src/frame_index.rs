//! Frame table of an open stream
//!
//! Built once when a stream opens. Frames are assumed to have a constant
//! duration (`duration / frame_count`); per-frame presentation times from the
//! container are kept for reference but do not drive the time to frame
//! mapping.

use crate::container::{self, MovieInfo};
use crate::error::{MediaError, Result};
use crate::probe::classify;
use crate::source::ByteSource;
use hapflow_core::CodecType;
use std::fmt;
use tracing::info;

/// Exact time value in seconds, `num / den`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rational {
    /// Numerator (ticks)
    pub num: u64,
    /// Denominator (ticks per second)
    pub den: u32,
}

impl Rational {
    /// Create a rational; `den` must be non-zero
    pub fn new(num: u64, den: u32) -> Self {
        Self { num, den }
    }

    /// Value in seconds
    pub fn as_secs_f64(&self) -> f64 {
        if self.den == 0 {
            0.0
        } else {
            self.num as f64 / f64::from(self.den)
        }
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Where one frame lives and when it is shown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameDescriptor {
    /// Offset of the frame in the container
    pub byte_offset: u64,
    /// Frame size in bytes
    pub byte_length: u32,
    /// Presentation time
    pub presentation_time: Rational,
}

/// Stream properties fixed at open time
#[derive(Debug, Clone, PartialEq)]
pub struct StreamMetadata {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Number of frames
    pub frame_count: usize,
    /// Frames per second
    pub frame_rate: f64,
    /// Duration in seconds
    pub duration: f64,
    /// Codec of the first frame
    pub codec: CodecType,
    /// Sample description fourcc
    pub fourcc: String,
}

/// Frame table with time lookup
#[derive(Debug, Clone)]
pub struct FrameIndex {
    frames: Vec<FrameDescriptor>,
    metadata: StreamMetadata,
    frame_duration: f64,
}

impl FrameIndex {
    /// Parse the container's frame table and probe the codec of the first frame
    pub fn open(source: &dyn ByteSource) -> Result<Self> {
        let movie = container::parse_movie(source)?;
        let first = movie
            .samples
            .first()
            .ok_or_else(|| MediaError::malformed("track has no samples"))?;

        // The type byte is the fourth byte of the frame's section header
        let head = source.read_range(first.offset, first.size.min(4) as usize)?;
        let section_type = *head
            .get(3)
            .ok_or_else(|| MediaError::malformed("first frame is shorter than a section header"))?;
        let codec = classify(section_type);

        let index = Self::from_movie(&movie, codec, source.len())?;
        info!(
            "Opened {} ({}): {}x{}, {} frames at {:.3} fps, {:.3}s, codec {}",
            source.describe(),
            index.metadata.fourcc,
            index.metadata.width,
            index.metadata.height,
            index.metadata.frame_count,
            index.metadata.frame_rate,
            index.metadata.duration,
            codec
        );
        Ok(index)
    }

    fn from_movie(movie: &MovieInfo, codec: CodecType, source_len: u64) -> Result<Self> {
        let frames = movie
            .samples
            .iter()
            .map(|s| FrameDescriptor {
                byte_offset: s.offset,
                byte_length: s.size,
                presentation_time: Rational::new(s.start, movie.timescale),
            })
            .collect();
        let duration = Rational::new(movie.duration, movie.timescale).as_secs_f64();

        let mut index = Self::from_descriptors(
            frames,
            movie.width,
            movie.height,
            duration,
            codec,
            source_len,
        )?;
        index.metadata.fourcc = movie.fourcc_str();
        Ok(index)
    }

    /// Build an index from an explicit frame table.
    ///
    /// Fails with [`MediaError::MalformedContainer`] if the table is empty, a
    /// frame lies outside `source_len`, or the duration is not positive.
    pub fn from_descriptors(
        frames: Vec<FrameDescriptor>,
        width: u32,
        height: u32,
        duration: f64,
        codec: CodecType,
        source_len: u64,
    ) -> Result<Self> {
        if frames.is_empty() {
            return Err(MediaError::malformed("frame table is empty"));
        }
        if !(duration.is_finite() && duration > 0.0) {
            return Err(MediaError::malformed(format!(
                "stream duration {} is not positive",
                duration
            )));
        }
        for (i, frame) in frames.iter().enumerate() {
            let end = frame.byte_offset.checked_add(u64::from(frame.byte_length));
            if end.map_or(true, |end| end > source_len) {
                return Err(MediaError::malformed(format!(
                    "frame {} ({} bytes at {}) exceeds container size {}",
                    i, frame.byte_length, frame.byte_offset, source_len
                )));
            }
        }

        let frame_count = frames.len();
        let metadata = StreamMetadata {
            width,
            height,
            frame_count,
            frame_rate: frame_count as f64 / duration,
            duration,
            codec,
            fourcc: String::new(),
        };

        Ok(Self {
            frames,
            metadata,
            frame_duration: duration / frame_count as f64,
        })
    }

    /// Frame shown at `time` seconds, clamped to the stream
    pub fn frame_for_time(&self, time: f64) -> usize {
        // Also catches NaN
        if !(time > 0.0) {
            return 0;
        }
        let last = self.frames.len() - 1;
        let fd = self.frame_duration;
        let mut position = (time / fd).floor();
        // The division can round across a boundary; settle on the largest
        // frame whose start is not after `time`
        if (position + 1.0) * fd <= time {
            position += 1.0;
        } else if position > 0.0 && position * fd > time {
            position -= 1.0;
        }
        if position >= last as f64 {
            last
        } else {
            position as usize
        }
    }

    /// Offset and length of a frame
    pub fn byte_range_for(&self, index: usize) -> Result<(u64, u32)> {
        self.frames
            .get(index)
            .map(|f| (f.byte_offset, f.byte_length))
            .ok_or(MediaError::FrameOutOfRange {
                index,
                count: self.frames.len(),
            })
    }

    /// Descriptor of a frame
    pub fn frame(&self, index: usize) -> Option<&FrameDescriptor> {
        self.frames.get(index)
    }

    /// All frames in presentation order
    pub fn frames(&self) -> &[FrameDescriptor] {
        &self.frames
    }

    /// Number of frames (never zero)
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Always false; an index holds at least one frame
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Stream metadata
    pub fn metadata(&self) -> &StreamMetadata {
        &self.metadata
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        self.metadata.duration
    }

    /// Duration of one frame in seconds
    pub fn frame_duration(&self) -> f64 {
        self.frame_duration
    }
}
