//! HAP Playback Scheduler
//!
//! Owns the playback clock of one stream. Each `tick` advances the clock,
//! maps it to a frame and decodes that frame if it is not the one already
//! published. Decoded frames are published through a [`FrameSlot`] that a
//! render thread can read without locking.

use crate::convert;
use crate::error::{MediaError, Result};
use crate::frame_index::{FrameIndex, StreamMetadata};
use crate::hap_decoder::TileDecoder;
use crate::probe::{FormatPolicy, FormatSelection, PlatformCapabilities, Transcode};
use crate::source::{ByteSource, FileSource};
use arc_swap::ArcSwapOption;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use hapflow_core::{CodecType, GpuFormat, PlayerConfig, PlayerEvent};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// No stream open
    Closed,
    /// Reading the frame table and probing the codec
    Opening,
    /// Open, clock not started
    Ready,
    /// Clock advancing
    Playing,
    /// Clock stopped
    Paused,
    /// Time was set; the next tick decodes it and restores the previous state
    Scrubbing,
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Closed => "closed",
            Self::Opening => "opening",
            Self::Ready => "ready",
            Self::Playing => "playing",
            Self::Paused => "paused",
            Self::Scrubbing => "scrubbing",
        };
        f.write_str(name)
    }
}

/// A decoded frame ready for upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureFrame {
    /// Frame index in the stream
    pub index: usize,
    /// Texture format of `data`
    pub format: GpuFormat,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Texture bytes, rows of blocks (or pixels for RGBA8)
    pub data: Vec<u8>,
}

impl TextureFrame {
    /// Bytes per row of blocks (or pixels)
    pub fn bytes_per_row(&self) -> u32 {
        self.format.bytes_per_row(self.width)
    }

    /// Number of block (or pixel) rows
    pub fn rows(&self) -> u32 {
        self.format.rows(self.height)
    }
}

/// Single-slot handoff of the latest decoded frame
#[derive(Debug, Default)]
pub struct FrameSlot {
    current: ArcSwapOption<TextureFrame>,
}

impl FrameSlot {
    /// Create an empty slot
    pub fn new() -> Self {
        Self::default()
    }

    /// The latest published frame
    pub fn load(&self) -> Option<Arc<TextureFrame>> {
        self.current.load_full()
    }

    /// Publish a frame and return the one it replaces
    pub fn publish(&self, frame: TextureFrame) -> Option<Arc<TextureFrame>> {
        self.current.swap(Some(Arc::new(frame)))
    }

    /// Remove the published frame
    pub fn clear(&self) {
        self.current.store(None);
    }
}

/// Consumer of decoded frames, such as a GPU texture uploader
pub trait FrameSink {
    /// Upload or display a frame
    fn present(&mut self, frame: &TextureFrame);
}

/// Decode statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackStats {
    /// Frames decoded and published
    pub decoded_frames: u64,
    /// Decode attempts that failed
    pub failed_decodes: u64,
    /// Events dropped because the queue was full
    pub dropped_events: u64,
}

/// Returns true for extensions HAP movies are stored under
pub fn is_hap_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("mov") || ext.eq_ignore_ascii_case("hap"))
}

/// State of an open stream
struct OpenStream {
    source: Arc<dyn ByteSource>,
    index: FrameIndex,
    selection: FormatSelection,
    /// Index of the published frame, the whole of the frame cache
    last_decoded: Option<usize>,
    frame_bytes: Vec<u8>,
    texture: Vec<u8>,
    /// Buffer reclaimed from a frame no reader holds any more
    spare: Vec<u8>,
}

impl OpenStream {
    fn decode(&mut self, frame_index: usize, decoder: &TileDecoder) -> Result<TextureFrame> {
        let (offset, length) = self.index.byte_range_for(frame_index)?;
        self.frame_bytes.resize(length as usize, 0);
        self.source.read_at(offset, &mut self.frame_bytes)?;

        let meta = self.index.metadata();
        let (width, height) = (meta.width, meta.height);

        let native = if self.selection.transcode == Transcode::Passthrough {
            &mut self.spare
        } else {
            &mut self.texture
        };
        let tag = decoder.decode_frame_into(&self.frame_bytes, width, height, native)?;

        if tag.codec() != meta.codec {
            return Err(MediaError::corrupt(format!(
                "frame {} is {:?}, stream is {}",
                frame_index, tag, meta.codec
            )));
        }

        if self.selection.transcode != Transcode::Passthrough {
            convert::transcode_into(
                self.selection.transcode,
                &self.texture,
                width,
                height,
                &mut self.spare,
            )?;
        }

        Ok(TextureFrame {
            index: frame_index,
            format: self.selection.format,
            width,
            height,
            data: std::mem::take(&mut self.spare),
        })
    }
}

/// Playback clock and decode scheduler for one stream at a time
pub struct PlaybackScheduler {
    state: PlaybackState,
    /// State restored after a scrub has been decoded
    resume_state: PlaybackState,
    time: f64,
    speed: f64,
    looping: bool,
    autoplay: bool,
    decoder: TileDecoder,
    caps: PlatformCapabilities,
    policy: FormatPolicy,
    stream: Option<OpenStream>,
    slot: Arc<FrameSlot>,
    event_tx: Sender<PlayerEvent>,
    event_rx: Receiver<PlayerEvent>,
    stats: PlaybackStats,
}

impl PlaybackScheduler {
    /// Create a scheduler with no stream open
    pub fn new(config: &PlayerConfig, caps: PlatformCapabilities) -> Self {
        let (event_tx, event_rx) = bounded(config.event_queue_depth.max(1));
        Self {
            state: PlaybackState::Closed,
            resume_state: PlaybackState::Ready,
            time: 0.0,
            speed: config.speed,
            looping: config.looping,
            autoplay: config.autoplay,
            decoder: TileDecoder::new(config.parallel_tiles),
            caps,
            policy: FormatPolicy::default(),
            stream: None,
            slot: Arc::new(FrameSlot::new()),
            event_tx,
            event_rx,
            stats: PlaybackStats::default(),
        }
    }

    /// Replace the texture format policy used by later opens
    pub fn with_policy(mut self, policy: FormatPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Open a stream, closing any open one.
    ///
    /// On failure the scheduler is left `Closed` and the error is returned.
    pub fn open(&mut self, source: Arc<dyn ByteSource>) -> Result<()> {
        self.close();
        self.state = PlaybackState::Opening;

        let stream = match self.prepare(source) {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Failed to open stream: {}", e);
                self.state = PlaybackState::Closed;
                return Err(e);
            }
        };

        let meta = stream.index.metadata().clone();
        let selection = stream.selection.clone();
        self.stream = Some(stream);
        self.time = 0.0;
        self.state = if self.autoplay {
            PlaybackState::Playing
        } else {
            PlaybackState::Ready
        };
        self.resume_state = self.state;

        self.emit(PlayerEvent::Opened {
            width: meta.width,
            height: meta.height,
            frame_count: meta.frame_count,
            duration: meta.duration,
            codec: meta.codec,
            format: selection.format,
        });
        if let (Some(preferred), Some(reason)) = (selection.preferred, &selection.fallback_reason) {
            self.emit(PlayerEvent::FormatFallback {
                preferred,
                selected: selection.format,
                reason: reason.clone(),
            });
        }
        Ok(())
    }

    fn prepare(&self, source: Arc<dyn ByteSource>) -> Result<OpenStream> {
        let index = FrameIndex::open(source.as_ref())?;
        let meta = index.metadata();
        if meta.codec == CodecType::Unsupported {
            return Err(MediaError::UnsupportedCodec(format!(
                "'{}' frames are not HAP, HAP Alpha or HAP Q",
                meta.fourcc
            )));
        }

        let selection = self
            .policy
            .select(meta.codec, &self.caps, meta.width, meta.height);
        match &selection.fallback_reason {
            Some(reason) => info!(
                "Uploading {} as {} instead of {:?}: {}",
                meta.codec, selection.format, selection.preferred, reason
            ),
            None => debug!("Uploading {} as {}", meta.codec, selection.format),
        }

        Ok(OpenStream {
            source,
            index,
            selection,
            last_decoded: None,
            frame_bytes: Vec::new(),
            texture: Vec::new(),
            spare: Vec::new(),
        })
    }

    /// Open a movie file (`.mov`, or `.hap` for bare HAP movies)
    pub fn open_path<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        if !is_hap_path(path) {
            debug!("{} has no .mov or .hap extension, probing anyway", path.display());
        }
        let source = match FileSource::open(path) {
            Ok(source) => source,
            Err(e) => {
                self.close();
                return Err(e);
            }
        };
        self.open(Arc::new(source))
    }

    /// Close the open stream, if any
    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            info!("Closed {}", stream.source.describe());
            self.slot.clear();
            self.emit(PlayerEvent::Closed);
        }
        self.state = PlaybackState::Closed;
        self.time = 0.0;
    }

    fn stream(&self) -> Result<&OpenStream> {
        self.stream.as_ref().ok_or(MediaError::NotOpen)
    }

    /// Set the playback time in seconds, clamped to the stream.
    ///
    /// The next tick (or `update_now`) decodes the frame at that time, even at
    /// speed zero.
    pub fn set_time(&mut self, seconds: f64) -> Result<()> {
        let duration = self.stream()?.index.duration();
        self.time = if seconds.is_nan() {
            0.0
        } else {
            seconds.clamp(0.0, duration)
        };
        if self.state != PlaybackState::Scrubbing {
            self.resume_state = self.state;
            self.state = PlaybackState::Scrubbing;
        }
        Ok(())
    }

    /// Set the speed factor; zero freezes the clock, negative plays backwards
    pub fn set_speed(&mut self, speed: f64) {
        if speed.is_finite() {
            self.speed = speed;
        }
    }

    /// Set whether playback wraps at the ends
    pub fn set_loop(&mut self, looping: bool) {
        self.looping = looping;
    }

    /// Start the clock
    pub fn play(&mut self) -> Result<()> {
        self.set_running_state(PlaybackState::Playing)
    }

    /// Stop the clock
    pub fn pause(&mut self) -> Result<()> {
        self.set_running_state(PlaybackState::Paused)
    }

    fn set_running_state(&mut self, state: PlaybackState) -> Result<()> {
        self.stream()?;
        if self.state == PlaybackState::Scrubbing {
            self.resume_state = state;
        } else {
            self.state = state;
        }
        Ok(())
    }

    /// Advance the clock by `delta` seconds (scaled by speed while playing) and
    /// make sure the frame for the new time is published.
    ///
    /// Frame decode errors do not fail the tick: they are reported as
    /// [`PlayerEvent::DecodeFailed`] and the previous frame stays published.
    pub fn tick(&mut self, delta: f64) -> Result<()> {
        let duration = self.stream()?.index.duration();
        match self.state {
            PlaybackState::Playing => self.advance(delta, duration),
            PlaybackState::Scrubbing => self.state = self.resume_state,
            _ => {}
        }
        self.update_target();
        Ok(())
    }

    /// Decode the frame for the current time without advancing the clock
    pub fn update_now(&mut self) -> Result<()> {
        self.stream()?;
        if self.state == PlaybackState::Scrubbing {
            self.state = self.resume_state;
        }
        self.update_target();
        Ok(())
    }

    fn advance(&mut self, delta: f64, duration: f64) {
        if !delta.is_finite() {
            return;
        }
        self.time += delta * self.speed;

        // Landing exactly on the end shows the last frame; only passing it wraps or stops
        if self.time > duration || self.time < 0.0 {
            if self.looping {
                self.time = self.time.rem_euclid(duration);
            } else {
                self.time = self.time.clamp(0.0, duration);
                self.state = PlaybackState::Paused;
                info!("Playback finished at {:.3}s", self.time);
                self.emit(PlayerEvent::PlaybackFinished);
            }
        }
    }

    fn update_target(&mut self) {
        let decoder = self.decoder;
        let time = self.time;
        let Some(stream) = self.stream.as_mut() else {
            return;
        };

        let target = stream.index.frame_for_time(time);
        if stream.last_decoded == Some(target) {
            return;
        }

        match stream.decode(target, &decoder) {
            Ok(frame) => {
                let (index, format, len) = (frame.index, frame.format, frame.data.len());
                if let Some(previous) = self.slot.publish(frame) {
                    // Reuse the replaced buffer unless a reader still holds it
                    if let Ok(previous) = Arc::try_unwrap(previous) {
                        stream.spare = previous.data;
                    }
                }
                stream.last_decoded = Some(target);
                self.stats.decoded_frames += 1;
                debug!("Published frame {} ({} bytes {})", index, len, format);
                self.emit(PlayerEvent::FrameDecoded { index });
            }
            Err(e) => {
                self.stats.failed_decodes += 1;
                warn!("Frame {} failed to decode: {}", target, e);
                self.emit(PlayerEvent::DecodeFailed {
                    index: target,
                    message: e.to_string(),
                });
            }
        }
    }

    fn emit(&mut self, event: PlayerEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                self.stats.dropped_events += 1;
                debug!("Event queue full, dropping: {}", event);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// The published frame; `NotReady` until the first decode succeeds
    pub fn current_frame(&self) -> Result<Arc<TextureFrame>> {
        self.stream()?;
        self.slot.load().ok_or(MediaError::NotReady)
    }

    /// Hand the published frame to a sink
    pub fn present_to(&self, sink: &mut dyn FrameSink) -> Result<()> {
        let frame = self.current_frame()?;
        sink.present(&frame);
        Ok(())
    }

    /// Shared slot the published frames go through
    pub fn frame_slot(&self) -> Arc<FrameSlot> {
        Arc::clone(&self.slot)
    }

    /// Receiver for playback events
    pub fn events(&self) -> Receiver<PlayerEvent> {
        self.event_rx.clone()
    }

    /// Current state
    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// Current playback time in seconds
    pub fn current_time(&self) -> f64 {
        self.time
    }

    /// Speed factor
    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Whether playback wraps at the ends
    pub fn is_looping(&self) -> bool {
        self.looping
    }

    /// Decode statistics
    pub fn stats(&self) -> PlaybackStats {
        self.stats
    }

    /// Metadata of the open stream
    pub fn metadata(&self) -> Result<&StreamMetadata> {
        Ok(self.stream()?.index.metadata())
    }

    /// Frame table of the open stream
    pub fn frame_index(&self) -> Result<&FrameIndex> {
        Ok(&self.stream()?.index)
    }

    /// Codec of the open stream
    pub fn codec_type(&self) -> Result<CodecType> {
        Ok(self.stream()?.index.metadata().codec)
    }

    /// Texture format selection of the open stream
    pub fn selection(&self) -> Result<&FormatSelection> {
        Ok(&self.stream()?.selection)
    }

    /// Blit shader the host should present frames with
    pub fn blit_shader(&self) -> Result<&'static str> {
        let stream = self.stream()?;
        // CPU-converted frames are plain RGBA
        if stream.selection.transcode == Transcode::YCoCgToRgba {
            return Ok(CodecType::Hap.blit_shader());
        }
        Ok(stream.index.metadata().codec.blit_shader())
    }

    /// Index of the published frame
    pub fn last_decoded_frame(&self) -> Option<usize> {
        self.stream.as_ref().and_then(|s| s.last_decoded)
    }
}

impl fmt::Debug for PlaybackScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybackScheduler")
            .field("state", &self.state)
            .field("time", &self.time)
            .field("speed", &self.speed)
            .field("looping", &self.looping)
            .field("last_decoded", &self.last_decoded_frame())
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    fn scheduler() -> PlaybackScheduler {
        PlaybackScheduler::new(&PlayerConfig::default(), PlatformCapabilities::desktop())
    }

    #[test]
    fn test_closed_scheduler_reports_not_open() {
        let mut player = scheduler();
        assert_eq!(player.state(), PlaybackState::Closed);
        assert!(matches!(player.tick(0.1), Err(MediaError::NotOpen)));
        assert!(matches!(player.set_time(1.0), Err(MediaError::NotOpen)));
        assert!(matches!(player.current_frame(), Err(MediaError::NotOpen)));
        assert!(matches!(player.play(), Err(MediaError::NotOpen)));
        assert!(matches!(player.metadata(), Err(MediaError::NotOpen)));
        assert!(matches!(player.update_now(), Err(MediaError::NotOpen)));
    }

    #[test]
    fn test_open_garbage_stays_closed() {
        let mut player = scheduler();
        let result = player.open(Arc::new(MemorySource::new(vec![0u8; 3])));
        assert!(matches!(result, Err(MediaError::MalformedContainer(_))));
        assert_eq!(player.state(), PlaybackState::Closed);
    }

    #[test]
    fn test_frame_slot_publish_and_reclaim() {
        let slot = FrameSlot::new();
        assert!(slot.load().is_none());

        let frame = TextureFrame {
            index: 0,
            format: GpuFormat::Bc1,
            width: 4,
            height: 4,
            data: vec![0; 8],
        };
        assert!(slot.publish(frame.clone()).is_none());

        let reader = slot.load().unwrap();
        let previous = slot.publish(TextureFrame { index: 1, ..frame }).unwrap();
        // A reader still holds frame 0, so it cannot be reclaimed
        let previous = Arc::try_unwrap(previous).unwrap_err();
        assert_eq!(previous.index, 0);
        drop(reader);
        assert!(Arc::try_unwrap(previous).is_ok());

        slot.clear();
        assert!(slot.load().is_none());
    }

    #[test]
    fn test_hap_paths() {
        assert!(is_hap_path(Path::new("clip.mov")));
        assert!(is_hap_path(Path::new("clip.HAP")));
        assert!(!is_hap_path(Path::new("clip.mp4")));
        assert!(!is_hap_path(Path::new("clip")));
    }

    #[test]
    fn test_speed_ignores_non_finite() {
        let mut player = scheduler();
        player.set_speed(2.0);
        player.set_speed(f64::NAN);
        assert_eq!(player.speed(), 2.0);
    }
}
