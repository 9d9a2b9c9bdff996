//! BCn / RGBA8 Texture Upload
//!
//! Uploads published frames into a wgpu texture in whichever format the
//! scheduler selected for the stream:
//! - BC1 (HAP), BC3 (HAP Alpha, HAP Q), BC4 and BC7 block data
//! - RGBA8 pixels when the frames were converted on the CPU

use hapflow_core::{format::BLOCK_DIMENSION, GpuFormat};
use hapflow_media::{FrameSink, PlatformCapabilities, TextureFrame};
use std::sync::Arc;
use tracing::{debug, warn};

/// wgpu texture format for a frame format
pub fn wgpu_format(format: GpuFormat) -> wgpu::TextureFormat {
    match format {
        GpuFormat::Bc1 => wgpu::TextureFormat::Bc1RgbaUnorm,
        GpuFormat::Bc3 => wgpu::TextureFormat::Bc3RgbaUnorm,
        GpuFormat::Bc4 => wgpu::TextureFormat::Bc4RUnorm,
        GpuFormat::Bc7 => wgpu::TextureFormat::Bc7RgbaUnorm,
        GpuFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
    }
}

/// Platform capabilities implied by an adapter's feature set
pub fn capabilities_from_features(features: wgpu::Features) -> PlatformCapabilities {
    if features.contains(wgpu::Features::TEXTURE_COMPRESSION_BC) {
        PlatformCapabilities::new(GpuFormat::ALL)
    } else {
        PlatformCapabilities::rgba_only()
    }
}

/// Check if the GPU adapter supports BC compressed textures
pub fn check_bc_support(adapter: &wgpu::Adapter) -> bool {
    adapter
        .features()
        .contains(wgpu::Features::TEXTURE_COMPRESSION_BC)
}

/// Physical size of a texture; block formats round up to whole blocks
pub fn texture_extent(width: u32, height: u32, format: GpuFormat) -> wgpu::Extent3d {
    let align = |v: u32| {
        if format.is_block_compressed() {
            v.div_ceil(BLOCK_DIMENSION) * BLOCK_DIMENSION
        } else {
            v
        }
    };
    wgpu::Extent3d {
        width: align(width).max(1),
        height: align(height).max(1),
        depth_or_array_layers: 1,
    }
}

/// A texture sized and formatted for one stream's frames
#[derive(Debug, Clone)]
pub struct FrameTexture {
    pub texture: Arc<wgpu::Texture>,
    pub view: Arc<wgpu::TextureView>,
    pub width: u32,
    pub height: u32,
    pub format: GpuFormat,
}

impl FrameTexture {
    /// Create a texture for frames of the given size and format
    pub fn new(
        device: &wgpu::Device,
        width: u32,
        height: u32,
        format: GpuFormat,
        label: Option<&str>,
    ) -> Self {
        let size = texture_extent(width, height, format);
        debug!(
            "Creating {} texture: {}x{} (physical {}x{})",
            format, width, height, size.width, size.height
        );

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label,
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu_format(format),
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        Self {
            texture: Arc::new(texture),
            view: Arc::new(view),
            width,
            height,
            format,
        }
    }

    /// Whether a frame can be uploaded into this texture as is
    pub fn fits(&self, frame: &TextureFrame) -> bool {
        self.width == frame.width && self.height == frame.height && self.format == frame.format
    }

    /// Bytes one upload must provide
    pub fn expected_size(&self) -> usize {
        self.format.texture_size(self.width, self.height)
    }

    /// Upload a whole frame's data; returns false if the size is wrong
    pub fn upload(&self, queue: &wgpu::Queue, data: &[u8]) -> bool {
        if data.len() != self.expected_size() {
            warn!(
                "Skipping upload of {} bytes, {}x{} {} needs {}",
                data.len(),
                self.width,
                self.height,
                self.format,
                self.expected_size()
            );
            return false;
        }

        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(self.format.bytes_per_row(self.width)),
                rows_per_image: Some(self.format.rows(self.height)),
            },
            texture_extent(self.width, self.height, self.format),
        );
        true
    }
}

/// [`FrameSink`] that keeps a GPU texture in sync with the published frame
pub struct TextureSink {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    texture: Option<FrameTexture>,
    last_index: Option<usize>,
    uploads: u64,
}

impl TextureSink {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        Self {
            device,
            queue,
            texture: None,
            last_index: None,
            uploads: 0,
        }
    }

    /// Texture holding the latest frame
    pub fn texture(&self) -> Option<&FrameTexture> {
        self.texture.as_ref()
    }

    /// Number of frames uploaded
    pub fn uploads(&self) -> u64 {
        self.uploads
    }
}

impl FrameSink for TextureSink {
    fn present(&mut self, frame: &TextureFrame) {
        let reusable = self.texture.as_ref().is_some_and(|t| t.fits(frame));
        if !reusable {
            self.texture = Some(FrameTexture::new(
                &self.device,
                frame.width,
                frame.height,
                frame.format,
                Some("HAP Frame Texture"),
            ));
            self.last_index = None;
        }
        // The same frame is presented every display refresh until a new one lands
        if self.last_index == Some(frame.index) {
            return;
        }

        let Some(texture) = &self.texture else {
            return;
        };
        if texture.upload(&self.queue, &frame.data) {
            self.last_index = Some(frame.index);
            self.uploads += 1;
        }
    }
}
