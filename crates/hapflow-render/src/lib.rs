//! HapFlow Render - GPU Upload and Presentation
//!
//! This crate connects the playback scheduler to wgpu:
//! - Texture format mapping and platform capability detection
//! - A [`hapflow_media::FrameSink`] that uploads frames into a texture
//! - Blit pipelines for the `hap` and `hap_q` shaders, drawn into an
//!   offscreen target
//! - A headless device for uploading without a window

use thiserror::Error;

pub mod blit;
pub mod compressed_texture;
pub mod gpu;

pub use blit::{blit_source, BlitPipeline, FramePresenter, PRESENT_FORMAT};
pub use compressed_texture::{
    capabilities_from_features, check_bc_support, texture_extent, wgpu_format, FrameTexture,
    TextureSink,
};
pub use gpu::HeadlessGpu;

/// Rendering errors
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("No GPU adapter: {0}")]
    NoAdapter(String),

    #[error("Device error: {0}")]
    Device(String),

    #[error("Unknown blit shader: {0}")]
    UnknownShader(String),
}

/// Result type for rendering operations
pub type Result<T> = std::result::Result<T, RenderError>;
