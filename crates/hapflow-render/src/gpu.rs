//! Headless GPU context for uploading frames without a window

use crate::compressed_texture::{capabilities_from_features, check_bc_support};
use crate::{RenderError, Result};
use hapflow_media::PlatformCapabilities;
use std::sync::Arc;
use tracing::info;

/// Adapter, device and queue with the features frame upload needs
pub struct HeadlessGpu {
    pub adapter_info: wgpu::AdapterInfo,
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
    features: wgpu::Features,
}

impl HeadlessGpu {
    /// Request the default adapter; BC texture compression is enabled when the
    /// adapter offers it
    pub fn new() -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            compatible_surface: None,
        }))
        .map_err(|e| RenderError::NoAdapter(e.to_string()))?;

        let features = if check_bc_support(&adapter) {
            wgpu::Features::TEXTURE_COMPRESSION_BC
        } else {
            wgpu::Features::empty()
        };
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("HapFlow Device"),
            required_features: features,
            required_limits: wgpu::Limits::downlevel_defaults(),
            ..Default::default()
        }))
        .map_err(|e| RenderError::Device(e.to_string()))?;

        let adapter_info = adapter.get_info();
        info!(
            "Using GPU {} ({:?}), BC textures: {}",
            adapter_info.name,
            adapter_info.backend,
            features.contains(wgpu::Features::TEXTURE_COMPRESSION_BC)
        );

        Ok(Self {
            adapter_info,
            device: Arc::new(device),
            queue: Arc::new(queue),
            features,
        })
    }

    /// Formats frames can be uploaded in on this device
    pub fn capabilities(&self) -> PlatformCapabilities {
        capabilities_from_features(self.features)
    }
}
