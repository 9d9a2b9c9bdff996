//! Blit pipelines for presenting frame textures
//!
//! The scheduler names the shader a stream needs (`"hap"` or `"hap_q"`); this
//! module maps the name to WGSL and builds a full-screen pipeline around it.

use crate::{RenderError, Result};
use tracing::debug;

/// Straight sample, used for HAP, HAP Alpha and RGBA8 frames
pub const HAP_BLIT_WGSL: &str = include_str!("../shaders/hap_blit.wgsl");

/// Scaled YCoCg to RGB, used for HAP Q frames
pub const HAP_Q_BLIT_WGSL: &str = include_str!("../shaders/hap_q_blit.wgsl");

/// WGSL source for a blit shader name
pub fn blit_source(shader: &str) -> Option<&'static str> {
    match shader {
        "hap" => Some(HAP_BLIT_WGSL),
        "hap_q" => Some(HAP_Q_BLIT_WGSL),
        _ => None,
    }
}

/// Full-screen blit of one frame texture into a render target
pub struct BlitPipeline {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
}

impl BlitPipeline {
    /// Build the pipeline for `shader` drawing into `target_format`
    pub fn new(
        device: &wgpu::Device,
        shader: &str,
        target_format: wgpu::TextureFormat,
    ) -> Result<Self> {
        let source =
            blit_source(shader).ok_or_else(|| RenderError::UnknownShader(shader.to_string()))?;
        debug!("Creating '{}' blit pipeline for {:?}", shader, target_format);

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Frame Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Frame Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(shader),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Blit Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Blit Pipeline"),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: &module,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &module,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: target_format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        Ok(Self {
            pipeline,
            bind_group_layout,
            sampler,
        })
    }

    /// Bind a frame texture for drawing
    pub fn bind_group(&self, device: &wgpu::Device, view: &wgpu::TextureView) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Frame Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        })
    }

    /// Draw the full-screen triangle
    pub fn draw(&self, pass: &mut wgpu::RenderPass<'_>, bind_group: &wgpu::BindGroup) {
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, bind_group, &[]);
        pass.draw(0..3, 0..1);
    }

    /// Record and submit one pass drawing `source` over `target`
    pub fn blit(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        source: &wgpu::TextureView,
        target: &wgpu::TextureView,
    ) {
        let bind_group = self.bind_group(device, source);
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Blit Encoder"),
        });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Blit Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: target,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            self.draw(&mut pass, &bind_group);
        }
        queue.submit(std::iter::once(encoder.finish()));
    }
}

/// Format of the offscreen target frames are presented into
pub const PRESENT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Presents uploaded frames into an offscreen RGBA8 target, standing in for a
/// window surface
pub struct FramePresenter {
    pipeline: BlitPipeline,
    target: wgpu::Texture,
    target_view: wgpu::TextureView,
    presented: u64,
}

impl FramePresenter {
    /// Build the blit for `shader` and a `width`x`height` target
    pub fn new(device: &wgpu::Device, shader: &str, width: u32, height: u32) -> Result<Self> {
        let pipeline = BlitPipeline::new(device, shader, PRESENT_FORMAT)?;
        let target = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Present Target"),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: PRESENT_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let target_view = target.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(Self {
            pipeline,
            target,
            target_view,
            presented: 0,
        })
    }

    /// Draw a frame texture into the target
    pub fn present(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, frame: &wgpu::TextureView) {
        self.pipeline.blit(device, queue, frame, &self.target_view);
        self.presented += 1;
    }

    /// The offscreen target
    pub fn target(&self) -> &wgpu::Texture {
        &self.target
    }

    /// Number of frames drawn
    pub fn presented(&self) -> u64 {
        self.presented
    }
}
