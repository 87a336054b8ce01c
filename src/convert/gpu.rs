//! wgpu compute-shader colour converter.
//!
//! Raw frames are uploaded into a storage buffer, converted by
//! `convert.wgsl` into an `Rgba8Unorm` storage texture, and copied into a
//! mappable buffer on read-back. Queue order guarantees a read-back sees
//! every conversion submitted before it.

use std::borrow::Cow;
use std::sync::mpsc;

use bytemuck::{Pod, Zeroable};
use tracing::{debug, info};

use crate::device::types::PixelFormat;

use super::colour::Coefficients;
use super::error::{ConversionError, Result};
use super::{Allocation, ColorConverter};

const WORKGROUP_SIZE: u32 = 8;

/// Uniform block shared with `convert.wgsl`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct Params {
    width: u32,
    height: u32,
    row_bytes: u32,
    format: u32,
    kr: f32,
    kb: f32,
    _pad0: u32,
    _pad1: u32,
}

fn format_code(pixel_format: PixelFormat) -> u32 {
    match pixel_format {
        PixelFormat::Yuv8 => 0,
        PixelFormat::Yuv10 => 1,
        PixelFormat::Argb8 => 2,
        PixelFormat::Bgra8 => 3,
        PixelFormat::Rgb10 => 4,
    }
}

/// Row pitch of the read-back buffer, padded to the copy alignment.
fn padded_row_bytes(width: u32) -> u32 {
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    (width * 4).div_ceil(align) * align
}

struct FrameResources {
    allocation: Allocation,
    source: wgpu::Buffer,
    source_size: u64,
    params: wgpu::Buffer,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    readback: wgpu::Buffer,
    padded_row: u32,
    bind_group: wgpu::BindGroup,
}

pub struct GpuConverter {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    resources: Option<FrameResources>,
}

impl GpuConverter {
    /// Acquire a GPU and compile the conversion kernel.
    pub fn new() -> Result<Self> {
        let instance = wgpu::Instance::default();
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            compatible_surface: None,
        }))
        .map_err(|_| ConversionError::NoAdapter)?;
        info!("GPU converter using adapter {}", adapter.get_info().name);

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("deckgrab"),
            ..Default::default()
        }))
        .map_err(|e| ConversionError::DeviceRequest(e.to_string()))?;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("deckgrab-convert"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(include_str!("convert.wgsl"))),
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("deckgrab-convert"),
            layout: None,
            module: &shader,
            entry_point: Some("convert_main"),
            compilation_options: Default::default(),
            cache: None,
        });
        let bind_group_layout = pipeline.get_bind_group_layout(0);

        Ok(Self {
            device,
            queue,
            pipeline,
            bind_group_layout,
            resources: None,
        })
    }

    fn create_source(&self, size: u64) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("deckgrab-source"),
            size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    fn create_bind_group(
        &self,
        source: &wgpu::Buffer,
        params: &wgpu::Buffer,
        view: &wgpu::TextureView,
    ) -> wgpu::BindGroup {
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("deckgrab-convert"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: source.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(view),
                },
            ],
        })
    }

    fn wait(&self) -> Result<()> {
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map(|_| ())
            .map_err(|e| ConversionError::ReadBack(e.to_string()))
    }
}

impl ColorConverter for GpuConverter {
    fn name(&self) -> &'static str {
        "gpu"
    }

    fn allocate(&mut self, width: u32, height: u32, pixel_format: PixelFormat) -> Result<()> {
        let allocation = Allocation::new(width, height, pixel_format)?;
        let limit = self.device.limits().max_texture_dimension_2d;
        if width > limit || height > limit {
            return Err(ConversionError::InvalidDimensions { width, height });
        }
        self.resources = None;

        let source_size = (allocation.source_len() as u64).next_multiple_of(4);
        let source = self.create_source(source_size);
        let params = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("deckgrab-params"),
            size: std::mem::size_of::<Params>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("deckgrab-rgba"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let padded_row = padded_row_bytes(width);
        let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("deckgrab-readback"),
            size: padded_row as u64 * height as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = self.create_bind_group(&source, &params, &view);

        self.resources = Some(FrameResources {
            allocation,
            source,
            source_size,
            params,
            texture,
            view,
            readback,
            padded_row,
            bind_group,
        });
        debug!("GPU converter allocated {width}x{height} {pixel_format}");
        Ok(())
    }

    fn convert(&mut self, raw: &[u8], row_bytes: u32, width: u32, height: u32) -> Result<()> {
        let Some(resources) = self.resources.as_ref() else {
            return Err(ConversionError::KernelDispatch(
                "buffers not allocated".into(),
            ));
        };
        let len = resources.allocation.validate(raw, row_bytes, width, height)?;
        let padded_len = len.next_multiple_of(4);

        // Strides wider than the driver default need a bigger source buffer.
        if padded_len as u64 > resources.source_size {
            let source = self.create_source(padded_len as u64);
            let bind_group = self.create_bind_group(&source, &resources.params, &resources.view);
            debug!("GPU source buffer grown to {padded_len} bytes");
            if let Some(resources) = self.resources.as_mut() {
                resources.source = source;
                resources.source_size = padded_len as u64;
                resources.bind_group = bind_group;
            }
        }
        let Some(resources) = self.resources.as_ref() else {
            return Err(ConversionError::KernelDispatch(
                "buffers not allocated".into(),
            ));
        };

        if len == padded_len {
            self.queue.write_buffer(&resources.source, 0, &raw[..len]);
        } else {
            let mut padded = raw[..len].to_vec();
            padded.resize(padded_len, 0);
            self.queue.write_buffer(&resources.source, 0, &padded);
        }

        let k = Coefficients::for_height(height);
        let params = Params {
            width,
            height,
            row_bytes,
            format: format_code(resources.allocation.pixel_format),
            kr: k.kr,
            kb: k.kb,
            _pad0: 0,
            _pad1: 0,
        };
        self.queue
            .write_buffer(&resources.params, 0, bytemuck::bytes_of(&params));

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("deckgrab-convert"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("deckgrab-convert"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &resources.bind_group, &[]);
            pass.dispatch_workgroups(
                width.div_ceil(WORKGROUP_SIZE),
                height.div_ceil(WORKGROUP_SIZE),
                1,
            );
        }
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.wait()
    }

    fn read_rgba(&mut self, out: &mut Vec<u8>) -> Result<()> {
        let Some(resources) = self.resources.as_ref() else {
            return Err(ConversionError::ReadBack("buffers not allocated".into()));
        };
        let Allocation { width, height, .. } = resources.allocation;

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("deckgrab-readback"),
            });
        encoder.copy_texture_to_buffer(
            resources.texture.as_image_copy(),
            wgpu::TexelCopyBufferInfo {
                buffer: &resources.readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(resources.padded_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let slice = resources.readback.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.wait()?;
        rx.recv()
            .map_err(|e| ConversionError::ReadBack(e.to_string()))?
            .map_err(|e| ConversionError::ReadBack(e.to_string()))?;

        {
            let mapped = slice.get_mapped_range();
            let row_len = width as usize * 4;
            out.clear();
            out.reserve(resources.allocation.rgba_len());
            for row in mapped.chunks(resources.padded_row as usize).take(height as usize) {
                out.extend_from_slice(&row[..row_len]);
            }
        }
        resources.readback.unmap();
        Ok(())
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        self.resources
            .as_ref()
            .map(|r| (r.allocation.width, r.allocation.height))
    }

    fn release(&mut self) {
        if let Some(resources) = self.resources.take() {
            resources.source.destroy();
            resources.readback.destroy();
            resources.texture.destroy();
        }
    }

    fn gpu_texture(&self) -> Option<wgpu::Texture> {
        self.resources.as_ref().map(|r| r.texture.clone())
    }
}
