//! wgpu implementation of the scaler's device capabilities
//!
//! The scaler's numbered slots are flattened into a single bind group. The
//! compute shader must declare the same bindings in set 0:
//!
//! | slot                | binding | resource                       |
//! |---------------------|---------|--------------------------------|
//! | constant buffer 0   | 0       | scaling configuration          |
//! | sampler 0           | 1       | linear clamp sampler           |
//! | read 0              | 2       | input image                    |
//! | write 0             | 3       | output image (storage texture) |
//! | read 1              | 4       | scale coefficients             |
//! | read 2              | 5       | unsharp-mask coefficients      |

use crate::device::{BindingSlot, ComputeContext, ScalerDevice, TextureDesc};
use crate::error::{Result, ScalerError};
use crate::shader::ComputeShaderDesc;
use std::collections::HashMap;
use wgpu::util::DeviceExt;

/// Slot to binding-index mapping of the scaler's bind group
pub const SCALER_BINDINGS: [(BindingSlot, u32); 6] = [
    (BindingSlot::ConstantBuffer(0), 0),
    (BindingSlot::Sampler(0), 1),
    (BindingSlot::Read(0), 2),
    (BindingSlot::Write(0), 3),
    (BindingSlot::Read(1), 4),
    (BindingSlot::Read(2), 5),
];

/// Device features the scaler needs
///
/// The RGBA32F coefficient tables are read through the linear sampler.
pub const REQUIRED_FEATURES: wgpu::Features = wgpu::Features::FLOAT32_FILTERABLE;

/// Returns the bind group index of a slot, if the scaler layout uses it
pub fn binding_index(slot: BindingSlot) -> Option<u32> {
    SCALER_BINDINGS.iter().find(|(candidate, _)| *candidate == slot).map(|(_, binding)| *binding)
}

/// A wgpu device and queue used to build and feed the scaler
#[derive(Debug, Clone)]
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    /// Format of the output storage textures
    storage_format: wgpu::TextureFormat,
}

/// A compiled scaler pipeline with its explicit bind group layout
#[derive(Debug, Clone)]
pub struct WgpuShader {
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
}

impl WgpuDevice {
    /// Wraps a device whose output images use `storage_format`
    ///
    /// # Arguments
    /// * `device` - Device created with at least [`REQUIRED_FEATURES`]
    /// * `queue` - Queue of `device`, used for uploads
    /// * `storage_format` - Format of the output views passed to dispatch
    ///
    /// # Errors
    /// [`ScalerError::Device`] if `device` lacks any of [`REQUIRED_FEATURES`].
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, storage_format: wgpu::TextureFormat) -> Result<Self> {
        let missing = REQUIRED_FEATURES.difference(device.features());
        if !missing.is_empty() {
            return Err(ScalerError::Device(format!("device is missing required features {missing:?}")));
        }

        Ok(Self { device, queue, storage_format })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn storage_format(&self) -> wgpu::TextureFormat {
        self.storage_format
    }

    /// Starts recording scaler work into `encoder`
    pub fn context<'a>(&'a self, encoder: &'a mut wgpu::CommandEncoder) -> WgpuComputeContext<'a> {
        WgpuComputeContext {
            device: &self.device,
            encoder,
            bindings: HashMap::new(),
            shader: None,
        }
    }

    fn validated<T>(&self, f: impl FnOnce() -> T, map_err: impl FnOnce(wgpu::Error) -> ScalerError) -> Result<T> {
        validated(&self.device, f, map_err)
    }

    fn bind_group_layout_entry(&self, slot: BindingSlot, binding: u32) -> wgpu::BindGroupLayoutEntry {
        let ty = match slot {
            BindingSlot::Read(_) => wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            BindingSlot::Write(_) => wgpu::BindingType::StorageTexture {
                access: wgpu::StorageTextureAccess::WriteOnly,
                format: self.storage_format,
                view_dimension: wgpu::TextureViewDimension::D2,
            },
            BindingSlot::Sampler(_) => wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            BindingSlot::ConstantBuffer(_) => wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
        };

        wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty,
            count: None,
        }
    }
}

impl ScalerDevice for WgpuDevice {
    type TextureView = wgpu::TextureView;
    type StorageView = wgpu::TextureView;
    type Sampler = wgpu::Sampler;
    type Buffer = wgpu::Buffer;
    type Shader = WgpuShader;

    fn compile_compute_shader(&self, desc: &ComputeShaderDesc) -> Result<WgpuShader> {
        let source = desc.load_source()?;
        let defines: Vec<(&str, &str)> = desc.defines.iter().collect();

        self.validated(
            || {
                let shader_module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(desc.label),
                    source: wgpu::ShaderSource::Glsl {
                        shader: source.into(),
                        stage: wgpu::naga::ShaderStage::Compute,
                        defines: &defines,
                    },
                });

                let mut bind_group_layout_entries = SCALER_BINDINGS
                    .iter()
                    .map(|&(slot, binding)| self.bind_group_layout_entry(slot, binding))
                    .collect::<Vec<_>>();
                bind_group_layout_entries.sort_by_key(|entry| entry.binding);

                let bind_group_layout = self.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some(desc.label),
                    entries: &bind_group_layout_entries,
                });

                let pipeline_layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: Some(desc.label),
                    bind_group_layouts: &[&bind_group_layout],
                    push_constant_ranges: &[],
                });

                let pipeline = self.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(desc.label),
                    layout: Some(&pipeline_layout),
                    module: &shader_module,
                    entry_point: Some(desc.entry_point),
                    compilation_options: Default::default(),
                    cache: None,
                });

                WgpuShader { pipeline, bind_group_layout }
            },
            |error| ScalerError::Compilation(error.to_string()),
        )
    }

    fn create_texture(&self, desc: &TextureDesc<'_>, data: &[u8]) -> Result<wgpu::TextureView> {
        let required = desc.bytes_per_row as usize * desc.height as usize;
        if data.len() < required {
            return Err(ScalerError::Device(format!("{}: {} bytes of texture data, expected {required}", desc.label, data.len())));
        }

        let size = wgpu::Extent3d {
            width: desc.width,
            height: desc.height,
            depth_or_array_layers: 1,
        };

        let texture = self.validated(
            || {
                let texture = self.device.create_texture(&wgpu::TextureDescriptor {
                    label: Some(desc.label),
                    size,
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: wgpu::TextureFormat::Rgba32Float,
                    usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                    view_formats: &[],
                });

                self.queue.write_texture(
                    wgpu::TexelCopyTextureInfo {
                        texture: &texture,
                        mip_level: 0,
                        origin: wgpu::Origin3d::ZERO,
                        aspect: wgpu::TextureAspect::All,
                    },
                    data,
                    wgpu::TexelCopyBufferLayout {
                        offset: 0,
                        bytes_per_row: Some(desc.bytes_per_row),
                        rows_per_image: Some(desc.height),
                    },
                    size,
                );

                texture
            },
            |error| ScalerError::Device(format!("{}: {error}", desc.label)),
        )?;

        tracing::debug!("Uploaded {} ({}x{} RGBA32F)", desc.label, desc.width, desc.height);
        Ok(texture.create_view(&wgpu::TextureViewDescriptor::default()))
    }

    fn create_linear_clamp_sampler(&self) -> Result<wgpu::Sampler> {
        self.validated(
            || {
                self.device.create_sampler(&wgpu::SamplerDescriptor {
                    label: Some("NIS Linear Clamp Sampler"),
                    address_mode_u: wgpu::AddressMode::ClampToEdge,
                    address_mode_v: wgpu::AddressMode::ClampToEdge,
                    address_mode_w: wgpu::AddressMode::ClampToEdge,
                    mag_filter: wgpu::FilterMode::Linear,
                    min_filter: wgpu::FilterMode::Linear,
                    mipmap_filter: wgpu::FilterMode::Nearest,
                    lod_min_clamp: 0.0,
                    lod_max_clamp: 0.0,
                    compare: None,
                    anisotropy_clamp: 1,
                    border_color: None,
                })
            },
            |error| ScalerError::Device(format!("sampler: {error}")),
        )
    }

    fn create_constant_buffer(&self, label: &str, contents: &[u8]) -> Result<wgpu::Buffer> {
        self.validated(
            || {
                self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(label),
                    contents,
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                })
            },
            |error| ScalerError::Device(format!("{label}: {error}")),
        )
    }

    fn update_constant_buffer(&self, buffer: &wgpu::Buffer, contents: &[u8]) {
        self.queue.write_buffer(buffer, 0, contents);
    }
}

/// Runs `f` inside a validation error scope and reports a captured error through `map_err`
fn validated<T>(device: &wgpu::Device, f: impl FnOnce() -> T, map_err: impl FnOnce(wgpu::Error) -> ScalerError) -> Result<T> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = f();
    match pollster::block_on(device.pop_error_scope()) {
        Some(error) => Err(map_err(error)),
        None => Ok(value),
    }
}

/// A resource held by a binding slot
#[derive(Debug, Clone)]
enum BoundResource {
    TextureView(wgpu::TextureView),
    Sampler(wgpu::Sampler),
    Buffer(wgpu::Buffer),
}

impl BoundResource {
    fn as_binding_resource(&self) -> wgpu::BindingResource<'_> {
        match self {
            BoundResource::TextureView(view) => wgpu::BindingResource::TextureView(view),
            BoundResource::Sampler(sampler) => wgpu::BindingResource::Sampler(sampler),
            BoundResource::Buffer(buffer) => buffer.as_entire_binding(),
        }
    }
}

/// Records scaler dispatches into a command encoder
///
/// Bindings stay in place across dispatches until a slot is overwritten.
#[derive(Debug)]
pub struct WgpuComputeContext<'a> {
    device: &'a wgpu::Device,
    encoder: &'a mut wgpu::CommandEncoder,
    bindings: HashMap<BindingSlot, BoundResource>,
    shader: Option<WgpuShader>,
}

impl ComputeContext<WgpuDevice> for WgpuComputeContext<'_> {
    fn set_texture(&mut self, slot: u32, view: &wgpu::TextureView) {
        self.bindings.insert(BindingSlot::Read(slot), BoundResource::TextureView(view.clone()));
    }

    fn set_storage_texture(&mut self, slot: u32, view: &wgpu::TextureView) {
        self.bindings.insert(BindingSlot::Write(slot), BoundResource::TextureView(view.clone()));
    }

    fn set_sampler(&mut self, slot: u32, sampler: &wgpu::Sampler) {
        self.bindings.insert(BindingSlot::Sampler(slot), BoundResource::Sampler(sampler.clone()));
    }

    fn set_constant_buffer(&mut self, slot: u32, buffer: &wgpu::Buffer) {
        self.bindings.insert(BindingSlot::ConstantBuffer(slot), BoundResource::Buffer(buffer.clone()));
    }

    fn set_shader(&mut self, shader: &WgpuShader) {
        self.shader = Some(shader.clone());
    }

    fn dispatch(&mut self, groups_x: u32, groups_y: u32, groups_z: u32) -> Result<()> {
        let shader = self.shader.as_ref().ok_or_else(|| ScalerError::Device("dispatch without a bound shader".to_string()))?;

        let mut bind_group_entries = Vec::with_capacity(SCALER_BINDINGS.len());
        for (slot, binding) in SCALER_BINDINGS {
            let resource = self.bindings.get(&slot).ok_or_else(|| ScalerError::Device(format!("nothing bound to {slot:?}")))?;
            bind_group_entries.push(wgpu::BindGroupEntry {
                binding,
                resource: resource.as_binding_resource(),
            });
        }

        // A view of the wrong format or sample type only shows up here
        let bind_group = validated(
            self.device,
            || {
                self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("NIS Scaler"),
                    layout: &shader.bind_group_layout,
                    entries: &bind_group_entries,
                })
            },
            |error| ScalerError::Device(format!("bind group: {error}")),
        )?;

        let mut compute_pass = self.encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("NIS Scaler"),
            timestamp_writes: None,
        });
        compute_pass.set_pipeline(&shader.pipeline);
        compute_pass.set_bind_group(0, &bind_group, &[]);
        compute_pass.dispatch_workgroups(groups_x, groups_y, groups_z);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_features_cover_filtered_tables() {
        assert!(REQUIRED_FEATURES.contains(wgpu::Features::FLOAT32_FILTERABLE));
    }

    #[test]
    fn test_binding_indices_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for (_, binding) in SCALER_BINDINGS {
            assert!(seen.insert(binding), "binding {binding} used twice");
        }
    }

    #[test]
    fn test_binding_layout() {
        assert_eq!(binding_index(BindingSlot::ConstantBuffer(0)), Some(0));
        assert_eq!(binding_index(BindingSlot::Sampler(0)), Some(1));
        assert_eq!(binding_index(BindingSlot::Read(0)), Some(2));
        assert_eq!(binding_index(BindingSlot::Write(0)), Some(3));
        assert_eq!(binding_index(BindingSlot::Read(1)), Some(4));
        assert_eq!(binding_index(BindingSlot::Read(2)), Some(5));
        assert_eq!(binding_index(BindingSlot::Read(3)), None);
        assert_eq!(binding_index(BindingSlot::Write(1)), None);
    }
}
