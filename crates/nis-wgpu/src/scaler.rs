//! The upscaling/sharpening compute kernel
//!
//! [`NvScaler`] owns everything one scaling pass needs besides the input and
//! output images: the compiled shader, the coefficient textures, the sampler
//! and the constant buffer. Each frame the driver calls [`NvScaler::configure`]
//! and then [`NvScaler::dispatch`].

use crate::coefficients::{self, FilterCoefficients};
use crate::config::{HdrMode, ScalerConstants, ScalingConfig};
use crate::device::{ComputeContext, ScalerDevice, TextureDesc};
use crate::error::{Result, ScalerError};
use crate::optimizer::{DispatchParams, GpuArchitecture, optimal_dispatch_params};
use crate::shader::{self, ComputeShaderDesc, IncludeResolver, ShaderDefines};
use std::path::{Path, PathBuf};

/// Construction options for [`NvScaler`]
#[derive(Debug, Clone)]
pub struct ScalerOptions {
    /// Directories searched, in order, for the shader source
    pub shader_dirs: Vec<PathBuf>,
    /// Shader source file name
    pub shader_file: String,
    /// GPU architecture class used to pick the tiling
    pub architecture: GpuArchitecture,
    /// Dynamic-range path compiled into the shader
    pub hdr_mode: HdrMode,
    /// Filter tables uploaded at construction
    pub coefficients: FilterCoefficients,
}

impl Default for ScalerOptions {
    fn default() -> Self {
        Self {
            shader_dirs: Vec::new(),
            shader_file: shader::SHADER_FILE_NAME.to_string(),
            architecture: GpuArchitecture::default(),
            hdr_mode: HdrMode::None,
            coefficients: FilterCoefficients::default(),
        }
    }
}

impl ScalerOptions {
    /// Creates options with default settings and the given shader search path
    ///
    /// # Arguments
    /// * `shader_dirs` - Directories searched, in order, for the shader source
    ///
    /// # Returns
    /// Options for the generic architecture, SDR output and the stock filter tables
    pub fn new<P: AsRef<Path>>(shader_dirs: impl IntoIterator<Item = P>) -> Self {
        Self {
            shader_dirs: shader_dirs.into_iter().map(|dir| dir.as_ref().to_path_buf()).collect(),
            ..Default::default()
        }
    }

    /// Selects the architecture class whose tiling is compiled into the shader
    ///
    /// # Arguments
    /// * `architecture` - Usually [`GpuArchitecture::from_adapter_info`] of the target adapter
    pub fn with_architecture(mut self, architecture: GpuArchitecture) -> Self {
        self.architecture = architecture;
        self
    }

    /// Selects the dynamic-range path
    ///
    /// # Arguments
    /// * `hdr_mode` - Compiled into the shader and required of every configuration
    pub fn with_hdr_mode(mut self, hdr_mode: HdrMode) -> Self {
        self.hdr_mode = hdr_mode;
        self
    }

    /// Overrides the shader source file name
    ///
    /// # Arguments
    /// * `shader_file` - File name looked up in each shader directory
    pub fn with_shader_file(mut self, shader_file: impl Into<String>) -> Self {
        self.shader_file = shader_file.into();
        self
    }

    /// Replaces the stock filter tables
    ///
    /// # Arguments
    /// * `coefficients` - Tables uploaded once at construction
    pub fn with_coefficients(mut self, coefficients: FilterCoefficients) -> Self {
        self.coefficients = coefficients;
        self
    }
}

/// State recorded by the last successful `configure`
#[derive(Debug, Clone, Copy)]
struct Configured {
    config: ScalingConfig,
    constants: ScalerConstants,
}

/// A compute pass that upscales and sharpens one image into another
pub struct NvScaler<D: ScalerDevice> {
    /// Tiling compiled into the shader; also sizes the dispatch grid
    params: DispatchParams,
    hdr_mode: HdrMode,
    shader: D::Shader,
    coef_scale: D::TextureView,
    coef_usm: D::TextureView,
    sampler: D::Sampler,
    constant_buffer: D::Buffer,
    configured: Option<Configured>,
}

impl<D: ScalerDevice> NvScaler<D> {
    /// Builds the kernel: picks the tiling, compiles the shader and uploads the tables
    ///
    /// The shader is located before any device resource is created, so a
    /// missing shader fails without touching the device.
    ///
    /// # Arguments
    /// * `device` - Device that compiles the shader and owns the created resources
    /// * `options` - Shader search path, architecture, HDR mode and filter tables
    ///
    /// # Returns
    /// A scaler that must be configured before its first dispatch
    ///
    /// # Errors
    /// * [`ScalerError::ResourceNotFound`] if no shader directory holds the shader file
    /// * [`ScalerError::Io`], [`ScalerError::IncludeNotFound`] or [`ScalerError::IncludeCycle`] if the source cannot be assembled
    /// * [`ScalerError::Compilation`] if the device rejects the shader
    /// * [`ScalerError::Device`] if a table, the sampler or the constant buffer cannot be created
    pub fn new(device: &D, options: &ScalerOptions) -> Result<Self> {
        let params = optimal_dispatch_params(options.architecture, true);
        tracing::debug!(
            "Scaler tiling for {}: {}x{} blocks, {} threads per group",
            options.architecture.name(),
            params.block_width,
            params.block_height,
            params.thread_group_size
        );

        let mut defines = ShaderDefines::new();
        defines
            .add("NIS_SCALER", 1)
            .add("NIS_HDR_MODE", options.hdr_mode.shader_value())
            .add("NIS_BLOCK_WIDTH", params.block_width)
            .add("NIS_BLOCK_HEIGHT", params.block_height)
            .add("NIS_THREAD_GROUP_SIZE", params.thread_group_size);

        let path = shader::locate_shader(&options.shader_dirs, &options.shader_file)?;
        let shader_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        tracing::debug!("Using scaler shader {}", path.display());

        let shader = device.compile_compute_shader(&ComputeShaderDesc {
            label: "NIS Scaler",
            path,
            entry_point: shader::ENTRY_POINT,
            defines,
            includes: IncludeResolver::new(shader_dir),
        })?;

        let coef_scale = device.create_texture(&coefficient_texture_desc("NIS Scale Coefficients"), options.coefficients.scale_bytes())?;
        let coef_usm = device.create_texture(&coefficient_texture_desc("NIS USM Coefficients"), options.coefficients.usm_bytes())?;
        let sampler = device.create_linear_clamp_sampler()?;
        let constant_buffer = device.create_constant_buffer("NIS Config", bytemuck::bytes_of(&ScalerConstants::default()))?;

        tracing::info!("Scaler ready (HDR mode {})", options.hdr_mode.name());

        Ok(Self {
            params,
            hdr_mode: options.hdr_mode,
            shader,
            coef_scale,
            coef_usm,
            sampler,
            constant_buffer,
            configured: None,
        })
    }

    /// Configures a full-image pass: the whole input onto the whole output
    pub fn configure(&mut self, device: &D, sharpness: f32, input_width: u32, input_height: u32, output_width: u32, output_height: u32) -> Result<()> {
        let config = ScalingConfig::full_image(sharpness, input_width, input_height, output_width, output_height).with_hdr_mode(self.hdr_mode);
        self.configure_viewports(device, &config)
    }

    /// Configures a pass between arbitrary viewports of the input and output
    ///
    /// The constant buffer is overwritten completely. On error the previous
    /// configuration stays in effect.
    pub fn configure_viewports(&mut self, device: &D, config: &ScalingConfig) -> Result<()> {
        if config.hdr_mode != self.hdr_mode {
            return Err(ScalerError::InvalidConfig(format!(
                "HDR mode {} differs from the compiled mode {}",
                config.hdr_mode.name(),
                self.hdr_mode.name()
            )));
        }

        let constants = ScalerConstants::new(config)?;
        device.update_constant_buffer(&self.constant_buffer, bytemuck::bytes_of(&constants));
        self.configured = Some(Configured { config: *config, constants });

        Ok(())
    }

    /// Records the scaling pass from `input` into `output`
    ///
    /// Resources are bound in the order the shader's layout lists them, then
    /// one thread group is dispatched per output block.
    pub fn dispatch<C: ComputeContext<D>>(&self, context: &mut C, input: &D::TextureView, output: &D::StorageView) -> Result<()> {
        let (width, height) = self.output_extent().ok_or(ScalerError::NotConfigured)?;

        context.set_texture(0, input);
        context.set_storage_texture(0, output);
        context.set_texture(1, &self.coef_scale);
        context.set_texture(2, &self.coef_usm);
        context.set_sampler(0, &self.sampler);
        context.set_constant_buffer(0, &self.constant_buffer);
        context.set_shader(&self.shader);

        let (groups_x, groups_y, groups_z) = self.params.grid_size(width, height);
        context.dispatch(groups_x, groups_y, groups_z)
    }

    /// Tiling compiled into the shader
    pub fn dispatch_params(&self) -> DispatchParams {
        self.params
    }

    /// Dynamic-range path compiled into the shader
    pub fn hdr_mode(&self) -> HdrMode {
        self.hdr_mode
    }

    /// The configuration currently in effect
    pub fn config(&self) -> Option<&ScalingConfig> {
        self.configured.as_ref().map(|configured| &configured.config)
    }

    /// The constants last uploaded to the constant buffer
    pub fn constants(&self) -> Option<&ScalerConstants> {
        self.configured.as_ref().map(|configured| &configured.constants)
    }

    /// Size of the output region the dispatch grid covers
    pub fn output_extent(&self) -> Option<(u32, u32)> {
        self.configured
            .as_ref()
            .map(|configured| (configured.constants.output_viewport_width, configured.constants.output_viewport_height))
    }
}

impl<D: ScalerDevice> std::fmt::Debug for NvScaler<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NvScaler")
            .field("params", &self.params)
            .field("hdr_mode", &self.hdr_mode)
            .field("configured", &self.configured)
            .finish_non_exhaustive()
    }
}

fn coefficient_texture_desc(label: &str) -> TextureDesc<'_> {
    TextureDesc {
        label,
        width: coefficients::TEXTURE_WIDTH,
        height: coefficients::TEXTURE_HEIGHT,
        bytes_per_row: coefficients::TEXTURE_ROW_PITCH,
    }
}
