//! Graphics capabilities the scaler depends on
//!
//! The scaler never talks to a graphics API directly. A backend implements
//! [`ScalerDevice`] for resource creation and [`ComputeContext`] for recording
//! work, which keeps the kernel reusable across backends and lets tests swap in
//! a recording double.

use crate::error::Result;
use crate::shader::ComputeShaderDesc;

/// A shader-visible binding slot
///
/// Slots are numbered per resource class, so `Read(0)` and `Write(0)` are
/// distinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingSlot {
    /// Read-only texture
    Read(u32),
    /// Writable storage texture
    Write(u32),
    /// Sampler
    Sampler(u32),
    /// Constant (uniform) buffer
    ConstantBuffer(u32),
}

/// A read-only 2-D texture with four 32-bit float channels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDesc<'a> {
    /// Label for debugging
    pub label: &'a str,
    /// Width in texels
    pub width: u32,
    /// Height in texels
    pub height: u32,
    /// Bytes between the starts of consecutive rows in the initial data
    pub bytes_per_row: u32,
}

/// Resource creation and upload
pub trait ScalerDevice {
    /// Read-only texture view
    type TextureView;
    /// Writable texture view
    type StorageView;
    type Sampler;
    type Buffer;
    /// A compiled compute shader, ready to dispatch
    type Shader;

    /// Compiles a compute shader
    fn compile_compute_shader(&self, desc: &ComputeShaderDesc) -> Result<Self::Shader>;

    /// Creates an RGBA32F texture initialized with `data` and returns its read-only view
    fn create_texture(&self, desc: &TextureDesc<'_>, data: &[u8]) -> Result<Self::TextureView>;

    /// Creates a sampler with linear filtering and clamp-to-edge addressing
    fn create_linear_clamp_sampler(&self) -> Result<Self::Sampler>;

    /// Creates a constant buffer holding `contents`
    fn create_constant_buffer(&self, label: &str, contents: &[u8]) -> Result<Self::Buffer>;

    /// Replaces the whole contents of a constant buffer
    ///
    /// The upload is ordered before any work recorded afterwards.
    fn update_constant_buffer(&self, buffer: &Self::Buffer, contents: &[u8]);
}

/// Records compute work for a device
///
/// Bindings stay in place until their slot is overwritten, like an
/// immediate-mode context.
pub trait ComputeContext<D: ScalerDevice + ?Sized> {
    fn set_texture(&mut self, slot: u32, view: &D::TextureView);
    fn set_storage_texture(&mut self, slot: u32, view: &D::StorageView);
    fn set_sampler(&mut self, slot: u32, sampler: &D::Sampler);
    fn set_constant_buffer(&mut self, slot: u32, buffer: &D::Buffer);
    fn set_shader(&mut self, shader: &D::Shader);

    /// Enqueues the bound shader over a grid of thread groups
    ///
    /// Fails if the bound resources do not satisfy the shader's layout.
    fn dispatch(&mut self, groups_x: u32, groups_y: u32, groups_z: u32) -> Result<()>;
}
