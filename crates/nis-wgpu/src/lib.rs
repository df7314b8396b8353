//! Spatial upscaling and sharpening on the GPU
//!
//! This crate drives an image scaling compute shader: it picks the shader's
//! tiling for the GPU architecture, uploads the filter coefficient tables,
//! keeps the per-frame scaling configuration in a constant buffer, and
//! dispatches one compute pass sized to the output. The shader itself is an
//! external asset located at runtime.
//!
//! Graphics access goes through the [`ScalerDevice`] and [`ComputeContext`]
//! traits; [`wgpu_backend`] provides the wgpu implementation.

pub mod coefficients;
pub mod config;
pub mod device;
mod error;
pub mod optimizer;
mod scaler;
pub mod shader;
pub mod wgpu_backend;

pub use coefficients::FilterCoefficients;
pub use config::{HdrMode, ScalerConstants, ScalingConfig, Viewport};
pub use device::{BindingSlot, ComputeContext, ScalerDevice, TextureDesc};
pub use error::ScalerError;
pub use optimizer::{DispatchParams, GpuArchitecture};
pub use scaler::{NvScaler, ScalerOptions};
pub use wgpu_backend::{WgpuComputeContext, WgpuDevice};
