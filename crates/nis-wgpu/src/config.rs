//! Scaling configuration and its constant-buffer layout
//!
//! [`ScalingConfig`] is the CPU-side description of one frame's scaling job.
//! [`ScalerConstants`] is the exact record the compute shader reads from its
//! constant buffer; it is derived from a configuration and uploaded as-is.

use crate::error::{Result, ScalerError};

/// Dynamic-range handling path selected inside the shader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HdrMode {
    /// Standard dynamic range input
    #[default]
    None,
    /// Linear-light HDR input
    Linear,
    /// PQ (SMPTE ST 2084) encoded HDR input
    Pq,
}

impl HdrMode {
    /// Returns the value passed to the shader's HDR mode define
    pub fn shader_value(&self) -> u32 {
        match self {
            HdrMode::None => 0,
            HdrMode::Linear => 1,
            HdrMode::Pq => 2,
        }
    }

    /// Returns the human-readable name of this mode
    pub fn name(&self) -> &'static str {
        match self {
            HdrMode::None => "None",
            HdrMode::Linear => "Linear",
            HdrMode::Pq => "PQ",
        }
    }
}

/// A rectangle inside a texture
///
/// A zero width or height stands for the full extent of the texture on that axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    /// A viewport covering a whole texture of the given size
    pub fn full(width: u32, height: u32) -> Self {
        Self { x: 0, y: 0, width, height }
    }

    /// Replaces zero extents with the texture extent
    fn resolve(&self, texture_width: u32, texture_height: u32) -> Self {
        Self {
            x: self.x,
            y: self.y,
            width: if self.width == 0 { texture_width } else { self.width },
            height: if self.height == 0 { texture_height } else { self.height },
        }
    }

    fn fits_within(&self, width: u32, height: u32) -> bool {
        let right = self.x.checked_add(self.width);
        let bottom = self.y.checked_add(self.height);
        matches!((right, bottom), (Some(r), Some(b)) if r <= width && b <= height)
    }
}

/// One frame's scaling job
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalingConfig {
    /// Sharpening strength, clamped to `[0, 1]`
    pub sharpness: f32,
    /// Full size of the input texture
    pub input_size: (u32, u32),
    /// Region of the input texture that is scaled
    pub input_viewport: Viewport,
    /// Full size of the output texture
    pub output_size: (u32, u32),
    /// Region of the output texture that is written
    pub output_viewport: Viewport,
    /// Dynamic-range handling path
    pub hdr_mode: HdrMode,
}

impl ScalingConfig {
    /// Scales the whole input texture onto the whole output texture
    pub fn full_image(sharpness: f32, input_width: u32, input_height: u32, output_width: u32, output_height: u32) -> Self {
        Self {
            sharpness,
            input_size: (input_width, input_height),
            input_viewport: Viewport::full(input_width, input_height),
            output_size: (output_width, output_height),
            output_viewport: Viewport::full(output_width, output_height),
            hdr_mode: HdrMode::None,
        }
    }

    /// Sets the dynamic-range handling path
    pub fn with_hdr_mode(mut self, hdr_mode: HdrMode) -> Self {
        self.hdr_mode = hdr_mode;
        self
    }
}

/// Constant-buffer record consumed by the compute shader
///
/// Field order and size must match the shader's constant buffer declaration.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ScalerConstants {
    pub detect_ratio: f32,
    pub detect_thres: f32,
    pub min_contrast_ratio: f32,
    pub ratio_norm: f32,

    pub contrast_boost: f32,
    pub eps: f32,
    pub sharp_start_y: f32,
    pub sharp_scale_y: f32,

    pub sharp_strength_min: f32,
    pub sharp_strength_scale: f32,
    pub sharp_limit_min: f32,
    pub sharp_limit_scale: f32,

    pub scale_x: f32,
    pub scale_y: f32,

    pub dst_norm_x: f32,
    pub dst_norm_y: f32,
    pub src_norm_x: f32,
    pub src_norm_y: f32,

    pub input_viewport_origin_x: u32,
    pub input_viewport_origin_y: u32,
    pub input_viewport_width: u32,
    pub input_viewport_height: u32,

    pub output_viewport_origin_x: u32,
    pub output_viewport_origin_y: u32,
    pub output_viewport_width: u32,
    pub output_viewport_height: u32,

    pub reserved0: f32,
    pub reserved1: f32,
}

/// Sharpening response curve for one dynamic-range path
struct SharpenCurve {
    detect_thres: f32,
    min_contrast_ratio: f32,
    max_contrast_ratio: f32,
    sharp_start_y: f32,
    sharp_end_y: f32,
    sharp_strength_min: f32,
    sharp_strength_max: f32,
    sharp_limit_min: f32,
    sharp_limit_max: f32,
}

impl SharpenCurve {
    fn new(sharpness: f32, hdr_mode: HdrMode) -> Self {
        // Map [0, 1] onto [-0.5, 0.5]; the two halves use different gains so
        // that 0 means no sharpening and 1 does not oversharpen.
        let slider = sharpness.clamp(0.0, 1.0) - 0.5;
        let max_scale = if slider >= 0.0 { 1.25 } else { 1.75 };
        let min_scale = if slider >= 0.0 { 1.25 } else { 1.0 };
        let limit_scale = if slider >= 0.0 { 1.25 } else { 1.0 };

        match hdr_mode {
            HdrMode::None => Self {
                detect_thres: 64.0 / 1024.0,
                min_contrast_ratio: 2.0,
                max_contrast_ratio: 10.0,
                sharp_start_y: 0.45,
                sharp_end_y: 0.9,
                sharp_strength_min: (0.4 + slider * min_scale * 1.2).max(0.0),
                sharp_strength_max: 1.6 + slider * max_scale * 1.8,
                sharp_limit_min: (0.14 + slider * limit_scale * 0.32).max(0.1),
                sharp_limit_max: 0.5 + slider * limit_scale * 0.6,
            },
            HdrMode::Linear | HdrMode::Pq => {
                let (sharp_start_y, sharp_end_y) = if hdr_mode == HdrMode::Pq { (0.35, 0.55) } else { (0.3, 0.5) };
                Self {
                    detect_thres: 32.0 / 1024.0,
                    min_contrast_ratio: 1.5,
                    max_contrast_ratio: 5.0,
                    sharp_start_y,
                    sharp_end_y,
                    sharp_strength_min: (0.4 + slider * min_scale * 1.1).max(0.0),
                    sharp_strength_max: 2.2 + slider * max_scale * 1.8,
                    sharp_limit_min: (0.10 + slider * limit_scale * 0.28).max(0.06),
                    sharp_limit_max: 0.6 + slider * limit_scale * 0.6,
                }
            }
        }
    }
}

impl ScalerConstants {
    /// Derives the shader constants for a scaling job
    ///
    /// Fails if a texture is empty, a viewport leaves its texture, or the
    /// viewport ratio is outside the supported 1x to 2x upscaling range.
    pub fn new(config: &ScalingConfig) -> Result<Self> {
        let (input_width, input_height) = config.input_size;
        let (output_width, output_height) = config.output_size;
        if input_width == 0 || input_height == 0 || output_width == 0 || output_height == 0 {
            return Err(ScalerError::InvalidConfig(format!(
                "empty texture: input {input_width}x{input_height}, output {output_width}x{output_height}"
            )));
        }

        let input_viewport = config.input_viewport.resolve(input_width, input_height);
        let output_viewport = config.output_viewport.resolve(output_width, output_height);
        if !input_viewport.fits_within(input_width, input_height) {
            return Err(ScalerError::InvalidConfig(format!("input viewport {input_viewport:?} exceeds {input_width}x{input_height}")));
        }
        if !output_viewport.fits_within(output_width, output_height) {
            return Err(ScalerError::InvalidConfig(format!("output viewport {output_viewport:?} exceeds {output_width}x{output_height}")));
        }

        let scale_x = input_viewport.width as f32 / output_viewport.width as f32;
        let scale_y = input_viewport.height as f32 / output_viewport.height as f32;
        if !(0.5..=1.0).contains(&scale_x) || !(0.5..=1.0).contains(&scale_y) {
            return Err(ScalerError::InvalidConfig(format!(
                "scale {}x{} -> {}x{} is outside the 1x to 2x range",
                input_viewport.width, input_viewport.height, output_viewport.width, output_viewport.height
            )));
        }

        let curve = SharpenCurve::new(config.sharpness, config.hdr_mode);

        Ok(Self {
            detect_ratio: 2.0 * 1127.0 / 1024.0,
            detect_thres: curve.detect_thres,
            min_contrast_ratio: curve.min_contrast_ratio,
            ratio_norm: 1.0 / (curve.max_contrast_ratio - curve.min_contrast_ratio),
            contrast_boost: 1.0,
            eps: 1.0 / 255.0,
            sharp_start_y: curve.sharp_start_y,
            sharp_scale_y: 1.0 / (curve.sharp_end_y - curve.sharp_start_y),
            sharp_strength_min: curve.sharp_strength_min,
            sharp_strength_scale: curve.sharp_strength_max - curve.sharp_strength_min,
            sharp_limit_min: curve.sharp_limit_min,
            sharp_limit_scale: curve.sharp_limit_max - curve.sharp_limit_min,
            scale_x,
            scale_y,
            dst_norm_x: 1.0 / output_width as f32,
            dst_norm_y: 1.0 / output_height as f32,
            src_norm_x: 1.0 / input_width as f32,
            src_norm_y: 1.0 / input_height as f32,
            input_viewport_origin_x: input_viewport.x,
            input_viewport_origin_y: input_viewport.y,
            input_viewport_width: input_viewport.width,
            input_viewport_height: input_viewport.height,
            output_viewport_origin_x: output_viewport.x,
            output_viewport_origin_y: output_viewport.y,
            output_viewport_width: output_viewport.width,
            output_viewport_height: output_viewport.height,
            reserved0: 0.0,
            reserved1: 0.0,
        })
    }
}
