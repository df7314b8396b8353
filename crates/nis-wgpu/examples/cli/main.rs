//! Headless image upscaler
//!
//! Loads an image, runs the scaler's configure/dispatch cycle for a number of
//! frames on the GPU and writes the last frame's output as a PNG.
//!
//! # Usage
//! ```bash
//! nis-cli input.png output.png --scale 1.5 --sharpness 0.5 --shader-dir path/to/NIS
//! ```

use clap::Parser;
use image::{DynamicImage, GenericImageView};
use nis_wgpu::{GpuArchitecture, NvScaler, ScalerOptions, WgpuDevice, wgpu_backend};
use std::path::PathBuf;

/// Directories searched for the shader when none are given
const DEFAULT_SHADER_DIRS: [&str; 3] = ["NIS", "../../../NIS", "shaders"];
/// Bytes per RGBA32F texel
const BYTES_PER_TEXEL: u32 = 16;

/// Command-line arguments for the upscaler
#[derive(Parser)]
#[command(version, about = "Upscale and sharpen an image on the GPU")]
struct Args {
    /// Input image file path
    input: PathBuf,

    /// Output PNG file path
    output: PathBuf,

    /// Scale factor between 1.0 and 2.0, used when no explicit size is given
    #[arg(long, short, default_value = "1.5")]
    scale: f64,

    /// Output width in pixels
    #[arg(long)]
    width: Option<u32>,

    /// Output height in pixels
    #[arg(long)]
    height: Option<u32>,

    /// Sharpness between 0.0 and 1.0
    #[arg(long, default_value = "0.5")]
    sharpness: f32,

    /// Number of configure/dispatch cycles to run
    #[arg(long, default_value = "1")]
    frames: u32,

    /// Directory to search for the shader (repeatable, searched in order)
    #[arg(long = "shader-dir")]
    shader_dirs: Vec<PathBuf>,

    /// GPU architecture override (nvidia, amd, intel, generic)
    #[arg(long)]
    arch: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();

    let architecture_override = match args.arch.as_deref().map(str::to_lowercase).as_deref() {
        None => None,
        Some("nvidia") => Some(GpuArchitecture::NvidiaGeneric),
        Some("amd") => Some(GpuArchitecture::AmdGeneric),
        Some("intel") => Some(GpuArchitecture::IntelGeneric),
        Some("generic") => Some(GpuArchitecture::Generic),
        Some(other) => {
            eprintln!("Invalid architecture '{other}'. Valid values: nvidia, amd, intel, generic");
            std::process::exit(1);
        }
    };

    tracing::info!("Loading image from: {}", args.input.display());
    let input_image = image::open(&args.input)?;
    let (input_width, input_height) = input_image.dimensions();
    let output_width = args.width.unwrap_or_else(|| (input_width as f64 * args.scale).round() as u32);
    let output_height = args.height.unwrap_or_else(|| (input_height as f64 * args.scale).round() as u32);
    tracing::info!("Scaling {input_width}x{input_height} -> {output_width}x{output_height}");

    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::PRIMARY,
        ..Default::default()
    });

    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }))?;

    let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
        label: Some("NIS"),
        required_features: wgpu_backend::REQUIRED_FEATURES,
        required_limits: wgpu::Limits::default(),
        memory_hints: wgpu::MemoryHints::default(),
        trace: Default::default(),
    }))?;

    let adapter_info = adapter.get_info();
    let architecture = architecture_override.unwrap_or_else(|| GpuArchitecture::from_adapter_info(&adapter_info));
    tracing::info!("Using {} ({} path)", adapter_info.name, architecture.name());

    let gpu = WgpuDevice::new(device.clone(), queue.clone(), wgpu::TextureFormat::Rgba32Float)?;

    let shader_dirs = if args.shader_dirs.is_empty() {
        DEFAULT_SHADER_DIRS.iter().map(PathBuf::from).collect()
    } else {
        args.shader_dirs
    };
    let options = ScalerOptions::new(&shader_dirs).with_architecture(architecture);
    let mut scaler = NvScaler::new(&gpu, &options)?;

    let input_texture = load_image_to_texture(&device, &queue, &input_image);
    let input_view = input_texture.create_view(&wgpu::TextureViewDescriptor::default());
    let output_texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Output Texture"),
        size: wgpu::Extent3d {
            width: output_width,
            height: output_height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: gpu.storage_format(),
        usage: wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });
    let output_view = output_texture.create_view(&wgpu::TextureViewDescriptor::default());

    for frame in 0..args.frames {
        scaler.configure(&gpu, args.sharpness, input_width, input_height, output_width, output_height)?;

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("NIS Frame") });
        scaler.dispatch(&mut gpu.context(&mut encoder), &input_view, &output_view)?;
        queue.submit(std::iter::once(encoder.finish()));

        device.poll(wgpu::PollType::Wait)?;
        tracing::debug!("Frame {frame} done");
    }

    tracing::info!("Saving result to: {}", args.output.display());
    let output_image = save_texture_to_image(&device, &queue, &output_texture)?;
    DynamicImage::ImageRgba32F(output_image).to_rgba8().save(&args.output)?;

    Ok(())
}

/// Uploads an image as an RGBA32F texture the scaler can sample
fn load_image_to_texture(device: &wgpu::Device, queue: &wgpu::Queue, image: &DynamicImage) -> wgpu::Texture {
    let rgba_image = image.to_rgba32f();
    let (width, height) = rgba_image.dimensions();
    let size = wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    };

    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Input Texture"),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba32Float,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });

    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        bytemuck::cast_slice(rgba_image.as_raw()),
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(width * BYTES_PER_TEXEL),
            rows_per_image: Some(height),
        },
        size,
    );

    texture
}

/// Reads an RGBA32F texture back into an image
fn save_texture_to_image(device: &wgpu::Device, queue: &wgpu::Queue, texture: &wgpu::Texture) -> Result<image::Rgba32FImage, Box<dyn std::error::Error>> {
    let size = texture.size();
    let (width, height) = (size.width, size.height);

    // Buffer copies need rows aligned to COPY_BYTES_PER_ROW_ALIGNMENT
    let unpadded_bytes_per_row = width * BYTES_PER_TEXEL;
    let padded_bytes_per_row = unpadded_bytes_per_row.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT) * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Readback Buffer"),
        size: padded_bytes_per_row as u64 * height as u64,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Readback Encoder") });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &buffer,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded_bytes_per_row),
                rows_per_image: Some(height),
            },
        },
        size,
    );
    queue.submit(std::iter::once(encoder.finish()));

    let buffer_slice = buffer.slice(..);
    let (sender, receiver) = futures_intrusive::channel::shared::oneshot_channel();
    buffer_slice.map_async(wgpu::MapMode::Read, move |v| {
        sender.send(v).ok();
    });

    device.poll(wgpu::PollType::Wait)?;
    pollster::block_on(receiver.receive()).ok_or("Failed to map buffer for reading")??;

    let data = buffer_slice.get_mapped_range();
    let mut pixels = Vec::with_capacity((width * height * 4) as usize);
    for row in data.chunks_exact(padded_bytes_per_row as usize) {
        pixels.extend_from_slice(bytemuck::cast_slice::<u8, f32>(&row[..unpadded_bytes_per_row as usize]));
    }
    drop(data);
    buffer.unmap();

    Ok(image::Rgba32FImage::from_raw(width, height, pixels).ok_or("Failed to create RGBA32F image from data")?)
}
