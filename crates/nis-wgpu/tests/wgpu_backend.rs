//! Runs the scaler on a real wgpu device
//!
//! Every test skips itself when the machine has no adapter, or when the
//! adapter cannot provide the features the test needs.

use nis_wgpu::{NvScaler, ScalerError, ScalerOptions, WgpuDevice, shader, wgpu_backend};
use std::path::Path;

/// Declares the six scaler bindings and writes, for every output pixel, the
/// input's red and green channels followed by tap 2 of the first row of each
/// coefficient table.
const PASSTHROUGH_SHADER: &str = r#"#version 450
layout(local_size_x = NIS_THREAD_GROUP_SIZE) in;

layout(set = 0, binding = 0) uniform Config {
    float detect_ratio;
    float detect_thres;
    float min_contrast_ratio;
    float ratio_norm;
    float contrast_boost;
    float eps;
    float sharp_start_y;
    float sharp_scale_y;
    float sharp_strength_min;
    float sharp_strength_scale;
    float sharp_limit_min;
    float sharp_limit_scale;
    float scale_x;
    float scale_y;
    float dst_norm_x;
    float dst_norm_y;
    float src_norm_x;
    float src_norm_y;
    uint input_viewport_origin_x;
    uint input_viewport_origin_y;
    uint input_viewport_width;
    uint input_viewport_height;
    uint output_viewport_origin_x;
    uint output_viewport_origin_y;
    uint output_viewport_width;
    uint output_viewport_height;
    float reserved0;
    float reserved1;
} config;
layout(set = 0, binding = 1) uniform sampler linear_clamp;
layout(set = 0, binding = 2) uniform texture2D in_texture;
layout(set = 0, binding = 3, rgba32f) uniform writeonly image2D out_texture;
layout(set = 0, binding = 4) uniform texture2D coef_scale;
layout(set = 0, binding = 5) uniform texture2D coef_usm;

void main() {
    uvec2 block_origin = gl_WorkGroupID.xy * uvec2(NIS_BLOCK_WIDTH, NIS_BLOCK_HEIGHT);
    vec2 first_texel = vec2(0.25, 0.5 / 64.0);
    float scale_tap = textureLod(sampler2D(coef_scale, linear_clamp), first_texel, 0.0).z;
    float usm_tap = textureLod(sampler2D(coef_usm, linear_clamp), first_texel, 0.0).z;

    for (uint i = gl_LocalInvocationIndex; i < uint(NIS_BLOCK_WIDTH * NIS_BLOCK_HEIGHT); i += uint(NIS_THREAD_GROUP_SIZE)) {
        uvec2 dst = block_origin + uvec2(i % uint(NIS_BLOCK_WIDTH), i / uint(NIS_BLOCK_WIDTH));
        if (dst.x >= config.output_viewport_width || dst.y >= config.output_viewport_height) {
            continue;
        }
        vec2 uv = (vec2(dst) + 0.5) * vec2(config.dst_norm_x, config.dst_norm_y);
        vec4 color = textureLod(sampler2D(in_texture, linear_clamp), uv, 0.0);
        imageStore(out_texture, ivec2(dst), vec4(color.r, color.g, scale_tap, usm_tap));
    }
}
"#;

const INPUT_COLOR: [f32; 4] = [0.25, 0.75, 0.0, 1.0];
const BYTES_PER_TEXEL: u32 = 16;

fn adapter() -> Option<wgpu::Adapter> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });

    match pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    })) {
        Ok(adapter) => Some(adapter),
        Err(error) => {
            eprintln!("skipping: no wgpu adapter ({error})");
            None
        }
    }
}

fn request_device(adapter: &wgpu::Adapter, features: wgpu::Features) -> (wgpu::Device, wgpu::Queue) {
    pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
        label: Some("NIS Test"),
        required_features: features,
        required_limits: adapter.limits(),
        memory_hints: wgpu::MemoryHints::default(),
        trace: Default::default(),
    }))
    .unwrap()
}

/// A device able to run the scaler, if this machine has one
fn scaler_device() -> Option<WgpuDevice> {
    let adapter = adapter()?;
    if !adapter.features().contains(wgpu_backend::REQUIRED_FEATURES) {
        eprintln!("skipping: {} lacks {:?}", adapter.get_info().name, wgpu_backend::REQUIRED_FEATURES);
        return None;
    }
    let (device, queue) = request_device(&adapter, wgpu_backend::REQUIRED_FEATURES);
    Some(WgpuDevice::new(device, queue, wgpu::TextureFormat::Rgba32Float).unwrap())
}

fn write_shader(dir: &Path, source: &str) {
    std::fs::write(dir.join(shader::SHADER_FILE_NAME), source).unwrap();
}

fn solid_input(gpu: &WgpuDevice, width: u32, height: u32) -> wgpu::TextureView {
    let size = wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    };
    let texture = gpu.device().create_texture(&wgpu::TextureDescriptor {
        label: Some("Input Texture"),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba32Float,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });

    let pixels = INPUT_COLOR.repeat((width * height) as usize);
    gpu.queue().write_texture(
        wgpu::TexelCopyTextureInfo {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        bytemuck::cast_slice(&pixels),
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(width * BYTES_PER_TEXEL),
            rows_per_image: Some(height),
        },
        size,
    );

    texture.create_view(&wgpu::TextureViewDescriptor::default())
}

fn output_texture(gpu: &WgpuDevice, width: u32, height: u32, format: wgpu::TextureFormat) -> wgpu::Texture {
    gpu.device().create_texture(&wgpu::TextureDescriptor {
        label: Some("Output Texture"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    })
}

/// Reads an RGBA32F texture back as rows of texels
fn read_back(gpu: &WgpuDevice, texture: &wgpu::Texture) -> Vec<[f32; 4]> {
    let size = texture.size();
    let unpadded_bytes_per_row = size.width * BYTES_PER_TEXEL;
    let padded_bytes_per_row = unpadded_bytes_per_row.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT) * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

    let buffer = gpu.device().create_buffer(&wgpu::BufferDescriptor {
        label: Some("Readback Buffer"),
        size: padded_bytes_per_row as u64 * size.height as u64,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = gpu.device().create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Readback Encoder") });
    encoder.copy_texture_to_buffer(
        texture.as_image_copy(),
        wgpu::TexelCopyBufferInfo {
            buffer: &buffer,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded_bytes_per_row),
                rows_per_image: Some(size.height),
            },
        },
        size,
    );
    gpu.queue().submit(std::iter::once(encoder.finish()));

    let buffer_slice = buffer.slice(..);
    let (sender, receiver) = futures_intrusive::channel::shared::oneshot_channel();
    buffer_slice.map_async(wgpu::MapMode::Read, move |v| {
        sender.send(v).ok();
    });
    gpu.device().poll(wgpu::PollType::Wait).unwrap();
    pollster::block_on(receiver.receive()).unwrap().unwrap();

    let data = buffer_slice.get_mapped_range();
    let mut texels = Vec::with_capacity((size.width * size.height) as usize);
    for row in data.chunks_exact(padded_bytes_per_row as usize) {
        texels.extend_from_slice(bytemuck::cast_slice::<u8, [f32; 4]>(&row[..unpadded_bytes_per_row as usize]));
    }
    drop(data);
    buffer.unmap();
    texels
}

#[test]
fn test_dispatch_writes_every_output_pixel() {
    let Some(gpu) = scaler_device() else { return };
    let dir = tempfile::tempdir().unwrap();
    write_shader(dir.path(), PASSTHROUGH_SHADER);

    let mut scaler = NvScaler::new(&gpu, &ScalerOptions::new([dir.path()])).unwrap();

    // Not a multiple of either block dimension, so edge blocks are partial
    let (input_width, input_height, output_width, output_height) = (32, 24, 45, 31);
    scaler.configure(&gpu, 0.5, input_width, input_height, output_width, output_height).unwrap();

    let input = solid_input(&gpu, input_width, input_height);
    let output = output_texture(&gpu, output_width, output_height, wgpu::TextureFormat::Rgba32Float);
    let output_view = output.create_view(&wgpu::TextureViewDescriptor::default());

    let mut encoder = gpu.device().create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("NIS Frame") });
    scaler.dispatch(&mut gpu.context(&mut encoder), &input, &output_view).unwrap();
    gpu.queue().submit(std::iter::once(encoder.finish()));

    let texels = read_back(&gpu, &output);
    assert_eq!(texels.len(), (output_width * output_height) as usize);
    for (index, texel) in texels.iter().enumerate() {
        let (x, y) = (index as u32 % output_width, index as u32 / output_width);
        assert!((texel[0] - INPUT_COLOR[0]).abs() < 1e-6, "red at {x},{y} is {}", texel[0]);
        assert!((texel[1] - INPUT_COLOR[1]).abs() < 1e-6, "green at {x},{y} is {}", texel[1]);
        // Tap 2 of phase 0 in each stock table
        assert!((texel[2] - 1.0).abs() < 1e-6, "scale tap at {x},{y} is {}", texel[2]);
        assert!((texel[3] - 1.2002).abs() < 1e-6, "usm tap at {x},{y} is {}", texel[3]);
    }
}

#[test]
fn test_invalid_shader_is_a_compilation_error() {
    let Some(gpu) = scaler_device() else { return };
    let dir = tempfile::tempdir().unwrap();
    write_shader(dir.path(), "#version 450\nvoid main() { not_a_function(); }\n");

    let err = NvScaler::new(&gpu, &ScalerOptions::new([dir.path()])).unwrap_err();
    assert!(matches!(err, ScalerError::Compilation(_)), "{err:?}");
}

#[test]
fn test_device_without_required_features_is_rejected() {
    let Some(adapter) = adapter() else { return };
    let (device, queue) = request_device(&adapter, wgpu::Features::empty());

    let err = WgpuDevice::new(device, queue, wgpu::TextureFormat::Rgba32Float).unwrap_err();
    assert!(matches!(err, ScalerError::Device(_)), "{err:?}");
}

#[test]
fn test_mismatched_output_format_fails_dispatch() {
    let Some(gpu) = scaler_device() else { return };
    let dir = tempfile::tempdir().unwrap();
    write_shader(dir.path(), PASSTHROUGH_SHADER);

    let mut scaler = NvScaler::new(&gpu, &ScalerOptions::new([dir.path()])).unwrap();
    scaler.configure(&gpu, 0.5, 16, 16, 24, 24).unwrap();

    let input = solid_input(&gpu, 16, 16);
    let output = output_texture(&gpu, 24, 24, wgpu::TextureFormat::Rgba8Unorm);
    let output_view = output.create_view(&wgpu::TextureViewDescriptor::default());

    let mut encoder = gpu.device().create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("NIS Frame") });
    let err = scaler.dispatch(&mut gpu.context(&mut encoder), &input, &output_view).unwrap_err();
    assert!(matches!(err, ScalerError::Device(_)), "{err:?}");
}
