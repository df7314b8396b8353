//! Recording test double for the scaler's device capabilities

use nis_wgpu::device::{ComputeContext, ScalerDevice, TextureDesc};
use nis_wgpu::shader::ComputeShaderDesc;
use nis_wgpu::ScalerError;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Opaque handle standing in for every resource type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(pub u32);

/// What a compile request looked like
#[derive(Debug, Clone)]
pub struct CompileRequest {
    pub path: PathBuf,
    pub entry_point: String,
    pub defines: Vec<(String, String)>,
    pub include_root: PathBuf,
    pub source: String,
}

/// A texture the device was asked to create
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedTexture {
    pub handle: Handle,
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub bytes_per_row: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct RecordingDevice {
    next_id: Cell<u32>,
    /// Number of resources of any kind handed out
    pub resources_created: Cell<usize>,
    pub compiles: RefCell<Vec<CompileRequest>>,
    pub textures: RefCell<Vec<CreatedTexture>>,
    pub samplers: RefCell<Vec<Handle>>,
    pub buffers: RefCell<HashMap<Handle, Vec<u8>>>,
    pub buffer_writes: Cell<usize>,
    pub fail_compile: bool,
}

impl RecordingDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_compile() -> Self {
        Self {
            fail_compile: true,
            ..Self::default()
        }
    }

    fn allocate(&self) -> Handle {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.resources_created.set(self.resources_created.get() + 1);
        Handle(id)
    }

    /// Contents of the single constant buffer
    pub fn constant_buffer_contents(&self) -> Vec<u8> {
        let buffers = self.buffers.borrow();
        assert_eq!(buffers.len(), 1, "expected exactly one constant buffer");
        buffers.values().next().unwrap().clone()
    }

    pub fn last_compile(&self) -> CompileRequest {
        self.compiles.borrow().last().cloned().expect("no shader compiled")
    }

    pub fn define(&self, name: &str) -> Option<String> {
        self.last_compile().defines.iter().find(|(n, _)| n == name).map(|(_, v)| v.clone())
    }
}

impl ScalerDevice for RecordingDevice {
    type TextureView = Handle;
    type StorageView = Handle;
    type Sampler = Handle;
    type Buffer = Handle;
    type Shader = Handle;

    fn compile_compute_shader(&self, desc: &ComputeShaderDesc) -> Result<Handle, ScalerError> {
        let source = desc.load_source()?;
        self.compiles.borrow_mut().push(CompileRequest {
            path: desc.path.clone(),
            entry_point: desc.entry_point.to_string(),
            defines: desc.defines.iter().map(|(n, v)| (n.to_string(), v.to_string())).collect(),
            include_root: desc.includes.root().to_path_buf(),
            source,
        });
        if self.fail_compile {
            return Err(ScalerError::Compilation("rejected by test device".to_string()));
        }
        Ok(self.allocate())
    }

    fn create_texture(&self, desc: &TextureDesc<'_>, data: &[u8]) -> Result<Handle, ScalerError> {
        let handle = self.allocate();
        self.textures.borrow_mut().push(CreatedTexture {
            handle,
            label: desc.label.to_string(),
            width: desc.width,
            height: desc.height,
            bytes_per_row: desc.bytes_per_row,
            data: data.to_vec(),
        });
        Ok(handle)
    }

    fn create_linear_clamp_sampler(&self) -> Result<Handle, ScalerError> {
        let handle = self.allocate();
        self.samplers.borrow_mut().push(handle);
        Ok(handle)
    }

    fn create_constant_buffer(&self, _label: &str, contents: &[u8]) -> Result<Handle, ScalerError> {
        let handle = self.allocate();
        self.buffers.borrow_mut().insert(handle, contents.to_vec());
        Ok(handle)
    }

    fn update_constant_buffer(&self, buffer: &Handle, contents: &[u8]) {
        let mut buffers = self.buffers.borrow_mut();
        let stored = buffers.get_mut(buffer).expect("unknown buffer");
        assert_eq!(stored.len(), contents.len(), "constant buffer size changed");
        stored.copy_from_slice(contents);
        self.buffer_writes.set(self.buffer_writes.get() + 1);
    }
}

/// A command recorded by [`RecordingContext`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Texture(u32, Handle),
    StorageTexture(u32, Handle),
    Sampler(u32, Handle),
    ConstantBuffer(u32, Handle),
    Shader(Handle),
    Dispatch(u32, u32, u32),
}

#[derive(Debug, Default)]
pub struct RecordingContext {
    pub commands: Vec<Command>,
}

impl ComputeContext<RecordingDevice> for RecordingContext {
    fn set_texture(&mut self, slot: u32, view: &Handle) {
        self.commands.push(Command::Texture(slot, *view));
    }

    fn set_storage_texture(&mut self, slot: u32, view: &Handle) {
        self.commands.push(Command::StorageTexture(slot, *view));
    }

    fn set_sampler(&mut self, slot: u32, sampler: &Handle) {
        self.commands.push(Command::Sampler(slot, *sampler));
    }

    fn set_constant_buffer(&mut self, slot: u32, buffer: &Handle) {
        self.commands.push(Command::ConstantBuffer(slot, *buffer));
    }

    fn set_shader(&mut self, shader: &Handle) {
        self.commands.push(Command::Shader(*shader));
    }

    fn dispatch(&mut self, groups_x: u32, groups_y: u32, groups_z: u32) -> Result<(), ScalerError> {
        self.commands.push(Command::Dispatch(groups_x, groups_y, groups_z));
        Ok(())
    }
}

/// Writes a minimal shader source into `dir`
pub fn write_shader(dir: &Path) -> PathBuf {
    let path = dir.join(nis_wgpu::shader::SHADER_FILE_NAME);
    std::fs::write(&path, "#version 450\nvoid main() {}\n").unwrap();
    path
}
