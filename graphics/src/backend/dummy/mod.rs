//! Dummy GPU device for testing and development.
//!
//! This device doesn't talk to any GPU. It keeps CPU-side copies of buffer and
//! texture memory, records every command, and runs a simulated in-order queue
//! whose progress is controlled by a [`TimelineMode`]. Copy commands are
//! executed against the CPU-side memory when their submission completes, so
//! uploads and read-backs round-trip real bytes.
//!
//! Misuse that a real GPU would turn into corruption is recorded as a
//! [`Hazard`] instead of failing, so tests can assert that none happened.

mod command;

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

pub use command::RecordedCommand;
use command::{QueuedOp, Submission};

use crate::backend::{
    BindingLayoutDescriptor, BindingLayoutHandle, BlendState, BufferDescriptor, BufferHandle,
    BufferLayout, CommandAllocatorHandle, FenceHandle, GpuDevice, PipelineDescriptor,
    PipelineHandle, RasterizerState, ResourceHandle, SamplerTableHandle, SurfaceTarget,
    TextureHandle, ViewTableHandle,
};
use crate::error::GraphicsError;
use crate::types::{Region, ResourceState, SamplerDescriptor, TextureFormat, Viewport};

/// Byte distance between views of a dummy view table.
const VIEW_INCREMENT: u32 = 32;

/// First word of every SPIR-V module.
const SPIRV_MAGIC: u32 = 0x0723_0203;

/// How the simulated GPU makes progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimelineMode {
    /// Work completes as soon as it is queued.
    #[default]
    Immediate,
    /// Work completes only when a fence wait needs it or a test drains the queue.
    Deferred,
    /// The GPU never makes progress; unsatisfied waits time out.
    Hung,
}

/// Misuse a real GPU would turn into corruption or a crash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hazard {
    /// The CPU mapped a buffer that queued GPU work still uses.
    MappedWhileInFlight(BufferHandle),
    /// An object was released while queued or recorded GPU work still uses it.
    ReleasedWhileInFlight(ResourceHandle),
    /// An object was released twice.
    DoubleRelease(ResourceHandle),
    /// A released object was used again.
    UseAfterRelease(u64),
    /// An allocator was reset while work recorded with it was still queued.
    AllocatorResetWhileInFlight(CommandAllocatorHandle),
    /// A barrier declared a prior state the texture was not in.
    StateMismatch {
        texture: TextureHandle,
        declared: ResourceState,
        actual: ResourceState,
    },
    /// A texture was used in a state that does not allow the access.
    WrongState {
        texture: TextureHandle,
        required: ResourceState,
        actual: ResourceState,
    },
}

/// Creation points where a failure can be injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailurePoint {
    Buffer,
    Texture,
    ViewTable,
    SamplerTable,
    BindingLayout,
    Pipeline,
    CommandAllocator,
    Fence,
    SwapChain,
    Map,
}

/// Counters of device activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DummyStats {
    pub buffers_created: usize,
    pub textures_created: usize,
    pub binding_layouts_created: usize,
    pub pipelines_created: usize,
    pub submissions: usize,
    pub presents: usize,
    pub fence_waits: usize,
    pub maps: usize,
}

/// Pipeline state captured at creation.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineRecord {
    pub label: String,
    pub layout: BindingLayoutHandle,
    pub blend: BlendState,
    pub rasterizer: RasterizerState,
    pub target_format: TextureFormat,
    pub vertex_stride: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum View {
    Constant(BufferHandle),
    Texture(TextureHandle),
}

impl View {
    fn raw(self) -> u64 {
        match self {
            Self::Constant(buffer) => buffer.raw(),
            Self::Texture(texture) => texture.raw(),
        }
    }
}

#[derive(Debug)]
enum DummyObject {
    Buffer {
        descriptor: BufferDescriptor,
        data: Vec<u8>,
        mapped: bool,
    },
    Texture {
        width: u32,
        height: u32,
        state: ResourceState,
        pixels: Vec<u8>,
        swap_chain: bool,
    },
    CommandAllocator,
    Fence {
        completed: u64,
    },
    ViewTable {
        views: Vec<Option<View>>,
    },
    SamplerTable(SamplerDescriptor),
    BindingLayout(BindingLayoutDescriptor),
    Pipeline(PipelineRecord),
}

#[derive(Debug)]
struct OpenList {
    commands: Vec<RecordedCommand>,
    references: Vec<u64>,
}

/// Dummy GPU device.
#[derive(Debug)]
pub struct DummyDevice {
    mode: TimelineMode,
    next_id: u64,
    objects: HashMap<u64, DummyObject>,
    released: Vec<ResourceHandle>,
    released_ids: HashSet<u64>,
    open_list: Option<OpenList>,
    closed_list: Option<Submission>,
    bound_layout: Option<BindingLayoutHandle>,
    queue: VecDeque<QueuedOp>,
    history: Vec<RecordedCommand>,
    hazards: Vec<Hazard>,
    failures: Vec<FailurePoint>,
    swap_chain: Vec<TextureHandle>,
    swap_chain_format: TextureFormat,
    min_swap_chain_buffers: u32,
    back_buffer: usize,
    stats: DummyStats,
}

impl Default for DummyDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl DummyDevice {
    /// Create a dummy device whose GPU completes work immediately.
    pub fn new() -> Self {
        Self {
            mode: TimelineMode::Immediate,
            next_id: 1,
            objects: HashMap::new(),
            released: Vec::new(),
            released_ids: HashSet::new(),
            open_list: None,
            closed_list: None,
            bound_layout: None,
            queue: VecDeque::new(),
            history: Vec::new(),
            hazards: Vec::new(),
            failures: Vec::new(),
            swap_chain: Vec::new(),
            swap_chain_format: TextureFormat::Rgba8Unorm,
            min_swap_chain_buffers: 0,
            back_buffer: 0,
            stats: DummyStats::default(),
        }
    }

    /// Set how the simulated GPU makes progress.
    pub fn with_timeline_mode(mut self, mode: TimelineMode) -> Self {
        self.mode = mode;
        self
    }

    /// Report `format` for swap chain back buffers.
    pub fn with_swap_chain_format(mut self, format: TextureFormat) -> Self {
        self.swap_chain_format = format;
        self
    }

    /// Create at least `count` back buffers, like a presentation engine with
    /// a minimum image count.
    pub fn with_min_swap_chain_buffers(mut self, count: u32) -> Self {
        self.min_swap_chain_buffers = count;
        self
    }

    /// Change how the simulated GPU makes progress.
    pub fn set_timeline_mode(&mut self, mode: TimelineMode) {
        self.mode = mode;
        if mode == TimelineMode::Immediate {
            self.complete_all();
        }
    }

    /// Make the next creation at `point` fail.
    pub fn fail_next(&mut self, point: FailurePoint) {
        self.failures.push(point);
    }

    /// Execute every queued work item.
    pub fn complete_all(&mut self) {
        while self.process_next() {}
    }

    /// Number of queued work items the GPU has not executed.
    pub fn pending_work(&self) -> usize {
        self.queue.len()
    }

    /// Every hazard recorded so far.
    pub fn hazards(&self) -> &[Hazard] {
        &self.hazards
    }

    /// Every command recorded so far, in order.
    pub fn commands(&self) -> &[RecordedCommand] {
        &self.history
    }

    /// Forget the recorded command history.
    pub fn clear_commands(&mut self) {
        self.history.clear();
    }

    /// Every release, in order.
    pub fn released(&self) -> &[ResourceHandle] {
        &self.released
    }

    /// How many times `handle` was passed to [`GpuDevice::release`].
    pub fn release_count(&self, handle: impl Into<ResourceHandle>) -> usize {
        let handle = handle.into();
        let released = self.released.iter().filter(|h| **h == handle).count();
        let doubled = self
            .hazards
            .iter()
            .filter(|hazard| **hazard == Hazard::DoubleRelease(handle))
            .count();
        released + doubled
    }

    /// Whether `handle` names a live object.
    pub fn is_live(&self, handle: impl Into<ResourceHandle>) -> bool {
        self.objects.contains_key(&handle.into().raw())
    }

    /// Live objects, not counting swap chain buffers.
    pub fn live_object_count(&self) -> usize {
        self.objects
            .values()
            .filter(|object| {
                !matches!(
                    object,
                    DummyObject::Texture {
                        swap_chain: true,
                        ..
                    }
                )
            })
            .count()
    }

    /// Activity counters.
    pub fn stats(&self) -> DummyStats {
        self.stats
    }

    /// Pipeline state captured when `pipeline` was created.
    pub fn pipeline_record(&self, pipeline: PipelineHandle) -> Option<&PipelineRecord> {
        match self.objects.get(&pipeline.raw()) {
            Some(DummyObject::Pipeline(record)) => Some(record),
            _ => None,
        }
    }

    /// Descriptor `buffer` was created with.
    pub fn buffer_descriptor(&self, buffer: BufferHandle) -> Option<&BufferDescriptor> {
        match self.objects.get(&buffer.raw()) {
            Some(DummyObject::Buffer { descriptor, .. }) => Some(descriptor),
            _ => None,
        }
    }

    /// Tightly packed RGBA8 contents of `texture`.
    pub fn texture_pixels(&self, texture: TextureHandle) -> Option<&[u8]> {
        match self.objects.get(&texture.raw()) {
            Some(DummyObject::Texture { pixels, .. }) => Some(pixels),
            _ => None,
        }
    }

    /// Recorded access state of `texture`.
    pub fn texture_state(&self, texture: TextureHandle) -> Option<ResourceState> {
        match self.objects.get(&texture.raw()) {
            Some(DummyObject::Texture { state, .. }) => Some(*state),
            _ => None,
        }
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn take_failure(&mut self, point: FailurePoint) -> Result<(), GraphicsError> {
        if let Some(index) = self.failures.iter().position(|p| *p == point) {
            self.failures.remove(index);
            return Err(GraphicsError::device(
                "dummy device",
                format!("injected {point:?} failure"),
            ));
        }
        Ok(())
    }

    fn check_live(&mut self, raw: u64) -> Result<(), GraphicsError> {
        if self.released_ids.contains(&raw) {
            self.hazards.push(Hazard::UseAfterRelease(raw));
            return Err(GraphicsError::device(
                "dummy device",
                format!("object {raw} was released"),
            ));
        }
        if !self.objects.contains_key(&raw) {
            return Err(GraphicsError::device(
                "dummy device",
                format!("unknown object {raw}"),
            ));
        }
        Ok(())
    }

    fn in_flight(&self, raw: u64) -> bool {
        self.queue.iter().any(|op| op.references(raw))
            || self
                .open_list
                .as_ref()
                .is_some_and(|list| list.references.contains(&raw))
            || self
                .closed_list
                .as_ref()
                .is_some_and(|list| list.references.contains(&raw))
    }

    fn texture_state_mut(&mut self, texture: TextureHandle) -> Option<&mut ResourceState> {
        match self.objects.get_mut(&texture.raw()) {
            Some(DummyObject::Texture { state, .. }) => Some(state),
            _ => None,
        }
    }

    fn require_state(&mut self, texture: TextureHandle, required: ResourceState) {
        if let Some(actual) = self.texture_state(texture)
            && actual != required
        {
            self.hazards.push(Hazard::WrongState {
                texture,
                required,
                actual,
            });
        }
    }

    fn record(&mut self, command: RecordedCommand, references: &[u64]) -> Result<(), GraphicsError> {
        for &raw in references {
            self.check_live(raw)?;
        }
        let Some(list) = self.open_list.as_mut() else {
            return Err(GraphicsError::device(
                "record command",
                "command list is not open",
            ));
        };
        log::trace!("DummyDevice: {command:?}");
        list.references.extend_from_slice(references);
        list.commands.push(command.clone());
        self.history.push(command);
        Ok(())
    }

    fn enqueue(&mut self, op: QueuedOp) {
        self.queue.push_back(op);
        if self.mode == TimelineMode::Immediate {
            self.complete_all();
        }
    }

    fn process_next(&mut self) -> bool {
        let Some(op) = self.queue.pop_front() else {
            return false;
        };
        match op {
            QueuedOp::Execute(submission) => {
                for command in &submission.commands {
                    self.execute(command);
                }
            }
            QueuedOp::Signal { fence, value } => {
                if let Some(DummyObject::Fence { completed }) = self.objects.get_mut(&fence) {
                    *completed = (*completed).max(value);
                }
            }
            QueuedOp::Present { buffer } => {
                log::trace!("DummyDevice: presented back buffer {buffer}");
            }
        }
        true
    }

    /// Run the memory effects of a command on the simulated GPU.
    fn execute(&mut self, command: &RecordedCommand) {
        match *command {
            RecordedCommand::CopyBufferToTexture {
                src,
                layout,
                dst,
                region,
            } => {
                let Some(DummyObject::Buffer { data, .. }) = self.objects.get(&src.raw()) else {
                    return;
                };
                let rows = gather_rows(data, layout, region);
                if let Some(DummyObject::Texture { width, pixels, .. }) =
                    self.objects.get_mut(&dst.raw())
                {
                    let row_bytes = region.width as usize * 4;
                    for (y, row) in rows.chunks_exact(row_bytes).enumerate() {
                        let start = texel_offset(*width, region.x, region.y + y as u32);
                        pixels[start..start + row_bytes].copy_from_slice(row);
                    }
                }
            }
            RecordedCommand::CopyTextureToBuffer {
                src,
                region,
                dst,
                layout,
            } => {
                let Some(DummyObject::Texture { width, pixels, .. }) =
                    self.objects.get(&src.raw())
                else {
                    return;
                };
                let row_bytes = region.width as usize * 4;
                let rows: Vec<u8> = (0..region.height)
                    .flat_map(|y| {
                        let start = texel_offset(*width, region.x, region.y + y);
                        pixels[start..start + row_bytes].iter().copied()
                    })
                    .collect();
                if let Some(DummyObject::Buffer { data, .. }) = self.objects.get_mut(&dst.raw()) {
                    for (y, row) in rows.chunks_exact(row_bytes).enumerate() {
                        let start = layout.offset as usize + y * layout.row_pitch as usize;
                        data[start..start + row_bytes].copy_from_slice(row);
                    }
                }
            }
            _ => {}
        }
    }

    fn fence_value(&self, fence: FenceHandle) -> Result<u64, GraphicsError> {
        match self.objects.get(&fence.raw()) {
            Some(DummyObject::Fence { completed }) => Ok(*completed),
            _ => Err(GraphicsError::device(
                "fence query",
                format!("unknown fence {}", fence.raw()),
            )),
        }
    }

    fn bound_region_count(&self, root_index: u32) -> usize {
        self.bound_layout
            .and_then(|layout| match self.objects.get(&layout.raw()) {
                Some(DummyObject::BindingLayout(descriptor)) => descriptor
                    .regions
                    .get(root_index as usize)
                    .map(|region| region.count as usize),
                _ => None,
            })
            .unwrap_or(1)
    }
}

fn texel_offset(width: u32, x: u32, y: u32) -> usize {
    (y as usize * width as usize + x as usize) * 4
}

fn gather_rows(data: &[u8], layout: BufferLayout, region: Region) -> Vec<u8> {
    let row_bytes = region.width as usize * 4;
    (0..region.height as usize)
        .flat_map(|y| {
            let start = layout.offset as usize + y * layout.row_pitch as usize;
            data[start..start + row_bytes].iter().copied()
        })
        .collect()
}

impl GpuDevice for DummyDevice {
    fn name(&self) -> &'static str {
        "Dummy Device"
    }

    fn create_buffer(&mut self, descriptor: &BufferDescriptor) -> Result<BufferHandle, GraphicsError> {
        self.take_failure(FailurePoint::Buffer)?;
        log::trace!(
            "DummyDevice: creating buffer {:?} (size: {})",
            descriptor.label,
            descriptor.size
        );
        let id = self.allocate_id();
        self.objects.insert(
            id,
            DummyObject::Buffer {
                descriptor: *descriptor,
                data: vec![0; descriptor.size as usize],
                mapped: false,
            },
        );
        self.stats.buffers_created += 1;
        Ok(BufferHandle::from_raw(id))
    }

    fn map_buffer(&mut self, buffer: BufferHandle) -> Result<&mut [u8], GraphicsError> {
        self.take_failure(FailurePoint::Map)?;
        self.check_live(buffer.raw())?;
        if self.queue.iter().any(|op| op.references(buffer.raw())) {
            self.hazards.push(Hazard::MappedWhileInFlight(buffer));
        }
        self.stats.maps += 1;
        match self.objects.get_mut(&buffer.raw()) {
            Some(DummyObject::Buffer { data, mapped, .. }) => {
                *mapped = true;
                Ok(data.as_mut_slice())
            }
            _ => Err(GraphicsError::device("map buffer", "handle is not a buffer")),
        }
    }

    fn unmap_buffer(&mut self, buffer: BufferHandle) -> Result<(), GraphicsError> {
        match self.objects.get_mut(&buffer.raw()) {
            Some(DummyObject::Buffer { mapped, .. }) if *mapped => {
                *mapped = false;
                Ok(())
            }
            Some(DummyObject::Buffer { .. }) => {
                Err(GraphicsError::device("unmap buffer", "buffer is not mapped"))
            }
            _ => Err(GraphicsError::device("unmap buffer", "handle is not a buffer")),
        }
    }

    fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        format: TextureFormat,
        initial_state: ResourceState,
    ) -> Result<TextureHandle, GraphicsError> {
        self.take_failure(FailurePoint::Texture)?;
        log::trace!("DummyDevice: creating texture {width}x{height} {format:?}");
        let id = self.allocate_id();
        self.objects.insert(
            id,
            DummyObject::Texture {
                width,
                height,
                state: initial_state,
                pixels: vec![0; width as usize * height as usize * 4],
                swap_chain: false,
            },
        );
        self.stats.textures_created += 1;
        Ok(TextureHandle::from_raw(id))
    }

    fn create_view_table(&mut self, capacity: u32) -> Result<ViewTableHandle, GraphicsError> {
        self.take_failure(FailurePoint::ViewTable)?;
        let id = self.allocate_id();
        self.objects.insert(
            id,
            DummyObject::ViewTable {
                views: vec![None; capacity as usize],
            },
        );
        Ok(ViewTableHandle::from_raw(id))
    }

    fn view_increment_size(&self) -> u32 {
        VIEW_INCREMENT
    }

    fn write_constant_view(
        &mut self,
        table: ViewTableHandle,
        byte_offset: u64,
        buffer: BufferHandle,
        _size: u64,
    ) -> Result<(), GraphicsError> {
        self.check_live(buffer.raw())?;
        self.write_view(table, byte_offset, View::Constant(buffer))
    }

    fn write_texture_view(
        &mut self,
        table: ViewTableHandle,
        byte_offset: u64,
        texture: TextureHandle,
    ) -> Result<(), GraphicsError> {
        self.check_live(texture.raw())?;
        self.write_view(table, byte_offset, View::Texture(texture))
    }

    fn create_sampler_table(
        &mut self,
        descriptor: &SamplerDescriptor,
    ) -> Result<SamplerTableHandle, GraphicsError> {
        self.take_failure(FailurePoint::SamplerTable)?;
        let id = self.allocate_id();
        self.objects
            .insert(id, DummyObject::SamplerTable(*descriptor));
        Ok(SamplerTableHandle::from_raw(id))
    }

    fn create_binding_layout(
        &mut self,
        descriptor: &BindingLayoutDescriptor,
    ) -> Result<BindingLayoutHandle, GraphicsError> {
        self.take_failure(FailurePoint::BindingLayout)?;
        let id = self.allocate_id();
        self.objects
            .insert(id, DummyObject::BindingLayout(descriptor.clone()));
        self.stats.binding_layouts_created += 1;
        Ok(BindingLayoutHandle::from_raw(id))
    }

    fn create_pipeline(
        &mut self,
        descriptor: &PipelineDescriptor<'_>,
    ) -> Result<PipelineHandle, GraphicsError> {
        self.take_failure(FailurePoint::Pipeline)?;
        self.check_live(descriptor.layout.raw())?;
        for stage in [&descriptor.vertex, &descriptor.fragment] {
            if stage.code.first() != Some(&SPIRV_MAGIC) {
                return Err(GraphicsError::device(
                    "create pipeline",
                    format!("{} is not a SPIR-V module", stage.entry_point),
                ));
            }
        }
        let id = self.allocate_id();
        self.objects.insert(
            id,
            DummyObject::Pipeline(PipelineRecord {
                label: descriptor.label.to_string(),
                layout: descriptor.layout,
                blend: descriptor.blend,
                rasterizer: descriptor.rasterizer,
                target_format: descriptor.target_format,
                vertex_stride: descriptor.vertex_stride,
            }),
        );
        self.stats.pipelines_created += 1;
        Ok(PipelineHandle::from_raw(id))
    }

    fn create_command_allocator(&mut self) -> Result<CommandAllocatorHandle, GraphicsError> {
        self.take_failure(FailurePoint::CommandAllocator)?;
        let id = self.allocate_id();
        self.objects.insert(id, DummyObject::CommandAllocator);
        Ok(CommandAllocatorHandle::from_raw(id))
    }

    fn reset_command_allocator(
        &mut self,
        allocator: CommandAllocatorHandle,
    ) -> Result<(), GraphicsError> {
        self.check_live(allocator.raw())?;
        if self.queue.iter().any(|op| op.references(allocator.raw())) {
            self.hazards
                .push(Hazard::AllocatorResetWhileInFlight(allocator));
        }
        Ok(())
    }

    fn reset_command_list(
        &mut self,
        allocator: CommandAllocatorHandle,
    ) -> Result<(), GraphicsError> {
        self.check_live(allocator.raw())?;
        if self.open_list.is_some() {
            return Err(GraphicsError::device(
                "reset command list",
                "command list is still open",
            ));
        }
        self.closed_list = None;
        self.bound_layout = None;
        self.open_list = Some(OpenList {
            commands: Vec::new(),
            references: vec![allocator.raw()],
        });
        Ok(())
    }

    fn close_command_list(&mut self) -> Result<(), GraphicsError> {
        let Some(list) = self.open_list.take() else {
            return Err(GraphicsError::device(
                "close command list",
                "command list is not open",
            ));
        };
        self.closed_list = Some(Submission {
            commands: list.commands,
            references: list.references,
        });
        Ok(())
    }

    fn cmd_transition(
        &mut self,
        texture: TextureHandle,
        before: ResourceState,
        after: ResourceState,
    ) -> Result<(), GraphicsError> {
        self.record(
            RecordedCommand::Transition {
                texture,
                before,
                after,
            },
            &[texture.raw()],
        )?;
        if let Some(state) = self.texture_state_mut(texture) {
            let actual = *state;
            *state = after;
            if actual != before {
                self.hazards.push(Hazard::StateMismatch {
                    texture,
                    declared: before,
                    actual,
                });
            }
        }
        Ok(())
    }

    fn cmd_set_render_target(&mut self, texture: TextureHandle) -> Result<(), GraphicsError> {
        self.record(RecordedCommand::SetRenderTarget(texture), &[texture.raw()])?;
        self.require_state(texture, ResourceState::RenderTarget);
        Ok(())
    }

    fn cmd_set_viewport(&mut self, viewport: &Viewport) -> Result<(), GraphicsError> {
        self.record(RecordedCommand::SetViewport(*viewport), &[])
    }

    fn cmd_set_scissor(&mut self, scissor: Region) -> Result<(), GraphicsError> {
        self.record(RecordedCommand::SetScissor(scissor), &[])
    }

    fn cmd_set_pipeline(
        &mut self,
        layout: BindingLayoutHandle,
        pipeline: PipelineHandle,
    ) -> Result<(), GraphicsError> {
        self.record(
            RecordedCommand::SetPipeline { layout, pipeline },
            &[layout.raw(), pipeline.raw()],
        )?;
        self.bound_layout = Some(layout);
        Ok(())
    }

    fn cmd_bind_views(
        &mut self,
        root_index: u32,
        table: ViewTableHandle,
        byte_offset: u64,
    ) -> Result<(), GraphicsError> {
        let count = self.bound_region_count(root_index);
        let first = (byte_offset / VIEW_INCREMENT as u64) as usize;
        let views: Vec<View> = match self.objects.get(&table.raw()) {
            Some(DummyObject::ViewTable { views }) => {
                let Some(range) = views.get(first..first + count) else {
                    return Err(GraphicsError::device(
                        "bind views",
                        format!("views {first}..{} are outside the table", first + count),
                    ));
                };
                range.iter().flatten().copied().collect()
            }
            _ => {
                return Err(GraphicsError::device(
                    "bind views",
                    "handle is not a view table",
                ));
            }
        };
        let mut references = vec![table.raw()];
        references.extend(views.iter().map(|view| view.raw()));
        self.record(
            RecordedCommand::BindViews {
                root_index,
                table,
                byte_offset,
            },
            &references,
        )?;
        for view in views {
            if let View::Texture(texture) = view {
                self.require_state(texture, ResourceState::ShaderReadable);
            }
        }
        Ok(())
    }

    fn cmd_bind_samplers(
        &mut self,
        root_index: u32,
        table: SamplerTableHandle,
    ) -> Result<(), GraphicsError> {
        self.record(
            RecordedCommand::BindSamplers { root_index, table },
            &[table.raw()],
        )
    }

    fn cmd_set_vertex_buffer(
        &mut self,
        buffer: BufferHandle,
        size: u64,
        stride: u32,
    ) -> Result<(), GraphicsError> {
        self.record(
            RecordedCommand::SetVertexBuffer {
                buffer,
                size,
                stride,
            },
            &[buffer.raw()],
        )
    }

    fn cmd_set_index_buffer(
        &mut self,
        buffer: BufferHandle,
        size: u64,
    ) -> Result<(), GraphicsError> {
        self.record(
            RecordedCommand::SetIndexBuffer { buffer, size },
            &[buffer.raw()],
        )
    }

    fn cmd_draw_indexed(
        &mut self,
        index_count: u32,
        first_index: u32,
    ) -> Result<(), GraphicsError> {
        self.record(
            RecordedCommand::DrawIndexed {
                index_count,
                first_index,
            },
            &[],
        )
    }

    fn cmd_copy_buffer_to_texture(
        &mut self,
        src: BufferHandle,
        layout: BufferLayout,
        dst: TextureHandle,
        region: Region,
    ) -> Result<(), GraphicsError> {
        self.record(
            RecordedCommand::CopyBufferToTexture {
                src,
                layout,
                dst,
                region,
            },
            &[src.raw(), dst.raw()],
        )?;
        self.require_state(dst, ResourceState::CopyDest);
        Ok(())
    }

    fn cmd_copy_texture_to_buffer(
        &mut self,
        src: TextureHandle,
        region: Region,
        dst: BufferHandle,
        layout: BufferLayout,
    ) -> Result<(), GraphicsError> {
        self.record(
            RecordedCommand::CopyTextureToBuffer {
                src,
                region,
                dst,
                layout,
            },
            &[src.raw(), dst.raw()],
        )?;
        self.require_state(src, ResourceState::CopySource);
        Ok(())
    }

    fn execute_command_list(&mut self) -> Result<(), GraphicsError> {
        let Some(submission) = self.closed_list.take() else {
            return Err(GraphicsError::device(
                "execute command list",
                "no closed command list",
            ));
        };
        log::trace!(
            "DummyDevice: submitting {} commands",
            submission.commands.len()
        );
        self.stats.submissions += 1;
        self.enqueue(QueuedOp::Execute(submission));
        Ok(())
    }

    fn create_fence(&mut self, initial_value: u64) -> Result<FenceHandle, GraphicsError> {
        self.take_failure(FailurePoint::Fence)?;
        let id = self.allocate_id();
        self.objects.insert(
            id,
            DummyObject::Fence {
                completed: initial_value,
            },
        );
        Ok(FenceHandle::from_raw(id))
    }

    fn signal_fence(&mut self, fence: FenceHandle, value: u64) -> Result<(), GraphicsError> {
        self.check_live(fence.raw())?;
        self.enqueue(QueuedOp::Signal {
            fence: fence.raw(),
            value,
        });
        Ok(())
    }

    fn fence_completed_value(&self, fence: FenceHandle) -> Result<u64, GraphicsError> {
        self.fence_value(fence)
    }

    fn wait_fence(
        &mut self,
        fence: FenceHandle,
        value: u64,
        timeout: Duration,
    ) -> Result<bool, GraphicsError> {
        self.check_live(fence.raw())?;
        self.stats.fence_waits += 1;
        loop {
            if self.fence_value(fence)? >= value {
                return Ok(true);
            }
            if self.mode == TimelineMode::Hung || !self.process_next() {
                log::trace!("DummyDevice: wait for fence value {value} timed out after {timeout:?}");
                return Ok(false);
            }
        }
    }

    fn create_swap_chain(
        &mut self,
        _target: &SurfaceTarget,
        width: u32,
        height: u32,
        buffer_count: u32,
    ) -> Result<(), GraphicsError> {
        self.take_failure(FailurePoint::SwapChain)?;
        for buffer in std::mem::take(&mut self.swap_chain) {
            self.release(buffer.into());
        }
        let buffer_count = buffer_count.max(self.min_swap_chain_buffers);
        for _ in 0..buffer_count {
            let id = self.allocate_id();
            self.objects.insert(
                id,
                DummyObject::Texture {
                    width,
                    height,
                    state: ResourceState::Present,
                    pixels: vec![0; width as usize * height as usize * 4],
                    swap_chain: true,
                },
            );
            self.swap_chain.push(TextureHandle::from_raw(id));
        }
        self.back_buffer = 0;
        log::trace!("DummyDevice: swap chain {width}x{height} with {buffer_count} buffers");
        Ok(())
    }

    fn swap_chain_format(&self) -> TextureFormat {
        self.swap_chain_format
    }

    fn swap_chain_buffer_count(&self) -> usize {
        self.swap_chain.len()
    }

    fn swap_chain_buffer(&self, index: usize) -> Result<TextureHandle, GraphicsError> {
        self.swap_chain.get(index).copied().ok_or_else(|| {
            GraphicsError::device("swap chain buffer", format!("no back buffer {index}"))
        })
    }

    fn current_back_buffer_index(&mut self) -> Result<usize, GraphicsError> {
        if self.swap_chain.is_empty() {
            return Err(GraphicsError::device(
                "current back buffer",
                "no swap chain",
            ));
        }
        Ok(self.back_buffer)
    }

    fn present(&mut self, _vsync: bool) -> Result<(), GraphicsError> {
        let buffer = self.swap_chain_buffer(self.back_buffer)?;
        self.require_state(buffer, ResourceState::Present);
        self.enqueue(QueuedOp::Present {
            buffer: buffer.raw(),
        });
        self.back_buffer = (self.back_buffer + 1) % self.swap_chain.len();
        self.stats.presents += 1;
        Ok(())
    }

    fn release(&mut self, resource: ResourceHandle) {
        let raw = resource.raw();
        if self.released_ids.contains(&raw) {
            log::warn!("DummyDevice: {resource:?} released twice");
            self.hazards.push(Hazard::DoubleRelease(resource));
            return;
        }
        if self.in_flight(raw) {
            log::warn!("DummyDevice: {resource:?} released while in flight");
            self.hazards.push(Hazard::ReleasedWhileInFlight(resource));
        }
        if self.objects.remove(&raw).is_some() {
            log::trace!("DummyDevice: released {resource:?}");
            self.released_ids.insert(raw);
            self.released.push(resource);
        } else {
            log::warn!("DummyDevice: release of unknown {resource:?}");
        }
    }
}

impl DummyDevice {
    fn write_view(
        &mut self,
        table: ViewTableHandle,
        byte_offset: u64,
        view: View,
    ) -> Result<(), GraphicsError> {
        self.check_live(table.raw())?;
        let index = (byte_offset / VIEW_INCREMENT as u64) as usize;
        match self.objects.get_mut(&table.raw()) {
            Some(DummyObject::ViewTable { views }) => match views.get_mut(index) {
                Some(slot) => {
                    *slot = Some(view);
                    Ok(())
                }
                None => Err(GraphicsError::device(
                    "write view",
                    format!("view {index} is outside the table"),
                )),
            },
            _ => Err(GraphicsError::device("write view", "handle is not a view table")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BufferUsage, MemoryLocation, write_buffer};

    fn upload_buffer(device: &mut DummyDevice, size: u64) -> BufferHandle {
        device
            .create_buffer(&BufferDescriptor {
                label: "test",
                size,
                usage: BufferUsage::VERTEX,
                location: MemoryLocation::Upload,
            })
            .unwrap()
    }

    fn submit_using(device: &mut DummyDevice, buffer: BufferHandle) {
        let allocator = device.create_command_allocator().unwrap();
        device.reset_command_list(allocator).unwrap();
        device.cmd_set_vertex_buffer(buffer, 64, 32).unwrap();
        device.close_command_list().unwrap();
        device.execute_command_list().unwrap();
    }

    #[test]
    fn test_dummy_device_name() {
        assert_eq!(DummyDevice::new().name(), "Dummy Device");
    }

    #[test]
    fn test_map_while_in_flight_is_a_hazard() {
        let mut device = DummyDevice::new().with_timeline_mode(TimelineMode::Deferred);
        let buffer = upload_buffer(&mut device, 64);
        submit_using(&mut device, buffer);

        write_buffer(&mut device, buffer, 0, &[1, 2, 3]).unwrap();
        assert_eq!(device.hazards(), &[Hazard::MappedWhileInFlight(buffer)]);
    }

    #[test]
    fn test_map_after_completion_is_clean() {
        let mut device = DummyDevice::new().with_timeline_mode(TimelineMode::Deferred);
        let buffer = upload_buffer(&mut device, 64);
        let fence = device.create_fence(0).unwrap();
        submit_using(&mut device, buffer);
        device.signal_fence(fence, 1).unwrap();
        assert_eq!(device.fence_completed_value(fence).unwrap(), 0);

        assert!(device.wait_fence(fence, 1, Duration::from_secs(1)).unwrap());
        write_buffer(&mut device, buffer, 0, &[1, 2, 3]).unwrap();
        assert!(device.hazards().is_empty());
    }

    #[test]
    fn test_hung_timeline_times_out() {
        let mut device = DummyDevice::new().with_timeline_mode(TimelineMode::Hung);
        let fence = device.create_fence(0).unwrap();
        device.signal_fence(fence, 1).unwrap();
        assert!(!device.wait_fence(fence, 1, Duration::from_secs(10)).unwrap());

        device.set_timeline_mode(TimelineMode::Immediate);
        assert_eq!(device.fence_completed_value(fence).unwrap(), 1);
    }

    #[test]
    fn test_double_release_is_recorded() {
        let mut device = DummyDevice::new();
        let buffer = upload_buffer(&mut device, 16);
        device.release(buffer.into());
        device.release(buffer.into());
        assert_eq!(device.release_count(buffer), 2);
        assert_eq!(device.hazards(), &[Hazard::DoubleRelease(buffer.into())]);
    }

    #[test]
    fn test_transition_with_wrong_prior_state() {
        let mut device = DummyDevice::new();
        let texture = device
            .create_texture(4, 4, TextureFormat::Rgba8Unorm, ResourceState::ShaderReadable)
            .unwrap();
        let allocator = device.create_command_allocator().unwrap();
        device.reset_command_list(allocator).unwrap();
        device
            .cmd_transition(texture, ResourceState::CopyDest, ResourceState::RenderTarget)
            .unwrap();
        assert_eq!(
            device.hazards(),
            &[Hazard::StateMismatch {
                texture,
                declared: ResourceState::CopyDest,
                actual: ResourceState::ShaderReadable,
            }]
        );
        assert_eq!(
            device.texture_state(texture),
            Some(ResourceState::RenderTarget)
        );
    }

    #[test]
    fn test_recording_requires_open_list() {
        let mut device = DummyDevice::new();
        assert!(device.cmd_draw_indexed(3, 0).is_err());
    }

    #[test]
    fn test_injected_failure_fires_once() {
        let mut device = DummyDevice::new();
        device.fail_next(FailurePoint::Fence);
        assert!(device.create_fence(0).is_err());
        assert!(device.create_fence(0).is_ok());
    }
}
