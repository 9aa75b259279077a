//! Binding layouts and graphics pipelines.
//!
//! Binding region `i` becomes descriptor set `i` with a single binding 0, so a
//! root index is a set index.

use std::ffi::CString;

use ash::vk;

use crate::backend::{BindingLayoutDescriptor, BindingRegionLayout, PipelineDescriptor};
use crate::error::GraphicsError;

use super::conversion::{
    convert_binding_kind, convert_blend_state, convert_cull_mode, convert_fill_mode,
    convert_sample_count, convert_texture_format, convert_visibility, vk_error,
};

/// Descriptor set layouts and the pipeline layout built from them.
pub struct BindingLayout {
    pub regions: Vec<BindingRegionLayout>,
    pub set_layouts: Vec<vk::DescriptorSetLayout>,
    pub pipeline_layout: vk::PipelineLayout,
}

impl BindingLayout {
    pub fn new(
        device: &ash::Device,
        descriptor: &BindingLayoutDescriptor,
    ) -> Result<Self, GraphicsError> {
        let mut layout = Self {
            regions: descriptor.regions.clone(),
            set_layouts: Vec::with_capacity(descriptor.regions.len()),
            pipeline_layout: vk::PipelineLayout::null(),
        };

        for region in &descriptor.regions {
            let bindings = [vk::DescriptorSetLayoutBinding::default()
                .binding(0)
                .descriptor_type(convert_binding_kind(region.kind))
                .descriptor_count(region.count)
                .stage_flags(convert_visibility(region.visibility))];
            let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
            match unsafe { device.create_descriptor_set_layout(&create_info, None) } {
                Ok(set_layout) => layout.set_layouts.push(set_layout),
                Err(e) => {
                    layout.destroy(device);
                    return Err(vk_error("create descriptor set layout")(e));
                }
            }
        }

        let create_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&layout.set_layouts);
        match unsafe { device.create_pipeline_layout(&create_info, None) } {
            Ok(pipeline_layout) => layout.pipeline_layout = pipeline_layout,
            Err(e) => {
                layout.destroy(device);
                return Err(vk_error("create pipeline layout")(e));
            }
        }
        Ok(layout)
    }

    pub fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            if self.pipeline_layout != vk::PipelineLayout::null() {
                device.destroy_pipeline_layout(self.pipeline_layout, None);
                self.pipeline_layout = vk::PipelineLayout::null();
            }
            for set_layout in self.set_layouts.drain(..) {
                device.destroy_descriptor_set_layout(set_layout, None);
            }
        }
    }
}

fn create_shader_module(device: &ash::Device, code: &[u32]) -> Result<vk::ShaderModule, GraphicsError> {
    let create_info = vk::ShaderModuleCreateInfo::default().code(code);
    unsafe { device.create_shader_module(&create_info, None) }
        .map_err(vk_error("create shader module"))
}

/// Create a graphics pipeline rendering into one color target with dynamic
/// rendering, dynamic viewport and scissor.
pub fn create_graphics_pipeline(
    device: &ash::Device,
    pipeline_layout: vk::PipelineLayout,
    descriptor: &PipelineDescriptor<'_>,
) -> Result<vk::Pipeline, GraphicsError> {
    let entry_point = |name: &str| {
        CString::new(name).map_err(|e| GraphicsError::ShaderCompilation(e.to_string()))
    };
    let vertex_entry = entry_point(descriptor.vertex.entry_point)?;
    let fragment_entry = entry_point(descriptor.fragment.entry_point)?;

    let vertex_module = create_shader_module(device, descriptor.vertex.code)?;
    let fragment_module = match create_shader_module(device, descriptor.fragment.code) {
        Ok(module) => module,
        Err(e) => {
            unsafe { device.destroy_shader_module(vertex_module, None) };
            return Err(e);
        }
    };

    let shader_stages = [
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vertex_module)
            .name(&vertex_entry),
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(fragment_module)
            .name(&fragment_entry),
    ];

    // position, tex_coord, color
    let binding_descriptions = [vk::VertexInputBindingDescription::default()
        .binding(0)
        .stride(descriptor.vertex_stride)
        .input_rate(vk::VertexInputRate::VERTEX)];
    let attribute_descriptions = [
        vk::VertexInputAttributeDescription::default()
            .location(0)
            .binding(0)
            .format(vk::Format::R32G32_SFLOAT)
            .offset(0),
        vk::VertexInputAttributeDescription::default()
            .location(1)
            .binding(0)
            .format(vk::Format::R32G32_SFLOAT)
            .offset(8),
        vk::VertexInputAttributeDescription::default()
            .location(2)
            .binding(0)
            .format(vk::Format::R32G32B32A32_SFLOAT)
            .offset(16),
    ];
    let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&binding_descriptions)
        .vertex_attribute_descriptions(&attribute_descriptions);

    let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .primitive_restart_enable(false);

    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);

    // Depth clipping off means clamping on; there is no depth attachment either way.
    let rasterizer = &descriptor.rasterizer;
    let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(convert_fill_mode(rasterizer.fill))
        .line_width(1.0)
        .cull_mode(convert_cull_mode(rasterizer.cull))
        .front_face(vk::FrontFace::CLOCKWISE)
        .depth_bias_enable(false);

    let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
        .sample_shading_enable(false)
        .rasterization_samples(convert_sample_count(rasterizer.sample_count));

    let color_blend_attachments = [convert_blend_state(&descriptor.blend)];
    let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
        .logic_op_enable(false)
        .attachments(&color_blend_attachments);

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let color_attachment_formats = [convert_texture_format(descriptor.target_format)];
    let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
        .color_attachment_formats(&color_attachment_formats);

    let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&shader_stages)
        .vertex_input_state(&vertex_input_state)
        .input_assembly_state(&input_assembly_state)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization_state)
        .multisample_state(&multisample_state)
        .color_blend_state(&color_blend_state)
        .dynamic_state(&dynamic_state)
        .layout(pipeline_layout)
        .push_next(&mut rendering_info);

    let result = unsafe {
        device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
    };

    // Shader modules are baked into the pipeline.
    unsafe {
        device.destroy_shader_module(vertex_module, None);
        device.destroy_shader_module(fragment_module, None);
    }

    let pipelines = result.map_err(|(_, e)| vk_error("create graphics pipeline")(e))?;
    pipelines
        .first()
        .copied()
        .ok_or_else(|| GraphicsError::device("create graphics pipeline", "no pipeline returned"))
}
