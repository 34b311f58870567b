// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use super::{GpuResource, Resource, View};
use crate::device::Device;
use crate::error::RhiError;
use keel_core::rhi::{
    align_up, BufferDesc, BufferFlags, CONSTANT_BUFFER_ALIGNMENT, DescriptorHeapType, Format, HeapType, IndexBufferView, ResourceDesc,
    VertexBufferView, ViewDesc, ViewDimension, ViewKind, ViewRange, INVALID_HEAP_INDEX,
};
use std::fmt;
use std::sync::Arc;

/// A linear GPU allocation and its views.
pub struct Buffer {
    desc: BufferDesc,
    srv: Option<View>,
    uav: Option<View>,
    resource: Arc<Resource>,
}

impl Buffer {
    /// Creates a buffer and the views its flags declare.
    ///
    /// Upload buffers live in the upload heap and readback buffers in the
    /// readback heap; both are persistently mapped. Unless the buffer is
    /// flagged `NO_BINDLESS`, its views claim persistent descriptor slots.
    pub fn new(device: &Device, desc: BufferDesc, name: &str) -> Result<Arc<Self>, RhiError> {
        if desc.size == 0 {
            return Err(RhiError::InvalidResource {
                name: name.to_string(),
                reason: "buffers must have a non-zero size".into(),
            });
        }
        let heap = if desc.flags.contains(BufferFlags::UPLOAD) {
            HeapType::Upload
        } else if desc.flags.contains(BufferFlags::READBACK) {
            HeapType::Readback
        } else {
            HeapType::Default
        };
        let resource = Arc::new(Resource::create(
            device.native(),
            device.release_queue(),
            ResourceDesc::Buffer(desc),
            heap,
            desc.initial_state(),
            name,
        )?);

        let native = device.native().as_ref();
        let cpu_heap = device.cpu_heap(DescriptorHeapType::CbvSrvUav);
        let bindless = (!desc.flags.contains(BufferFlags::NO_BINDLESS)).then(|| device.resource_heap());

        let srv = if desc.flags.contains(BufferFlags::ACCELERATION_STRUCTURE) {
            let view = ViewDesc {
                kind: ViewKind::Srv,
                resource: None,
                format: Format::Unknown,
                dimension: ViewDimension::AccelerationStructure {
                    address: resource.gpu_address(),
                },
                range: ViewRange::whole(1, 1),
                read_only_depth: false,
            };
            Some(View::new(native, view, cpu_heap, bindless)?)
        } else if desc.flags.contains(BufferFlags::SHADER_RESOURCE) {
            Some(View::new(native, buffer_view(&resource, &desc, ViewKind::Srv), cpu_heap, bindless)?)
        } else {
            None
        };
        let uav = if desc.flags.contains(BufferFlags::UNORDERED_ACCESS) {
            Some(View::new(native, buffer_view(&resource, &desc, ViewKind::Uav), cpu_heap, bindless)?)
        } else {
            None
        };

        Ok(Arc::new(Self {
            desc,
            srv,
            uav,
            resource,
        }))
    }

    /// The underlying resource.
    pub fn resource(&self) -> &Arc<Resource> {
        &self.resource
    }

    /// The description.
    pub fn desc(&self) -> &BufferDesc {
        &self.desc
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.desc.size
    }

    /// GPU virtual address.
    pub fn gpu_address(&self) -> u64 {
        self.resource.gpu_address()
    }

    /// The shader-resource view, if any.
    pub fn srv(&self) -> Option<&View> {
        self.srv.as_ref()
    }

    /// The unordered-access view, if any.
    pub fn uav(&self) -> Option<&View> {
        self.uav.as_ref()
    }

    /// Bindless index of the SRV, or [`INVALID_HEAP_INDEX`].
    pub fn srv_index(&self) -> u32 {
        self.srv.as_ref().map_or(INVALID_HEAP_INDEX, View::heap_index)
    }

    /// Bindless index of the UAV, or [`INVALID_HEAP_INDEX`].
    pub fn uav_index(&self) -> u32 {
        self.uav.as_ref().map_or(INVALID_HEAP_INDEX, View::heap_index)
    }

    /// Creates a constant buffer view of `size` bytes at `offset`. The
    /// view claims a persistent slot unless the buffer is `NO_BINDLESS`.
    pub fn create_cbv(&self, device: &Device, offset: u64, size: u32) -> Result<View, RhiError> {
        keel_core::rhi_check!(
            offset % CONSTANT_BUFFER_ALIGNMENT == 0,
            "constant buffer views of '{}' must start on a {}-byte boundary",
            self.resource.name(),
            CONSTANT_BUFFER_ALIGNMENT
        );
        keel_core::rhi_check!(
            offset + size as u64 <= self.desc.size,
            "constant buffer view [{}, {}) overflows '{}' ({} bytes)",
            offset,
            offset + size as u64,
            self.resource.name(),
            self.desc.size
        );
        let view = ViewDesc {
            kind: ViewKind::Cbv,
            resource: Some(self.resource.handle()),
            format: Format::Unknown,
            dimension: ViewDimension::ConstantBuffer {
                address: self.gpu_address() + offset,
                size: align_up(size as u64, CONSTANT_BUFFER_ALIGNMENT) as u32,
            },
            range: ViewRange::whole(1, 1),
            read_only_depth: false,
        };
        let bindless = (!self.desc.flags.contains(BufferFlags::NO_BINDLESS)).then(|| device.resource_heap());
        View::new(
            device.native().as_ref(),
            view,
            device.cpu_heap(DescriptorHeapType::CbvSrvUav),
            bindless,
        )
    }

    /// Writes into an upload buffer.
    pub fn write(&self, offset: u64, data: &[u8]) -> Result<(), RhiError> {
        self.resource.write_mapped(offset, data)
    }

    /// Writes a plain-data value into an upload buffer.
    pub fn write_pod<T: bytemuck::Pod>(&self, offset: u64, value: &T) -> Result<(), RhiError> {
        self.write(offset, bytemuck::bytes_of(value))
    }

    /// Reads the whole content of a readback buffer.
    ///
    /// The content is only meaningful once the sync point of the copy into
    /// the buffer has completed.
    pub fn read_to_vec(&self) -> Result<Vec<u8>, RhiError> {
        let mut data = vec![0; self.desc.size as usize];
        self.resource.read_mapped(0, &mut data)?;
        Ok(data)
    }

    /// A vertex buffer binding over the whole buffer.
    pub fn vertex_buffer_view(&self, stride: u32) -> VertexBufferView {
        VertexBufferView {
            address: self.gpu_address(),
            size: self.desc.size as u32,
            stride,
        }
    }

    /// An index buffer binding over the whole buffer.
    pub fn index_buffer_view(&self, format: Format) -> IndexBufferView {
        IndexBufferView {
            address: self.gpu_address(),
            size: self.desc.size as u32,
            format,
        }
    }
}

fn buffer_view(resource: &Resource, desc: &BufferDesc, kind: ViewKind) -> ViewDesc {
    let raw = desc.flags.contains(BufferFlags::BYTE_ADDRESS);
    let (format, stride, count) = if raw {
        (Format::Unknown, 0, (desc.size / 4) as u32)
    } else if desc.format != Format::Unknown {
        (desc.format, 0, desc.element_count())
    } else {
        let stride = desc.element_size.max(4);
        (Format::Unknown, stride, (desc.size / stride as u64) as u32)
    };
    ViewDesc {
        kind,
        resource: Some(resource.handle()),
        format,
        dimension: ViewDimension::Buffer {
            first_element: 0,
            element_count: count,
            stride,
            raw,
        },
        range: ViewRange::whole(1, 1),
        read_only_depth: false,
    }
}

impl GpuResource for Buffer {
    fn resource(&self) -> &Arc<Resource> {
        &self.resource
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("name", &self.resource.name())
            .field("desc", &self.desc)
            .field("srv_index", &self.srv_index())
            .field("uav_index", &self.uav_index())
            .finish()
    }
}
