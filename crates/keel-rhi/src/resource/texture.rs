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
use crate::descriptors::{CpuDescriptorHeap, GlobalDescriptorHeap};
use crate::device::Device;
use crate::error::RhiError;
use keel_core::rhi::{
    DescriptorHeapType, HeapType, NativeDevice, NativeResource, ResourceDesc, ResourceStates, TextureDesc,
    TextureFlags, TextureType, ViewDesc, ViewDimension, ViewKind, ViewRange, INVALID_HEAP_INDEX,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct TargetKey {
    kind: ViewKind,
    mip: u32,
    slice: u32,
    read_only: bool,
}

/// A texture and its views.
///
/// The SRV and one UAV per mip are created with the texture. Render-target
/// and depth-stencil views are created on first use and cached.
pub struct Texture {
    desc: TextureDesc,
    srv: Option<View>,
    uavs: Vec<View>,
    targets: Mutex<HashMap<TargetKey, Arc<View>>>,
    native: Arc<dyn NativeDevice>,
    rtv_heap: Arc<CpuDescriptorHeap>,
    dsv_heap: Arc<CpuDescriptorHeap>,
    resource: Arc<Resource>,
}

impl Texture {
    /// Creates a texture in the default heap and the views its flags
    /// declare.
    pub fn new(device: &Device, desc: TextureDesc, name: &str) -> Result<Arc<Self>, RhiError> {
        desc.validate().map_err(|reason| RhiError::InvalidResource {
            name: name.to_string(),
            reason,
        })?;
        let resource = Resource::create(
            device.native(),
            device.release_queue(),
            ResourceDesc::Texture(desc),
            HeapType::Default,
            desc.initial_state(),
            name,
        )?;
        Self::with_resource(device, Arc::new(resource), desc, true)
    }

    /// Wraps a texture created outside the device, e.g. a backbuffer.
    pub fn from_native(
        device: &Device,
        handle: NativeResource,
        desc: TextureDesc,
        state: ResourceStates,
        name: &str,
    ) -> Result<Arc<Self>, RhiError> {
        let resource = Resource::new(
            device.native().clone(),
            device.release_queue().clone(),
            handle,
            ResourceDesc::Texture(desc),
            HeapType::Default,
            state,
            name,
        );
        Self::with_resource(device, Arc::new(resource), desc, false)
    }

    fn with_resource(
        device: &Device,
        resource: Arc<Resource>,
        desc: TextureDesc,
        shader_views: bool,
    ) -> Result<Arc<Self>, RhiError> {
        let native = device.native().as_ref();
        let cpu_heap = device.cpu_heap(DescriptorHeapType::CbvSrvUav);
        let bindless: Option<&Arc<GlobalDescriptorHeap>> = Some(device.resource_heap());

        let srv = if shader_views && desc.flags.contains(TextureFlags::SHADER_RESOURCE) {
            let format = if desc.format.is_depth() {
                desc.format.depth_srv_format()
            } else if desc.flags.contains(TextureFlags::SRGB) {
                desc.format.to_srgb()
            } else {
                desc.format
            };
            let view = ViewDesc {
                kind: ViewKind::Srv,
                resource: Some(resource.handle()),
                format,
                dimension: srv_dimension(&desc),
                range: ViewRange::whole(desc.mip_levels, desc.array_size()),
                read_only_depth: false,
            };
            Some(View::new(native, view, cpu_heap, bindless)?)
        } else {
            None
        };

        let mut uavs = Vec::new();
        if shader_views && desc.flags.contains(TextureFlags::UNORDERED_ACCESS) {
            for mip in 0..desc.mip_levels {
                let view = ViewDesc {
                    kind: ViewKind::Uav,
                    resource: Some(resource.handle()),
                    format: desc.format.to_linear(),
                    dimension: uav_dimension(&desc),
                    range: ViewRange {
                        first_mip: mip,
                        mip_count: 1,
                        first_slice: 0,
                        slice_count: desc.array_size(),
                    },
                    read_only_depth: false,
                };
                uavs.push(View::new(native, view, cpu_heap, bindless)?);
            }
        }

        Ok(Arc::new(Self {
            desc,
            srv,
            uavs,
            targets: Mutex::new(HashMap::new()),
            native: device.native().clone(),
            rtv_heap: device.cpu_heap(DescriptorHeapType::Rtv).clone(),
            dsv_heap: device.cpu_heap(DescriptorHeapType::Dsv).clone(),
            resource,
        }))
    }

    /// The underlying resource.
    pub fn resource(&self) -> &Arc<Resource> {
        &self.resource
    }

    /// The description.
    pub fn desc(&self) -> &TextureDesc {
        &self.desc
    }

    /// Width of mip 0.
    pub fn width(&self) -> u32 {
        self.desc.width
    }

    /// Height of mip 0.
    pub fn height(&self) -> u32 {
        self.desc.height
    }

    /// The shader-resource view, if any.
    pub fn srv(&self) -> Option<&View> {
        self.srv.as_ref()
    }

    /// The unordered-access view of a mip, if any.
    pub fn uav(&self, mip: u32) -> Option<&View> {
        self.uavs.get(mip as usize)
    }

    /// Bindless index of the SRV, or [`INVALID_HEAP_INDEX`].
    pub fn srv_index(&self) -> u32 {
        self.srv.as_ref().map_or(INVALID_HEAP_INDEX, View::heap_index)
    }

    /// Bindless index of the UAV of a mip, or [`INVALID_HEAP_INDEX`].
    pub fn uav_index(&self, mip: u32) -> u32 {
        self.uav(mip).map_or(INVALID_HEAP_INDEX, View::heap_index)
    }

    /// The render-target view of one mip and slice (depth slice for 3D
    /// textures).
    pub fn rtv(&self, mip: u32, slice: u32) -> Result<Arc<View>, RhiError> {
        keel_core::rhi_check!(
            self.desc.flags.contains(TextureFlags::RENDER_TARGET),
            "'{}' was not created as a render target",
            self.resource.name()
        );
        self.target_view(TargetKey {
            kind: ViewKind::Rtv,
            mip,
            slice,
            read_only: false,
        })
    }

    /// The depth-stencil view of one mip and slice.
    pub fn dsv(&self, mip: u32, slice: u32, read_only: bool) -> Result<Arc<View>, RhiError> {
        keel_core::rhi_check!(
            self.desc.flags.contains(TextureFlags::DEPTH_STENCIL),
            "'{}' was not created as a depth-stencil target",
            self.resource.name()
        );
        self.target_view(TargetKey {
            kind: ViewKind::Dsv,
            mip,
            slice,
            read_only,
        })
    }

    fn target_view(&self, key: TargetKey) -> Result<Arc<View>, RhiError> {
        let mut targets = self.targets.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(view) = targets.get(&key) {
            return Ok(view.clone());
        }
        let desc = ViewDesc {
            kind: key.kind,
            resource: Some(self.resource.handle()),
            format: self.desc.format,
            dimension: target_dimension(&self.desc),
            range: ViewRange::single(key.mip, key.slice),
            read_only_depth: key.read_only,
        };
        let heap = match key.kind {
            ViewKind::Dsv => &self.dsv_heap,
            _ => &self.rtv_heap,
        };
        let view = Arc::new(View::new(self.native.as_ref(), desc, heap, None)?);
        targets.insert(key, view.clone());
        Ok(view)
    }
}

fn srv_dimension(desc: &TextureDesc) -> ViewDimension {
    let multisampled = desc.sample_count > 1;
    match desc.ty {
        TextureType::Texture1D => ViewDimension::Texture1D,
        TextureType::Texture1DArray => ViewDimension::Texture1DArray,
        TextureType::Texture2D if multisampled => ViewDimension::Texture2DMs,
        TextureType::Texture2D => ViewDimension::Texture2D,
        TextureType::Texture2DArray if multisampled => ViewDimension::Texture2DMsArray,
        TextureType::Texture2DArray => ViewDimension::Texture2DArray,
        TextureType::Texture3D => ViewDimension::Texture3D,
        TextureType::TextureCube => ViewDimension::TextureCube,
        TextureType::TextureCubeArray => ViewDimension::TextureCubeArray,
    }
}

fn uav_dimension(desc: &TextureDesc) -> ViewDimension {
    match desc.ty {
        TextureType::Texture1D => ViewDimension::Texture1D,
        TextureType::Texture1DArray => ViewDimension::Texture1DArray,
        TextureType::Texture2D => ViewDimension::Texture2D,
        TextureType::Texture3D => ViewDimension::Texture3D,
        TextureType::Texture2DArray | TextureType::TextureCube | TextureType::TextureCubeArray => {
            ViewDimension::Texture2DArray
        }
    }
}

/// Render targets address single slices: arrays and cubes through array
/// views, 3D textures through depth slices.
fn target_dimension(desc: &TextureDesc) -> ViewDimension {
    let multisampled = desc.sample_count > 1;
    match desc.ty {
        TextureType::Texture1D => ViewDimension::Texture1D,
        TextureType::Texture1DArray => ViewDimension::Texture1DArray,
        TextureType::Texture2D if multisampled => ViewDimension::Texture2DMs,
        TextureType::Texture2D => ViewDimension::Texture2D,
        TextureType::Texture3D => ViewDimension::Texture3D,
        _ if multisampled => ViewDimension::Texture2DMsArray,
        _ => ViewDimension::Texture2DArray,
    }
}

impl GpuResource for Texture {
    fn resource(&self) -> &Arc<Resource> {
        &self.resource
    }
}

impl fmt::Debug for Texture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Texture")
            .field("name", &self.resource.name())
            .field("desc", &self.desc)
            .field("srv_index", &self.srv_index())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::rhi::Format;

    #[test]
    fn view_dimensions_follow_the_texture_type() {
        let cube = TextureDesc::new_cube(64, Format::R16G16B16A16Float, TextureFlags::SHADER_RESOURCE);
        assert_eq!(srv_dimension(&cube), ViewDimension::TextureCube);
        assert_eq!(uav_dimension(&cube), ViewDimension::Texture2DArray);
        assert_eq!(target_dimension(&cube), ViewDimension::Texture2DArray);

        let msaa = TextureDesc::new_2d(64, 64, Format::R8G8B8A8Unorm, TextureFlags::RENDER_TARGET).with_samples(4);
        assert_eq!(srv_dimension(&msaa), ViewDimension::Texture2DMs);
        assert_eq!(target_dimension(&msaa), ViewDimension::Texture2DMs);

        let volume = TextureDesc::new_3d(32, 32, 32, Format::R32Float, TextureFlags::UNORDERED_ACCESS);
        assert_eq!(target_dimension(&volume), ViewDimension::Texture3D);
    }
}
