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

//! Presentation.
//!
//! A [`SwapChain`] presents on the graphics queue in one of three display
//! modes. HDR modes fall back to SDR when the output cannot display them,
//! and the swapchain is recreated whenever the effective mode changes.

use crate::context::CommandContext;
use crate::device::Device;
use crate::error::RhiError;
use crate::resource::Texture;
use keel_core::config::{DisplayMode, SwapChainSettings};
use keel_core::rhi::{
    ColorSpace, Format, NativeObject, NativeSwapChain, OutputInfo, ResourceStates, SwapChainDesc, TextureDesc,
    TextureFlags,
};
use keel_core::rhi_check;
use raw_window_handle::RawWindowHandle;
use std::fmt;
use std::sync::Arc;

/// Backbuffer format of a display mode.
pub const fn display_mode_format(mode: DisplayMode) -> Format {
    match mode {
        DisplayMode::Sdr => Format::R8G8B8A8Unorm,
        DisplayMode::Hdr10 => Format::R10G10B10A2Unorm,
        DisplayMode::HdrScRgb => Format::R16G16B16A16Float,
    }
}

/// Colour space of a display mode.
pub const fn display_mode_color_space(mode: DisplayMode) -> ColorSpace {
    match mode {
        DisplayMode::Sdr => ColorSpace::Srgb,
        DisplayMode::Hdr10 => ColorSpace::Hdr10,
        DisplayMode::HdrScRgb => ColorSpace::ScRgb,
    }
}

/// The display mode actually used for `requested` on `output`.
pub fn effective_display_mode(requested: DisplayMode, output: Option<&OutputInfo>) -> DisplayMode {
    match requested {
        DisplayMode::Sdr => DisplayMode::Sdr,
        hdr if output.is_some_and(OutputInfo::supports_hdr) => hdr,
        _ => DisplayMode::Sdr,
    }
}

/// A swapchain and its backbuffers.
pub struct SwapChain {
    device: Arc<Device>,
    native: NativeSwapChain,
    settings: SwapChainSettings,
    desc: SwapChainDesc,
    requested_mode: DisplayMode,
    mode: DisplayMode,
    backbuffers: Vec<Arc<Texture>>,
}

impl SwapChain {
    /// Creates a swapchain for `window` with the device's swapchain
    /// settings.
    pub fn new(device: &Arc<Device>, window: RawWindowHandle, width: u32, height: u32) -> Result<Self, RhiError> {
        let settings = device.settings().swapchain.clone();
        let requested_mode = settings.display_mode;
        let desc = SwapChainDesc {
            width: width.max(1),
            height: height.max(1),
            format: display_mode_format(requested_mode),
            buffer_count: settings.buffer_count,
            allow_tearing: settings.allow_tearing,
            waitable: settings.use_waitable_object,
            max_frame_latency: settings.max_frame_latency,
        };
        let native = device.native().create_swap_chain(window, &desc)?;
        device.native().set_name(NativeObject::SwapChain(native), "Swapchain");

        let mut swap_chain = Self {
            device: device.clone(),
            native,
            settings,
            desc,
            requested_mode,
            mode: requested_mode,
            backbuffers: Vec::new(),
        };
        swap_chain.apply_display_mode(true)?;
        Ok(swap_chain)
    }

    /// Picks the effective display mode for the current output and
    /// recreates the buffers when the format changes.
    fn apply_display_mode(&mut self, initial: bool) -> Result<(), RhiError> {
        let output = self.device.native().swap_chain_output(self.native);
        let mode = effective_display_mode(self.requested_mode, output.as_ref());
        if mode != self.requested_mode {
            log::warn!(
                "Output \"{}\" does not support {:?}; falling back to {:?}",
                output.as_ref().map_or("<none>", |o| o.name.as_str()),
                self.requested_mode,
                mode
            );
        }
        let format = display_mode_format(mode);
        if format != self.desc.format {
            log::info!("Recreating the swapchain for {mode:?} ({format:?})");
            self.recreate(self.desc.width, self.desc.height, format)?;
        } else if initial {
            self.acquire_backbuffers()?;
        }
        self.device
            .native()
            .set_swap_chain_color_space(self.native, display_mode_color_space(mode))?;
        self.mode = mode;
        Ok(())
    }

    fn acquire_backbuffers(&mut self) -> Result<(), RhiError> {
        let native = self.device.native().clone();
        self.backbuffers = (0..self.desc.buffer_count)
            .map(|index| {
                let handle = native.swap_chain_buffer(self.native, index)?;
                let desc = TextureDesc::new_2d(
                    self.desc.width,
                    self.desc.height,
                    self.desc.format,
                    TextureFlags::RENDER_TARGET,
                );
                Texture::from_native(
                    &self.device,
                    handle,
                    desc,
                    ResourceStates::COMMON,
                    &format!("Backbuffer {index}"),
                )
            })
            .collect::<Result<_, _>>()?;
        Ok(())
    }

    /// Drops the backbuffers, resizes the native swapchain and wraps the
    /// new buffers. The GPU is idled first.
    fn recreate(&mut self, width: u32, height: u32, format: Format) -> Result<(), RhiError> {
        self.device.wait_for_idle()?;
        for (index, buffer) in self.backbuffers.iter().enumerate() {
            rhi_check!(
                Arc::strong_count(buffer) == 1,
                "backbuffer {} is still referenced while the swapchain is recreated",
                index
            );
        }
        self.backbuffers.clear();
        // The GPU is idle: the buffers can go now rather than a frame later.
        self.device.release_queue().release_all();

        self.device
            .native()
            .resize_swap_chain(self.native, width, height, format)?;
        self.desc.width = width;
        self.desc.height = height;
        self.desc.format = format;
        self.acquire_backbuffers()
    }

    /// Resizes the backbuffers. Zero sizes (minimised windows) and
    /// unchanged sizes are ignored.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<bool, RhiError> {
        if width == 0 || height == 0 || (width == self.desc.width && height == self.desc.height) {
            return Ok(false);
        }
        log::info!(
            "Resizing the swapchain from {}x{} to {width}x{height}",
            self.desc.width,
            self.desc.height
        );
        self.recreate(width, height, self.desc.format)?;
        Ok(true)
    }

    /// Requests another display mode. The swapchain is recreated if the
    /// resulting format differs.
    pub fn set_display_mode(&mut self, mode: DisplayMode) -> Result<(), RhiError> {
        self.requested_mode = mode;
        self.apply_display_mode(false)
    }

    /// Re-evaluates the display mode, e.g. after the window moved to
    /// another output.
    pub fn refresh_display_mode(&mut self) -> Result<(), RhiError> {
        self.apply_display_mode(false)
    }

    /// Index of the backbuffer to render into.
    pub fn current_index(&self) -> u32 {
        self.device.native().swap_chain_current_index(self.native)
    }

    /// The backbuffer to render into.
    pub fn current_backbuffer(&self) -> &Arc<Texture> {
        let index = self.current_index() as usize;
        match self.backbuffers.get(index) {
            Some(buffer) => buffer,
            None => keel_core::rhi_fatal!("swapchain reported backbuffer {} of {}", index, self.backbuffers.len()),
        }
    }

    /// Transitions the current backbuffer to the present state.
    pub fn prepare_present(&self, context: &mut CommandContext) {
        context.transition(&**self.current_backbuffer(), ResourceStates::COMMON);
    }

    /// Presents the current backbuffer, then blocks on the frame-latency
    /// waitable object when the swapchain uses one.
    pub fn present(&self) -> Result<(), RhiError> {
        let sync_interval = u32::from(self.settings.vsync);
        let tearing = self.settings.allow_tearing && !self.settings.vsync;
        self.device.native().present(self.native, sync_interval, tearing)?;
        if self.settings.use_waitable_object {
            self.device.native().wait_frame_latency(self.native)?;
        }
        Ok(())
    }

    /// The effective display mode.
    pub fn display_mode(&self) -> DisplayMode {
        self.mode
    }

    /// The requested display mode.
    pub fn requested_display_mode(&self) -> DisplayMode {
        self.requested_mode
    }

    /// The backbuffer format.
    pub fn format(&self) -> Format {
        self.desc.format
    }

    /// Backbuffer width.
    pub fn width(&self) -> u32 {
        self.desc.width
    }

    /// Backbuffer height.
    pub fn height(&self) -> u32 {
        self.desc.height
    }

    /// Every backbuffer.
    pub fn backbuffers(&self) -> &[Arc<Texture>] {
        &self.backbuffers
    }

    /// The native swapchain.
    pub fn native(&self) -> NativeSwapChain {
        self.native
    }
}

impl Drop for SwapChain {
    fn drop(&mut self) {
        if let Err(err) = self.device.wait_for_idle() {
            log::error!("Failed to idle the GPU before destroying the swapchain: {err}");
        }
        self.backbuffers.clear();
        self.device.release_queue().release(NativeObject::SwapChain(self.native));
    }
}

impl fmt::Debug for SwapChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwapChain")
            .field("mode", &self.mode)
            .field("width", &self.desc.width)
            .field("height", &self.desc.height)
            .field("format", &self.desc.format)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(color_space: ColorSpace) -> OutputInfo {
        OutputInfo {
            name: "DISPLAY1".into(),
            color_space,
            max_luminance: 400.0,
        }
    }

    #[test]
    fn hdr_falls_back_on_sdr_outputs() {
        let sdr = output(ColorSpace::Srgb);
        let hdr = output(ColorSpace::Hdr10);
        assert_eq!(effective_display_mode(DisplayMode::Hdr10, Some(&sdr)), DisplayMode::Sdr);
        assert_eq!(effective_display_mode(DisplayMode::HdrScRgb, None), DisplayMode::Sdr);
        assert_eq!(effective_display_mode(DisplayMode::Hdr10, Some(&hdr)), DisplayMode::Hdr10);
        assert_eq!(effective_display_mode(DisplayMode::Sdr, Some(&hdr)), DisplayMode::Sdr);
    }

    #[test]
    fn display_modes_map_to_formats() {
        assert_eq!(display_mode_format(DisplayMode::Sdr), Format::R8G8B8A8Unorm);
        assert_eq!(display_mode_format(DisplayMode::Hdr10), Format::R10G10B10A2Unorm);
        assert_eq!(display_mode_color_space(DisplayMode::HdrScRgb), ColorSpace::ScRgb);
    }
}
