use crate::{
    Error,
    capture::Frame,
    output::{Output, OutputId},
    overlay::Overlay,
};
use std::path::PathBuf;
use wayland_client::{
    Connection, Dispatch, Proxy, QueueHandle,
    protocol::{
        wl_buffer, wl_compositor, wl_output, wl_registry, wl_shm, wl_shm_pool, wl_surface,
    },
};
use wayland_protocols::{
    ext::{
        image_capture_source::v1::client::{
            ext_image_capture_source_v1, ext_output_image_capture_source_manager_v1,
        },
        image_copy_capture::v1::client::ext_image_copy_capture_manager_v1,
    },
    wp::viewporter::client::{wp_viewport, wp_viewporter},
    xdg::xdg_output::zv1::client::{zxdg_output_manager_v1, zxdg_output_v1},
};
use wayland_protocols_wlr::{
    layer_shell::v1::client::zwlr_layer_shell_v1,
    screencopy::v1::client::zwlr_screencopy_manager_v1,
};

/// Everything the compositor told us, plus the objects we created from it
#[derive(Debug)]
pub(crate) struct State {
    pub runtime_dir: PathBuf,

    pub compositor: Option<wl_compositor::WlCompositor>,
    pub shm: Option<wl_shm::WlShm>,
    pub layer_shell: Option<zwlr_layer_shell_v1::ZwlrLayerShellV1>,
    pub xdg_output_manager: Option<zxdg_output_manager_v1::ZxdgOutputManagerV1>,
    pub viewporter: Option<wp_viewporter::WpViewporter>,

    pub screencopy_manager: Option<zwlr_screencopy_manager_v1::ZwlrScreencopyManagerV1>,
    pub image_copy_manager: Option<ext_image_copy_capture_manager_v1::ExtImageCopyCaptureManagerV1>,
    pub output_source_manager:
        Option<ext_output_image_capture_source_manager_v1::ExtOutputImageCaptureSourceManagerV1>,

    pub outputs: Vec<Output>,

    // Overlays still show the frames' pixels, so they go first.
    pub overlays: Vec<Overlay>,
    pub frames: Vec<Frame>,

    /// First error raised inside an event handler
    pub fatal: Option<Error>,
}

impl State {
    pub fn new(runtime_dir: PathBuf) -> Self {
        Self {
            runtime_dir,
            compositor: None,
            shm: None,
            layer_shell: None,
            xdg_output_manager: None,
            viewporter: None,
            screencopy_manager: None,
            image_copy_manager: None,
            output_source_manager: None,
            outputs: vec![],
            overlays: vec![],
            frames: vec![],
            fatal: None,
        }
    }

    /// Park an error raised while handling an event, keeping the first one
    pub fn fail(&mut self, error: Error) {
        log::error!("{error}");

        if self.fatal.is_none() {
            self.fatal = Some(error);
        }
    }

    pub fn take_fatal(&mut self) -> crate::Result<()> {
        match self.fatal.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn output(&self, id: OutputId) -> &Output {
        &self.outputs[id.0]
    }

    /// Destroy overlays, then frames, then every global and output.
    ///
    /// Leaves the state empty, so running it again does nothing.
    pub fn teardown(&mut self) {
        let (overlays, frames) = (self.overlays.len(), self.frames.len());

        for overlay in self.overlays.drain(..) {
            overlay.destroy();
        }

        for frame in self.frames.drain(..) {
            frame.destroy();
        }

        for output in self.outputs.drain(..) {
            output.destroy();
        }

        if let Some(manager) = self.screencopy_manager.take() {
            manager.destroy();
        }

        if let Some(manager) = self.image_copy_manager.take() {
            manager.destroy();
        }

        if let Some(manager) = self.output_source_manager.take() {
            manager.destroy();
        }

        if let Some(viewporter) = self.viewporter.take() {
            viewporter.destroy();
        }

        if let Some(manager) = self.xdg_output_manager.take() {
            manager.destroy();
        }

        if let Some(layer_shell) = self.layer_shell.take() {
            if layer_shell.version() >= 3 {
                layer_shell.destroy();
            }
        }

        if let Some(shm) = self.shm.take() {
            if shm.version() >= 2 {
                shm.release();
            }
        }

        self.compositor.take();

        log::debug!("destroyed {overlays} overlays and {frames} frames");
    }
}

impl Drop for State {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl Dispatch<wl_registry::WlRegistry, ()> for State {
    fn event(
        state: &mut Self,
        registry: &wl_registry::WlRegistry,
        event: wl_registry::Event,
        _: &(),
        _: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        match event {
            wl_registry::Event::Global {
                name,
                interface,
                version,
            } => match interface.as_str() {
                "wl_compositor" => {
                    state.compositor = Some(registry.bind(name, version.min(4), qh, ()));
                }
                "wl_shm" => {
                    state.shm = Some(registry.bind(name, version.min(2), qh, ()));
                }
                "wl_output" => {
                    let id = OutputId(state.outputs.len());
                    let wl_output = registry.bind(name, version.min(4), qh, id);
                    state.outputs.push(Output::new(wl_output));
                }
                "zwlr_layer_shell_v1" => {
                    state.layer_shell = Some(registry.bind(name, version.min(4), qh, ()));
                }
                "zxdg_output_manager_v1" => {
                    state.xdg_output_manager = Some(registry.bind(name, version.min(3), qh, ()));
                }
                "wp_viewporter" => {
                    state.viewporter = Some(registry.bind(name, 1, qh, ()));
                }
                "zwlr_screencopy_manager_v1" => {
                    state.screencopy_manager = Some(registry.bind(name, version.min(3), qh, ()));
                }
                "ext_image_copy_capture_manager_v1" => {
                    state.image_copy_manager = Some(registry.bind(name, 1, qh, ()));
                }
                "ext_output_image_capture_source_manager_v1" => {
                    state.output_source_manager = Some(registry.bind(name, 1, qh, ()));
                }
                _ => {}
            },
            wl_registry::Event::GlobalRemove { name } => {
                log::debug!("global {name} was removed");
            }
            _ => {}
        }
    }
}

impl Dispatch<wl_output::WlOutput, OutputId> for State {
    fn event(
        state: &mut Self,
        _: &wl_output::WlOutput,
        event: wl_output::Event,
        id: &OutputId,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        let Some(output) = state.outputs.get_mut(id.0) else {
            return;
        };

        match event {
            wl_output::Event::Geometry { transform, .. } => {
                if let Ok(transform) = transform.into_result() {
                    output.transform = transform.into();
                }
            }
            wl_output::Event::Name { name } => {
                output.name = Some(name);
            }
            wl_output::Event::Done => {
                log::debug!("output updated: {output}");
            }
            _ => {}
        }
    }
}

impl Dispatch<zxdg_output_v1::ZxdgOutputV1, OutputId> for State {
    fn event(
        state: &mut Self,
        _: &zxdg_output_v1::ZxdgOutputV1,
        event: zxdg_output_v1::Event,
        id: &OutputId,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        let Some(output) = state.outputs.get_mut(id.0) else {
            return;
        };

        match event {
            zxdg_output_v1::Event::LogicalPosition { x, y } => {
                output.position = Some((x, y));
            }
            zxdg_output_v1::Event::LogicalSize { width, height } => {
                output.logical_size = Some((width, height));
            }
            // wl_output.name is authoritative where both exist
            zxdg_output_v1::Event::Name { name } => {
                output.name.get_or_insert(name);
            }
            _ => {}
        }
    }
}

impl Dispatch<wl_compositor::WlCompositor, ()> for State {
    fn event(
        _: &mut Self,
        _: &wl_compositor::WlCompositor,
        _: wl_compositor::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
    }
}

impl Dispatch<wl_surface::WlSurface, ()> for State {
    fn event(
        _: &mut Self,
        _: &wl_surface::WlSurface,
        _: wl_surface::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
    }
}

impl Dispatch<wl_shm::WlShm, ()> for State {
    fn event(
        _: &mut Self,
        _: &wl_shm::WlShm,
        _: wl_shm::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
    }
}

impl Dispatch<wl_shm_pool::WlShmPool, ()> for State {
    fn event(
        _: &mut Self,
        _: &wl_shm_pool::WlShmPool,
        _: wl_shm_pool::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
    }
}

// Buffers are never re-attached, so release events don't matter.
impl Dispatch<wl_buffer::WlBuffer, ()> for State {
    fn event(
        _: &mut Self,
        _: &wl_buffer::WlBuffer,
        _: wl_buffer::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
    }
}

impl Dispatch<zwlr_layer_shell_v1::ZwlrLayerShellV1, ()> for State {
    fn event(
        _: &mut Self,
        _: &zwlr_layer_shell_v1::ZwlrLayerShellV1,
        _: zwlr_layer_shell_v1::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
    }
}

impl Dispatch<zxdg_output_manager_v1::ZxdgOutputManagerV1, ()> for State {
    fn event(
        _: &mut Self,
        _: &zxdg_output_manager_v1::ZxdgOutputManagerV1,
        _: zxdg_output_manager_v1::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
    }
}

impl Dispatch<wp_viewporter::WpViewporter, ()> for State {
    fn event(
        _: &mut Self,
        _: &wp_viewporter::WpViewporter,
        _: wp_viewporter::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
    }
}

impl Dispatch<wp_viewport::WpViewport, ()> for State {
    fn event(
        _: &mut Self,
        _: &wp_viewport::WpViewport,
        _: wp_viewport::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
    }
}

impl Dispatch<zwlr_screencopy_manager_v1::ZwlrScreencopyManagerV1, ()> for State {
    fn event(
        _: &mut Self,
        _: &zwlr_screencopy_manager_v1::ZwlrScreencopyManagerV1,
        _: zwlr_screencopy_manager_v1::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
    }
}

impl Dispatch<ext_image_copy_capture_manager_v1::ExtImageCopyCaptureManagerV1, ()> for State {
    fn event(
        _: &mut Self,
        _: &ext_image_copy_capture_manager_v1::ExtImageCopyCaptureManagerV1,
        _: ext_image_copy_capture_manager_v1::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
    }
}

impl
    Dispatch<
        ext_output_image_capture_source_manager_v1::ExtOutputImageCaptureSourceManagerV1,
        (),
    > for State
{
    fn event(
        _: &mut Self,
        _: &ext_output_image_capture_source_manager_v1::ExtOutputImageCaptureSourceManagerV1,
        _: ext_output_image_capture_source_manager_v1::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
    }
}

impl Dispatch<ext_image_capture_source_v1::ExtImageCaptureSourceV1, ()> for State {
    fn event(
        _: &mut Self,
        _: &ext_image_capture_source_v1::ExtImageCaptureSourceV1,
        _: ext_image_capture_source_v1::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
    }
}
