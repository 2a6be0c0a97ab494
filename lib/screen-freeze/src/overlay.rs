use crate::{
    Error, Result,
    backend::State,
    capture::FrameId,
    output::OutputId,
    shm::{Buffer, BufferDescription, bytes_per_pixel},
    transform::{self, Transform},
};
use std::borrow::Cow;
use wayland_client::{
    Connection, Dispatch, EventQueue, QueueHandle,
    protocol::wl_surface,
};
use wayland_protocols::wp::viewporter::client::wp_viewport;
use wayland_protocols_wlr::layer_shell::v1::client::{zwlr_layer_shell_v1, zwlr_layer_surface_v1};

const NAMESPACE: &str = "wayfreeze";

/// Handle of an overlay, stable for the lifetime of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OverlayId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayState {
    AwaitingConfigure,
    Configured,
    Closed,
}

impl OverlayState {
    /// `Ok(true)` once placed, `Ok(false)` while waiting for the compositor
    fn check(self, output: &str) -> Result<bool> {
        match self {
            Self::Configured => Ok(true),
            Self::AwaitingConfigure => Ok(false),
            Self::Closed => Err(Error::OverlayClosed(output.to_string())),
        }
    }
}

/// Full-screen layer surface showing a frozen frame
#[derive(Debug)]
pub struct Overlay {
    output: OutputId,
    output_name: String,
    surface: wl_surface::WlSurface,
    layer_surface: zwlr_layer_surface_v1::ZwlrLayerSurfaceV1,
    viewport: wp_viewport::WpViewport,
    buffer: Option<Buffer>,
    state: OverlayState,
}

impl Overlay {
    pub fn output(&self) -> OutputId {
        self.output
    }

    pub fn state(&self) -> OverlayState {
        self.state
    }

    fn on_configure(&mut self, serial: u32) {
        if self.state == OverlayState::Closed {
            return;
        }

        self.layer_surface.ack_configure(serial);
        if self.buffer.is_some() {
            self.surface.commit();
        }
        self.state = OverlayState::Configured;
    }

    /// Mark the overlay closed and return the error that ends the freeze
    fn on_closed(&mut self) -> Error {
        self.state = OverlayState::Closed;
        Error::OverlayClosed(self.output_name.clone())
    }

    pub(crate) fn destroy(self) {
        self.layer_surface.destroy();
        self.viewport.destroy();
        self.surface.destroy();
    }
}

/// Layout of the buffer an overlay shows for a frame of `frame` layout
pub(crate) fn overlay_description(
    frame: &BufferDescription,
    transform: Transform,
) -> Result<BufferDescription> {
    let (width, height) = transform.transformed_size(frame.width, frame.height);
    BufferDescription::packed(frame.format, width, height)
}

/// Pixels of `data` without the row padding
fn packed_rows<'a>(data: &'a [u8], description: &BufferDescription, bpp: usize) -> Cow<'a, [u8]> {
    let row = description.width as usize * bpp;
    let stride = description.stride as usize;
    let height = description.height as usize;

    if row == stride {
        return Cow::Borrowed(&data[..row * height]);
    }

    Cow::Owned(
        data.chunks(stride)
            .take(height)
            .flat_map(|line| &line[..row])
            .copied()
            .collect(),
    )
}

/// Show `frame_id` on its output and wait until the compositor has placed it
pub(crate) fn present(
    event_queue: &mut EventQueue<State>,
    state: &mut State,
    frame_id: FrameId,
) -> Result<OverlayId> {
    let qh = event_queue.handle();
    let output_id = state.frames[frame_id.0].output();
    let output = state.output(output_id);

    let name = output.name().to_string();
    let geometry = output
        .geometry()
        .ok_or_else(|| Error::IncompleteOutput(name.clone()))?;
    let transform = output.transform();
    let wl_output = output.wl_output.clone();

    let compositor = state
        .compositor
        .as_ref()
        .ok_or(Error::MissingGlobal("wl_compositor"))?;
    let layer_shell = state
        .layer_shell
        .as_ref()
        .ok_or(Error::MissingGlobal("zwlr_layer_shell_v1"))?;
    let viewporter = state
        .viewporter
        .as_ref()
        .ok_or(Error::MissingGlobal("wp_viewporter"))?;

    let id = OverlayId(state.overlays.len());
    let surface = compositor.create_surface(&qh, ());
    let viewport = viewporter.get_viewport(&surface, &qh, ());
    let layer_surface = layer_shell.get_layer_surface(
        &surface,
        Some(&wl_output),
        zwlr_layer_shell_v1::Layer::Overlay,
        NAMESPACE.to_string(),
        &qh,
        id,
    );

    layer_surface.set_anchor(
        zwlr_layer_surface_v1::Anchor::Top
            | zwlr_layer_surface_v1::Anchor::Bottom
            | zwlr_layer_surface_v1::Anchor::Left
            | zwlr_layer_surface_v1::Anchor::Right,
    );
    layer_surface.set_size(geometry.width as u32, geometry.height as u32);
    layer_surface.set_exclusive_zone(-1);
    layer_surface.set_keyboard_interactivity(zwlr_layer_surface_v1::KeyboardInteractivity::None);

    // Nothing attached yet, this only asks for the first configure
    surface.commit();

    state.overlays.push(Overlay {
        output: output_id,
        output_name: name.clone(),
        surface,
        layer_surface,
        viewport,
        buffer: None,
        state: OverlayState::AwaitingConfigure,
    });

    loop {
        state.take_fatal()?;

        if state.overlays[id.0].state.check(&name)? {
            break;
        }

        event_queue.blocking_dispatch(state)?;
    }

    let source = state.frames[frame_id.0].buffer().ok_or_else(|| Error::Capture {
        output: name.clone(),
        reason: "frame is not ready".to_string(),
    })?;
    let source_description = *source.description();
    let bpp = bytes_per_pixel(source_description.format)
        .ok_or_else(|| Error::UnsupportedFormat(format!("{:?}", source_description.format)))?
        as usize;

    let description = overlay_description(&source_description, transform)?;
    let shm = state.shm.as_ref().ok_or(Error::MissingGlobal("wl_shm"))?;
    let mut buffer = Buffer::allocate(shm, &state.runtime_dir, description, &qh)?;

    transform::transform(
        buffer.data_mut(),
        &packed_rows(source.data(), &source_description, bpp),
        source_description.width as usize,
        source_description.height as usize,
        bpp,
        transform,
    );

    let overlay = &mut state.overlays[id.0];
    overlay.viewport.set_destination(geometry.width, geometry.height);
    overlay.surface.attach(Some(buffer.wl_buffer()), 0, 0);
    overlay.surface.damage(0, 0, geometry.width, geometry.height);
    overlay.surface.commit();
    overlay.buffer = Some(buffer);

    log::info!(
        "froze output {name} ({}x{} {transform:?})",
        description.width,
        description.height
    );

    Ok(id)
}

/// The compositor took the overlay away, which ends the freeze
fn close(state: &mut State, id: OverlayId) {
    if let Some(overlay) = state.overlays.get_mut(id.0) {
        let error = overlay.on_closed();
        state.fail(error);
    }
}

impl Dispatch<zwlr_layer_surface_v1::ZwlrLayerSurfaceV1, OverlayId> for State {
    fn event(
        state: &mut Self,
        _: &zwlr_layer_surface_v1::ZwlrLayerSurfaceV1,
        event: zwlr_layer_surface_v1::Event,
        id: &OverlayId,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        match event {
            zwlr_layer_surface_v1::Event::Configure {
                serial,
                width,
                height,
            } => {
                let Some(overlay) = state.overlays.get_mut(id.0) else {
                    return;
                };

                log::debug!("overlay on {} configured {width}x{height}", overlay.output_name);
                overlay.on_configure(serial);
            }
            zwlr_layer_surface_v1::Event::Closed => close(state, *id),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::inert;
    use wayland_client::protocol::wl_shm::Format;

    fn overlay(name: &str) -> Overlay {
        Overlay {
            output: OutputId(0),
            output_name: name.to_string(),
            surface: inert(),
            layer_surface: inert(),
            viewport: inert(),
            buffer: None,
            state: OverlayState::AwaitingConfigure,
        }
    }

    #[test]
    fn test_configure_places_overlay() {
        let mut overlay = overlay("OUT-1");
        assert!(!overlay.state().check("OUT-1").unwrap());

        overlay.on_configure(7);
        assert_eq!(overlay.state(), OverlayState::Configured);
        assert!(overlay.state().check("OUT-1").unwrap());
    }

    #[test]
    fn test_closed_overlay_is_fatal() {
        let mut state = State::new(std::env::temp_dir());
        state.overlays.push(overlay("OUT-1"));

        close(&mut state, OverlayId(0));

        assert_eq!(state.overlays[0].state(), OverlayState::Closed);
        assert!(matches!(
            state.take_fatal(),
            Err(Error::OverlayClosed(name)) if name == "OUT-1"
        ));
        assert!(matches!(
            state.overlays[0].state().check("OUT-1"),
            Err(Error::OverlayClosed(_))
        ));
    }

    #[test]
    fn test_configure_after_close_is_ignored() {
        let mut overlay = overlay("OUT-1");
        let _ = overlay.on_closed();

        overlay.on_configure(8);
        assert_eq!(overlay.state(), OverlayState::Closed);
    }

    #[test]
    fn test_close_of_unknown_overlay_is_ignored() {
        let mut state = State::new(std::env::temp_dir());

        close(&mut state, OverlayId(3));
        assert!(state.take_fatal().is_ok());
    }

    #[test]
    fn test_rotated_overlay_matches_logical_geometry() {
        let frame = BufferDescription {
            format: Format::Xrgb8888,
            width: 1080,
            height: 1920,
            stride: 1080 * 4,
        };

        let overlay = overlay_description(&frame, Transform::_90).unwrap();
        assert_eq!((overlay.width, overlay.height), (1920, 1080));
        assert_eq!(overlay.stride, 1920 * 4);
        assert_eq!(overlay.format, Format::Xrgb8888);
    }

    #[test]
    fn test_upright_overlay_keeps_size() {
        let frame = BufferDescription {
            format: Format::Argb8888,
            width: 1920,
            height: 1080,
            stride: 8192,
        };

        let overlay = overlay_description(&frame, Transform::Flipped180).unwrap();
        assert_eq!((overlay.width, overlay.height), (1920, 1080));
        assert_eq!(overlay.stride, 1920 * 4);
    }

    #[test]
    fn test_packed_rows_drops_padding() {
        let description = BufferDescription {
            format: Format::Rgb565,
            width: 2,
            height: 2,
            stride: 6,
        };
        let data = [1, 2, 3, 4, 0, 0, 5, 6, 7, 8, 0, 0];

        let packed = packed_rows(&data, &description, 2);
        assert_eq!(&packed[..], &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_packed_rows_borrows_tight_rows() {
        let description = BufferDescription {
            format: Format::Rgb565,
            width: 2,
            height: 1,
            stride: 4,
        };

        assert!(matches!(
            packed_rows(&[1, 2, 3, 4], &description, 2),
            Cow::Borrowed(_)
        ));
    }
}
