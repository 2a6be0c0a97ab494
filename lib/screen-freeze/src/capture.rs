use crate::{
    Error, Result,
    backend::State,
    output::OutputId,
    shm::{Buffer, BufferDescription, bytes_per_pixel},
    transform::flip_rows,
};
use wayland_client::{
    Connection, Dispatch, EventQueue, Proxy, QueueHandle, WEnum, protocol::wl_shm,
};
use wayland_protocols::ext::image_copy_capture::v1::client::{
    ext_image_copy_capture_frame_v1, ext_image_copy_capture_manager_v1,
    ext_image_copy_capture_session_v1,
};
use wayland_protocols_wlr::screencopy::v1::client::zwlr_screencopy_frame_v1;

/// Formats tried first when the compositor offers a choice
const PREFERRED_FORMATS: [wl_shm::Format; 4] = [
    wl_shm::Format::Xrgb8888,
    wl_shm::Format::Argb8888,
    wl_shm::Format::Xbgr8888,
    wl_shm::Format::Abgr8888,
];

/// Handle of a captured frame, stable for the lifetime of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(pub(crate) usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureState {
    /// Waiting for the compositor to describe the buffer it wants
    Negotiating,

    /// Buffer handed over, waiting for the copy to finish
    Copying,

    Ready,
    Failed(String),
}

impl CaptureState {
    /// Whether the compositor still waits for a buffer to copy into
    pub fn needs_allocation(&self) -> bool {
        *self == Self::Negotiating
    }

    fn begin_copy(&mut self) {
        if self.needs_allocation() {
            *self = Self::Copying;
        }
    }

    /// A finished capture stays usable and the first failure sticks
    fn fail(&mut self, reason: String) {
        if matches!(self, Self::Negotiating | Self::Copying) {
            *self = Self::Failed(reason);
        }
    }

    /// `Ok(true)` once the pixels are in, `Ok(false)` while still in flight
    fn check(&self, output: &str) -> Result<bool> {
        match self {
            Self::Ready => Ok(true),
            Self::Negotiating | Self::Copying => Ok(false),
            Self::Failed(reason) => Err(Error::Capture {
                output: output.to_string(),
                reason: reason.clone(),
            }),
        }
    }
}

#[derive(Debug)]
enum CaptureRequest {
    Screencopy {
        frame: zwlr_screencopy_frame_v1::ZwlrScreencopyFrameV1,
        description: Option<BufferDescription>,
    },
    ImageCopy {
        session: ext_image_copy_capture_session_v1::ExtImageCopyCaptureSessionV1,
        frame: Option<ext_image_copy_capture_frame_v1::ExtImageCopyCaptureFrameV1>,
        size: Option<(u32, u32)>,
        formats: Vec<wl_shm::Format>,
    },
}

impl CaptureRequest {
    fn destroy(self) {
        match self {
            Self::Screencopy { frame, .. } => frame.destroy(),
            Self::ImageCopy { session, frame, .. } => {
                if let Some(frame) = frame {
                    frame.destroy();
                }
                session.destroy();
            }
        }
    }
}

/// One captured image of an output
#[derive(Debug)]
pub struct Frame {
    output: OutputId,
    request: Option<CaptureRequest>,
    buffer: Option<Buffer>,
    state: CaptureState,
    y_invert: bool,
}

impl Frame {
    pub fn output(&self) -> OutputId {
        self.output
    }

    pub fn state(&self) -> &CaptureState {
        &self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == CaptureState::Ready
    }

    /// Whether the compositor delivered the rows bottom-up
    pub fn y_invert(&self) -> bool {
        self.y_invert
    }

    /// Captured pixels, available once the frame is ready
    pub fn buffer(&self) -> Option<&Buffer> {
        if self.is_ready() {
            self.buffer.as_ref()
        } else {
            None
        }
    }

    pub(crate) fn needs_allocation(&self) -> bool {
        self.state.needs_allocation()
    }

    /// Shm layout offered through wlr-screencopy. Only the first usable offer counts.
    fn offer_shm_buffer(
        &mut self,
        format: WEnum<wl_shm::Format>,
        width: u32,
        height: u32,
        stride: u32,
    ) {
        let WEnum::Value(format) = format else {
            log::debug!("ignoring buffer with unknown format {format:?}");
            return;
        };

        if let Some(CaptureRequest::Screencopy { description, .. }) = &mut self.request {
            description.get_or_insert(BufferDescription {
                format,
                width,
                height,
                stride,
            });
        }
    }

    /// Buffer to allocate for a screencopy frame, `None` once it was handed over
    fn screencopy_layout(&self) -> Result<Option<BufferDescription>> {
        match &self.request {
            Some(CaptureRequest::Screencopy { description, .. }) if self.needs_allocation() => {
                description.map(Some).ok_or_else(|| {
                    Error::BufferLayout("no shared memory buffer was offered".to_string())
                })
            }
            _ => Ok(None),
        }
    }

    /// Buffer to allocate for an image-copy frame, `None` once it was handed over
    fn image_copy_layout(&self) -> Result<Option<BufferDescription>> {
        let Some(CaptureRequest::ImageCopy {
            frame: None,
            size,
            formats,
            ..
        }) = &self.request
        else {
            return Ok(None);
        };

        if !self.needs_allocation() {
            return Ok(None);
        }

        let (width, height) =
            size.ok_or_else(|| Error::BufferLayout("no buffer size was offered".to_string()))?;
        let format = choose_format(formats).ok_or_else(|| {
            Error::UnsupportedFormat("no usable shared memory format was offered".to_string())
        })?;

        BufferDescription::packed(format, width, height).map(Some)
    }

    fn begin_copy(&mut self, buffer: Buffer) {
        self.buffer = Some(buffer);
        self.state.begin_copy();
    }

    fn on_failed(&mut self, reason: impl Into<String>) {
        self.state.fail(reason.into());
    }

    fn on_ready(&mut self) {
        if self.state != CaptureState::Copying {
            log::warn!("ignoring ready event for a frame in state {:?}", self.state);
            return;
        }

        if let Some(request) = self.request.take() {
            request.destroy();
        }

        if let (true, Some(buffer)) = (self.y_invert, self.buffer.as_mut()) {
            let description = *buffer.description();
            flip_rows(
                buffer.data_mut(),
                description.stride as usize,
                description.height as usize,
            );
        }

        self.state = CaptureState::Ready;
    }

    pub(crate) fn destroy(mut self) {
        if let Some(request) = self.request.take() {
            request.destroy();
        }
    }
}

/// Pick the shm format for an image-copy session
pub(crate) fn choose_format(offered: &[wl_shm::Format]) -> Option<wl_shm::Format> {
    PREFERRED_FORMATS
        .into_iter()
        .find(|format| offered.contains(format))
        .or_else(|| {
            offered
                .iter()
                .copied()
                .find(|format| bytes_per_pixel(*format).is_some())
        })
}

/// Capture `output` and block until the copy either finished or failed
pub(crate) fn capture(
    event_queue: &mut EventQueue<State>,
    state: &mut State,
    output: OutputId,
    include_cursor: bool,
) -> Result<FrameId> {
    let qh = event_queue.handle();
    let id = begin_capture(state, output, include_cursor, &qh)?;

    loop {
        state.take_fatal()?;

        let name = state.output(output).name();
        if state.frames[id.0].state.check(name)? {
            log::debug!("captured output {name}");
            return Ok(id);
        }

        event_queue.blocking_dispatch(state)?;
    }
}

fn begin_capture(
    state: &mut State,
    output: OutputId,
    include_cursor: bool,
    qh: &QueueHandle<State>,
) -> Result<FrameId> {
    let id = FrameId(state.frames.len());
    let wl_output = &state.output(output).wl_output;

    let request = if let (Some(manager), Some(sources)) =
        (&state.image_copy_manager, &state.output_source_manager)
    {
        let options = if include_cursor {
            ext_image_copy_capture_manager_v1::Options::PaintCursors
        } else {
            ext_image_copy_capture_manager_v1::Options::empty()
        };

        let source = sources.create_source(wl_output, qh, ());
        let session = manager.create_session(&source, options, qh, id);
        source.destroy();

        CaptureRequest::ImageCopy {
            session,
            frame: None,
            size: None,
            formats: vec![],
        }
    } else if let Some(manager) = &state.screencopy_manager {
        CaptureRequest::Screencopy {
            frame: manager.capture_output(include_cursor as i32, wl_output, qh, id),
            description: None,
        }
    } else {
        return Err(Error::MissingGlobal("zwlr_screencopy_manager_v1"));
    };

    state.frames.push(Frame {
        output,
        request: Some(request),
        buffer: None,
        state: CaptureState::Negotiating,
        y_invert: false,
    });

    Ok(id)
}

fn allocate(
    state: &State,
    description: BufferDescription,
    qh: &QueueHandle<State>,
) -> Result<Buffer> {
    let shm = state.shm.as_ref().ok_or(Error::MissingGlobal("wl_shm"))?;
    Buffer::allocate(shm, &state.runtime_dir, description, qh)
}

fn fail_frame(state: &mut State, id: FrameId, error: Error) {
    if let Some(frame) = state.frames.get_mut(id.0) {
        frame.on_failed(error.to_string());
    }
    state.fail(error);
}

fn start_screencopy(state: &mut State, id: FrameId, qh: &QueueHandle<State>) {
    let result = state.frames[id.0]
        .screencopy_layout()
        .and_then(|layout| layout.map(|layout| allocate(state, layout, qh)).transpose());

    match result {
        Ok(Some(buffer)) => {
            let frame = &mut state.frames[id.0];
            if let Some(CaptureRequest::Screencopy { frame: proxy, .. }) = &frame.request {
                proxy.copy(buffer.wl_buffer());
            }
            frame.begin_copy(buffer);
        }
        Ok(None) => {}
        Err(e) => fail_frame(state, id, e),
    }
}

fn start_image_copy(state: &mut State, id: FrameId, qh: &QueueHandle<State>) {
    let result = state.frames[id.0]
        .image_copy_layout()
        .and_then(|layout| layout.map(|layout| allocate(state, layout, qh)).transpose());

    match result {
        Ok(Some(buffer)) => {
            let frame = &mut state.frames[id.0];
            if let Some(CaptureRequest::ImageCopy {
                session,
                frame: copy,
                ..
            }) = &mut frame.request
            {
                let description = buffer.description();
                let proxy = session.create_frame(qh, id);
                proxy.attach_buffer(buffer.wl_buffer());
                proxy.damage_buffer(0, 0, description.width as i32, description.height as i32);
                proxy.capture();
                *copy = Some(proxy);
            }
            frame.begin_copy(buffer);
        }
        Ok(None) => {}
        Err(e) => fail_frame(state, id, e),
    }
}

impl Dispatch<zwlr_screencopy_frame_v1::ZwlrScreencopyFrameV1, FrameId> for State {
    fn event(
        state: &mut Self,
        proxy: &zwlr_screencopy_frame_v1::ZwlrScreencopyFrameV1,
        event: zwlr_screencopy_frame_v1::Event,
        id: &FrameId,
        _: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        let Some(frame) = state.frames.get_mut(id.0) else {
            return;
        };

        match event {
            zwlr_screencopy_frame_v1::Event::Buffer {
                format,
                width,
                height,
                stride,
            } => {
                frame.offer_shm_buffer(format, width, height, stride);

                // Before v3 there is no buffer_done, the first offer is all we get
                if proxy.version() < 3 {
                    start_screencopy(state, *id, qh);
                }
            }
            zwlr_screencopy_frame_v1::Event::BufferDone => {
                start_screencopy(state, *id, qh);
            }
            zwlr_screencopy_frame_v1::Event::Flags { flags } => {
                if let WEnum::Value(flags) = flags {
                    frame.y_invert = flags.contains(zwlr_screencopy_frame_v1::Flags::YInvert);
                }
            }
            zwlr_screencopy_frame_v1::Event::Ready { .. } => {
                frame.on_ready();
            }
            zwlr_screencopy_frame_v1::Event::Failed => {
                frame.on_failed("compositor failed to copy");
            }
            _ => {}
        }
    }
}

impl Dispatch<ext_image_copy_capture_session_v1::ExtImageCopyCaptureSessionV1, FrameId>
    for State
{
    fn event(
        state: &mut Self,
        _: &ext_image_copy_capture_session_v1::ExtImageCopyCaptureSessionV1,
        event: ext_image_copy_capture_session_v1::Event,
        id: &FrameId,
        _: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        let Some(frame) = state.frames.get_mut(id.0) else {
            return;
        };

        match event {
            ext_image_copy_capture_session_v1::Event::BufferSize { width, height } => {
                if let Some(CaptureRequest::ImageCopy { size, .. }) = &mut frame.request {
                    *size = Some((width, height));
                }
            }
            ext_image_copy_capture_session_v1::Event::ShmFormat { format } => {
                if let (Some(CaptureRequest::ImageCopy { formats, .. }), WEnum::Value(format)) =
                    (&mut frame.request, format)
                {
                    formats.push(format);
                }
            }
            ext_image_copy_capture_session_v1::Event::Done => {
                start_image_copy(state, *id, qh);
            }
            ext_image_copy_capture_session_v1::Event::Stopped => {
                frame.on_failed("capture session stopped");
            }
            _ => {}
        }
    }
}

impl Dispatch<ext_image_copy_capture_frame_v1::ExtImageCopyCaptureFrameV1, FrameId> for State {
    fn event(
        state: &mut Self,
        _: &ext_image_copy_capture_frame_v1::ExtImageCopyCaptureFrameV1,
        event: ext_image_copy_capture_frame_v1::Event,
        id: &FrameId,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        let Some(frame) = state.frames.get_mut(id.0) else {
            return;
        };

        match event {
            ext_image_copy_capture_frame_v1::Event::Ready => {
                frame.on_ready();
            }
            ext_image_copy_capture_frame_v1::Event::Failed { reason } => {
                let reason = match reason {
                    WEnum::Value(reason) => format!("{reason:?}"),
                    WEnum::Unknown(code) => format!("unknown reason {code}"),
                };
                frame.on_failed(reason);
            }
            _ => {}
        }
    }
}
