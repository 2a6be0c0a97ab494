use crate::{
    Error, Result,
    backend::State,
    capture::{self, Frame, FrameId},
    event_loop::DisplaySession,
    output::{self, Output, OutputId},
    overlay::{self, Overlay, OverlayId},
};
use std::{
    io::ErrorKind,
    os::fd::{AsFd, BorrowedFd},
    path::PathBuf,
};
use wayland_client::{Connection, EventQueue, backend::WaylandError};

/// Connection to the compositor and everything created through it
pub struct WaylandSession {
    state: State,
    event_queue: EventQueue<State>,
    connection: Connection,
}

impl WaylandSession {
    /// Connect, bind the globals we need and learn about every output
    pub fn connect(runtime_dir: PathBuf) -> Result<Self> {
        let connection = Connection::connect_to_env()?;
        let mut event_queue = connection.new_event_queue();
        let qh = event_queue.handle();

        connection.display().get_registry(&qh, ());

        let mut state = State::new(runtime_dir);
        event_queue.roundtrip(&mut state)?;

        check_globals(&state)?;

        if state.outputs.is_empty() {
            return Err(Error::NoOutputs);
        }

        if let Some(manager) = &state.xdg_output_manager {
            for (index, output) in state.outputs.iter_mut().enumerate() {
                output.xdg_output =
                    Some(manager.get_xdg_output(&output.wl_output, &qh, OutputId(index)));
            }
        }

        event_queue.roundtrip(&mut state)?;

        for output in &state.outputs {
            if output.geometry().is_none() {
                return Err(Error::IncompleteOutput(output.name().to_string()));
            }
            log::debug!("found output {output}");
        }

        Ok(Self {
            state,
            event_queue,
            connection,
        })
    }

    pub fn outputs(&self) -> &[Output] {
        &self.state.outputs
    }

    pub fn frame(&self, id: FrameId) -> &Frame {
        &self.state.frames[id.0]
    }

    pub fn overlay(&self, id: OverlayId) -> &Overlay {
        &self.state.overlays[id.0]
    }

    /// Outputs to freeze: the one called `wanted`, or all of them
    pub fn select_outputs(&self, wanted: Option<&str>) -> Result<Vec<OutputId>> {
        output::select_outputs(self.state.outputs.iter().map(Output::name), wanted)
    }

    pub fn capture(&mut self, output: OutputId, include_cursor: bool) -> Result<FrameId> {
        capture::capture(
            &mut self.event_queue,
            &mut self.state,
            output,
            include_cursor,
        )
    }

    pub fn present(&mut self, frame: FrameId) -> Result<OverlayId> {
        overlay::present(&mut self.event_queue, &mut self.state, frame)
    }

    pub fn roundtrip(&mut self) -> Result<()> {
        self.event_queue.roundtrip(&mut self.state)?;
        self.state.take_fatal()
    }
}

fn check_globals(state: &State) -> Result<()> {
    if state.compositor.is_none() {
        return Err(Error::MissingGlobal("wl_compositor"));
    }
    if state.shm.is_none() {
        return Err(Error::MissingGlobal("wl_shm"));
    }
    if state.layer_shell.is_none() {
        return Err(Error::MissingGlobal("zwlr_layer_shell_v1"));
    }
    if state.xdg_output_manager.is_none() {
        return Err(Error::MissingGlobal("zxdg_output_manager_v1"));
    }
    if state.viewporter.is_none() {
        return Err(Error::MissingGlobal("wp_viewporter"));
    }

    match (
        &state.screencopy_manager,
        &state.image_copy_manager,
        &state.output_source_manager,
    ) {
        (Some(_), _, _) | (None, Some(_), Some(_)) => Ok(()),
        (None, Some(_), None) => Err(Error::MissingGlobal(
            "ext_output_image_capture_source_manager_v1",
        )),
        (None, None, _) => Err(Error::MissingGlobal("zwlr_screencopy_manager_v1")),
    }
}

/// Treat a full socket or an empty read as "nothing to do"
fn would_block(result: std::result::Result<(), WaylandError>) -> Result<()> {
    match result {
        Err(WaylandError::Io(e)) if e.kind() == ErrorKind::WouldBlock => Ok(()),
        other => Ok(other?),
    }
}

impl AsFd for WaylandSession {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.connection.as_fd()
    }
}

impl DisplaySession for WaylandSession {
    fn prepare(&mut self) -> Result<()> {
        self.event_queue.dispatch_pending(&mut self.state)?;
        self.state.take_fatal()?;
        would_block(self.event_queue.flush())
    }

    fn dispatch(&mut self) -> Result<()> {
        if let Some(guard) = self.event_queue.prepare_read() {
            would_block(guard.read().map(|_| ()))?;
        }

        self.event_queue.dispatch_pending(&mut self.state)?;
        self.state.take_fatal()
    }

    fn teardown(mut self) {
        self.state.teardown();

        if let Err(e) = self.event_queue.flush() {
            log::debug!("failed to flush while disconnecting: {e}");
        }
    }
}
