#[macro_use]
extern crate derivative;

mod backend;
mod capture;
mod config;
mod error;
mod event_loop;
mod output;
mod overlay;
mod process;
mod session;
mod shm;
mod transform;

#[cfg(test)]
mod testing;

pub use capture::{CaptureState, Frame, FrameId};
pub use config::*;
pub use error::*;
pub use event_loop::*;
pub use output::{Output, OutputId, Rectangle, select_outputs};
pub use overlay::{Overlay, OverlayId, OverlayState};
pub use process::*;
pub use session::*;
pub use shm::{Buffer, BufferDescription, SharedMemory, bytes_per_pixel, runtime_dir};
pub use transform::{Transform, flip_rows, transform};

/// Freeze the configured outputs until a signal, the timeout or the child's
/// exit ends it.
///
/// Errors before the freeze is on screen are returned; anything going wrong
/// afterwards shuts down cleanly with [`ShutdownReason::FatalError`].
pub fn run(config: &Config) -> Result<ShutdownReason> {
    let runtime_dir = shm::runtime_dir()?;
    let mut session = WaylandSession::connect(runtime_dir)?;

    let outputs = session.select_outputs(config.output.as_deref())?;

    let frames = outputs
        .iter()
        .map(|output| session.capture(*output, config.include_cursor))
        .collect::<Result<Vec<_>>>()?;

    for frame in frames {
        session.present(frame)?;
    }

    // Every overlay is on screen before the child can grab anything
    session.roundtrip()?;

    let mut event_loop = EventLoop::new()?;

    if config.has_child() {
        event_loop.spawn_child(&config.command, config.kill_signal)?;
    }

    if let Some(timeout) = config.timeout {
        event_loop.arm_timeout(timeout);
    }

    Ok(event_loop.run(session))
}
