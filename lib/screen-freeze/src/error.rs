pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to connect to the wayland server")]
    Connect(#[from] wayland_client::ConnectError),

    #[error("failed to dispatch event from wayland server: {0}")]
    Dispatch(#[from] wayland_client::DispatchError),

    #[error("wayland connection error: {0}")]
    Wayland(#[from] wayland_client::backend::WaylandError),

    #[error("compositor doesn't provide `{0}`")]
    MissingGlobal(&'static str),

    #[error("no outputs found")]
    NoOutputs,

    #[error("output `{0}` was not found")]
    NoOutput(String),

    #[error("output `{0}` didn't report its logical geometry")]
    IncompleteOutput(String),

    #[error("XDG_RUNTIME_DIR is not set")]
    RuntimeDirUnset,

    #[error("invalid buffer layout: {0}")]
    BufferLayout(String),

    #[error("unsupported pixel format: {0}")]
    UnsupportedFormat(String),

    #[error("failed to capture output `{output}`: {reason}")]
    Capture { output: String, reason: String },

    #[error("overlay on output `{0}` was closed by the compositor")]
    OverlayClosed(String),

    #[error("empty child command")]
    EmptyCommand,

    #[error("invalid child argument {0:?}: contains a nul byte")]
    InvalidArgument(std::ffi::OsString),

    #[error("system call failed: {0}")]
    Sys(#[from] nix::errno::Errno),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
