use std::os::unix::net::UnixStream;
use wayland_client::{Connection, Proxy};

/// Proxy without an object behind it, requests sent through it are dropped
pub(crate) fn inert<P: Proxy>() -> P {
    let (socket, _) = UnixStream::pair().unwrap();
    let connection = Connection::from_socket(socket).unwrap();

    P::inert(connection.backend().downgrade())
}
