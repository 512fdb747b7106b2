// Socket-level helpers the standard library does not expose.
//
// - `set_backlog`: re-issue `listen()` with a specific backlog. std binds
//   with its own default; calling `listen` again on a listening socket just
//   updates the queue length.
// - `set_linger_zero`: `SO_LINGER {on, 0}`, so closing the source socket
//   resets the connection immediately instead of lingering in TIME_WAIT.
// - `wait_readable`: one `poll()` over both listening sockets with a timeout.
// - `is_peer_gone`: non-blocking liveness probe for write-only peers
//   (pending `SO_ERROR`, or a drain of unread input that hits EOF or a hard
//   error). Whatever the peer sent is read and discarded; otherwise a single
//   unread byte would hide a later EOF forever.
//
// std's `TcpListener::bind` already sets `SO_REUSEADDR` on unix. The crate
// only builds on unix targets.

use std::io;
use std::net::{TcpListener, TcpStream};
use std::os::fd::AsRawFd;
use std::time::Duration;

/// Set the accept queue length of a listening socket.
pub fn set_backlog(listener: &TcpListener, backlog: i32) -> io::Result<()> {
    // SAFETY: the fd is owned by `listener` and stays open for the call.
    let rc = unsafe { libc::listen(listener.as_raw_fd(), backlog) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// The OS maximum accept queue length.
pub fn max_backlog() -> i32 {
    libc::SOMAXCONN
}

/// Make `close()` on this stream send a reset and return immediately.
pub fn set_linger_zero(stream: &TcpStream) -> io::Result<()> {
    let linger = libc::linger {
        l_onoff: 1,
        l_linger: 0,
    };
    // SAFETY: `linger` outlives the call and the length matches its type.
    let rc = unsafe {
        libc::setsockopt(
            stream.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_LINGER,
            std::ptr::from_ref(&linger).cast::<libc::c_void>(),
            std::mem::size_of::<libc::linger>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Block until either listener has a pending connection or `timeout`
/// elapses. Returns readiness for `(first, second)`.
pub fn wait_readable(
    first: &TcpListener,
    second: &TcpListener,
    timeout: Duration,
) -> io::Result<(bool, bool)> {
    let mut fds = [
        libc::pollfd {
            fd: first.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        },
        libc::pollfd {
            fd: second.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        },
    ];
    let timeout_ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);

    // SAFETY: `fds` is a valid array of two pollfd structs for the call.
    let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok((false, false));
        }
        return Err(err);
    }
    Ok((fds[0].revents != 0, fds[1].revents != 0))
}

/// True when the peer has closed the connection or the socket has an error.
/// Never blocks. Any bytes the peer sent are discarded.
pub fn is_peer_gone(stream: &TcpStream) -> bool {
    match stream.take_error() {
        Ok(None) => drain_says_gone(stream),
        Ok(Some(_)) | Err(_) => true,
    }
}

/// Read and drop everything pending until the socket would block. True on
/// EOF or a hard error.
fn drain_says_gone(stream: &TcpStream) -> bool {
    let mut scratch = [0u8; 512];
    loop {
        // SAFETY: `scratch` is a valid writable buffer of the given length.
        let rc = unsafe {
            libc::recv(
                stream.as_raw_fd(),
                scratch.as_mut_ptr().cast::<libc::c_void>(),
                scratch.len(),
                libc::MSG_DONTWAIT,
            )
        };
        match rc {
            0 => return true,
            n if n > 0 => continue,
            _ => {
                let err = io::Error::last_os_error();
                match err.kind() {
                    io::ErrorKind::Interrupted => continue,
                    io::ErrorKind::WouldBlock => return false,
                    _ => return true,
                }
            }
        }
    }
}
