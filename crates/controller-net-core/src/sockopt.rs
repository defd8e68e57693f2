//! Socket buffer tuning applied to every accepted stream and to the UDP
//! socket (§10.3, §11 ambient stack). Best-effort: a failure here never
//! prevents a connection from being accepted or the driver from starting,
//! it only leaves the OS default buffer size in place.

use std::io;

#[cfg(unix)]
pub fn set_socket_buf_size<S: std::os::fd::AsRawFd>(socket: &S, size: usize) -> io::Result<()> {
    let fd = socket.as_raw_fd();
    let size = libc::c_int::try_from(size).unwrap_or(libc::c_int::MAX);
    for opt in [libc::SO_RCVBUF, libc::SO_SNDBUF] {
        let ret = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                opt,
                std::ptr::from_ref(&size).cast(),
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn set_socket_buf_size<S>(_socket: &S, _size: usize) -> io::Result<()> {
    Ok(())
}
