//! Low-level async netlink socket operations.

use std::io;
use std::os::unix::io::{AsRawFd, RawFd};

use bytes::BytesMut;
use netlink_sys::{Socket, SocketAddr, protocols};
use tokio::io::Interest;
use tokio::io::unix::AsyncFd;

use super::error::{Error, Result};
use super::transport::Transport;

/// Memory page size of the running system.
pub fn system_page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 { size as usize } else { 4096 }
}

/// Async NETLINK_NETFILTER socket.
pub struct NetlinkSocket {
    /// The underlying async file descriptor.
    fd: AsyncFd<Socket>,
    /// Local port ID (assigned by kernel).
    pid: u32,
}

impl NetlinkSocket {
    /// Open and bind a netfilter netlink socket.
    pub fn new() -> Result<Self> {
        let mut socket = Socket::new(protocols::NETLINK_NETFILTER)?;
        socket.set_non_blocking(true)?;

        // Bind to get a port ID
        let mut addr = SocketAddr::new(0, 0);
        socket.bind(&addr)?;
        socket.get_address(&mut addr)?;
        let pid = addr.port_number();

        // Enable extended ACK for better error messages
        socket.set_ext_ack(true).ok(); // Ignore if not supported

        let fd = AsyncFd::new(socket)?;

        Ok(Self { fd, pid })
    }

    /// Get the local port ID.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    fn set_buffer_option(&self, option: libc::c_int, size: usize) -> Result<()> {
        let value = libc::c_int::try_from(size).unwrap_or(libc::c_int::MAX);
        // SAFETY: `value` lives across the call and its exact size is passed.
        let ret = unsafe {
            libc::setsockopt(
                self.as_raw_fd(),
                libc::SOL_SOCKET,
                option,
                &value as *const libc::c_int as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }
        Ok(())
    }
}

/// One `sendmsg(2)` to the kernel with every page as an iovec entry.
fn sendmsg_pages(fd: RawFd, pages: &[&[u8]]) -> io::Result<usize> {
    let mut iov: Vec<libc::iovec> = pages
        .iter()
        .map(|page| libc::iovec {
            iov_base: page.as_ptr() as *mut libc::c_void,
            iov_len: page.len(),
        })
        .collect();

    // SAFETY: an all-zero sockaddr_nl/msghdr is a valid starting value.
    let mut addr: libc::sockaddr_nl = unsafe { std::mem::zeroed() };
    addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;
    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_name = &mut addr as *mut libc::sockaddr_nl as *mut libc::c_void;
    msg.msg_namelen = std::mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t;
    msg.msg_iov = iov.as_mut_ptr();
    msg.msg_iovlen = iov.len() as _;

    // SAFETY: msg points at `addr` and `iov`, both alive for the call; the
    // iovecs point at the caller's borrowed pages and are only read.
    let ret = unsafe { libc::sendmsg(fd, &msg, 0) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(ret as usize)
}

impl Transport for NetlinkSocket {
    fn port_id(&self) -> u32 {
        self.pid
    }

    async fn send(&self, data: &[u8]) -> Result<()> {
        loop {
            let mut guard = self.fd.ready(Interest::WRITABLE).await?;

            match guard.try_io(|inner| inner.get_ref().send(data, 0)) {
                Ok(result) => {
                    result?;
                    return Ok(());
                }
                Err(_would_block) => continue,
            }
        }
    }

    async fn send_vectored(&self, pages: &[&[u8]]) -> Result<usize> {
        loop {
            let mut guard = self.fd.ready(Interest::WRITABLE).await?;

            match guard.try_io(|inner| sendmsg_pages(inner.as_raw_fd(), pages)) {
                Ok(result) => return Ok(result?),
                Err(_would_block) => continue,
            }
        }
    }

    async fn recv(&self, buf: &mut BytesMut) -> Result<usize> {
        buf.clear();

        loop {
            let mut guard = self.fd.ready(Interest::READABLE).await?;

            match guard.try_io(|inner| inner.get_ref().recv(buf, 0)) {
                Ok(result) => return Ok(result?),
                Err(_would_block) => continue,
            }
        }
    }

    fn try_recv(&self, buf: &mut BytesMut) -> Result<Option<usize>> {
        buf.clear();

        // The socket is non-blocking, so this is a zero-timeout poll.
        match self.fd.get_ref().recv(buf, 0) {
            Ok(n) => Ok(Some(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn add_membership(&mut self, group: u32) -> Result<()> {
        self.fd.get_mut().add_membership(group)?;
        Ok(())
    }

    fn force_send_buffer(&self, size: usize) -> Result<()> {
        self.set_buffer_option(libc::SO_SNDBUFFORCE, size)
    }

    fn force_recv_buffer(&self, size: usize) -> Result<()> {
        self.set_buffer_option(libc::SO_RCVBUFFORCE, size)
    }

    fn set_recv_buffer(&self, size: usize) -> Result<()> {
        self.set_buffer_option(libc::SO_RCVBUF, size)
    }

    fn recv_buffer(&self) -> Result<usize> {
        let mut value: libc::c_int = 0;
        let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
        // SAFETY: `value` and `len` are valid for writes for the whole call.
        let ret = unsafe {
            libc::getsockopt(
                self.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_RCVBUF,
                &mut value as *mut libc::c_int as *mut libc::c_void,
                &mut len,
            )
        };
        if ret < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }
        Ok(value.max(0) as usize)
    }
}

impl AsRawFd for NetlinkSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.get_ref().as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_sane() {
        let size = system_page_size();
        assert!(size >= 4096);
        assert!(size.is_power_of_two());
    }
}
