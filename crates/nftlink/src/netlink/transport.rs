//! The transport seam between a session and the kernel.
//!
//! [`NetlinkSocket`](super::NetlinkSocket) is the production implementation.
//! The `testing` feature provides an in-memory one.

use bytes::BytesMut;

use super::error::Result;

/// A connected netlink endpoint.
///
/// A transport is driven by exactly one logical flow at a time: a batch
/// committer and an event listener need separate transports.
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Local port ID assigned by the kernel.
    fn port_id(&self) -> u32;

    /// Send one contiguous buffer of messages.
    async fn send(&self, data: &[u8]) -> Result<()>;

    /// Send several buffers as a single datagram (scatter/gather).
    ///
    /// Returns the number of bytes the kernel accepted.
    async fn send_vectored(&self, pages: &[&[u8]]) -> Result<usize>;

    /// Wait until a datagram is available and receive it into `buf`,
    /// replacing its previous contents.
    async fn recv(&self, buf: &mut BytesMut) -> Result<usize>;

    /// Receive a datagram only if one is already queued.
    ///
    /// Returns `Ok(None)` instead of waiting when nothing is pending.
    fn try_recv(&self, buf: &mut BytesMut) -> Result<Option<usize>>;

    /// Join a multicast group.
    fn add_membership(&mut self, group: u32) -> Result<()>;

    /// Raise the send buffer to `size` bytes, bypassing the system limit
    /// (SO_SNDBUFFORCE, needs CAP_NET_ADMIN).
    fn force_send_buffer(&self, size: usize) -> Result<()>;

    /// Raise the receive buffer to `size` bytes, bypassing the system limit
    /// (SO_RCVBUFFORCE, needs CAP_NET_ADMIN).
    fn force_recv_buffer(&self, size: usize) -> Result<()>;

    /// Request a receive buffer of `size` bytes within the system limit
    /// (SO_RCVBUF). The kernel may grant less.
    fn set_recv_buffer(&self, size: usize) -> Result<()>;

    /// Receive buffer size currently granted by the kernel.
    fn recv_buffer(&self) -> Result<usize>;
}
