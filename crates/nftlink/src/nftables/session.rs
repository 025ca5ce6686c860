//! The nf_tables session: one transport plus the state that goes with it.
//!
//! A [`Session`] is a single logical flow. Every network operation takes
//! `&mut self`, so a batch committer and an event listener need two
//! sessions (and two sockets).
//!
//! # Example
//!
//! ```ignore
//! use nftlink::{Family, Session, Table};
//!
//! let mut session = Session::new()?;
//! session.add_table(&Table::new(Family::Inet, "filter"), 0).await?;
//!
//! session.refresh_generation().await?;
//! for table in session.dump_tables(Family::Unspec).await? {
//!     println!("{} {}", table.family, table.name);
//! }
//! ```

use bytes::BytesMut;

use crate::netlink::message::{
    MessageIter, NLM_F_ACK, NLM_F_CREATE, NLM_F_ECHO, NlMsgType, trace_messages,
};
use crate::netlink::{
    AckOnly, Control, Filter, Message, MessageHandler, NetlinkSocket, Result, Transport, dispatch,
};

use super::batch::nlmsg_max_size;
use super::frame::{build, build_header};
use super::objects::{Chain, NftObject, Set, Table};
use super::seq::SequenceAllocator;
use super::types::NftMsg;

/// Default event receive buffer: 16 MiB.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 1 << 24;

/// Session settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// First sequence number; `None` seeds from the clock.
    pub seq_seed: Option<u32>,
    /// Trace every sent and received message header at debug level.
    pub debug_netlink: bool,
    /// Receive buffer the event listener asks the kernel for.
    pub event_buffer_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            seq_seed: None,
            debug_netlink: false,
            event_buffer_size: DEFAULT_EVENT_BUFFER_SIZE,
        }
    }
}

impl SessionConfig {
    /// Default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start sequence numbers at `seed`.
    pub fn seq_seed(mut self, seed: u32) -> Self {
        self.seq_seed = Some(seed);
        self
    }

    /// Enable message tracing.
    pub fn debug_netlink(mut self, enabled: bool) -> Self {
        self.debug_netlink = enabled;
        self
    }

    /// Set the event receive buffer size.
    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = size;
        self
    }
}

/// Send buffer size last applied to the socket.
///
/// The buffer only ever grows; asking for a size at or below the applied
/// one is a no-op.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendBuffer {
    applied: usize,
}

impl SendBuffer {
    /// Size last applied, 0 if never.
    pub fn applied(&self) -> usize {
        self.applied
    }

    /// Check whether `required` bytes exceed what was applied.
    pub fn needs(&self, required: usize) -> bool {
        required > self.applied
    }

    fn record(&mut self, size: usize) {
        self.applied = size;
    }
}

/// An nf_tables netlink session.
pub struct Session<T: Transport = NetlinkSocket> {
    pub(crate) transport: T,
    pub(crate) seq: SequenceAllocator,
    pub(crate) send_buffer: SendBuffer,
    pub(crate) generation: u16,
    pub(crate) config: SessionConfig,
    pub(crate) recv_buf: BytesMut,
}

impl Session<NetlinkSocket> {
    /// Open a `NETLINK_NETFILTER` socket with default settings.
    pub fn new() -> Result<Self> {
        Self::with_config(NetlinkSocket::new()?, SessionConfig::default())
    }
}

impl<T: Transport> Session<T> {
    /// Wrap an existing transport.
    pub fn with_config(transport: T, config: SessionConfig) -> Result<Self> {
        let seq = match config.seq_seed {
            Some(seed) => SequenceAllocator::new(seed),
            None => SequenceAllocator::from_time(),
        };
        Ok(Self {
            transport,
            seq,
            send_buffer: SendBuffer::default(),
            generation: 0,
            config,
            recv_buf: BytesMut::with_capacity(nlmsg_max_size()),
        })
    }

    /// Wrap an existing transport with default settings.
    pub fn from_transport(transport: T) -> Result<Self> {
        Self::with_config(transport, SessionConfig::default())
    }

    /// Allocate the next sequence number.
    pub fn next_seq(&mut self) -> u32 {
        self.seq.allocate()
    }

    /// Local netlink port.
    pub fn port_id(&self) -> u32 {
        self.transport.port_id()
    }

    /// Ruleset generation dumps are checked against (0: no check).
    pub fn generation(&self) -> u16 {
        self.generation
    }

    /// Send buffer sizing state.
    pub fn send_buffer(&self) -> SendBuffer {
        self.send_buffer
    }

    /// Session settings.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The underlying transport, mutably.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Make sure the socket can queue `required` bytes in one send.
    ///
    /// Issues `SO_SNDBUFFORCE` only when `required` exceeds the size applied
    /// last. A failure is logged and otherwise ignored: the send is attempted
    /// anyway and reports its own error.
    pub fn grow_send_buffer(&mut self, required: usize) {
        if !self.send_buffer.needs(required) {
            return;
        }
        match self.transport.force_send_buffer(required) {
            Ok(()) => {
                tracing::debug!(size = required, "raised netlink send buffer");
                self.send_buffer.record(required);
            }
            Err(e) => tracing::debug!(size = required, error = %e, "cannot raise netlink send buffer"),
        }
    }

    pub(crate) fn trace(&self, direction: &str, data: &[u8]) {
        if self.config.debug_netlink {
            trace_messages(direction, data);
        }
    }

    /// Send one request and feed every reply to `handler` until the
    /// exchange completes (DONE, ACK, error or the handler stops).
    pub async fn talk<H>(&mut self, request: &[u8], seq: u32, handler: &mut H) -> Result<()>
    where
        H: MessageHandler + ?Sized,
    {
        self.trace("send", request);
        self.transport.send(request).await?;

        let filter = Filter::new(seq, self.transport.port_id());
        loop {
            self.recv_buf.clear();
            self.recv_buf.reserve(nlmsg_max_size());
            let n = self.transport.recv(&mut self.recv_buf).await?;
            if n == 0 {
                return Ok(());
            }
            self.trace("recv", &self.recv_buf[..n]);
            match dispatch(&self.recv_buf[..n], filter, handler) {
                Ok(Control::Stop) => return Ok(()),
                Ok(Control::Continue) => {}
                Err(e) => {
                    if !ends_exchange(&self.recv_buf[..n], seq) {
                        self.discard_exchange(seq);
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Drop what is still queued for the aborted exchange `seq`, up to
    /// and including its terminating `NLMSG_DONE` or `NLMSG_ERROR`.
    ///
    /// Leaves the socket ready for the next request on this session.
    fn discard_exchange(&mut self, seq: u32) {
        let mut dropped = 0usize;
        loop {
            self.recv_buf.clear();
            self.recv_buf.reserve(nlmsg_max_size());
            match self.transport.try_recv(&mut self.recv_buf) {
                Ok(Some(n)) if n > 0 => {
                    dropped += 1;
                    if ends_exchange(&self.recv_buf[..n], seq) {
                        break;
                    }
                }
                Ok(_) => break,
                Err(e) => {
                    tracing::debug!(seq, error = %e, "stopped discarding aborted exchange");
                    break;
                }
            }
        }
        if dropped > 0 {
            tracing::debug!(seq, datagrams = dropped, "discarded rest of aborted exchange");
        }
    }

    async fn request_ack<O: NftObject>(
        &mut self,
        cmd: NftMsg,
        flags: u16,
        obj: &O,
        operation: &str,
    ) -> Result<()> {
        let seq = self.next_seq();
        let request = build(cmd, NLM_F_ACK | flags, seq, obj)?;
        self.talk(&request, seq, &mut AckOnly)
            .await
            .map_err(|e| e.with_context(operation))
    }

    // ========================================================================
    // Direct requests
    // ========================================================================

    /// Create a table outside of a batch.
    pub async fn add_table(&mut self, table: &Table, flags: u16) -> Result<()> {
        self.request_ack(NftMsg::NewTable, flags, table, "add table")
            .await
    }

    /// Delete a table outside of a batch.
    pub async fn delete_table(&mut self, table: &Table) -> Result<()> {
        self.request_ack(NftMsg::DelTable, 0, table, "delete table")
            .await
    }

    /// Create a chain outside of a batch.
    pub async fn add_chain(&mut self, chain: &Chain, flags: u16) -> Result<()> {
        self.request_ack(NftMsg::NewChain, NLM_F_CREATE | flags, chain, "add chain")
            .await
    }

    /// Delete a chain outside of a batch.
    pub async fn delete_chain(&mut self, chain: &Chain) -> Result<()> {
        self.request_ack(NftMsg::DelChain, 0, chain, "delete chain")
            .await
    }

    /// Create a set outside of a batch.
    ///
    /// The kernel echoes the new set back; the handle it assigned is
    /// stored in `set`.
    pub async fn add_set(&mut self, set: &mut Set, flags: u16) -> Result<()> {
        let seq = self.next_seq();
        let request = build(
            NftMsg::NewSet,
            NLM_F_CREATE | NLM_F_ACK | NLM_F_ECHO | flags,
            seq,
            &*set,
        )?;

        let mut echo = |msg: &Message<'_>| -> Result<Control> {
            if msg.kind() == NftMsg::NewSet as u8 {
                let created = Set::parse(msg)?;
                set.handle = created.handle.or(set.handle);
                set.id = created.id.or(set.id);
            }
            Ok(Control::Continue)
        };
        self.talk(&request, seq, &mut echo)
            .await
            .map_err(|e| e.with_context("add set"))
    }

    /// Delete a set outside of a batch.
    pub async fn delete_set(&mut self, set: &Set, flags: u16) -> Result<()> {
        self.request_ack(NftMsg::DelSet, flags, set, "delete set")
            .await
    }

    /// Add `set.elements`, one acknowledged request per chunk.
    ///
    /// Stops at the first rejected chunk; earlier chunks stay applied.
    pub async fn add_set_elements(&mut self, set: &Set, flags: u16) -> Result<()> {
        self.set_elements(NftMsg::NewSetElem, set, NLM_F_CREATE | flags, "add elements")
            .await
    }

    /// Delete `set.elements`, one acknowledged request per chunk.
    pub async fn delete_set_elements(&mut self, set: &Set) -> Result<()> {
        self.set_elements(NftMsg::DelSetElem, set, 0, "delete elements")
            .await
    }

    async fn set_elements(
        &mut self,
        cmd: NftMsg,
        set: &Set,
        flags: u16,
        operation: &str,
    ) -> Result<()> {
        let mut rest = set.elements.as_slice();
        while !rest.is_empty() {
            let seq = self.next_seq();
            let mut msg = build_header(cmd, set.family, NLM_F_ACK | flags, seq);
            let written = set.write_element_chunk(&mut msg, rest)?;
            self.talk(&msg.finish(), seq, &mut AckOnly)
                .await
                .map_err(|e| e.with_context(operation))?;
            rest = &rest[written..];
        }
        Ok(())
    }
}

/// Whether `data` carries the `NLMSG_DONE` or `NLMSG_ERROR` closing `seq`.
fn ends_exchange(data: &[u8], seq: u32) -> bool {
    MessageIter::new(data).filter_map(|r| r.ok()).any(|(header, _)| {
        header.nlmsg_seq == seq
            && matches!(header.nlmsg_type, NlMsgType::DONE | NlMsgType::ERROR)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::Error;
    use crate::nftables::objects::SetElement;
    use crate::nftables::types::Family;
    use crate::testing::{FakeKernel, MockTransport};

    fn session(transport: MockTransport) -> Session<MockTransport> {
        Session::with_config(transport, SessionConfig::new().seq_seed(1)).unwrap()
    }

    #[test]
    fn send_buffer_grows_once_per_size() {
        let mut s = session(MockTransport::new());
        s.grow_send_buffer(4096);
        s.grow_send_buffer(4096);
        s.grow_send_buffer(1024);
        assert_eq!(s.transport().force_send_calls(), vec![4096]);
        s.grow_send_buffer(8192);
        assert_eq!(s.transport().force_send_calls(), vec![4096, 8192]);
        assert_eq!(s.send_buffer().applied(), 8192);
    }

    #[test]
    fn failed_grow_is_retried_next_time() {
        let transport = MockTransport::new();
        transport.fail_force_send(libc::EPERM);
        let mut s = session(transport);
        s.grow_send_buffer(4096);
        assert_eq!(s.send_buffer().applied(), 0);
        s.grow_send_buffer(4096);
        assert_eq!(s.transport().force_send_calls().len(), 2);
    }

    #[tokio::test]
    async fn direct_table_requests() {
        let kernel = FakeKernel::new().shared();
        let mut s = session(MockTransport::with_kernel(kernel.clone()));

        let table = Table::new(Family::Inet, "t1");
        s.add_table(&table, 0).await.unwrap();
        assert_eq!(kernel.lock().unwrap().tables().len(), 1);

        s.delete_table(&table).await.unwrap();
        let err = s.delete_table(&table).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(matches!(err, Error::KernelWithContext { .. }));
    }

    #[tokio::test]
    async fn add_set_learns_handle() {
        let kernel = FakeKernel::new().shared();
        let mut s = session(MockTransport::with_kernel(kernel.clone()));
        s.add_table(&Table::new(Family::Ip, "t"), 0).await.unwrap();

        let mut set = Set::new(Family::Ip, "t", "s").with_key(7, 4);
        s.add_set(&mut set, 0).await.unwrap();
        assert!(set.handle.is_some());
    }

    #[tokio::test]
    async fn elements_go_out_in_chunks() {
        let kernel = FakeKernel::new().shared();
        let transport = MockTransport::with_kernel(kernel.clone());
        let mut s = session(transport);
        s.add_table(&Table::new(Family::Ip, "t"), 0).await.unwrap();
        let mut set = Set::new(Family::Ip, "t", "s").with_key(7, 4);
        s.add_set(&mut set, 0).await.unwrap();

        set.elements = (0..3000u32)
            .map(|i| SetElement::new(i.to_be_bytes()))
            .collect();
        let before = s.transport().sent().len();
        s.add_set_elements(&set, 0).await.unwrap();
        assert!(s.transport().sent().len() - before > 1);
        assert_eq!(kernel.lock().unwrap().elements("t", "s").len(), 3000);
    }
}
