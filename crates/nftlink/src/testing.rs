//! In-memory transport and nf_tables kernel for tests.
//!
//! [`MockTransport`] replays scripted datagrams and records everything sent.
//! Attached to a [`FakeKernel`] it answers requests the way nf_tables does:
//! batches are applied atomically with per-message error acks, dumps are
//! paginated and carry the ruleset generation, direct requests are acked.
//!
//! ```ignore
//! use nftlink::testing::{FakeKernel, MockTransport};
//! use nftlink::{Family, Session, Table};
//!
//! let kernel = FakeKernel::new().shared();
//! let mut session = Session::from_transport(MockTransport::with_kernel(kernel.clone()))?;
//! session.add_table(&Table::new(Family::Inet, "t"), 0).await?;
//! assert_eq!(kernel.lock().unwrap().tables().len(), 1);
//! ```

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::BytesMut;

use crate::netlink::attr::get;
use crate::netlink::message::{
    NLM_F_ACK, NLM_F_DUMP, NLM_F_ECHO, NLM_F_EXCL, NLM_F_REPLACE, MessageIter, NlMsgHdr,
};
use crate::netlink::{Error, Message, MessageBuilder, Result, Transport};
use crate::nftables::objects::{
    Chain, NftObject, Object, Rule, Set, SetElement, SetElementList, Table, split_payload,
};
use crate::nftables::types::{
    Family, NFNL_MSG_BATCH_BEGIN, NFNL_MSG_BATCH_END, NFNL_SUBSYS_NFTABLES, NftMsg, gen_attr,
    obj_attr, rule_attr, set_attr, set_elem_attr,
};

/// A fake kernel shared between a test and its transports.
pub type SharedKernel = Arc<Mutex<FakeKernel>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn os_error(errno: i32) -> Error {
    Error::Io(io::Error::from_raw_os_error(errno))
}

/// Builders for kernel replies.
pub mod reply {
    use super::*;
    use crate::netlink::message::{NLM_F_MULTI, NlMsgError, NlMsgType};
    use crate::netlink::parse::NfGenMsg;

    /// `NLMSG_ERROR` carrying `errno` (0 for an ACK).
    pub fn error(seq: u32, port: u32, errno: i32) -> Vec<u8> {
        let mut original = NlMsgHdr::new(0, 0);
        original.nlmsg_seq = seq;
        original.nlmsg_pid = port;

        let mut msg = MessageBuilder::new(NlMsgType::ERROR, 0);
        msg.set_seq(seq);
        msg.set_pid(port);
        msg.append(&NlMsgError {
            error: -errno,
            msg: original,
        });
        msg.finish()
    }

    /// Positive acknowledgement.
    pub fn ack(seq: u32, port: u32) -> Vec<u8> {
        error(seq, port, 0)
    }

    /// End of a dump.
    pub fn done(seq: u32, port: u32) -> Vec<u8> {
        let mut msg = MessageBuilder::new(NlMsgType::DONE, NLM_F_MULTI);
        msg.set_seq(seq);
        msg.set_pid(port);
        msg.append_bytes(&0i32.to_ne_bytes());
        msg.finish()
    }

    /// Message header plus `nfgenmsg` reporting `generation`.
    pub fn header(
        cmd: NftMsg,
        flags: u16,
        seq: u32,
        port: u32,
        family: Family,
        generation: u16,
    ) -> MessageBuilder {
        let mut msg = MessageBuilder::new(cmd.msg_type(), flags);
        msg.set_seq(seq);
        msg.set_pid(port);
        let nfgen = NfGenMsg {
            family: family.number(),
            version: 0,
            res_id: generation,
        };
        msg.append_bytes(&nfgen.to_bytes());
        msg
    }

    /// An object message as found in dumps, echoes and notifications.
    pub fn object<O: NftObject>(
        cmd: NftMsg,
        flags: u16,
        seq: u32,
        port: u32,
        generation: u16,
        obj: &O,
    ) -> Result<Vec<u8>> {
        let mut msg = header(cmd, flags, seq, port, obj.family(), generation);
        obj.write_payload(&mut msg)?;
        Ok(msg.finish())
    }

    /// A multicast change notification.
    pub fn notification<O: NftObject>(cmd: NftMsg, obj: &O) -> Result<Vec<u8>> {
        object(cmd, 0, 0, 0, 0, obj)
    }

    /// The `NEWGEN` notification closing a committed transaction.
    pub fn new_generation(generation: u32, pid: u32, process: &str) -> Vec<u8> {
        let mut msg = header(NftMsg::NewGen, 0, 0, 0, Family::Unspec, generation as u16);
        msg.append_attr_u32_be(gen_attr::ID, generation);
        msg.append_attr_u32_be(gen_attr::PROC_PID, pid);
        msg.append_attr_str(gen_attr::PROC_NAME, process);
        msg.finish()
    }
}

// ============================================================================
// MockTransport
// ============================================================================

#[derive(Debug)]
enum Incoming {
    Datagram(Vec<u8>),
    Error(i32),
}

#[derive(Debug)]
struct MockState {
    queue: VecDeque<Incoming>,
    sent: Vec<Vec<u8>>,
    send_errno: Option<i32>,
    short_send: Option<usize>,
    force_send_calls: Vec<usize>,
    force_send_errno: Option<i32>,
    force_recv_errno: Option<i32>,
    recv_buffer: usize,
    recv_limit: usize,
    memberships: Vec<u32>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            sent: Vec::new(),
            send_errno: None,
            short_send: None,
            force_send_calls: Vec::new(),
            force_send_errno: None,
            force_recv_errno: None,
            recv_buffer: DEFAULT_RMEM,
            recv_limit: DEFAULT_RMEM,
            memberships: Vec::new(),
        }
    }
}

/// `net.core.rmem_default` on a stock system.
const DEFAULT_RMEM: usize = 212_992;

/// Port id the mock reports unless told otherwise.
pub const MOCK_PORT_ID: u32 = 4242;

/// Scripted in-memory transport.
///
/// Datagrams are served in the order they were queued, either scripted
/// with [`push_datagram`](Self::push_datagram) or produced by an attached
/// [`FakeKernel`]. A blocking receive on an empty queue fails with
/// `UnexpectedEof` instead of hanging the test.
#[derive(Debug)]
pub struct MockTransport {
    port_id: u32,
    state: Mutex<MockState>,
    kernel: Option<SharedKernel>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// A transport with nothing queued and no kernel behind it.
    pub fn new() -> Self {
        Self {
            port_id: MOCK_PORT_ID,
            state: Mutex::new(MockState::default()),
            kernel: None,
        }
    }

    /// A transport whose sends are answered by `kernel`.
    pub fn with_kernel(kernel: SharedKernel) -> Self {
        Self {
            kernel: Some(kernel),
            ..Self::new()
        }
    }

    /// Report `port_id` as the local port.
    pub fn with_port_id(mut self, port_id: u32) -> Self {
        self.port_id = port_id;
        self
    }

    /// Queue a datagram for receipt.
    pub fn push_datagram(&self, data: impl Into<Vec<u8>>) {
        lock(&self.state)
            .queue
            .push_back(Incoming::Datagram(data.into()));
    }

    /// Queue a receive failure with `errno`.
    pub fn push_error(&self, errno: i32) {
        lock(&self.state).queue.push_back(Incoming::Error(errno));
    }

    /// Make every send fail with `errno`.
    pub fn fail_send(&self, errno: i32) {
        lock(&self.state).send_errno = Some(errno);
    }

    /// Make vectored sends accept only `bytes`.
    pub fn short_send(&self, bytes: usize) {
        lock(&self.state).short_send = Some(bytes);
    }

    /// Make `SO_SNDBUFFORCE` fail with `errno`.
    pub fn fail_force_send(&self, errno: i32) {
        lock(&self.state).force_send_errno = Some(errno);
    }

    /// Make `SO_RCVBUFFORCE` fail with `errno`.
    pub fn fail_force_recv(&self, errno: i32) {
        lock(&self.state).force_recv_errno = Some(errno);
    }

    /// Cap what `SO_RCVBUF` grants.
    pub fn recv_limit(&self, limit: usize) {
        lock(&self.state).recv_limit = limit;
    }

    /// Every datagram sent so far; a vectored send is one entry.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        lock(&self.state).sent.clone()
    }

    /// Sizes passed to `force_send_buffer`, including failed attempts.
    pub fn force_send_calls(&self) -> Vec<usize> {
        lock(&self.state).force_send_calls.clone()
    }

    /// Multicast groups joined.
    pub fn memberships(&self) -> Vec<u32> {
        lock(&self.state).memberships.clone()
    }

    /// Datagrams (and errors) still queued.
    pub fn pending(&self) -> usize {
        lock(&self.state).queue.len()
    }

    fn deliver(&self, data: &[u8]) {
        let replies = match &self.kernel {
            Some(kernel) => lock(kernel).process(data, self.port_id),
            None => Vec::new(),
        };
        let mut state = lock(&self.state);
        state
            .queue
            .extend(replies.into_iter().map(Incoming::Datagram));
    }

    fn pop(&self, buf: &mut BytesMut) -> Option<Result<usize>> {
        let next = lock(&self.state).queue.pop_front()?;
        buf.clear();
        Some(match next {
            Incoming::Datagram(data) => {
                buf.extend_from_slice(&data);
                Ok(data.len())
            }
            Incoming::Error(errno) => Err(os_error(errno)),
        })
    }
}

impl Transport for MockTransport {
    fn port_id(&self) -> u32 {
        self.port_id
    }

    async fn send(&self, data: &[u8]) -> Result<()> {
        {
            let mut state = lock(&self.state);
            if let Some(errno) = state.send_errno {
                return Err(os_error(errno));
            }
            state.sent.push(data.to_vec());
        }
        self.deliver(data);
        Ok(())
    }

    async fn send_vectored(&self, pages: &[&[u8]]) -> Result<usize> {
        let data = pages.concat();
        {
            let mut state = lock(&self.state);
            if let Some(errno) = state.send_errno {
                return Err(os_error(errno));
            }
            state.sent.push(data.clone());
            if let Some(bytes) = state.short_send {
                return Ok(bytes.min(data.len()));
            }
        }
        self.deliver(&data);
        Ok(data.len())
    }

    async fn recv(&self, buf: &mut BytesMut) -> Result<usize> {
        self.pop(buf).unwrap_or_else(|| {
            Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "no datagram queued",
            )))
        })
    }

    fn try_recv(&self, buf: &mut BytesMut) -> Result<Option<usize>> {
        self.pop(buf).transpose()
    }

    fn add_membership(&mut self, group: u32) -> Result<()> {
        lock(&self.state).memberships.push(group);
        Ok(())
    }

    fn force_send_buffer(&self, size: usize) -> Result<()> {
        let mut state = lock(&self.state);
        state.force_send_calls.push(size);
        match state.force_send_errno {
            Some(errno) => Err(os_error(errno)),
            None => Ok(()),
        }
    }

    fn force_recv_buffer(&self, size: usize) -> Result<()> {
        let mut state = lock(&self.state);
        if let Some(errno) = state.force_recv_errno {
            return Err(os_error(errno));
        }
        state.recv_buffer = size;
        Ok(())
    }

    fn set_recv_buffer(&self, size: usize) -> Result<()> {
        let mut state = lock(&self.state);
        state.recv_buffer = size.min(state.recv_limit);
        Ok(())
    }

    fn recv_buffer(&self) -> Result<usize> {
        Ok(lock(&self.state).recv_buffer)
    }
}

// ============================================================================
// FakeKernel
// ============================================================================

#[derive(Debug, Clone, Default)]
struct State {
    tables: Vec<Table>,
    chains: Vec<Chain>,
    rules: Vec<Rule>,
    sets: Vec<Set>,
    objects: Vec<Object>,
}

/// An incoming message, copied out of the request buffer.
struct Request {
    header: NlMsgHdr,
    payload: Vec<u8>,
}

impl Request {
    fn message(&self) -> Message<'_> {
        Message {
            header: &self.header,
            payload: &self.payload,
        }
    }

    fn cmd(&self) -> Option<NftMsg> {
        if (self.header.nlmsg_type >> 8) as u8 != NFNL_SUBSYS_NFTABLES {
            return None;
        }
        NftMsg::from_u8(self.header.nlmsg_type as u8)
    }

    fn has(&self, flag: u16) -> bool {
        self.header.nlmsg_flags & flag != 0
    }

    fn family(&self) -> u8 {
        self.payload.first().copied().unwrap_or_default()
    }

    /// String attributes of a dump selector.
    fn selector(&self, table_attr: u16, name_attr: u16) -> (Option<String>, Option<String>) {
        let mut table = None;
        let mut name = None;
        if let Ok((_, attrs)) = split_payload(&self.message()) {
            for (kind, data) in attrs {
                let value = get::string(data).ok().map(str::to_string);
                if kind == table_attr {
                    table = value;
                } else if kind == name_attr {
                    name = value;
                }
            }
        }
        (table, name)
    }

    fn attr_u32(&self, attr: u16) -> Option<u32> {
        let (_, mut attrs) = split_payload(&self.message()).ok()?;
        attrs
            .find(|(kind, _)| *kind == attr)
            .and_then(|(_, data)| get::u32_be(data).ok())
    }
}

fn family_matches(requested: u8, family: Family) -> bool {
    requested == 0 || requested == family.number()
}

/// In-memory nf_tables.
///
/// Keeps tables, chains, rules, sets (with elements) and objects and a
/// ruleset generation that advances with every committed change.
#[derive(Debug)]
pub struct FakeKernel {
    state: State,
    generation: u32,
    next_handle: u64,
    rejects: HashMap<u32, i32>,
    dump_page_size: usize,
    bump_after_pages: Option<usize>,
    reports_generation: bool,
    batches: usize,
}

impl Default for FakeKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeKernel {
    /// An empty ruleset at generation 1.
    pub fn new() -> Self {
        Self {
            state: State::default(),
            generation: 1,
            next_handle: 1,
            rejects: HashMap::new(),
            dump_page_size: 16,
            bump_after_pages: None,
            reports_generation: true,
            batches: 0,
        }
    }

    /// Wrap for sharing with transports.
    pub fn shared(self) -> SharedKernel {
        Arc::new(Mutex::new(self))
    }

    /// Reject the request with sequence number `seq` with `errno`.
    pub fn reject_seq(&mut self, seq: u32, errno: i32) {
        self.rejects.insert(seq, errno);
    }

    /// Objects per dump datagram.
    pub fn with_dump_page_size(mut self, objects: usize) -> Self {
        self.dump_page_size = objects.max(1);
        self
    }

    /// Advance the generation once, after `pages` datagrams of the next
    /// dump went out, as if another process committed meanwhile.
    pub fn bump_generation_after(&mut self, pages: usize) {
        self.bump_after_pages = Some(pages);
    }

    /// Answer generation requests with an error, like kernels predating
    /// them.
    pub fn without_generation(mut self) -> Self {
        self.reports_generation = false;
        self
    }

    /// Start from a populated ruleset.
    pub fn with_table(mut self, table: Table) -> Self {
        let mut state = std::mem::take(&mut self.state);
        let _ = self.new_table(&mut state, table, 0);
        self.state = state;
        self
    }

    /// Start from a populated ruleset. The table must exist.
    pub fn with_chain(mut self, chain: Chain) -> Self {
        let mut state = std::mem::take(&mut self.state);
        let _ = self.new_chain(&mut state, chain, 0);
        self.state = state;
        self
    }

    /// Start from a populated ruleset. The chain must exist.
    pub fn with_rule(mut self, rule: Rule) -> Self {
        let mut state = std::mem::take(&mut self.state);
        let _ = self.new_rule(&mut state, rule, 0);
        self.state = state;
        self
    }

    /// Start from a populated ruleset, elements included. The table must
    /// exist.
    pub fn with_set(mut self, set: Set) -> Self {
        let mut state = std::mem::take(&mut self.state);
        let elements = set.elements.clone();
        if let Ok(created) = self.new_set(&mut state, set, 0) {
            if let Some(stored) = state.sets.iter_mut().find(|s| s.handle == created.handle) {
                stored.elements = elements;
            }
        }
        self.state = state;
        self
    }

    /// Start from a populated ruleset. The table must exist.
    pub fn with_object(mut self, obj: Object) -> Self {
        let mut state = std::mem::take(&mut self.state);
        let _ = self.new_object(&mut state, obj, 0);
        self.state = state;
        self
    }

    /// Current ruleset generation.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Batches received, committed or not.
    pub fn batches(&self) -> usize {
        self.batches
    }

    pub fn tables(&self) -> &[Table] {
        &self.state.tables
    }

    pub fn chains(&self) -> &[Chain] {
        &self.state.chains
    }

    pub fn rules(&self) -> &[Rule] {
        &self.state.rules
    }

    pub fn sets(&self) -> &[Set] {
        &self.state.sets
    }

    pub fn objects(&self) -> &[Object] {
        &self.state.objects
    }

    /// Elements of `table`/`set`, empty if there is no such set.
    pub fn elements(&self, table: &str, set: &str) -> &[SetElement] {
        self.state
            .sets
            .iter()
            .find(|s| s.table == table && s.name == set)
            .map(|s| s.elements.as_slice())
            .unwrap_or(&[])
    }

    /// Handle one datagram sent by `port`. Returns the datagrams the kernel
    /// would queue in response.
    pub fn process(&mut self, data: &[u8], port: u32) -> Vec<Vec<u8>> {
        let mut requests = Vec::new();
        for result in MessageIter::new(data) {
            match result {
                Ok((header, payload)) => requests.push(Request {
                    header: *header,
                    payload: payload.to_vec(),
                }),
                Err(_) => break,
            }
        }

        let mut replies = Vec::new();
        let mut i = 0;
        while i < requests.len() {
            if requests[i].header.nlmsg_type == NFNL_MSG_BATCH_BEGIN {
                let end = requests[i + 1..]
                    .iter()
                    .position(|r| r.header.nlmsg_type == NFNL_MSG_BATCH_END)
                    .map(|p| i + 1 + p)
                    .unwrap_or(requests.len());
                replies.extend(self.batch(&requests[i + 1..end], port));
                i = end + 1;
            } else {
                replies.extend(self.request(&requests[i], port));
                i += 1;
            }
        }
        replies
    }

    /// Apply a transaction: all or nothing, one error ack per rejected
    /// message, ACKs only where asked for.
    fn batch(&mut self, requests: &[Request], port: u32) -> Vec<Vec<u8>> {
        self.batches += 1;
        let mut scratch = self.state.clone();
        let mut replies = Vec::new();
        let mut failed = false;

        for req in requests {
            let seq = req.header.nlmsg_seq;
            let result = match self.rejects.get(&seq) {
                Some(&errno) => Err(errno),
                None => self.apply(&mut scratch, req),
            };
            match result {
                Err(errno) => {
                    failed = true;
                    replies.push(reply::error(seq, port, errno));
                }
                Ok(_) if req.has(NLM_F_ACK) => replies.push(reply::ack(seq, port)),
                Ok(_) => {}
            }
        }

        if !failed && !requests.is_empty() {
            self.state = scratch;
            self.generation += 1;
        }
        replies
    }

    /// Answer a request sent outside of a batch.
    fn request(&mut self, req: &Request, port: u32) -> Vec<Vec<u8>> {
        let seq = req.header.nlmsg_seq;
        if let Some(&errno) = self.rejects.get(&seq) {
            return vec![reply::error(seq, port, errno)];
        }
        let Some(cmd) = req.cmd() else {
            return vec![reply::error(seq, port, libc::EOPNOTSUPP)];
        };

        match cmd {
            NftMsg::GetGen => self.get_gen(seq, port),
            NftMsg::GetTable if req.has(NLM_F_DUMP) => {
                let tables = self.filtered(req, |s| &s.tables, |t| t.family);
                self.dump(NftMsg::NewTable, seq, port, &tables)
            }
            NftMsg::GetChain if req.has(NLM_F_DUMP) => {
                let chains = self.filtered(req, |s| &s.chains, |c| c.family);
                self.dump(NftMsg::NewChain, seq, port, &chains)
            }
            NftMsg::GetRule if req.has(NLM_F_DUMP) => {
                let (table, chain) = req.selector(rule_attr::TABLE, rule_attr::CHAIN);
                let mut rules = self.filtered(req, |s| &s.rules, |r| r.family);
                rules.retain(|r| {
                    table.as_ref().is_none_or(|t| *t == r.table)
                        && chain.as_ref().is_none_or(|c| *c == r.chain)
                });
                self.dump(NftMsg::NewRule, seq, port, &rules)
            }
            NftMsg::GetSet if req.has(NLM_F_DUMP) => {
                let (table, _) = req.selector(set_attr::TABLE, set_attr::NAME);
                let mut sets = self.filtered(req, |s| &s.sets, |s| s.family);
                sets.retain(|s| table.as_ref().is_none_or(|t| *t == s.table));
                self.dump(NftMsg::NewSet, seq, port, &sets)
            }
            NftMsg::GetSetElem => self.get_elements(req, port),
            NftMsg::GetObj | NftMsg::GetObjReset => self.get_objects(req, port),
            NftMsg::GetTable | NftMsg::GetChain | NftMsg::GetRule | NftMsg::GetSet => {
                vec![reply::error(seq, port, libc::EOPNOTSUPP)]
            }
            _ => self.direct(req, port),
        }
    }

    /// A configuration change outside of a batch: applied and committed on
    /// its own.
    fn direct(&mut self, req: &Request, port: u32) -> Vec<Vec<u8>> {
        let seq = req.header.nlmsg_seq;
        let mut state = std::mem::take(&mut self.state);
        let result = self.apply(&mut state, req);
        self.state = state;

        match result {
            Err(errno) => vec![reply::error(seq, port, errno)],
            Ok(created) => {
                self.generation += 1;
                let mut replies = Vec::new();
                if let Some(set) = created.filter(|_| req.has(NLM_F_ECHO)) {
                    if let Ok(echo) =
                        reply::object(NftMsg::NewSet, 0, seq, port, self.generation as u16, &set)
                    {
                        replies.push(echo);
                    }
                }
                if req.has(NLM_F_ACK) {
                    replies.push(reply::ack(seq, port));
                }
                replies
            }
        }
    }

    fn get_gen(&self, seq: u32, port: u32) -> Vec<Vec<u8>> {
        if !self.reports_generation {
            return vec![reply::error(seq, port, libc::EOPNOTSUPP)];
        }
        let mut msg = reply::header(
            NftMsg::NewGen,
            0,
            seq,
            port,
            Family::Unspec,
            self.generation as u16,
        );
        msg.append_attr_u32_be(gen_attr::ID, self.generation);
        vec![msg.finish()]
    }

    fn filtered<T: Clone>(
        &self,
        req: &Request,
        list: impl Fn(&State) -> &Vec<T>,
        family: impl Fn(&T) -> Family,
    ) -> Vec<T> {
        let requested = req.family();
        list(&self.state)
            .iter()
            .filter(|item| family_matches(requested, family(item)))
            .cloned()
            .collect()
    }

    fn dump<O: NftObject>(&mut self, cmd: NftMsg, seq: u32, port: u32, objects: &[O]) -> Vec<Vec<u8>> {
        self.paginate(seq, port, objects, |obj, generation| {
            reply::object(
                cmd,
                crate::netlink::message::NLM_F_MULTI,
                seq,
                port,
                generation,
                obj,
            )
            .ok()
        })
    }

    /// Split a dump into datagrams of `dump_page_size` messages, ending
    /// with `NLMSG_DONE`.
    fn paginate<T>(
        &mut self,
        seq: u32,
        port: u32,
        items: &[T],
        mut encode: impl FnMut(&T, u16) -> Option<Vec<u8>>,
    ) -> Vec<Vec<u8>> {
        let mut datagrams = Vec::new();
        let mut page = Vec::new();
        let mut in_page = 0;
        for item in items {
            let Some(msg) = encode(item, self.generation as u16) else {
                continue;
            };
            page.extend(msg);
            in_page += 1;
            if in_page == self.dump_page_size {
                datagrams.push(std::mem::take(&mut page));
                in_page = 0;
                if self.bump_after_pages == Some(datagrams.len()) {
                    self.bump_after_pages = None;
                    self.generation += 1;
                }
            }
        }
        page.extend(reply::done(seq, port));
        datagrams.push(page);
        datagrams
    }

    fn get_elements(&mut self, req: &Request, port: u32) -> Vec<Vec<u8>> {
        let seq = req.header.nlmsg_seq;
        let (table, name) = req.selector(set_elem_attr::LIST_TABLE, set_elem_attr::LIST_SET);
        let requested = req.family();
        let Some(set) = self
            .state
            .sets
            .iter()
            .find(|s| {
                family_matches(requested, s.family)
                    && Some(&s.table) == table.as_ref()
                    && Some(&s.name) == name.as_ref()
            })
            .cloned()
        else {
            return vec![reply::error(seq, port, libc::ENOENT)];
        };

        // Split the elements the way a sender would.
        let mut chunks = Vec::new();
        let mut rest = set.elements.as_slice();
        while !rest.is_empty() {
            let mut scratch = MessageBuilder::new(0, 0);
            match set.write_element_chunk(&mut scratch, rest) {
                Ok(n) if n > 0 => {
                    chunks.push(rest[..n].to_vec());
                    rest = &rest[n..];
                }
                _ => break,
            }
        }

        self.paginate(seq, port, &chunks, |chunk, generation| {
            let mut msg = reply::header(
                NftMsg::NewSetElem,
                crate::netlink::message::NLM_F_MULTI,
                seq,
                port,
                set.family,
                generation,
            );
            set.write_element_chunk(&mut msg, chunk).ok()?;
            Some(msg.finish())
        })
    }

    fn get_objects(&mut self, req: &Request, port: u32) -> Vec<Vec<u8>> {
        let seq = req.header.nlmsg_seq;
        let (table, name) = req.selector(obj_attr::TABLE, obj_attr::NAME);
        let obj_type = req.attr_u32(obj_attr::TYPE).unwrap_or(0);
        let mut objects = self.filtered(req, |s| &s.objects, |o| o.family);
        objects.retain(|o| {
            table.as_ref().is_none_or(|t| *t == o.table)
                && name.as_ref().is_none_or(|n| *n == o.name)
                && (obj_type == 0 || obj_type == o.obj_type)
        });

        if req.has(NLM_F_DUMP) {
            return self.dump(NftMsg::NewObj, seq, port, &objects);
        }

        let Some(obj) = objects.first() else {
            return vec![reply::error(seq, port, libc::ENOENT)];
        };
        let mut replies = Vec::new();
        if let Ok(msg) = reply::object(NftMsg::NewObj, 0, seq, port, self.generation as u16, obj) {
            replies.push(msg);
        }
        if req.has(NLM_F_ACK) {
            replies.push(reply::ack(seq, port));
        }
        replies
    }

    // ------------------------------------------------------------------------
    // Ruleset changes. Each returns a positive errno on failure.
    // ------------------------------------------------------------------------

    /// Apply one configuration request to `state`. A created set is
    /// returned for echoing.
    fn apply(&mut self, state: &mut State, req: &Request) -> std::result::Result<Option<Set>, i32> {
        let msg = req.message();
        let flags = req.header.nlmsg_flags;
        let cmd = req.cmd().ok_or(libc::EOPNOTSUPP)?;

        match cmd {
            NftMsg::NewTable => self.new_table(state, parse(&msg)?, flags)?,
            NftMsg::DelTable => {
                let table: Table = parse(&msg)?;
                let idx = state
                    .tables
                    .iter()
                    .position(|t| t.family == table.family && t.name == table.name)
                    .ok_or(libc::ENOENT)?;
                state.tables.remove(idx);
                let owned = |f: Family, t: &str| f == table.family && t == table.name;
                state.chains.retain(|c| !owned(c.family, &c.table));
                state.rules.retain(|r| !owned(r.family, &r.table));
                state.sets.retain(|s| !owned(s.family, &s.table));
                state.objects.retain(|o| !owned(o.family, &o.table));
            }
            NftMsg::NewChain => self.new_chain(state, parse(&msg)?, flags)?,
            NftMsg::DelChain => {
                let chain: Chain = parse(&msg)?;
                let idx = state
                    .chains
                    .iter()
                    .position(|c| same_chain(c, &chain))
                    .ok_or(libc::ENOENT)?;
                if state.rules.iter().any(|r| {
                    r.family == chain.family && r.table == chain.table && r.chain == chain.name
                }) {
                    return Err(libc::EBUSY);
                }
                state.chains.remove(idx);
            }
            NftMsg::NewRule => self.new_rule(state, parse(&msg)?, flags)?,
            NftMsg::DelRule => {
                let rule: Rule = parse(&msg)?;
                let in_chain = |r: &Rule| {
                    r.family == rule.family && r.table == rule.table && r.chain == rule.chain
                };
                match rule.handle {
                    Some(handle) => {
                        let idx = state
                            .rules
                            .iter()
                            .position(|r| in_chain(r) && r.handle == Some(handle))
                            .ok_or(libc::ENOENT)?;
                        state.rules.remove(idx);
                    }
                    None => state.rules.retain(|r| !in_chain(r)),
                }
            }
            NftMsg::NewSet => return self.new_set(state, parse(&msg)?, flags).map(Some),
            NftMsg::DelSet => {
                let set: Set = parse(&msg)?;
                let idx = state
                    .sets
                    .iter()
                    .position(|s| same_set(s, &set.family, &set.table, &set.name))
                    .ok_or(libc::ENOENT)?;
                state.sets.remove(idx);
            }
            NftMsg::NewSetElem => {
                let list: SetElementList = parse(&msg)?;
                let set = find_set(state, &list)?;
                for element in list.elements {
                    match set.elements.iter().position(|e| e.key == element.key) {
                        Some(_) if flags & NLM_F_EXCL != 0 => return Err(libc::EEXIST),
                        Some(idx) => set.elements[idx] = element,
                        None => set.elements.push(element),
                    }
                }
            }
            NftMsg::DelSetElem => {
                let list: SetElementList = parse(&msg)?;
                let set = find_set(state, &list)?;
                if list.elements.is_empty() {
                    set.elements.clear();
                }
                for element in list.elements {
                    let idx = set
                        .elements
                        .iter()
                        .position(|e| e.key == element.key)
                        .ok_or(libc::ENOENT)?;
                    set.elements.remove(idx);
                }
            }
            NftMsg::NewObj => self.new_object(state, parse(&msg)?, flags)?,
            NftMsg::DelObj => {
                let obj: Object = parse(&msg)?;
                let idx = state
                    .objects
                    .iter()
                    .position(|o| {
                        o.family == obj.family && o.table == obj.table && o.name == obj.name
                    })
                    .ok_or(libc::ENOENT)?;
                state.objects.remove(idx);
            }
            _ => return Err(libc::EOPNOTSUPP),
        }
        Ok(None)
    }

    fn handle(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn new_table(&mut self, state: &mut State, mut table: Table, flags: u16) -> std::result::Result<(), i32> {
        if let Some(existing) = state
            .tables
            .iter_mut()
            .find(|t| t.family == table.family && t.name == table.name)
        {
            if flags & NLM_F_EXCL != 0 {
                return Err(libc::EEXIST);
            }
            existing.flags = table.flags.or(existing.flags);
            return Ok(());
        }
        table.handle = Some(self.handle());
        state.tables.push(table);
        Ok(())
    }

    fn new_chain(&mut self, state: &mut State, mut chain: Chain, flags: u16) -> std::result::Result<(), i32> {
        if !has_table(state, chain.family, &chain.table) {
            return Err(libc::ENOENT);
        }
        if state.chains.iter().any(|c| same_chain(c, &chain)) {
            return if flags & NLM_F_EXCL != 0 {
                Err(libc::EEXIST)
            } else {
                Ok(())
            };
        }
        chain.handle = Some(self.handle());
        state.chains.push(chain);
        Ok(())
    }

    fn new_rule(&mut self, state: &mut State, mut rule: Rule, flags: u16) -> std::result::Result<(), i32> {
        let chain_exists = state.chains.iter().any(|c| {
            c.family == rule.family && c.table == rule.table && c.name == rule.chain
        });
        if !chain_exists {
            return Err(libc::ENOENT);
        }

        if flags & NLM_F_REPLACE != 0 {
            let handle = rule.handle.ok_or(libc::EINVAL)?;
            let existing = state
                .rules
                .iter_mut()
                .find(|r| r.table == rule.table && r.handle == Some(handle))
                .ok_or(libc::ENOENT)?;
            *existing = rule;
            return Ok(());
        }

        rule.handle = Some(self.handle());
        rule.position = None;
        state.rules.push(rule);
        Ok(())
    }

    fn new_set(&mut self, state: &mut State, mut set: Set, flags: u16) -> std::result::Result<Set, i32> {
        if !has_table(state, set.family, &set.table) {
            return Err(libc::ENOENT);
        }
        if let Some(existing) = state
            .sets
            .iter()
            .find(|s| same_set(s, &set.family, &set.table, &set.name))
        {
            return if flags & NLM_F_EXCL != 0 {
                Err(libc::EEXIST)
            } else {
                Ok(existing.clone())
            };
        }
        set.handle = Some(self.handle());
        set.elements.clear();
        state.sets.push(set.clone());
        Ok(set)
    }

    fn new_object(&mut self, state: &mut State, mut obj: Object, flags: u16) -> std::result::Result<(), i32> {
        if !has_table(state, obj.family, &obj.table) {
            return Err(libc::ENOENT);
        }
        if let Some(existing) = state
            .objects
            .iter_mut()
            .find(|o| o.family == obj.family && o.table == obj.table && o.name == obj.name)
        {
            if flags & NLM_F_EXCL != 0 {
                return Err(libc::EEXIST);
            }
            existing.data = obj.data;
            return Ok(());
        }
        obj.handle = Some(self.handle());
        state.objects.push(obj);
        Ok(())
    }
}

/// Decode a request object; malformed requests get `EINVAL`.
fn parse<O: NftObject>(msg: &Message<'_>) -> std::result::Result<O, i32> {
    O::parse(msg).map_err(|_| libc::EINVAL)
}

fn has_table(state: &State, family: Family, name: &str) -> bool {
    state
        .tables
        .iter()
        .any(|t| t.family == family && t.name == name)
}

fn same_chain(a: &Chain, b: &Chain) -> bool {
    a.family == b.family && a.table == b.table && a.name == b.name
}

fn same_set(s: &Set, family: &Family, table: &str, name: &str) -> bool {
    s.family == *family && s.table == table && s.name == name
}

fn find_set<'a>(state: &'a mut State, list: &SetElementList) -> std::result::Result<&'a mut Set, i32> {
    state
        .sets
        .iter_mut()
        .find(|s| same_set(s, &list.family, &list.table, &list.set))
        .ok_or(libc::ENOENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::{AckOnly, Control, Filter, dispatch};
    use crate::nftables::frame::build;

    fn recv_all(transport: &MockTransport) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        let mut buf = BytesMut::new();
        while let Some(n) = transport.try_recv(&mut buf).unwrap() {
            out.push(buf[..n].to_vec());
        }
        out
    }

    #[tokio::test]
    async fn scripted_datagrams_in_order() {
        let transport = MockTransport::new();
        transport.push_datagram(reply::ack(1, 0));
        transport.push_error(libc::ENOBUFS);

        let mut buf = BytesMut::new();
        let n = transport.recv(&mut buf).await.unwrap();
        assert_eq!(
            dispatch(&buf[..n], Filter::new(1, 0), &mut AckOnly).unwrap(),
            Control::Stop
        );
        assert!(transport.recv(&mut buf).await.unwrap_err().is_buffer_overrun());
        assert!(transport.recv(&mut buf).await.is_err());
        assert_eq!(transport.try_recv(&mut buf).unwrap(), None);
    }

    #[tokio::test]
    async fn direct_request_is_acked() {
        let kernel = FakeKernel::new().shared();
        let transport = MockTransport::with_kernel(kernel.clone());
        let table = Table::new(Family::Ip, "t");
        transport
            .send(&build(NftMsg::NewTable, NLM_F_ACK, 7, &table).unwrap())
            .await
            .unwrap();

        let replies = recv_all(&transport);
        assert_eq!(replies.len(), 1);
        assert_eq!(
            dispatch(&replies[0], Filter::new(7, MOCK_PORT_ID), &mut AckOnly).unwrap(),
            Control::Stop
        );
        let kernel = lock(&kernel);
        assert_eq!(kernel.tables().len(), 1);
        assert_eq!(kernel.generation(), 2);
    }

    #[test]
    fn dumps_are_paginated() {
        let mut kernel = FakeKernel::new().with_dump_page_size(2);
        for name in ["a", "b", "c"] {
            kernel = kernel.with_table(Table::new(Family::Inet, name));
        }
        let request = crate::nftables::frame::build_header(NftMsg::GetTable, Family::Unspec, NLM_F_DUMP, 3).finish();
        let replies = kernel.process(&request, 1);
        assert_eq!(replies.len(), 2);

        let mut names = Vec::new();
        let mut control = Control::Continue;
        for datagram in &replies {
            control = dispatch(datagram, Filter::new(3, 1), &mut |msg: &Message<'_>| -> Result<Control> {
                names.push(Table::parse(msg)?.name);
                Ok(Control::Continue)
            })
            .unwrap();
        }
        assert_eq!(control, Control::Stop);
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn failed_batch_changes_nothing() {
        let mut kernel = FakeKernel::new();
        let mut data = crate::nftables::frame::batch_marker(NFNL_MSG_BATCH_BEGIN, 1);
        data.extend(build(NftMsg::NewTable, 0, 2, &Table::new(Family::Ip, "t")).unwrap());
        // no such table
        data.extend(build(NftMsg::NewChain, 0, 3, &Chain::new(Family::Ip, "x", "c")).unwrap());
        data.extend(crate::nftables::frame::batch_marker(NFNL_MSG_BATCH_END, 4));

        let replies = kernel.process(&data, 1);
        assert_eq!(replies.len(), 1);
        assert!(kernel.tables().is_empty());
        assert_eq!(kernel.generation(), 1);
        assert_eq!(kernel.batches(), 1);
    }
}
