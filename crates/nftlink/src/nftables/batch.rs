//! Batch accumulation.
//!
//! A batch is a sequence of nf_tables requests bracketed by begin/end
//! markers that the kernel applies as one transaction. Messages are packed
//! into fixed-size pages, sent later as one scatter/gather datagram.
//!
//! ```ignore
//! use nftlink::{Batch, Session, Table, Chain, Family};
//!
//! let mut session = Session::new()?;
//! let mut batch = Batch::new();
//! batch.begin(session.next_seq());
//! batch.add_table(&Table::new(Family::Inet, "t1"), 0, session.next_seq())?;
//! batch.add_chain(&Chain::new(Family::Inet, "t1", "c1"), 0, session.next_seq())?;
//! batch.end(session.next_seq());
//!
//! let mut errors = Vec::new();
//! session.commit(&batch, &mut errors).await?;
//! ```

use crate::netlink::message::{NLM_F_ACK, NLM_F_CREATE, NLM_F_REPLACE};
use crate::netlink::{Result, system_page_size};

use super::frame::{self, build_header};
use super::objects::{Chain, NftObject, Object, Rule, Set, Table};
use super::types::{Family, NFNL_MSG_BATCH_BEGIN, NFNL_MSG_BATCH_END, NftMsg};

/// Pages per batch page, in system pages.
const BATCH_PAGE_PAGES: usize = 32;

/// Size of one batch page: 32 system pages.
pub fn batch_page_size() -> usize {
    system_page_size() * BATCH_PAGE_PAGES
}

/// Largest single nf_tables message.
///
/// Element lists are one nest with a 16-bit length, so no message exceeds
/// 64 KiB by more than a page of headers.
pub fn nlmsg_max_size() -> usize {
    u16::MAX as usize + system_page_size()
}

/// A request staged in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagedMessage {
    /// Sequence number the kernel will acknowledge it with.
    pub seq: u32,
    /// Command.
    pub cmd: NftMsg,
    /// Family from the `nfgenmsg` header.
    pub family: Family,
}

/// Staged batch of nf_tables requests.
#[derive(Debug, Clone)]
pub struct Batch {
    pages: Vec<Vec<u8>>,
    page_size: usize,
    staged: Vec<StagedMessage>,
}

impl Default for Batch {
    fn default() -> Self {
        Self::new()
    }
}

impl Batch {
    /// Create an empty batch with the default page size.
    pub fn new() -> Self {
        Self::with_page_size(batch_page_size())
    }

    /// Create an empty batch with a custom page size.
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            pages: vec![Vec::with_capacity(page_size)],
            page_size,
            staged: Vec::new(),
        }
    }

    /// Write the begin marker. Returns `seq`.
    pub fn begin(&mut self, seq: u32) -> u32 {
        self.push(&frame::batch_marker(NFNL_MSG_BATCH_BEGIN, seq));
        seq
    }

    /// Write the end marker.
    pub fn end(&mut self, seq: u32) {
        self.push(&frame::batch_marker(NFNL_MSG_BATCH_END, seq));
    }

    /// Stage `cmd` for `obj`.
    pub fn append<O: NftObject>(&mut self, cmd: NftMsg, flags: u16, seq: u32, obj: &O) -> Result<()> {
        let msg = frame::build(cmd, flags, seq, obj)?;
        self.stage(&msg, cmd, obj.family(), seq);
        Ok(())
    }

    /// Check whether anything besides the markers was staged.
    pub fn is_ready(&self) -> bool {
        !self.staged.is_empty()
    }

    /// The pages in order, one iovec each.
    pub fn pages(&self) -> Vec<&[u8]> {
        self.pages
            .iter()
            .filter(|p| !p.is_empty())
            .map(|p| p.as_slice())
            .collect()
    }

    /// Number of non-empty pages.
    pub fn page_count(&self) -> usize {
        self.pages.iter().filter(|p| !p.is_empty()).count()
    }

    /// Page size this batch was created with.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Total bytes staged, markers included.
    pub fn len(&self) -> usize {
        self.pages.iter().map(Vec::len).sum()
    }

    /// Check whether nothing at all (not even a marker) was written.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every staged request in order.
    pub fn staged_messages(&self) -> &[StagedMessage] {
        &self.staged
    }

    /// Requests staged with `seq` (element chunks share one).
    pub fn staged(&self, seq: u32) -> impl Iterator<Item = &StagedMessage> {
        self.staged.iter().filter(move |m| m.seq == seq)
    }

    /// Drop everything, keeping the first page's allocation.
    pub fn reset(&mut self) {
        self.pages.truncate(1);
        if let Some(first) = self.pages.first_mut() {
            first.clear();
        }
        self.staged.clear();
    }

    fn stage(&mut self, msg: &[u8], cmd: NftMsg, family: Family, seq: u32) {
        self.push(msg);
        self.staged.push(StagedMessage { seq, cmd, family });
    }

    /// Append a complete message, opening a new page when the current one
    /// cannot hold it. Messages never straddle pages.
    fn push(&mut self, msg: &[u8]) {
        let fits = self
            .pages
            .last()
            .is_some_and(|page| page.is_empty() || page.len() + msg.len() <= self.page_size);
        if !fits {
            self.pages
                .push(Vec::with_capacity(self.page_size.max(msg.len())));
        }
        if let Some(page) = self.pages.last_mut() {
            page.extend_from_slice(msg);
        }
    }

    // Per-kind helpers. The flags each one adds match what the kernel
    // expects for that command inside a transaction.

    /// Create a table.
    pub fn add_table(&mut self, table: &Table, flags: u16, seq: u32) -> Result<()> {
        self.append(NftMsg::NewTable, flags, seq, table)
    }

    /// Delete a table.
    pub fn del_table(&mut self, table: &Table, seq: u32) -> Result<()> {
        self.append(NftMsg::DelTable, NLM_F_ACK, seq, table)
    }

    /// Create a chain.
    pub fn add_chain(&mut self, chain: &Chain, flags: u16, seq: u32) -> Result<()> {
        self.append(NftMsg::NewChain, NLM_F_CREATE | flags, seq, chain)
    }

    /// Delete a chain.
    pub fn del_chain(&mut self, chain: &Chain, seq: u32) -> Result<()> {
        self.append(NftMsg::DelChain, NLM_F_ACK, seq, chain)
    }

    /// Add a rule (append, or insert with `NLM_F_APPEND` cleared).
    pub fn add_rule(&mut self, rule: &Rule, flags: u16, seq: u32) -> Result<()> {
        self.append(NftMsg::NewRule, NLM_F_CREATE | flags, seq, rule)
    }

    /// Replace the rule with `rule.handle`.
    pub fn replace_rule(&mut self, rule: &Rule, flags: u16, seq: u32) -> Result<()> {
        self.append(NftMsg::NewRule, NLM_F_REPLACE | flags, seq, rule)
    }

    /// Delete a rule.
    pub fn del_rule(&mut self, rule: &Rule, seq: u32) -> Result<()> {
        self.append(NftMsg::DelRule, 0, seq, rule)
    }

    /// Create a set. Its elements are not sent; see
    /// [`add_set_elements`](Self::add_set_elements).
    pub fn add_set(&mut self, set: &Set, flags: u16, seq: u32) -> Result<()> {
        self.append(NftMsg::NewSet, NLM_F_CREATE | flags, seq, set)
    }

    /// Delete a set.
    pub fn del_set(&mut self, set: &Set, flags: u16, seq: u32) -> Result<()> {
        self.append(NftMsg::DelSet, flags, seq, set)
    }

    /// Create a stateful object.
    pub fn add_object(&mut self, obj: &Object, flags: u16, seq: u32) -> Result<()> {
        self.append(NftMsg::NewObj, NLM_F_CREATE | flags, seq, obj)
    }

    /// Delete a stateful object.
    pub fn del_object(&mut self, obj: &Object, flags: u16, seq: u32) -> Result<()> {
        self.append(NftMsg::DelObj, flags, seq, obj)
    }

    /// Add `set.elements`, split over as many messages as needed.
    pub fn add_set_elements(&mut self, set: &Set, flags: u16, seq: u32) -> Result<()> {
        self.set_elements(NftMsg::NewSetElem, set, NLM_F_CREATE | flags, seq)
    }

    /// Delete `set.elements`, split over as many messages as needed.
    pub fn del_set_elements(&mut self, set: &Set, flags: u16, seq: u32) -> Result<()> {
        self.set_elements(NftMsg::DelSetElem, set, flags, seq)
    }

    /// Delete every element of a set.
    pub fn flush_set(&mut self, set: &Set, flags: u16, seq: u32) -> Result<()> {
        let mut msg = build_header(NftMsg::DelSetElem, set.family, flags, seq);
        set.write_element_header(&mut msg);
        self.stage(&msg.finish(), NftMsg::DelSetElem, set.family, seq);
        Ok(())
    }

    fn set_elements(&mut self, cmd: NftMsg, set: &Set, flags: u16, seq: u32) -> Result<()> {
        let mut rest = set.elements.as_slice();
        while !rest.is_empty() {
            let mut msg = build_header(cmd, set.family, flags, seq);
            let written = set.write_element_chunk(&mut msg, rest)?;
            self.stage(&msg.finish(), cmd, set.family, seq);
            rest = &rest[written..];
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::message::{MessageIter, NLM_F_REQUEST};
    use crate::nftables::objects::SetElement;

    fn messages(batch: &Batch) -> Vec<(u16, u16, u32)> {
        batch
            .pages()
            .into_iter()
            .flat_map(|page| {
                MessageIter::new(page)
                    .map(|r| {
                        let (h, _) = r.unwrap();
                        (h.nlmsg_type, h.nlmsg_flags, h.nlmsg_seq)
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    #[test]
    fn markers_alone_are_not_ready() {
        let mut batch = Batch::new();
        batch.begin(1);
        batch.end(2);
        assert!(!batch.is_ready());
        assert_eq!(batch.page_count(), 1);
    }

    #[test]
    fn one_message_makes_it_ready() {
        let mut batch = Batch::new();
        batch.begin(1);
        batch.add_table(&Table::new(Family::Inet, "t1"), 0, 2).unwrap();
        batch.end(3);
        assert!(batch.is_ready());

        let msgs = messages(&batch);
        assert_eq!(
            msgs,
            vec![
                (NFNL_MSG_BATCH_BEGIN, NLM_F_REQUEST, 1),
                (NftMsg::NewTable.msg_type(), NLM_F_REQUEST, 2),
                (NFNL_MSG_BATCH_END, NLM_F_REQUEST, 3),
            ]
        );
    }

    #[test]
    fn helper_flags() {
        let mut batch = Batch::new();
        let chain = Chain::new(Family::Ip, "t", "c");
        let rule = Rule::new(Family::Ip, "t", "c").with_handle(4);
        batch.add_chain(&chain, 0, 1).unwrap();
        batch.del_chain(&chain, 2).unwrap();
        batch.replace_rule(&rule, 0, 3).unwrap();
        batch.del_rule(&rule, 4).unwrap();

        let flags: Vec<u16> = messages(&batch).iter().map(|m| m.1).collect();
        assert_eq!(
            flags,
            vec![
                NLM_F_REQUEST | NLM_F_CREATE,
                NLM_F_REQUEST | NLM_F_ACK,
                NLM_F_REQUEST | NLM_F_REPLACE,
                NLM_F_REQUEST,
            ]
        );
    }

    #[test]
    fn messages_never_straddle_pages() {
        let mut batch = Batch::with_page_size(256);
        batch.begin(1);
        for i in 0..50 {
            let table = Table::new(Family::Inet, format!("table-{}", i));
            batch.add_table(&table, 0, 2 + i).unwrap();
        }
        batch.end(100);

        assert!(batch.page_count() > 1);
        for page in batch.pages() {
            assert!(page.len() <= 256);
            // every page parses on its own
            assert!(MessageIter::new(page).all(|r| r.is_ok()));
        }
        assert_eq!(messages(&batch).len(), 52);
    }

    #[test]
    fn element_chunks_share_seq() {
        let mut set = Set::new(Family::Ip, "t", "s").with_key(7, 4);
        set.elements = (0..3000u32)
            .map(|i| SetElement::new(i.to_be_bytes()))
            .collect();

        let mut batch = Batch::new();
        batch.add_set_elements(&set, 0, 9).unwrap();
        let chunks = batch.staged(9).count();
        assert!(chunks > 1);
        assert!(batch.staged_messages().iter().all(|m| m.cmd == NftMsg::NewSetElem));
    }

    #[test]
    fn empty_element_list_stages_nothing_but_flush_does() {
        let set = Set::new(Family::Ip, "t", "s");
        let mut batch = Batch::new();
        batch.add_set_elements(&set, 0, 1).unwrap();
        assert!(!batch.is_ready());
        batch.flush_set(&set, 0, 2).unwrap();
        assert!(batch.is_ready());
    }

    #[test]
    fn reset_empties() {
        let mut batch = Batch::new();
        batch.begin(1);
        batch.add_table(&Table::new(Family::Inet, "t1"), 0, 2).unwrap();
        batch.end(3);
        batch.reset();
        assert!(batch.is_empty());
        assert!(!batch.is_ready());
        assert_eq!(batch.page_count(), 0);
    }

    #[test]
    fn sizes() {
        assert_eq!(batch_page_size(), system_page_size() * 32);
        assert!(nlmsg_max_size() > u16::MAX as usize);
    }
}
