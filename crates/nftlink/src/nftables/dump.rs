//! Consistency-checked dumps.
//!
//! Every page of a dump reports the ruleset generation it was produced
//! from. Pages are checked against a baseline taken with
//! [`Session::refresh_generation`]; a mismatch means the ruleset changed
//! while it was being read and the whole read has to start over.

use crate::netlink::message::{NLM_F_ACK, NLM_F_DUMP};
use crate::netlink::{Control, Error, Message, MessageHandler, Result, Transport};

use super::frame::build_header;
use super::objects::{Chain, NftObject, Object, ObjectFilter, Rule, Set, Table};
use super::session::Session;
use super::types::{Family, NftMsg};

/// Fail if `msg` was produced from another generation than `baseline`.
///
/// A baseline of 0 comes from kernels that do not report generations and
/// disables the check.
pub fn check_generation(msg: &Message<'_>, baseline: u16) -> Result<()> {
    if baseline == 0 {
        return Ok(());
    }
    let actual = msg.generation()?;
    if actual != baseline {
        return Err(Error::GenerationChanged {
            expected: baseline,
            actual,
        });
    }
    Ok(())
}

/// Collects the objects of a dump in arrival order.
///
/// Objects that fail to decode are skipped; a generation mismatch fails
/// the whole dump.
pub struct DumpCollector<O> {
    generation: u16,
    objects: Vec<O>,
    skipped: usize,
}

impl<O: NftObject> DumpCollector<O> {
    /// Check pages against `generation`.
    pub fn new(generation: u16) -> Self {
        Self {
            generation,
            objects: Vec::new(),
            skipped: 0,
        }
    }

    /// Objects that could not be decoded.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// The collected objects.
    pub fn into_objects(self) -> Vec<O> {
        self.objects
    }
}

impl<O: NftObject> MessageHandler for DumpCollector<O> {
    fn handle(&mut self, msg: &Message<'_>) -> Result<Control> {
        check_generation(msg, self.generation)?;

        if msg.kind() != O::KIND.new_cmd() as u8 {
            tracing::debug!(msg_type = msg.header.nlmsg_type, "ignoring unexpected message in dump");
            return Ok(Control::Continue);
        }

        match O::parse(msg) {
            Ok(obj) => self.objects.push(obj),
            Err(e) => {
                self.skipped += 1;
                tracing::debug!(kind = O::KIND.name(), error = %e, "skipping undecodable object");
            }
        }
        Ok(Control::Continue)
    }
}

impl<T: Transport> Session<T> {
    /// Read the current ruleset generation and make it the baseline for
    /// subsequent dumps.
    ///
    /// Kernels that cannot report a generation yield 0, which disables the
    /// check rather than failing.
    pub async fn refresh_generation(&mut self) -> Result<u16> {
        let seq = self.next_seq();
        let request = build_header(NftMsg::GetGen, Family::Unspec, 0, seq).finish();

        let mut generation = 0u16;
        let mut on_gen = |msg: &Message<'_>| -> Result<Control> {
            if msg.kind() == NftMsg::NewGen as u8 {
                generation = msg.generation()?;
                return Ok(Control::Stop);
            }
            Ok(Control::Continue)
        };

        match self.talk(&request, seq, &mut on_gen).await {
            Ok(()) => {}
            Err(e @ (Error::Kernel { .. } | Error::KernelWithContext { .. })) => {
                tracing::debug!(error = %e, "kernel does not report ruleset generation");
                generation = 0;
            }
            Err(e) => return Err(e),
        }

        self.generation = generation;
        Ok(generation)
    }

    /// Run one dump and collect the objects.
    pub async fn dump<O: NftObject>(
        &mut self,
        cmd: NftMsg,
        family: Family,
        flags: u16,
        selector: Option<&O>,
    ) -> Result<Vec<O>> {
        let seq = self.next_seq();
        let mut msg = build_header(cmd, family, flags, seq);
        if let Some(selector) = selector {
            selector.write_payload(&mut msg)?;
        }

        let mut collector = DumpCollector::<O>::new(self.generation);
        self.talk(&msg.finish(), seq, &mut collector).await?;
        if collector.skipped() > 0 {
            tracing::debug!(
                kind = O::KIND.name(),
                skipped = collector.skipped(),
                "dump finished with undecodable objects"
            );
        }
        Ok(collector.into_objects())
    }

    /// All tables of `family` (`Family::Unspec` for every family).
    pub async fn dump_tables(&mut self, family: Family) -> Result<Vec<Table>> {
        self.dump::<Table>(NftMsg::GetTable, family, NLM_F_DUMP, None)
            .await
    }

    /// All chains of `family`.
    pub async fn dump_chains(&mut self, family: Family) -> Result<Vec<Chain>> {
        self.dump::<Chain>(NftMsg::GetChain, family, NLM_F_DUMP, None)
            .await
    }

    /// All rules of `family`.
    pub async fn dump_rules(&mut self, family: Family) -> Result<Vec<Rule>> {
        self.dump::<Rule>(NftMsg::GetRule, family, NLM_F_DUMP, None)
            .await
    }

    /// All sets of `family`, optionally only those of one table.
    ///
    /// Elements are not included; see [`get_set_elements`](Self::get_set_elements).
    pub async fn dump_sets(&mut self, family: Family, table: Option<&str>) -> Result<Vec<Set>> {
        let selector = Set {
            family,
            table: table.unwrap_or_default().to_string(),
            ..Default::default()
        };
        self.dump(NftMsg::GetSet, family, NLM_F_DUMP | NLM_F_ACK, Some(&selector))
            .await
    }

    /// Stateful objects of `family` matching `filter`.
    pub async fn dump_objects(
        &mut self,
        family: Family,
        filter: &ObjectFilter,
    ) -> Result<Vec<Object>> {
        let cmd = if filter.reset {
            NftMsg::GetObjReset
        } else {
            NftMsg::GetObj
        };
        let flags = if filter.dump { NLM_F_DUMP } else { 0 } | NLM_F_ACK;
        let selector = filter.selector(family);
        self.dump(cmd, family, flags, Some(&selector)).await
    }

    /// Read the elements of `set` and append them to `set.elements`.
    pub async fn get_set_elements(&mut self, set: &mut Set) -> Result<()> {
        let seq = self.next_seq();
        let mut msg = build_header(NftMsg::GetSetElem, set.family, NLM_F_DUMP | NLM_F_ACK, seq);
        set.write_element_header(&mut msg);
        let request = msg.finish();

        let baseline = self.generation;
        let mut merge = |msg: &Message<'_>| -> Result<Control> {
            check_generation(msg, baseline)?;
            if let Err(e) = set.merge_elements(msg) {
                tracing::debug!(set = %set.name, error = %e, "skipping undecodable elements");
            }
            Ok(Control::Continue)
        };
        self.talk(&request, seq, &mut merge).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::message::{NLM_F_MULTI, NLMSG_HDRLEN, NlMsgHdr};
    use crate::netlink::{Filter, MessageBuilder, dispatch};
    use crate::nftables::types::table_attr;

    fn table_page(generation: u16, name: &str) -> Vec<u8> {
        let mut msg = MessageBuilder::new(NftMsg::NewTable.msg_type(), NLM_F_MULTI);
        msg.append_bytes(&[1, 0, (generation >> 8) as u8, generation as u8]);
        if !name.is_empty() {
            msg.append_attr_str(table_attr::NAME, name);
        }
        msg.finish()
    }

    #[test]
    fn stale_page_aborts() {
        let mut collector = DumpCollector::<Table>::new(5);
        dispatch(&table_page(5, "a"), Filter::NONE, &mut collector).unwrap();
        let err = dispatch(&table_page(6, "b"), Filter::NONE, &mut collector).unwrap_err();
        assert!(matches!(
            err,
            Error::GenerationChanged {
                expected: 5,
                actual: 6
            }
        ));
        assert!(err.is_retryable());
    }

    #[test]
    fn zero_baseline_skips_check() {
        let mut collector = DumpCollector::<Table>::new(0);
        dispatch(&table_page(5, "a"), Filter::NONE, &mut collector).unwrap();
        dispatch(&table_page(6, "b"), Filter::NONE, &mut collector).unwrap();
        assert_eq!(collector.into_objects().len(), 2);
    }

    #[test]
    fn undecodable_objects_are_dropped() {
        let mut collector = DumpCollector::<Table>::new(5);
        let mut data = table_page(5, "a");
        data.extend(table_page(5, ""));
        data.extend(table_page(5, "c"));
        dispatch(&data, Filter::NONE, &mut collector).unwrap();
        assert_eq!(collector.skipped(), 1);
        let names: Vec<_> = collector.into_objects().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[test]
    fn page_layout_is_what_the_kernel_sends() {
        let page = table_page(0x0102, "a");
        let header = NlMsgHdr::from_bytes(&page).unwrap();
        assert_eq!(header.nlmsg_len as usize, page.len());
        assert_eq!(&page[NLMSG_HDRLEN..NLMSG_HDRLEN + 4], &[1, 0, 1, 2]);
    }
}
