//! nf_tables rule.

use crate::netlink::attr::get;
use crate::netlink::{Message, MessageBuilder, Result};
use crate::nftables::types::{Family, rule_attr};

use super::{NftObject, ObjectKind, missing, split_payload};

/// A rule in a chain.
///
/// `expressions` holds the already encoded content of the
/// `NFTA_RULE_EXPRESSIONS` nest (a list of `NFTA_LIST_ELEM` expressions).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "output", derive(serde::Serialize))]
pub struct Rule {
    pub family: Family,
    pub table: String,
    pub chain: String,
    #[cfg_attr(feature = "output", serde(skip_serializing_if = "Option::is_none"))]
    pub handle: Option<u64>,
    /// Handle of the rule to insert after (or replace).
    #[cfg_attr(feature = "output", serde(skip_serializing_if = "Option::is_none"))]
    pub position: Option<u64>,
    #[cfg_attr(feature = "output", serde(skip))]
    pub expressions: Vec<u8>,
    #[cfg_attr(feature = "output", serde(skip))]
    pub userdata: Option<Vec<u8>>,
}

impl Rule {
    /// Create an empty rule in `table`/`chain`.
    pub fn new(family: Family, table: impl Into<String>, chain: impl Into<String>) -> Self {
        Self {
            family,
            table: table.into(),
            chain: chain.into(),
            ..Default::default()
        }
    }

    /// Attach encoded expressions.
    pub fn with_expressions(mut self, expressions: impl Into<Vec<u8>>) -> Self {
        self.expressions = expressions.into();
        self
    }

    /// Address the rule by handle.
    pub fn with_handle(mut self, handle: u64) -> Self {
        self.handle = Some(handle);
        self
    }

    /// Place the rule relative to the rule with this handle.
    pub fn with_position(mut self, position: u64) -> Self {
        self.position = Some(position);
        self
    }
}

impl NftObject for Rule {
    const KIND: ObjectKind = ObjectKind::Rule;

    fn family(&self) -> Family {
        self.family
    }

    fn write_payload(&self, msg: &mut MessageBuilder) -> Result<()> {
        if !self.table.is_empty() {
            msg.append_attr_str(rule_attr::TABLE, &self.table);
        }
        if !self.chain.is_empty() {
            msg.append_attr_str(rule_attr::CHAIN, &self.chain);
        }
        if let Some(handle) = self.handle {
            msg.append_attr_u64_be(rule_attr::HANDLE, handle);
        }
        if let Some(position) = self.position {
            msg.append_attr_u64_be(rule_attr::POSITION, position);
        }
        if !self.expressions.is_empty() {
            let nest = msg.nest_start(rule_attr::EXPRESSIONS);
            msg.append_bytes(&self.expressions);
            msg.nest_end(nest)?;
        }
        if let Some(userdata) = &self.userdata {
            msg.try_append_attr(rule_attr::USERDATA, userdata)?;
        }
        Ok(())
    }

    fn parse(msg: &Message<'_>) -> Result<Self> {
        let (header, attrs) = split_payload(msg)?;
        let mut rule = Rule {
            family: Family::from_u8(header.family),
            ..Default::default()
        };

        for (kind, data) in attrs {
            match kind {
                rule_attr::TABLE => rule.table = get::string(data)?.to_string(),
                rule_attr::CHAIN => rule.chain = get::string(data)?.to_string(),
                rule_attr::HANDLE => rule.handle = Some(get::u64_be(data)?),
                rule_attr::POSITION => rule.position = Some(get::u64_be(data)?),
                rule_attr::EXPRESSIONS => rule.expressions = data.to_vec(),
                rule_attr::USERDATA => rule.userdata = Some(data.to_vec()),
                _ => {}
            }
        }

        if rule.table.is_empty() || rule.chain.is_empty() {
            return Err(missing(Self::KIND, "table or chain"));
        }
        Ok(rule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nftables::frame::build_header;
    use crate::nftables::objects::test_util::with_message;
    use crate::nftables::types::NftMsg;

    // One NFTA_LIST_ELEM holding NFTA_EXPR_NAME "counter".
    const COUNTER_EXPR: &[u8] = &[
        0x10, 0x80, 0x01, 0x00, // LIST_ELEM, nested
        0x0c, 0x00, 0x01, 0x00, b'c', b'o', b'u', b'n', b't', b'e', b'r', 0x00,
    ];

    #[test]
    fn expressions_are_carried_verbatim() {
        let mut rule = Rule::new(Family::Inet, "t1", "c1")
            .with_expressions(COUNTER_EXPR)
            .with_handle(7);
        rule.userdata = Some(vec![1, 2, 3]);
        let mut msg = build_header(NftMsg::NewRule, rule.family, 0, 1);
        rule.write_payload(&mut msg).unwrap();

        let parsed = with_message(msg, |m| Rule::parse(m)).unwrap();
        assert_eq!(parsed.expressions, COUNTER_EXPR);
        assert_eq!(parsed.userdata.as_deref(), Some(&[1u8, 2, 3][..]));
        assert_eq!(parsed.handle, Some(7));
        assert_eq!(parsed.chain, "c1");
    }

    #[test]
    fn oversized_userdata_is_a_codec_error() {
        let mut rule = Rule::new(Family::Ip, "t", "c");
        rule.userdata = Some(vec![0; u16::MAX as usize]);
        let mut msg = build_header(NftMsg::NewRule, rule.family, 0, 1);
        assert!(rule.write_payload(&mut msg).is_err());
    }
}
