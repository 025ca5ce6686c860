//! nf_tables table.

use crate::netlink::attr::get;
use crate::netlink::{Message, MessageBuilder, Result};
use crate::nftables::types::{Family, table_attr};

use super::{NftObject, ObjectKind, missing, split_payload};

/// A table: the top-level container for chains, sets and objects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "output", derive(serde::Serialize))]
pub struct Table {
    /// Address family.
    pub family: Family,
    /// Table name.
    pub name: String,
    /// `NFT_TABLE_F_*` flags (dormant, owner, ...).
    #[cfg_attr(feature = "output", serde(skip_serializing_if = "Option::is_none"))]
    pub flags: Option<u32>,
    /// Kernel handle.
    #[cfg_attr(feature = "output", serde(skip_serializing_if = "Option::is_none"))]
    pub handle: Option<u64>,
    /// Number of chains, sets and objects referring to the table.
    pub use_count: u32,
}

impl Table {
    /// Create a table with the given family and name.
    pub fn new(family: Family, name: impl Into<String>) -> Self {
        Self {
            family,
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the table flags.
    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = Some(flags);
        self
    }

    /// Address the table by handle.
    pub fn with_handle(mut self, handle: u64) -> Self {
        self.handle = Some(handle);
        self
    }
}

impl NftObject for Table {
    const KIND: ObjectKind = ObjectKind::Table;

    fn family(&self) -> Family {
        self.family
    }

    fn write_payload(&self, msg: &mut MessageBuilder) -> Result<()> {
        if !self.name.is_empty() {
            msg.append_attr_str(table_attr::NAME, &self.name);
        }
        if let Some(flags) = self.flags {
            msg.append_attr_u32_be(table_attr::FLAGS, flags);
        }
        if let Some(handle) = self.handle {
            msg.append_attr_u64_be(table_attr::HANDLE, handle);
        }
        Ok(())
    }

    fn parse(msg: &Message<'_>) -> Result<Self> {
        let (header, attrs) = split_payload(msg)?;
        let mut table = Table {
            family: Family::from_u8(header.family),
            ..Default::default()
        };

        for (kind, data) in attrs {
            match kind {
                table_attr::NAME => table.name = get::string(data)?.to_string(),
                table_attr::FLAGS => table.flags = Some(get::u32_be(data)?),
                table_attr::USE => table.use_count = get::u32_be(data)?,
                table_attr::HANDLE => table.handle = Some(get::u64_be(data)?),
                _ => {}
            }
        }

        if table.name.is_empty() {
            return Err(missing(Self::KIND, "name"));
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nftables::frame::build_header;
    use crate::nftables::objects::test_util::with_message;
    use crate::nftables::types::NftMsg;

    #[test]
    fn parses_what_it_writes() {
        let table = Table::new(Family::Inet, "filter")
            .with_flags(1)
            .with_handle(42);
        let mut msg = build_header(NftMsg::NewTable, table.family, 0, 1);
        table.write_payload(&mut msg).unwrap();
        msg.append_attr_u32_be(table_attr::USE, 3);

        let parsed = with_message(msg, |m| Table::parse(m)).unwrap();
        assert_eq!(parsed.name, "filter");
        assert_eq!(parsed.family, Family::Inet);
        assert_eq!(parsed.flags, Some(1));
        assert_eq!(parsed.handle, Some(42));
        assert_eq!(parsed.use_count, 3);
    }

    #[test]
    fn nameless_table_is_rejected() {
        let msg = build_header(NftMsg::NewTable, Family::Ip, 0, 1);
        assert!(with_message(msg, |m| Table::parse(m)).is_err());
    }
}
