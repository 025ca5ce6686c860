//! nf_tables chain.

use crate::netlink::attr::{AttrIter, get};
use crate::netlink::{Message, MessageBuilder, Result};
use crate::nftables::types::{Family, chain_attr};

use super::{NftObject, ObjectKind, missing, split_payload};

/// Netfilter hook a base chain is attached to.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "output", derive(serde::Serialize))]
pub struct ChainHook {
    /// Hook number (NF_INET_*).
    pub hooknum: u32,
    /// Priority within the hook; lower runs first.
    pub priority: i32,
    /// Device for netdev-family hooks.
    #[cfg_attr(feature = "output", serde(skip_serializing_if = "Option::is_none"))]
    pub device: Option<String>,
}

/// A chain inside a table.
///
/// A chain with a [`ChainHook`] is a base chain and sees packets directly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "output", derive(serde::Serialize))]
pub struct Chain {
    pub family: Family,
    pub table: String,
    pub name: String,
    #[cfg_attr(feature = "output", serde(skip_serializing_if = "Option::is_none"))]
    pub handle: Option<u64>,
    #[cfg_attr(feature = "output", serde(skip_serializing_if = "Option::is_none"))]
    pub hook: Option<ChainHook>,
    /// Base chain verdict policy (NF_ACCEPT = 1, NF_DROP = 0).
    #[cfg_attr(feature = "output", serde(skip_serializing_if = "Option::is_none"))]
    pub policy: Option<u32>,
    /// Chain type: "filter", "nat" or "route".
    #[cfg_attr(feature = "output", serde(skip_serializing_if = "Option::is_none"))]
    pub chain_type: Option<String>,
    pub use_count: u32,
}

impl Chain {
    /// Create a regular chain.
    pub fn new(family: Family, table: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            family,
            table: table.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    /// Turn the chain into a base chain on `hooknum`.
    pub fn with_hook(mut self, chain_type: &str, hooknum: u32, priority: i32) -> Self {
        self.chain_type = Some(chain_type.to_string());
        self.hook = Some(ChainHook {
            hooknum,
            priority,
            device: None,
        });
        self
    }

    /// Set the base chain policy.
    pub fn with_policy(mut self, policy: u32) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Check whether this is a base chain.
    pub fn is_base(&self) -> bool {
        self.hook.is_some()
    }
}

fn parse_hook(data: &[u8]) -> Result<ChainHook> {
    let mut hook = ChainHook {
        hooknum: 0,
        priority: 0,
        device: None,
    };
    for (kind, value) in AttrIter::new(data) {
        match kind {
            chain_attr::HOOK_HOOKNUM => hook.hooknum = get::u32_be(value)?,
            chain_attr::HOOK_PRIORITY => hook.priority = get::i32_be(value)?,
            chain_attr::HOOK_DEV => hook.device = Some(get::string(value)?.to_string()),
            _ => {}
        }
    }
    Ok(hook)
}

impl NftObject for Chain {
    const KIND: ObjectKind = ObjectKind::Chain;

    fn family(&self) -> Family {
        self.family
    }

    fn write_payload(&self, msg: &mut MessageBuilder) -> Result<()> {
        if !self.table.is_empty() {
            msg.append_attr_str(chain_attr::TABLE, &self.table);
        }
        if !self.name.is_empty() {
            msg.append_attr_str(chain_attr::NAME, &self.name);
        }
        if let Some(handle) = self.handle {
            msg.append_attr_u64_be(chain_attr::HANDLE, handle);
        }
        if let Some(hook) = &self.hook {
            let nest = msg.nest_start(chain_attr::HOOK);
            msg.append_attr_u32_be(chain_attr::HOOK_HOOKNUM, hook.hooknum);
            msg.append_attr_i32_be(chain_attr::HOOK_PRIORITY, hook.priority);
            if let Some(dev) = &hook.device {
                msg.append_attr_str(chain_attr::HOOK_DEV, dev);
            }
            msg.nest_end(nest)?;
        }
        if let Some(policy) = self.policy {
            msg.append_attr_u32_be(chain_attr::POLICY, policy);
        }
        if let Some(chain_type) = &self.chain_type {
            msg.append_attr_str(chain_attr::TYPE, chain_type);
        }
        Ok(())
    }

    fn parse(msg: &Message<'_>) -> Result<Self> {
        let (header, attrs) = split_payload(msg)?;
        let mut chain = Chain {
            family: Family::from_u8(header.family),
            ..Default::default()
        };

        for (kind, data) in attrs {
            match kind {
                chain_attr::TABLE => chain.table = get::string(data)?.to_string(),
                chain_attr::NAME => chain.name = get::string(data)?.to_string(),
                chain_attr::HANDLE => chain.handle = Some(get::u64_be(data)?),
                chain_attr::HOOK => chain.hook = Some(parse_hook(data)?),
                chain_attr::POLICY => chain.policy = Some(get::u32_be(data)?),
                chain_attr::TYPE => chain.chain_type = Some(get::string(data)?.to_string()),
                chain_attr::USE => chain.use_count = get::u32_be(data)?,
                _ => {}
            }
        }

        if chain.table.is_empty() {
            return Err(missing(Self::KIND, "table"));
        }
        if chain.name.is_empty() {
            return Err(missing(Self::KIND, "name"));
        }
        Ok(chain)
    }
}
