//! nf_tables configuration objects and their attribute codec.
//!
//! Each object kind knows how to write its attributes after the `nfgenmsg`
//! header of a request and how to read itself back from a kernel message.
//! Rule expressions and stateful object data are carried as opaque,
//! already encoded attribute streams.

mod chain;
mod object;
mod rule;
mod set;
mod table;

pub use chain::{Chain, ChainHook};
pub use object::{Object, ObjectFilter};
pub use rule::Rule;
pub use set::{ELEMENT_CHUNK_SIZE, Set, SetElement, SetElementList};
pub use table::Table;

use crate::netlink::attr::AttrIter;
use crate::netlink::parse::{NFGENMSG_LEN, NfGenMsg};
use crate::netlink::{Error, Message, MessageBuilder, Result};

use super::types::{Family, NftMsg};

/// Which kind of configuration object a message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Table,
    Chain,
    Rule,
    Set,
    SetElements,
    Object,
}

impl ObjectKind {
    /// Command that creates (or updates) an object of this kind.
    pub fn new_cmd(self) -> NftMsg {
        match self {
            Self::Table => NftMsg::NewTable,
            Self::Chain => NftMsg::NewChain,
            Self::Rule => NftMsg::NewRule,
            Self::Set => NftMsg::NewSet,
            Self::SetElements => NftMsg::NewSetElem,
            Self::Object => NftMsg::NewObj,
        }
    }

    /// Command that deletes an object of this kind.
    pub fn del_cmd(self) -> NftMsg {
        match self {
            Self::Table => NftMsg::DelTable,
            Self::Chain => NftMsg::DelChain,
            Self::Rule => NftMsg::DelRule,
            Self::Set => NftMsg::DelSet,
            Self::SetElements => NftMsg::DelSetElem,
            Self::Object => NftMsg::DelObj,
        }
    }

    /// Command that reads objects of this kind.
    pub fn get_cmd(self) -> NftMsg {
        match self {
            Self::Table => NftMsg::GetTable,
            Self::Chain => NftMsg::GetChain,
            Self::Rule => NftMsg::GetRule,
            Self::Set => NftMsg::GetSet,
            Self::SetElements => NftMsg::GetSetElem,
            Self::Object => NftMsg::GetObj,
        }
    }

    /// Kind addressed by a command, if any.
    pub fn of(cmd: NftMsg) -> Option<Self> {
        use NftMsg::*;
        Some(match cmd {
            NewTable | GetTable | DelTable => Self::Table,
            NewChain | GetChain | DelChain => Self::Chain,
            NewRule | GetRule | DelRule => Self::Rule,
            NewSet | GetSet | DelSet => Self::Set,
            NewSetElem | GetSetElem | DelSetElem => Self::SetElements,
            NewObj | GetObj | DelObj | GetObjReset => Self::Object,
            NewGen | GetGen | Trace => return None,
        })
    }

    /// Lowercase name for logs.
    pub fn name(self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::Chain => "chain",
            Self::Rule => "rule",
            Self::Set => "set",
            Self::SetElements => "element",
            Self::Object => "object",
        }
    }
}

/// An nf_tables object that can be sent to and read from the kernel.
pub trait NftObject: Sized {
    /// Object kind, selects the message types.
    const KIND: ObjectKind;

    /// Family the object belongs to; goes into the `nfgenmsg` header.
    fn family(&self) -> Family;

    /// Append the object's attributes to a message whose headers are
    /// already written.
    fn write_payload(&self, msg: &mut MessageBuilder) -> Result<()>;

    /// Decode an object from a kernel message.
    fn parse(msg: &Message<'_>) -> Result<Self>;
}

/// Split a message payload into its `nfgenmsg` header and attributes.
pub(crate) fn split_payload<'a>(msg: &Message<'a>) -> Result<(NfGenMsg, AttrIter<'a>)> {
    let header = msg.nfgenmsg()?;
    Ok((header, AttrIter::new(&msg.payload[NFGENMSG_LEN..])))
}

/// Error for a message lacking an attribute the object cannot exist without.
pub(crate) fn missing(kind: ObjectKind, attr: &str) -> Error {
    Error::InvalidMessage(format!("{} message without {}", kind.name(), attr))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_commands() {
        for kind in [
            ObjectKind::Table,
            ObjectKind::Chain,
            ObjectKind::Rule,
            ObjectKind::Set,
            ObjectKind::SetElements,
            ObjectKind::Object,
        ] {
            assert_eq!(ObjectKind::of(kind.new_cmd()), Some(kind));
            assert_eq!(ObjectKind::of(kind.del_cmd()), Some(kind));
            assert_eq!(ObjectKind::of(kind.get_cmd()), Some(kind));
        }
        assert_eq!(ObjectKind::of(NftMsg::NewGen), None);
    }
}
