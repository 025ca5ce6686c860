//! Parser combinators for fixed netlink family headers.
//!
//! Attribute payloads are walked with [`AttrIter`](super::AttrIter); the
//! fixed-layout headers that precede them are parsed here with winnow.

use winnow::binary::{be_u16, le_u8};
use winnow::error::ContextError;
use winnow::prelude::*;

use super::error::{Error, Result};

/// Result type for winnow parsers.
pub type PResult<T> = core::result::Result<T, winnow::error::ErrMode<ContextError>>;

/// Netfilter generic message header (mirrors struct nfgenmsg).
///
/// `res_id` is kept in host order here; on the wire it is big endian.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NfGenMsg {
    /// Address family (NFPROTO_*).
    pub family: u8,
    /// nfnetlink version, always 0.
    pub version: u8,
    /// Resource id; nf_tables stores the ruleset generation here.
    pub res_id: u16,
}

/// Size of the nfgenmsg header on the wire.
pub const NFGENMSG_LEN: usize = 4;

impl NfGenMsg {
    /// Create a header for the given family with a zero resource id.
    pub fn new(family: u8) -> Self {
        Self {
            family,
            version: 0,
            res_id: 0,
        }
    }

    /// Parse the header, advancing the input past it.
    pub fn parse(input: &mut &[u8]) -> PResult<Self> {
        (le_u8, le_u8, be_u16)
            .map(|(family, version, res_id)| Self {
                family,
                version,
                res_id,
            })
            .parse_next(input)
    }

    /// Parse the header at the start of a message payload.
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        let mut input = payload;
        Self::parse(&mut input).map_err(|_| Error::Truncated {
            expected: NFGENMSG_LEN,
            actual: payload.len(),
        })
    }

    /// Wire representation.
    pub fn to_bytes(self) -> [u8; NFGENMSG_LEN] {
        let res_id = self.res_id.to_be_bytes();
        [self.family, self.version, res_id[0], res_id[1]]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nfgenmsg_roundtrip_keeps_network_order() {
        let header = NfGenMsg {
            family: 2,
            version: 0,
            res_id: 0x0102,
        };
        let bytes = header.to_bytes();
        assert_eq!(bytes, [2, 0, 0x01, 0x02]);
        assert_eq!(NfGenMsg::from_payload(&bytes).unwrap(), header);
    }

    #[test]
    fn nfgenmsg_truncated() {
        assert!(matches!(
            NfGenMsg::from_payload(&[2, 0]),
            Err(Error::Truncated { expected: 4, .. })
        ));
    }
}
