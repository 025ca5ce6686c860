//! nf_tables request framing.
//!
//! Every nf_tables request starts with a netlink header followed by a
//! 4-byte `nfgenmsg`. The object codec fills in the rest.

use crate::netlink::message::NLM_F_REQUEST;
use crate::netlink::{MessageBuilder, NfGenMsg, Result};

use super::objects::NftObject;
use super::types::{Family, NFNL_SUBSYS_NFTABLES, NftMsg};

/// Start a request: netlink header plus `nfgenmsg`.
///
/// `flags` is ORed with `NLM_F_REQUEST`.
pub fn build_header(cmd: NftMsg, family: Family, flags: u16, seq: u32) -> MessageBuilder {
    let mut msg = MessageBuilder::new(cmd.msg_type(), NLM_F_REQUEST | flags);
    msg.set_seq(seq);
    msg.append_bytes(&NfGenMsg::new(family.number()).to_bytes());
    msg
}

/// Build a complete request for `obj`.
///
/// The family comes from the object. Codec errors are returned unchanged.
pub fn build<O: NftObject>(cmd: NftMsg, flags: u16, seq: u32, obj: &O) -> Result<Vec<u8>> {
    let mut msg = build_header(cmd, obj.family(), flags, seq);
    obj.write_payload(&mut msg)?;
    Ok(msg.finish())
}

/// Batch begin/end marker.
///
/// Markers carry `AF_UNSPEC` and name the target subsystem in `res_id`.
pub fn batch_marker(msg_type: u16, seq: u32) -> Vec<u8> {
    let mut msg = MessageBuilder::new(msg_type, NLM_F_REQUEST);
    msg.set_seq(seq);
    let header = NfGenMsg {
        family: libc::AF_UNSPEC as u8,
        version: 0,
        res_id: NFNL_SUBSYS_NFTABLES as u16,
    };
    msg.append_bytes(&header.to_bytes());
    msg.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::message::{NLM_F_ACK, NLMSG_HDRLEN, NlMsgHdr};
    use crate::nftables::objects::Table;
    use crate::nftables::types::NFNL_MSG_BATCH_BEGIN;

    #[test]
    fn header_layout() {
        let msg = build_header(NftMsg::GetGen, Family::Unspec, 0, 77).finish();
        assert_eq!(msg.len(), NLMSG_HDRLEN + 4);

        let header = NlMsgHdr::from_bytes(&msg).unwrap();
        assert_eq!(header.nlmsg_type, 0x0a10);
        assert_eq!(header.nlmsg_flags, NLM_F_REQUEST);
        assert_eq!(header.nlmsg_seq, 77);
        assert_eq!(&msg[NLMSG_HDRLEN..], &[0, 0, 0, 0]);
    }

    #[test]
    fn build_uses_object_family() {
        let table = Table::new(Family::Ip6, "filter");
        let msg = build(NftMsg::DelTable, NLM_F_ACK, 3, &table).unwrap();
        let header = NlMsgHdr::from_bytes(&msg).unwrap();
        assert_eq!(header.nlmsg_type, NftMsg::DelTable.msg_type());
        assert_eq!(header.nlmsg_flags, NLM_F_REQUEST | NLM_F_ACK);
        assert_eq!(header.nlmsg_len as usize, msg.len());
        assert_eq!(msg[NLMSG_HDRLEN], 10);
    }

    #[test]
    fn marker_names_subsystem() {
        let msg = batch_marker(NFNL_MSG_BATCH_BEGIN, 1);
        let header = NlMsgHdr::from_bytes(&msg).unwrap();
        assert_eq!(header.nlmsg_type, NFNL_MSG_BATCH_BEGIN);
        assert_eq!(&msg[NLMSG_HDRLEN..], &[0, 0, 0, 10]);
    }
}
