//! Message builder for constructing netlink messages.

use zerocopy::{Immutable, IntoBytes};

use super::attr::{NLA_F_NESTED, NLA_MAX_PAYLOAD, NlAttr, nla_align};
use super::error::{Error, Result};
use super::message::{NLMSG_HDRLEN, NlMsgHdr, nlmsg_align};

/// Token returned when starting a nested attribute.
/// Used to finalize the nested attribute length.
#[derive(Debug, Clone, Copy)]
pub struct NestToken {
    /// Offset of the nested attribute header in the buffer.
    offset: usize,
}

/// Builder for constructing netlink messages.
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    buf: Vec<u8>,
}

impl MessageBuilder {
    /// Create a new message builder with the given type and flags.
    pub fn new(msg_type: u16, flags: u16) -> Self {
        let header = NlMsgHdr::new(msg_type, flags);
        let mut buf = vec![0u8; NLMSG_HDRLEN];
        buf[..std::mem::size_of::<NlMsgHdr>()].copy_from_slice(header.as_bytes());
        Self { buf }
    }

    /// Get the current message length.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Check if the message is empty (header only).
    pub fn is_empty(&self) -> bool {
        self.buf.len() == NLMSG_HDRLEN
    }

    /// Append raw bytes to the message (with alignment padding).
    pub fn append_bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
        let aligned = nlmsg_align(self.buf.len());
        self.buf.resize(aligned, 0);
    }

    /// Append a fixed-size wire struct (family header and the like).
    pub fn append<T: IntoBytes + Immutable>(&mut self, data: &T) {
        self.append_bytes(data.as_bytes());
    }

    /// Append an attribute with the given type and data.
    pub fn append_attr(&mut self, attr_type: u16, data: &[u8]) {
        let attr = NlAttr::new(attr_type, data.len());
        self.buf.extend_from_slice(attr.as_bytes());
        self.buf.extend_from_slice(data);
        let aligned = nla_align(self.buf.len());
        self.buf.resize(aligned, 0);
    }

    /// Append an attribute whose payload size is caller controlled,
    /// refusing payloads that do not fit the 16-bit length field.
    pub fn try_append_attr(&mut self, attr_type: u16, data: &[u8]) -> Result<()> {
        if data.len() > NLA_MAX_PAYLOAD {
            return Err(Error::InvalidAttribute(format!(
                "attribute {} payload of {} bytes exceeds {}",
                attr_type,
                data.len(),
                NLA_MAX_PAYLOAD
            )));
        }
        self.append_attr(attr_type, data);
        Ok(())
    }

    /// Append a u32 attribute (big endian / network order).
    pub fn append_attr_u32_be(&mut self, attr_type: u16, value: u32) {
        self.append_attr(attr_type, &value.to_be_bytes());
    }

    /// Append an i32 attribute (big endian / network order).
    pub fn append_attr_i32_be(&mut self, attr_type: u16, value: i32) {
        self.append_attr(attr_type, &value.to_be_bytes());
    }

    /// Append a u64 attribute (big endian / network order).
    pub fn append_attr_u64_be(&mut self, attr_type: u16, value: u64) {
        self.append_attr(attr_type, &value.to_be_bytes());
    }

    /// Append a null-terminated string attribute.
    pub fn append_attr_str(&mut self, attr_type: u16, value: &str) {
        let mut data = value.as_bytes().to_vec();
        data.push(0); // null terminator
        self.append_attr(attr_type, &data);
    }

    /// Start a nested attribute. Returns a token to finalize it.
    pub fn nest_start(&mut self, attr_type: u16) -> NestToken {
        let offset = self.buf.len();
        let attr = NlAttr::new(attr_type | NLA_F_NESTED, 0);
        self.buf.extend_from_slice(attr.as_bytes());
        NestToken { offset }
    }

    /// End a nested attribute started with `nest_start`.
    pub fn nest_end(&mut self, token: NestToken) -> Result<()> {
        let len = self.buf.len() - token.offset;
        let len = u16::try_from(len).map_err(|_| {
            Error::InvalidAttribute(format!("nested attribute of {} bytes overflows", len))
        })?;
        self.buf[token.offset..token.offset + 2].copy_from_slice(&len.to_ne_bytes());
        let aligned = nla_align(self.buf.len());
        self.buf.resize(aligned, 0);
        Ok(())
    }

    /// Set the sequence number.
    pub fn set_seq(&mut self, seq: u32) {
        self.buf[8..12].copy_from_slice(&seq.to_ne_bytes());
    }

    /// Set the port ID.
    pub fn set_pid(&mut self, pid: u32) {
        self.buf[12..16].copy_from_slice(&pid.to_ne_bytes());
    }

    /// Finalize and return the message bytes.
    pub fn finish(mut self) -> Vec<u8> {
        let len = self.buf.len() as u32;
        self.buf[0..4].copy_from_slice(&len.to_ne_bytes());
        self.buf
    }

    /// Get the current buffer for inspection.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::attr::{AttrIter, NLA_HDRLEN};
    use crate::netlink::message::NLM_F_REQUEST;

    #[test]
    fn test_simple_message() {
        let msg = MessageBuilder::new(16, NLM_F_REQUEST).finish();
        assert_eq!(msg.len(), NLMSG_HDRLEN);

        let header = NlMsgHdr::from_bytes(&msg).unwrap();
        assert_eq!(header.nlmsg_len as usize, NLMSG_HDRLEN);
        assert_eq!(header.nlmsg_type, 16);
        assert_eq!(header.nlmsg_flags, NLM_F_REQUEST);
    }

    #[test]
    fn test_seq_and_pid() {
        let mut builder = MessageBuilder::new(16, NLM_F_REQUEST);
        builder.set_seq(42);
        builder.set_pid(1234);
        let msg = builder.finish();

        let header = NlMsgHdr::from_bytes(&msg).unwrap();
        assert_eq!(header.nlmsg_seq, 42);
        assert_eq!(header.nlmsg_pid, 1234);
    }

    #[test]
    fn test_attribute() {
        let mut builder = MessageBuilder::new(16, NLM_F_REQUEST);
        builder.append_attr_u32_be(1, 0x12345678);
        let msg = builder.finish();

        assert_eq!(msg.len(), NLMSG_HDRLEN + NLA_HDRLEN + 4);
        assert_eq!(&msg[NLMSG_HDRLEN + NLA_HDRLEN..], &[0x12, 0x34, 0x56, 0x78]);
    }

    #[test]
    fn test_nested_attribute() {
        let mut builder = MessageBuilder::new(16, NLM_F_REQUEST);
        let nest = builder.nest_start(1);
        builder.append_attr_u32_be(2, 100);
        builder.nest_end(nest).unwrap();
        let msg = builder.finish();

        let (kind, inner) = AttrIter::new(&msg[NLMSG_HDRLEN..]).next().unwrap();
        assert_eq!(kind, 1);
        let (inner_kind, value) = AttrIter::new(inner).next().unwrap();
        assert_eq!(inner_kind, 2);
        assert_eq!(value, &100u32.to_be_bytes());
    }

    #[test]
    fn test_oversized_attribute_is_refused() {
        let mut builder = MessageBuilder::new(16, NLM_F_REQUEST);
        let blob = vec![0u8; NLA_MAX_PAYLOAD + 1];
        assert!(builder.try_append_attr(1, &blob).is_err());
        assert!(builder.is_empty());
    }
}
