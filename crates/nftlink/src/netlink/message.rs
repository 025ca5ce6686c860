//! Netlink message header, flags and a walker over receive buffers.

use super::error::{Error, Result};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Netlink message header alignment.
pub const NLMSG_ALIGNTO: usize = 4;

/// Align a length to NLMSG_ALIGNTO boundary.
#[inline]
pub const fn nlmsg_align(len: usize) -> usize {
    (len + NLMSG_ALIGNTO - 1) & !(NLMSG_ALIGNTO - 1)
}

/// Size of the netlink message header.
pub const NLMSG_HDRLEN: usize = nlmsg_align(std::mem::size_of::<NlMsgHdr>());

/// Netlink message header (mirrors struct nlmsghdr).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct NlMsgHdr {
    /// Length of message including header.
    pub nlmsg_len: u32,
    /// Message type.
    pub nlmsg_type: u16,
    /// Additional flags.
    pub nlmsg_flags: u16,
    /// Sequence number.
    pub nlmsg_seq: u32,
    /// Sending process port ID.
    pub nlmsg_pid: u32,
}

impl NlMsgHdr {
    /// Create a new message header.
    pub fn new(msg_type: u16, flags: u16) -> Self {
        Self {
            nlmsg_len: NLMSG_HDRLEN as u32,
            nlmsg_type: msg_type,
            nlmsg_flags: flags,
            nlmsg_seq: 0,
            nlmsg_pid: 0,
        }
    }

    /// Check if the kernel flagged this dump part as inconsistent.
    pub fn is_dump_interrupted(&self) -> bool {
        self.nlmsg_flags & NLM_F_DUMP_INTR != 0
    }

    /// Convert header to bytes.
    pub fn as_bytes(&self) -> &[u8] {
        <Self as IntoBytes>::as_bytes(self)
    }

    /// Parse header from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        Self::ref_from_prefix(data)
            .map(|(r, _)| r)
            .map_err(|_| Error::Truncated {
                expected: std::mem::size_of::<Self>(),
                actual: data.len(),
            })
    }
}

/// Standard netlink message types.
pub struct NlMsgType;

impl NlMsgType {
    /// No operation, message must be discarded.
    pub const NOOP: u16 = 1;
    /// Error message or ACK.
    pub const ERROR: u16 = 2;
    /// End of multipart message.
    pub const DONE: u16 = 3;
    /// Data lost, request resend.
    pub const OVERRUN: u16 = 4;
    /// Types below this value are reserved for control messages.
    pub const MIN_TYPE: u16 = 0x10;
}

/// Netlink message flags.
pub const NLM_F_REQUEST: u16 = 0x01;
pub const NLM_F_MULTI: u16 = 0x02;
pub const NLM_F_ACK: u16 = 0x04;
pub const NLM_F_ECHO: u16 = 0x08;
pub const NLM_F_DUMP_INTR: u16 = 0x10;

// Modifiers to GET request
pub const NLM_F_ROOT: u16 = 0x100;
pub const NLM_F_MATCH: u16 = 0x200;
pub const NLM_F_DUMP: u16 = NLM_F_ROOT | NLM_F_MATCH;

// Modifiers to NEW request
pub const NLM_F_REPLACE: u16 = 0x100;
pub const NLM_F_EXCL: u16 = 0x200;
pub const NLM_F_CREATE: u16 = 0x400;
pub const NLM_F_APPEND: u16 = 0x800;

/// Iterator over netlink messages in a buffer.
pub struct MessageIter<'a> {
    data: &'a [u8],
}

impl<'a> MessageIter<'a> {
    /// Create a new message iterator.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl<'a> Iterator for MessageIter<'a> {
    type Item = Result<(&'a NlMsgHdr, &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.len() < NLMSG_HDRLEN {
            return None;
        }

        let header = match NlMsgHdr::from_bytes(self.data) {
            Ok(h) => h,
            Err(e) => return Some(Err(e)),
        };

        let msg_len = header.nlmsg_len as usize;
        if msg_len < NLMSG_HDRLEN || msg_len > self.data.len() {
            // Stop iterating: the rest of the buffer cannot be trusted.
            self.data = &[];
            return Some(Err(Error::InvalidMessage(format!(
                "invalid message length: {}",
                msg_len
            ))));
        }

        let payload = &self.data[NLMSG_HDRLEN..msg_len];
        let aligned_len = nlmsg_align(msg_len);

        // Move to next message
        if aligned_len >= self.data.len() {
            self.data = &[];
        } else {
            self.data = &self.data[aligned_len..];
        }

        Some(Ok((header, payload)))
    }
}

/// Netlink error message payload.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct NlMsgError {
    /// Error code (negative errno or 0 for ACK).
    pub error: i32,
    /// Original message header that caused the error.
    pub msg: NlMsgHdr,
}

impl NlMsgError {
    /// Parse error message from payload.
    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        Self::ref_from_prefix(data)
            .map(|(r, _)| r)
            .map_err(|_| Error::Truncated {
                expected: std::mem::size_of::<Self>(),
                actual: data.len(),
            })
    }

    /// Check if this is an ACK (no error).
    pub fn is_ack(&self) -> bool {
        self.error == 0
    }

    /// The positive errno carried by this message, 0 for an ACK.
    pub fn errno(&self) -> i32 {
        self.error.abs()
    }
}

/// Trace every message header in `data` at debug level.
///
/// `direction` is a short tag such as `"send"` or `"recv"`.
pub fn trace_messages(direction: &str, data: &[u8]) {
    for result in MessageIter::new(data) {
        match result {
            Ok((header, payload)) => tracing::debug!(
                direction,
                len = header.nlmsg_len,
                msg_type = format_args!("{:#06x}", header.nlmsg_type),
                flags = format_args!("{:#06x}", header.nlmsg_flags),
                seq = header.nlmsg_seq,
                pid = header.nlmsg_pid,
                payload = payload.len(),
                "netlink message"
            ),
            Err(e) => {
                tracing::debug!(direction, error = %e, "undecodable netlink data");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_message(msg_type: u16, flags: u16, seq: u32, payload: &[u8]) -> Vec<u8> {
        let mut header = NlMsgHdr::new(msg_type, flags);
        header.nlmsg_len = (NLMSG_HDRLEN + payload.len()) as u32;
        header.nlmsg_seq = seq;
        let mut buf = header.as_bytes().to_vec();
        buf.extend_from_slice(payload);
        buf.resize(nlmsg_align(buf.len()), 0);
        buf
    }

    #[test]
    fn iterates_concatenated_messages() {
        let mut data = raw_message(0x0a00, NLM_F_MULTI, 7, &[1, 2, 3, 4, 5]);
        data.extend(raw_message(NlMsgType::DONE, NLM_F_MULTI, 7, &[0; 4]));

        let messages: Vec<_> = MessageIter::new(&data).collect::<Result<_>>().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].0.nlmsg_seq, 7);
        assert_eq!(messages[0].1, &[1, 2, 3, 4, 5]);
        assert_eq!(messages[1].0.nlmsg_type, NlMsgType::DONE);
        assert!(messages[1].0.nlmsg_type < NlMsgType::MIN_TYPE);
    }

    #[test]
    fn rejects_bogus_length() {
        let mut data = raw_message(0x0a00, 0, 1, &[0; 8]);
        data[0..4].copy_from_slice(&1000u32.to_ne_bytes());

        let mut iter = MessageIter::new(&data);
        assert!(matches!(iter.next(), Some(Err(Error::InvalidMessage(_)))));
        assert!(iter.next().is_none());
    }

    #[test]
    fn error_payload() {
        let err = NlMsgError {
            error: -libc::ENOENT,
            msg: NlMsgHdr::new(0x0a00, NLM_F_REQUEST),
        };
        let parsed = NlMsgError::from_bytes(err.as_bytes()).unwrap();
        assert!(!parsed.is_ack());
        assert_eq!(parsed.errno(), libc::ENOENT);
    }

    #[test]
    fn dump_flag_composition() {
        assert_eq!(NLM_F_DUMP, 0x300);
        let header = NlMsgHdr::new(0x0a01, NLM_F_MULTI | NLM_F_DUMP_INTR);
        assert_ne!(header.nlmsg_flags & NLM_F_MULTI, 0);
        assert!(header.is_dump_interrupted());
    }
}
