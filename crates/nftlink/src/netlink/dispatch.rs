//! Per-message dispatch of received datagrams.
//!
//! A received buffer may hold several netlink messages. [`dispatch`] walks
//! them, applies the sequence/port filters, handles the control messages
//! and hands everything else to a [`MessageHandler`].

use super::error::{Error, Result};
use super::message::{MessageIter, NlMsgError, NlMsgHdr, NlMsgType};
use super::parse::NfGenMsg;

/// Whether the receive loop should keep going after a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Keep processing messages.
    Continue,
    /// The exchange is complete.
    Stop,
}

/// A received netlink message.
#[derive(Debug, Clone, Copy)]
pub struct Message<'a> {
    /// The message header.
    pub header: &'a NlMsgHdr,
    /// Everything after the header.
    pub payload: &'a [u8],
}

impl<'a> Message<'a> {
    /// The netfilter family header at the start of the payload.
    pub fn nfgenmsg(&self) -> Result<NfGenMsg> {
        NfGenMsg::from_payload(self.payload)
    }

    /// Ruleset generation reported by the kernel in this message.
    pub fn generation(&self) -> Result<u16> {
        Ok(self.nfgenmsg()?.res_id)
    }

    /// nfnetlink subsystem of the message type.
    pub fn subsystem(&self) -> u8 {
        (self.header.nlmsg_type >> 8) as u8
    }

    /// Subsystem-specific message type.
    pub fn kind(&self) -> u8 {
        (self.header.nlmsg_type & 0xff) as u8
    }

    /// Sequence number.
    pub fn seq(&self) -> u32 {
        self.header.nlmsg_seq
    }
}

/// Receiver for the messages contained in a datagram.
///
/// Implemented by the dump collectors, the batch acknowledgement collector
/// and event handlers. Closures taking a [`Message`] implement it too.
pub trait MessageHandler {
    /// Handle a data (non-control) message.
    fn handle(&mut self, msg: &Message<'_>) -> Result<Control>;

    /// Handle an NLMSG_ERROR message. `errno` is positive, 0 for an ACK.
    ///
    /// The default ends the exchange on an ACK and turns anything else
    /// into [`Error::Kernel`].
    fn acknowledge(&mut self, seq: u32, errno: i32) -> Result<Control> {
        let _ = seq;
        if errno == 0 {
            Ok(Control::Stop)
        } else {
            Err(Error::from_errno(errno))
        }
    }
}

impl<F> MessageHandler for F
where
    F: FnMut(&Message<'_>) -> Result<Control>,
{
    fn handle(&mut self, msg: &Message<'_>) -> Result<Control> {
        self(msg)
    }
}

/// Handler for exchanges that only expect control messages.
#[derive(Debug, Default, Clone, Copy)]
pub struct AckOnly;

impl MessageHandler for AckOnly {
    fn handle(&mut self, _msg: &Message<'_>) -> Result<Control> {
        Ok(Control::Continue)
    }
}

/// Filters applied to every message before dispatch. Zero disables a check.
///
/// The session's sequence counter wraps through 0, so the one request in
/// every 2^32 that is given sequence number 0 has its replies matched on
/// port only, the same as `mnl_cb_run` does.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Filter {
    /// Expected sequence number.
    pub seq: u32,
    /// Expected destination port.
    pub port_id: u32,
}

impl Filter {
    /// No filtering (multicast notifications).
    pub const NONE: Filter = Filter { seq: 0, port_id: 0 };

    /// Replies to one request.
    pub fn new(seq: u32, port_id: u32) -> Self {
        Self { seq, port_id }
    }

    /// Replies addressed to `port_id`, any sequence number.
    pub fn port(port_id: u32) -> Self {
        Self { seq: 0, port_id }
    }
}

/// Run `handler` over every message in `data`.
///
/// Returns [`Control::Stop`] as soon as the exchange is complete (DONE, ACK
/// or the handler asked to stop) and [`Control::Continue`] when the buffer
/// was exhausted and more datagrams are expected.
pub fn dispatch<H>(data: &[u8], filter: Filter, handler: &mut H) -> Result<Control>
where
    H: MessageHandler + ?Sized,
{
    for result in MessageIter::new(data) {
        let (header, payload) = result?;

        if filter.port_id != 0 && header.nlmsg_pid != 0 && header.nlmsg_pid != filter.port_id {
            return Err(Error::PortMismatch {
                expected: filter.port_id,
                actual: header.nlmsg_pid,
            });
        }

        if filter.seq != 0 && header.nlmsg_seq != filter.seq {
            return Err(Error::SequenceMismatch {
                expected: filter.seq,
                actual: header.nlmsg_seq,
            });
        }

        if header.is_dump_interrupted() {
            return Err(Error::DumpInterrupted);
        }

        let control = match header.nlmsg_type {
            NlMsgType::DONE => Control::Stop,
            NlMsgType::ERROR => {
                let err = NlMsgError::from_bytes(payload)?;
                handler.acknowledge(header.nlmsg_seq, err.errno())?
            }
            t if t >= NlMsgType::MIN_TYPE => handler.handle(&Message { header, payload })?,
            // NOOP, OVERRUN and the reserved range carry nothing for us.
            _ => Control::Continue,
        };

        if control == Control::Stop {
            return Ok(Control::Stop);
        }
    }

    Ok(Control::Continue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::message::{NLM_F_DUMP_INTR, NLM_F_MULTI, NLMSG_HDRLEN, nlmsg_align};
    use zerocopy::IntoBytes;

    fn message(msg_type: u16, flags: u16, seq: u32, pid: u32, payload: &[u8]) -> Vec<u8> {
        let mut header = NlMsgHdr::new(msg_type, flags);
        header.nlmsg_len = (NLMSG_HDRLEN + payload.len()) as u32;
        header.nlmsg_seq = seq;
        header.nlmsg_pid = pid;
        let mut buf = header.as_bytes().to_vec();
        buf.extend_from_slice(payload);
        buf.resize(nlmsg_align(buf.len()), 0);
        buf
    }

    fn error(seq: u32, errno: i32) -> Vec<u8> {
        let err = NlMsgError {
            error: -errno,
            msg: NlMsgHdr::new(0x0a00, 0),
        };
        message(NlMsgType::ERROR, 0, seq, 0, err.as_bytes())
    }

    #[test]
    fn data_then_done() {
        let mut data = message(0x0a00, NLM_F_MULTI, 5, 0, &[2, 0, 0, 1]);
        data.extend(message(0x0a00, NLM_F_MULTI, 5, 0, &[2, 0, 0, 1]));
        data.extend(message(NlMsgType::DONE, NLM_F_MULTI, 5, 0, &[0; 4]));

        let mut seen = 0;
        let control = dispatch(&data, Filter::new(5, 0), &mut |msg: &Message<'_>| -> Result<Control> {
            assert_eq!(msg.generation()?, 1);
            seen += 1;
            Ok(Control::Continue)
        })
        .unwrap();
        assert_eq!(control, Control::Stop);
        assert_eq!(seen, 2);
    }

    #[test]
    fn partial_dump_continues() {
        let data = message(0x0a00, NLM_F_MULTI, 5, 0, &[2, 0, 0, 1]);
        let control = dispatch(&data, Filter::new(5, 0), &mut AckOnly).unwrap();
        assert_eq!(control, Control::Continue);
    }

    #[test]
    fn ack_stops_and_error_fails() {
        assert_eq!(
            dispatch(&error(9, 0), Filter::new(9, 0), &mut AckOnly).unwrap(),
            Control::Stop
        );
        let err = dispatch(&error(9, libc::ENOENT), Filter::new(9, 0), &mut AckOnly).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn filters_reject_foreign_messages() {
        let data = message(0x0a00, 0, 8, 0, &[0; 4]);
        assert!(matches!(
            dispatch(&data, Filter::new(7, 0), &mut AckOnly),
            Err(Error::SequenceMismatch {
                expected: 7,
                actual: 8
            })
        ));

        let data = message(0x0a00, 0, 8, 99, &[0; 4]);
        assert!(matches!(
            dispatch(&data, Filter::port(100), &mut AckOnly),
            Err(Error::PortMismatch { .. })
        ));
        // pid 0 comes from the kernel and always passes
        let data = message(0x0a00, 0, 8, 0, &[0; 4]);
        assert!(dispatch(&data, Filter::port(100), &mut AckOnly).is_ok());
    }

    #[test]
    fn sequence_zero_matches_any_reply() {
        let data = message(0x0a00, 0, 8, 100, &[0; 4]);
        assert_eq!(Filter::new(0, 100), Filter::port(100));
        assert!(dispatch(&data, Filter::new(0, 100), &mut AckOnly).is_ok());
    }

    #[test]
    fn interrupted_dump_is_retryable() {
        let data = message(0x0a00, NLM_F_MULTI | NLM_F_DUMP_INTR, 1, 0, &[0; 4]);
        let err = dispatch(&data, Filter::NONE, &mut AckOnly).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn noop_and_overrun_are_skipped() {
        let mut data = message(NlMsgType::NOOP, 0, 1, 0, &[]);
        data.extend(message(NlMsgType::OVERRUN, 0, 1, 0, &[]));
        let mut seen = 0;
        let control = dispatch(&data, Filter::NONE, &mut |_: &Message<'_>| -> Result<Control> {
            seen += 1;
            Ok(Control::Continue)
        })
        .unwrap();
        assert_eq!(control, Control::Continue);
        assert_eq!(seen, 0);
    }
}
