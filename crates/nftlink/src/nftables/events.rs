//! Ruleset change notifications.
//!
//! After [`Session::subscribe_events`] the kernel multicasts every
//! committed change to the session. [`Session::listen`] hands the raw
//! messages to a [`MessageHandler`]; [`Session::listen_events`] decodes
//! them into [`NftEvent`]s first.
//!
//! # Example
//!
//! ```ignore
//! use nftlink::{Control, NftEvent, Session};
//!
//! let mut monitor = Session::new()?;
//! monitor.subscribe_events()?;
//! monitor
//!     .listen_events(|event| {
//!         println!("{} {}", event.action(), event.kind());
//!         Control::Continue
//!     })
//!     .await?;
//! ```

use crate::netlink::attr::get;
use crate::netlink::{Control, Filter, Message, MessageHandler, Result, Transport, dispatch};

use super::batch::nlmsg_max_size;
use super::objects::{Chain, NftObject, Object, Rule, Set, SetElementList, Table, split_payload};
use super::session::Session;
use super::types::{NFNL_SUBSYS_NFTABLES, NFNLGRP_NFTABLES, NftMsg, gen_attr};

/// A committed ruleset change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NftEvent {
    NewTable(Table),
    DelTable(Table),
    NewChain(Chain),
    DelChain(Chain),
    NewRule(Rule),
    DelRule(Rule),
    NewSet(Set),
    DelSet(Set),
    NewSetElem(SetElementList),
    DelSetElem(SetElementList),
    NewObj(Object),
    DelObj(Object),
    /// A transaction was committed; sent once after its object events.
    NewGen {
        /// The new ruleset generation.
        generation: u32,
        /// Process that committed the transaction.
        pid: Option<u32>,
        /// Name of that process.
        process: Option<String>,
    },
}

impl NftEvent {
    /// Decode a notification.
    ///
    /// Returns `Ok(None)` for messages that are not nf_tables change
    /// notifications (other subsystems, traces, requests).
    pub fn from_message(msg: &Message<'_>) -> Result<Option<Self>> {
        if msg.subsystem() != NFNL_SUBSYS_NFTABLES {
            return Ok(None);
        }
        let Some(cmd) = NftMsg::from_u8(msg.kind()) else {
            return Ok(None);
        };

        let event = match cmd {
            NftMsg::NewTable => Self::NewTable(Table::parse(msg)?),
            NftMsg::DelTable => Self::DelTable(Table::parse(msg)?),
            NftMsg::NewChain => Self::NewChain(Chain::parse(msg)?),
            NftMsg::DelChain => Self::DelChain(Chain::parse(msg)?),
            NftMsg::NewRule => Self::NewRule(Rule::parse(msg)?),
            NftMsg::DelRule => Self::DelRule(Rule::parse(msg)?),
            NftMsg::NewSet => Self::NewSet(Set::parse(msg)?),
            NftMsg::DelSet => Self::DelSet(Set::parse(msg)?),
            NftMsg::NewSetElem => Self::NewSetElem(SetElementList::parse(msg)?),
            NftMsg::DelSetElem => Self::DelSetElem(SetElementList::parse(msg)?),
            NftMsg::NewObj => Self::NewObj(Object::parse(msg)?),
            NftMsg::DelObj => Self::DelObj(Object::parse(msg)?),
            NftMsg::NewGen => parse_gen(msg)?,
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    /// Returns true if this is a "new" event.
    pub fn is_new(&self) -> bool {
        !self.is_del()
    }

    /// Returns true if this is a "delete" event.
    pub fn is_del(&self) -> bool {
        matches!(
            self,
            Self::DelTable(_)
                | Self::DelChain(_)
                | Self::DelRule(_)
                | Self::DelSet(_)
                | Self::DelSetElem(_)
                | Self::DelObj(_)
        )
    }

    /// Returns "add" or "delete", as the nft monitor prints it.
    pub fn action(&self) -> &'static str {
        if self.is_new() { "add" } else { "delete" }
    }

    /// Kind of object the event is about.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NewTable(_) | Self::DelTable(_) => "table",
            Self::NewChain(_) | Self::DelChain(_) => "chain",
            Self::NewRule(_) | Self::DelRule(_) => "rule",
            Self::NewSet(_) | Self::DelSet(_) => "set",
            Self::NewSetElem(_) | Self::DelSetElem(_) => "element",
            Self::NewObj(_) | Self::DelObj(_) => "object",
            Self::NewGen { .. } => "generation",
        }
    }

    /// Table the changed object lives in, if any.
    pub fn table(&self) -> Option<&str> {
        match self {
            Self::NewTable(t) | Self::DelTable(t) => Some(&t.name),
            Self::NewChain(c) | Self::DelChain(c) => Some(&c.table),
            Self::NewRule(r) | Self::DelRule(r) => Some(&r.table),
            Self::NewSet(s) | Self::DelSet(s) => Some(&s.table),
            Self::NewSetElem(e) | Self::DelSetElem(e) => Some(&e.table),
            Self::NewObj(o) | Self::DelObj(o) => Some(&o.table),
            Self::NewGen { .. } => None,
        }
    }
}

fn parse_gen(msg: &Message<'_>) -> Result<NftEvent> {
    let (_, attrs) = split_payload(msg)?;
    let mut generation = 0;
    let mut pid = None;
    let mut process = None;
    for (kind, data) in attrs {
        match kind {
            gen_attr::ID => generation = get::u32_be(data)?,
            gen_attr::PROC_PID => pid = Some(get::u32_be(data)?),
            gen_attr::PROC_NAME => process = Some(get::string(data)?.to_string()),
            _ => {}
        }
    }
    Ok(NftEvent::NewGen {
        generation,
        pid,
        process,
    })
}

/// Adapts a closure over decoded events to a [`MessageHandler`].
struct EventDecoder<F> {
    callback: F,
}

impl<F> MessageHandler for EventDecoder<F>
where
    F: FnMut(NftEvent) -> Control,
{
    fn handle(&mut self, msg: &Message<'_>) -> Result<Control> {
        match NftEvent::from_message(msg) {
            Ok(Some(event)) => Ok((self.callback)(event)),
            Ok(None) => Ok(Control::Continue),
            Err(e) => {
                tracing::debug!(msg_type = msg.header.nlmsg_type, error = %e, "skipping undecodable event");
                Ok(Control::Continue)
            }
        }
    }
}

impl<T: Transport> Session<T> {
    /// Join the nf_tables notification group.
    pub fn subscribe_events(&mut self) -> Result<()> {
        self.transport.add_membership(NFNLGRP_NFTABLES)
    }

    /// Receive notifications until `handler` stops or the transport fails.
    ///
    /// The receive buffer is first forced to
    /// [`SessionConfig::event_buffer_size`](super::SessionConfig::event_buffer_size);
    /// without the privilege for that the regular limit applies and bursts
    /// are more likely to overrun it. Overruns lose events but do not end
    /// the loop.
    pub async fn listen<H>(&mut self, handler: &mut H) -> Result<()>
    where
        H: MessageHandler + ?Sized,
    {
        self.size_event_buffer();

        loop {
            self.recv_buf.clear();
            self.recv_buf.reserve(nlmsg_max_size());
            let n = match self.transport.recv(&mut self.recv_buf).await {
                Ok(n) => n,
                Err(e) if e.is_buffer_overrun() => {
                    tracing::warn!("lost netlink events, socket receive buffer overrun");
                    continue;
                }
                Err(e) => return Err(e),
            };
            if n == 0 {
                return Ok(());
            }
            self.trace("recv", &self.recv_buf[..n]);
            if dispatch(&self.recv_buf[..n], Filter::NONE, handler)? == Control::Stop {
                return Ok(());
            }
        }
    }

    /// Like [`listen`](Self::listen), with every notification decoded.
    ///
    /// Notifications that fail to decode are skipped.
    pub async fn listen_events<F>(&mut self, callback: F) -> Result<()>
    where
        F: FnMut(NftEvent) -> Control,
    {
        let mut decoder = EventDecoder { callback };
        self.listen(&mut decoder).await
    }

    fn size_event_buffer(&mut self) {
        let size = self.config.event_buffer_size;
        match self.transport.force_recv_buffer(size) {
            Ok(()) => tracing::debug!(size, "forced netlink receive buffer"),
            Err(e) => {
                if let Err(e) = self.transport.set_recv_buffer(size) {
                    tracing::debug!(size, error = %e, "cannot set netlink receive buffer");
                }
                let granted = self.transport.recv_buffer().unwrap_or_default();
                tracing::warn!(
                    requested = size,
                    granted,
                    error = %e,
                    "cannot force netlink receive buffer, events may be lost under load"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::MessageBuilder;
    use crate::netlink::message::NLMSG_HDRLEN;
    use crate::netlink::message::NlMsgHdr;
    use crate::nftables::frame::build;
    use crate::nftables::types::Family;

    fn decode(bytes: &[u8]) -> Option<NftEvent> {
        let header = NlMsgHdr::from_bytes(bytes).unwrap();
        let msg = Message {
            header,
            payload: &bytes[NLMSG_HDRLEN..header.nlmsg_len as usize],
        };
        NftEvent::from_message(&msg).unwrap()
    }

    #[test]
    fn table_events() {
        let table = Table::new(Family::Inet, "filter");
        let event = decode(&build(NftMsg::DelTable, 0, 0, &table).unwrap()).unwrap();
        assert!(event.is_del());
        assert_eq!(event.action(), "delete");
        assert_eq!(event.kind(), "table");
        assert_eq!(event.table(), Some("filter"));
    }

    #[test]
    fn generation_event() {
        let mut msg = MessageBuilder::new(NftMsg::NewGen.msg_type(), 0);
        msg.append_bytes(&[0, 0, 0, 42]);
        msg.append_attr_u32_be(gen_attr::ID, 42);
        msg.append_attr_u32_be(gen_attr::PROC_PID, 1234);
        msg.append_attr_str(gen_attr::PROC_NAME, "nft");

        let event = decode(&msg.finish()).unwrap();
        assert_eq!(
            event,
            NftEvent::NewGen {
                generation: 42,
                pid: Some(1234),
                process: Some("nft".into()),
            }
        );
        assert_eq!(event.table(), None);
    }

    #[test]
    fn foreign_messages_are_not_events() {
        // ctnetlink subsystem
        let mut msg = MessageBuilder::new(0x0100, 0);
        msg.append_bytes(&[2, 0, 0, 0]);
        assert_eq!(decode(&msg.finish()), None);

        let table = Table::new(Family::Ip, "t");
        assert_eq!(decode(&build(NftMsg::GetTable, 0, 0, &table).unwrap()), None);
    }
}
