//! Netlink plumbing for the nf_tables transaction layer.
//!
//! Message framing, attribute encoding, the async `NETLINK_NETFILTER`
//! socket and the per-message dispatcher. Nothing in here knows about
//! nf_tables objects; see [`crate::nftables`] for that.

pub mod attr;
mod builder;
pub mod dispatch;
mod error;
pub mod message;
pub mod parse;
mod socket;
mod transport;

pub use attr::{AttrIter, NlAttr};
pub use builder::{MessageBuilder, NestToken};
pub use dispatch::{AckOnly, Control, Filter, Message, MessageHandler, dispatch};
pub use error::{Error, Result};
pub use message::{MessageIter, NLMSG_HDRLEN, NlMsgError, NlMsgHdr, NlMsgType};
pub use parse::NfGenMsg;
pub use socket::{NetlinkSocket, system_page_size};
pub use transport::Transport;
