//! Async nf_tables netlink transport for Linux.
//!
//! This crate talks to the kernel's nf_tables subsystem over
//! `NETLINK_NETFILTER`. It stages configuration changes into batches that
//! the kernel applies as one transaction, reports every rejected message of
//! a batch by its sequence number, reads the ruleset back with dumps that
//! detect concurrent changes, and listens for change notifications.
//!
//! # Features
//!
//! - `output` - JSON/text output formatting and serde derives
//! - `testing` - In-memory transport and fake kernel for tests
//! - `full` - All features enabled
//!
//! # Example
//!
//! ```ignore
//! use nftlink::{Batch, Chain, Family, Session, Table};
//!
//! #[tokio::main]
//! async fn main() -> nftlink::Result<()> {
//!     let mut session = Session::new()?;
//!
//!     let mut batch = Batch::new();
//!     batch.begin(session.next_seq());
//!     batch.add_table(&Table::new(Family::Inet, "filter"), 0, session.next_seq())?;
//!     batch.add_chain(&Chain::new(Family::Inet, "filter", "input"), 0, session.next_seq())?;
//!     batch.end(session.next_seq());
//!
//!     let mut errors = Vec::new();
//!     if let Err(e) = session.commit(&batch, &mut errors).await {
//!         for pending in &errors {
//!             eprintln!("{}", pending);
//!         }
//!         return Err(e);
//!     }
//!
//!     session.refresh_generation().await?;
//!     for table in session.dump_tables(Family::Unspec).await? {
//!         println!("table {} {}", table.family, table.name);
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Event Monitoring
//!
//! ```ignore
//! use nftlink::{Control, Session};
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

// Core modules (always available)
pub mod netlink;
pub mod nftables;

// Feature-gated modules
#[cfg(feature = "output")]
pub mod output;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export common types at crate root for convenience
pub use netlink::{Control, Error, Message, MessageHandler, NetlinkSocket, Result, Transport};
pub use nftables::{
    Batch, Chain, ChainHook, Family, NftEvent, NftMsg, Object, ObjectFilter, PendingError, Rule,
    Ruleset, Session, SessionConfig, Set, SetElement, Table,
};
