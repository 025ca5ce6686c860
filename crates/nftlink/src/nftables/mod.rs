//! nf_tables transactions, dumps and notifications.
//!
//! - [`Batch`] stages requests, [`Session::commit`] sends them as one
//!   transaction and attributes every rejection to its request.
//! - The dump methods on [`Session`] read objects back, checked against the
//!   ruleset generation so a concurrent change is detected.
//! - [`Session::listen`] receives change notifications.

mod batch;
mod commit;
mod dump;
mod events;
pub mod frame;
pub mod objects;
mod probe;
mod ruleset;
mod seq;
mod session;
pub mod types;

pub use batch::{Batch, StagedMessage, batch_page_size, nlmsg_max_size};
pub use commit::{AckCollector, PendingError};
pub use dump::{DumpCollector, check_generation};
pub use events::NftEvent;
pub use objects::{
    Chain, ChainHook, ELEMENT_CHUNK_SIZE, NftObject, Object, ObjectFilter, ObjectKind, Rule, Set,
    SetElement, SetElementList, Table,
};
pub use probe::PROBE_SUPPORTED_ERRNO;
pub use ruleset::Ruleset;
pub use seq::SequenceAllocator;
pub use session::{DEFAULT_EVENT_BUFFER_SIZE, SendBuffer, Session, SessionConfig};
pub use types::{Family, NftMsg};
