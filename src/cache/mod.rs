//! Local caches of observed cluster state
//!
//! The object stores hold the latest observed copy of every watched object;
//! the indexes provide the secondary lookups the reconcilers need.

mod index;
mod store;


pub use index::{MemberIndex, PvIndex, PvMatch};
pub use store::{ObjectStore, StoredObject};
