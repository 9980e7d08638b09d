//! In-memory mirror of on-device databases.
//!
//! A [`DatabaseCache`] holds every record of one database together with the
//! state index the device currently uses for it, and keeps the two in step
//! across edits. Caches are shared through a [`CacheRegistry`], which loads
//! each database at most once no matter how many threads ask for it, and
//! can be filled in the background with a [`PrefillJob`].

mod cache;
pub mod error;
mod kind;
mod prefill;
mod registry;

pub use crate::cache::{CacheEntry, DatabaseCache};
pub use crate::kind::DatabaseKind;
pub use crate::prefill::PrefillJob;
pub use crate::registry::CacheRegistry;
