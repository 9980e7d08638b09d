//! Device-to-device migration.
//!
//! A [`MigrationJob`] backs up every database of a source handheld into an
//! archive, finds out which device to restore into, and restores the
//! archive into it. The job runs on its own thread; whenever it needs
//! something from the user it posts a [`MigrationEvent`] carrying a
//! [`ScopeSignaler`](handheld_syncutils::ScopeSignaler) and waits for the
//! GUI thread to answer. [`EventDriver`] is the GUI-side counterpart that
//! services those events through a [`Prompter`].

mod driver;
pub mod error;
mod event;
mod job;
mod report;

pub use crate::driver::{EventDriver, Prompter};
pub use crate::event::MigrationEvent;
pub use crate::job::{MigrationHandle, MigrationJob, Phase};
pub use crate::report::{MigrationReport, Outcome};
