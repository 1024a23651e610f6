//! Seams to the collaborators the feed does not own
//!
//! The engine never talks to a server or a configuration service directly:
//! period fetches and process/entity lookups go through these traits so the
//! binary can wire real implementations and tests can wire static ones.

mod directory;
mod fetcher;

pub use directory::{EntityDirectory, ProcessDirectory, StaticEntities, StaticProcesses};
pub use fetcher::{NoopFetcher, PeriodFetcher};
