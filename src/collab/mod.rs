//! External collaborators for executable and query blocks.

mod executor;
mod explore;
pub mod extract;

pub use executor::{CommandExecutor, ExecOutcome, Executor};
pub use explore::{ExploreResponse, Explorer, HttpExplorer};
