//! Persisted core state under the data directory.
//!
//! Every document here has one writer loop and is flushed with the
//! write-temp-then-rename discipline, so concurrent readers may observe a
//! prior snapshot but never a torn one.

mod atomic;
mod groups;
mod proposals;
mod sessions;
mod state;

pub use atomic::{read_json_or_default, write_json_atomic};
pub use groups::{GroupRegistry, MAIN_GROUP_FOLDER};
pub use proposals::{Decision, ProposalStore};
pub use sessions::SessionStore;
pub use state::{RouterState, RouterStateDoc};
