//! Room store contract.
//!
//! Every party's data lives in a separately owned room. A room offers two
//! primitives:
//! - keyed state, where the latest write for `(event_type, key)` wins
//! - an append-only timeline of events
//!
//! The ledger reads and writes exclusively through [`RoomStore`]; the
//! replicated, encrypted substrate behind it is out of scope here.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

mod error;
pub mod memory;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
mod traits;
pub mod typed;

pub use error::{RoomError, RoomResult};
pub use memory::InMemoryRoomStore;
pub use traits::{RoomStore, StateEntry, TimelineEvent};
