//! Strata Player - session orchestration on top of strata-core
//!
//! Glues the playback engine to the outside world: a background loader
//! thread that fetches, decodes, and analyzes stems; the remote song store
//! interface; and the session that keeps them consistent across song
//! switches.

pub mod loader;
pub mod session;
pub mod store;

pub use loader::{LoadedStem, StemLoadRequest, StemLoadResult, StemLoader};
pub use session::{LoadPhase, Session};
pub use store::{MemorySongStore, SongStore, StoreSubscription};
