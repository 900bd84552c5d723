//! Persistence module
//!
//! Session save/restore using serde and JSON.

pub mod session;

pub use session::{
    load_from_file, restore, save_to_file, EffectData, RestoreOutcome, RestoreReport,
    SessionError, SessionFile, SlotData, SESSION_VERSION,
};
