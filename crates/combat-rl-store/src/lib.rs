//! Behavior profile persistence for combat RL agents
//!
//! Profiles are written as checksummed text documents, replaced atomically,
//! and loaded through a recovery chain that always ends in a usable profile.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod codec;
pub mod recovery;
pub mod store;

pub use codec::{
    checksum, decode_profile, encode_profile, ProfileCompression, ProfileDocument, WeightBlob,
    PROFILE_FORMAT, PROFILE_VERSION,
};
pub use recovery::{load_with_recovery, ProfileSource, RecoveredProfile};
pub use store::{FileProfileStore, MemoryProfileStore, ProfileStore, StoreConfig};
