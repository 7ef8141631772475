//! Scratch volume: layout, free space, and reclamation.

pub mod layout;
pub mod reclaimer;
pub mod space;

pub use layout::{FileKind, StorageLayout, is_media_segment, validate_channel_id};
pub use reclaimer::{ReclaimReport, StorageReclaimer};
pub use space::{SpaceProbe, StatvfsProbe};
