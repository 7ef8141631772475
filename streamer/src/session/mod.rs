//! Viewer sessions, circuit-breaker flags, and inactivity handling.

pub mod flag;
pub mod monitor;
pub mod registry;
pub mod viewer;

pub use flag::{
    AllClients, CastReceivers, FlagFilter, FlagFilterKind, FlagKey, FlagPolicy, FlagRecord,
    FlagScope, ManifestOnly, Never,
};
pub use monitor::{ActivityMonitor, SweepReport};
pub use registry::{ChannelActivity, SessionRegistry};
pub use viewer::{Client, ClientKey, ViewerKey, ViewerSession};
