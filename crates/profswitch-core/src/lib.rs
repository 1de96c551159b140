//! profswitch core - profile synchronization and activation engine
//!
//! Keeps several isolated snapshots ("profiles") of one desktop
//! application's state directory and swaps the active one without the user
//! having to sign in again.
//!
//! # Architecture
//!
//! ```text
//!   SwitchConfig ──► Layout (paths)
//!                       │
//!                       ▼
//!               ProfileRegistry ──► ProcessController (stop / launch)
//!                       │
//!             ┌─────────┴─────────┐
//!             ▼                   ▼
//!       sync::mirror         purge::purge
//! ```
//!
//! 1. **Path Resolver** (`paths`): live directory, profiles root, volatile path set
//! 2. **Tree Synchronizer** (`sync`): exclusion-aware mirror with delete semantics
//! 3. **Volatile Cache Purger** (`purge`): removes regenerable caches
//! 4. **Process Controller** (`process`): detect, kill and launch the app
//! 5. **Profile Registry** (`registry`): list / save / activate / remove
//!
//! # Quick Start
//!
//! ```no_run
//! use profswitch_core::{ActivateOptions, Layout, NamedProcess, ProfileRegistry, SwitchConfig};
//!
//! let config = SwitchConfig::load(None)?;
//! let layout = Layout::resolve(&config)?;
//! let process = NamedProcess::from_layout(&layout);
//! let registry = ProfileRegistry::new(&layout, &process);
//!
//! registry.save("work", &|_: &profswitch_core::ConfirmRequest| true)?;
//! registry.activate("work", ActivateOptions::default())?;
//! # Ok::<(), profswitch_core::ProfileError>(())
//! ```

#![deny(unsafe_code)]
#![warn(rust_2018_idioms, missing_debug_implementations, clippy::all)]

pub mod config;
pub mod error;
pub mod lock;
pub mod paths;
pub mod process;
pub mod purge;
pub mod registry;
pub mod sync;

// Re-export commonly used types for convenience
pub use config::SwitchConfig;
pub use error::{ProfileError, Result};
pub use lock::ProfilesLock;
pub use paths::{BaseLocations, Layout, VolatilePath};
pub use process::{NamedProcess, NoopController, ProcessController};
pub use purge::{purge, PurgeReport};
pub use registry::{
    validate_name, ActivateOptions, ActivationReport, ActivationStage, ActiveMarker, Confirm,
    ConfirmRequest, ProfileRegistry,
};
pub use sync::{mirror, EntryKind, Exclusions, SyncOp, SyncPlan, SyncReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
