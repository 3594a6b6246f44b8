//! ## Crate layout
//! - `core`: the composition engine — fragments, the registry, the field
//!   resolver, the setup pipeline, the dynamic field loader, and the
//!   access/storage boundaries.
//!
//! The `prelude` module mirrors the surface consumed by component loaders
//! and business-rule modules.

pub use meld_core as core;

//
// Consts
//

/// Workspace version re-export for downstream tooling/tests.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use meld_core::{Error, err};

///
/// Prelude
///

pub mod prelude {
    pub use meld_core::prelude::*;
}
