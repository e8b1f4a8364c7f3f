//! dispsnap captures the complete display configuration of a multi-monitor
//! machine (mosaic topology, per-display color and HDR, driver settings, OS
//! paths and modes), decides whether a saved configuration is active or
//! possible, and re-applies it.

pub mod config;
pub mod display;
pub mod utils;

pub use display::DisplayEngine;
pub use display::snapshot::ConfigSnapshot;
pub use utils::error::{DisplayError, Result};
