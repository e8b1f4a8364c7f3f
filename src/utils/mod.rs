//! Utilities Module
//!
//! This module contains shared utility functionality for dispsnap.

pub mod error;
pub mod tracing;
