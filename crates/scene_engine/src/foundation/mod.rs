//! Foundation module - Core utilities and types
//!
//! This module provides fundamental utilities used throughout the engine:
//! - Math types and operations
//! - Frame arenas and intrusive arena lists
//! - Logging utilities

pub mod math;
pub mod arena;
pub mod logging;
