//! Workspace placeholder crate.
//!
//! This crate exists to expose shared feature flags that map to the individual
//! workspace crates (e.g., `core-cache`, `core-playback`, `bridge-desktop`).
//! Host applications can depend on `omc-workspace` and enable the documented
//! features without needing to wire each crate individually.
