//! Workspace root crate.
//!
//! No library code lives here — each subsystem is its own crate under
//! `crates/`. This crate exists to host end-to-end scenario tests that
//! exercise the full stack (`tests/e2e.rs`) without creating a dependency
//! cycle between the subsystem crates themselves.
