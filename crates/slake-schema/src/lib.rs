//! Shared types for slake: build targets, configuration fingerprints, and
//! the needs manifest.
//!
//! This crate is deliberately small and dependency-light. Everything that
//! crosses a crate boundary (CLI <-> engine) or lands on disk (status files,
//! manifests) is defined here so that the wire/disk formats live in one
//! place.

pub mod fingerprint;
pub mod manifest;
pub mod target;

pub use fingerprint::{BuildStatus, Fingerprint};
pub use manifest::{Manifest, ManifestEntry, SourceSpec, UniversalBinarySpec};
pub use target::{Platform, Target};
