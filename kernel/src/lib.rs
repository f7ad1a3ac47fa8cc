// Line History Kernel
//
// Records successive full-text snapshots of a file as a single instruction
// program and reconstructs any past snapshot, with per-line attribution.

pub mod adapters;
pub mod annotate;
pub mod bootstrap;
pub mod codec;
pub mod config;
pub mod diff;
pub mod invariants;
pub mod log;
pub mod registry;
pub mod replay;
