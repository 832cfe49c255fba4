//! Core library for `PassVault`.
//!
//! - [`track`]: request tracking and linear throttle delays
//! - [`export`]: XML export, verification and import, optionally encrypted
//! - [`backup`]: JSON database dumps
//! - [`archive`]: gzip copies of written files
//! - [`events`]: best-effort event dispatch to pluggable sinks
//!
//! Services are written against the repository traits from
//! `passvault-storage` and hold their dependencies as `Arc<dyn Trait>`.

pub mod archive;
pub mod backup;
pub mod backup_file;
pub mod crypto;
pub mod error;
pub mod events;
pub mod events_file;
pub mod export;
pub mod track;

#[cfg(test)]
mod test_support;
