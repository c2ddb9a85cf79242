//! Disk synchronization protocol for plughost
//!
//! The narrow client/server contract between the host and the repository's
//! physical storage:
//!
//! - **store**: the on-disk package tree the serving process owns
//! - **server**: the axum process exposing list/upload/destroy, including
//!   the two-phase destroy that drains and exits to release file locks
//! - **client**: the host-side [`DiskProtocol`] implementation over HTTP
//!
//! Destruction is modeled as an asynchronous job the caller observes
//! through [`DestroyPhase`] (requested → halting → stopped) rather than a
//! synchronous call; the serving process is restarted by an external
//! supervisor after each destroy.

pub mod client;
pub mod server;
pub mod store;

pub use client::{DestroyPhase, DiskProtocol, HttpRepositoryClient};
pub use server::{run_server, RepositoryServer};
pub use store::{sanitize_id, DiskStore};
