//! Provisioning, release, and backup automation for small single-host web sites.
//!
//! # Program flow
//!
//! A deployment target ("site") is described by an entry in a YAML registry file; see
//! [registry]. The `siteup` binary resolves one site, opens an SSH session under the role
//! the chosen task requires, and runs the task's remote steps in order, stopping at the
//! first failure. Nothing runs concurrently: each remote command or transfer blocks the
//! workflow until it completes or fails.
//!
//! The deployed application itself is an external collaborator. All this crate knows about
//! it is that it ships as a versioned installable package exposing `createdb` and
//! `loaddata` maintenance entry points, and that the running server gracefully reloads its
//! workers when the mtime of a `touch-reload` sentinel file in the site home changes.
//!
//! Remote state is not transactional. If a step fails partway through a task, whatever the
//! earlier steps changed on the server stays changed; recovery is manual.

pub mod error;
pub mod exec;
pub mod output;
pub mod package;
pub mod registry;
pub mod tasks;

#[doc(inline)]
pub use error::Error;
