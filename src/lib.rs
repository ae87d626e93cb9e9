//! Branchlink - follow git branch switches and turn them into tracked work
//!
//! This library watches every git repository in a workspace, notices when the
//! checked-out branch changes, links the branch to a ticket in the issue
//! tracker and drives time tracking from it.
//!
//! # Architecture
//!
//! - **repo** - repository discovery, branch and commit lookup
//! - **detect** - the two signal strategies (git hooks, HEAD file watching)
//!   and the de-duplicating [`BranchChangeDetector`](detect::BranchChangeDetector)
//! - **ticket** - ticket id extraction, verification and enrichment
//! - **automation** - timer, worklogs, persisted settings, UI messages
//! - **engine** - runs all of the above as one event loop
//! - **config** - `.branchlink/config.toml`
//!
//! # Example
//!
//! ```rust,no_run
//! use branchlink::detect::{BranchChangeDetector, BranchChangeEvent, ListenerError};
//! use branchlink::repo::{BranchReadMode, BranchReader, discover};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() {
//! let repos = discover(&[std::path::PathBuf::from(".")]);
//! let detector = BranchChangeDetector::new(BranchReader::new(
//!     BranchReadMode::PointerFile,
//!     Duration::from_secs(5),
//! ));
//! detector.set_repositories(&repos);
//! detector.on_branch_change(Arc::new(|event: &BranchChangeEvent| -> Result<(), ListenerError> {
//!     println!("{}: {} -> {}", event.repo.display(), event.previous_branch, event.new_branch);
//!     Ok(())
//! }));
//!
//! detector.initialize().await;
//! for repo in &repos {
//!     detector.recheck(&repo.root).await;
//! }
//! # }
//! ```

pub mod automation;
pub mod config;
pub mod detect;
pub mod engine;
pub mod repo;
pub mod ticket;

#[cfg(test)]
mod testing;
