//! # inwatch
//!
//! Async access to Linux inotify: decoding the kernel's event records,
//! tracking which watch each event belongs to, and keeping watches on a
//! whole directory tree.
//!
//! ## Features
//!
//! - **Record Decoding**: Turn raw read buffers into typed records
//! - **Watch Ownership**: Events that retire a watch carry the last reference to it
//! - **Async and Blocking Retrieval**: Cancel-safe `get`, bounded waits, streams
//! - **Recursive Watching**: New subdirectories are watched as they appear
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           inwatch                               │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  Inotify ──► RecordDecoder ──► WatchRegistry ──► Event          │
//! │     │                                              │            │
//! │     ▼                                              ▼            │
//! │  EventSource ◄──────────────────────────── RecursiveWatcher     │
//! │                                                    │            │
//! │                                                    ▼            │
//! │                                            DirectoryWalker      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod decoder;
pub mod error;
pub mod event;
pub mod mask;
pub mod recursive;
pub mod source;
pub mod sys;
pub mod walk;
pub mod watch;

#[cfg(test)]
mod testing;

pub use config::{InotifyConfig, RecursiveConfig};
pub use decoder::{DecodeError, RawRecord, RecordDecoder};
pub use error::{InotifyError, Result};
pub use event::{Event, WatchRef};
pub use mask::{InitFlags, Mask};
pub use recursive::RecursiveWatcher;
pub use source::EventSource;
pub use sys::{Inotify, InotifyHandle};
pub use walk::{DirectoryWalker, WalkEntry};
pub use watch::{Watch, WatchDescriptor, WatchRegistry};
