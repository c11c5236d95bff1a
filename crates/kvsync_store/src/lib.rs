//! # kvsync Store
//!
//! Local and remote key-value store abstractions for kvsync.
//!
//! This crate defines the two kinds of store a sync engine mirrors between:
//!
//! - [`LocalStore`] - the always-available, unbounded store on the device,
//!   with per-key change watching
//! - [`RemoteStore`] - a quota-limited, network-backed store shared across
//!   devices, with a process-wide "changed externally" notification
//!
//! Both speak the store-native [`Value`] type. Subscriptions are explicit
//! [`WatchToken`] handles; dropping a token unregisters it.
//!
//! ## Available Stores
//!
//! - [`InMemoryLocalStore`] - For testing and ephemeral state
//! - [`FileLocalStore`] - JSON-persisted local store
//! - [`InMemoryRemoteStore`] - Multi-device simulation of a cloud store
//!
//! ## Example
//!
//! ```rust
//! use kvsync_store::{InMemoryLocalStore, LocalStore, Value, WatchOptions};
//! use std::sync::Arc;
//!
//! let store = InMemoryLocalStore::new();
//! let _token = store
//!     .watch("theme", WatchOptions::before_and_after(), Arc::new(|event| {
//!         println!("{} changed to {:?}", event.key, event.new_value);
//!     }))
//!     .unwrap();
//! store.set("theme", Value::from("dark")).unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod local;
mod memory;
mod remote;
mod remote_memory;
mod subscription;
mod value;

pub use error::{StoreError, StoreResult};
pub use file::FileLocalStore;
pub use local::{ChangeEvent, LocalStore, StoreId, WatchOptions};
pub use memory::InMemoryLocalStore;
pub use remote::{ChangeReason, ExternalChange, RemoteStore};
pub use remote_memory::InMemoryRemoteStore;
pub use subscription::{Callback, SubscriberSet, WatchToken};
pub use value::Value;
