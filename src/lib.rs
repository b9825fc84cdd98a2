//! # savesync
//!
//! Per-file incremental backup and restore for program state directories.
//!
//! ## Features
//!
//! - **Change Detection**: Size plus SHA-512 fingerprints, transfers only what changed
//! - **Compression**: XZ (LZMA, parallel) and gzip, selectable per entry
//! - **Encryption**: Per-artifact AES-256-GCM with optional filename protection
//! - **Key-Value Stores**: Domain-scoped capture of embedded key-value databases
//! - **Metadata Store**: Versioned sqlite catalog, optionally sealed at rest
//!
//! ## Quick Start
//!
//! ```no_run
//! use savesync::sync::config::SyncConfig;
//! use savesync::sync::engine::{self, Action};
//! use savesync::sync::store::seal::TerminalPassphrase;
//! use savesync::sync::store::{MetaStore, StoreOptions};
//!
//! // Load configuration from YAML file
//! let config: SyncConfig = serde_yml::from_reader(std::fs::File::open("config.yml")?)?;
//!
//! // Back up every configured program
//! let store = MetaStore::open(&config.dest, &StoreOptions::default(), &TerminalPassphrase)?;
//! engine::run(&config, &store, Action::Backup, &[])?;
//! store.close()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod sync;
