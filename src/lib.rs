//! Manages versioned AlphaFold data bundles under a single data root.
//!
//! Each [`source::Source`] knows where its archive lives remotely and where its
//! compressed and uncompressed artifacts belong on disk; the
//! [`manager::DataManager`] runs download, decompress, prune and link across
//! every registered source, isolating failures per source.

pub mod config;
pub mod domain;
pub mod error;
pub mod fs_util;
pub mod lock;
pub mod manager;
pub mod output;
pub mod registry;
pub mod source;
pub mod transfer;
pub mod verify;
