//! Durable on-disk storage helpers.

pub mod atomic;

pub use atomic::{fsync_dir, fsync_file, write_atomic};
