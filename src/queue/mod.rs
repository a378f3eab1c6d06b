//! Background work queues.

pub mod unique;

pub use unique::{Enqueued, UniqueQueue};
