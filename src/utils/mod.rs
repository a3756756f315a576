//! Supporting utilities: hashing, storage access and terminal progress.

pub mod fs;
pub mod hash;
pub mod progress;
