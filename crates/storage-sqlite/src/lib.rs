//! SQLite-backed outing store.

mod storage;

pub use storage::*;
