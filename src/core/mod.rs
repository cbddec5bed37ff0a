//! Persistence primitives.
//!
//! Leaf-first: [`atomic`] and [`lock`] know nothing about documents;
//! [`docstore`] composes them with [`backup`]; [`integrity`] sits on top of
//! the store.

pub mod atomic;
pub mod backup;
pub mod config;
pub mod docstore;
pub mod error;
pub mod events;
pub mod integrity;
pub mod lock;
pub mod mutex;
pub mod time;
