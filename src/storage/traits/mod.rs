//! Storage backend traits.

mod set;

pub use set::PersistentSet;
