//! Store implementations backing the bill, payment and membership seams.

pub mod memory;

pub use memory::MemoryStore;
