//! Curve-agnostic building blocks shared by the ceremony crates: the pairing
//! engine abstraction, point and scalar helpers, batched group arithmetic and
//! the hashing / atomic file primitives used by the chunk codec.
pub mod field_structures;
pub mod group_structures;
pub mod iotools;
pub mod memory_pool;
pub mod vector_operations;
