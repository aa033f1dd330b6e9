//! Chunked trusted-setup ceremony engine.
//!
//! Phase 1 is a powers-of-tau accumulator split into chunk files that
//! contributors transform independently and a verifier checks, links and
//! combines. Phase 2 specializes a verified transcript to one Groth16 circuit
//! and runs the delta ceremony over the circuit-specific queries.

pub mod errors;
pub mod parameters;
pub mod codec;
pub mod conversions;
pub mod utils;
pub mod keypair;

pub mod accumulator;
pub mod contribution;
pub mod verification;
pub mod combine;
pub mod transcript;
pub mod beacon;
pub mod contributor;
pub mod round;

pub mod phase2;

#[cfg(test)]
mod tests;

pub use errors::{CeremonyError, Result};
pub use parameters::{CeremonyParams, ContributionMode, ProvingSystem, Segment};
