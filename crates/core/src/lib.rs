//! Quorum domain logic.
//!
//! Everything in this crate is pure: constants, typed enums, validation and
//! the scoring / overlap / consensus / honeypot math. It has no internal
//! dependencies so the database layer, the engine and the worker can all
//! share it.

#[macro_use]
mod macros;

pub mod assignment;
pub mod capacity;
pub mod config;
pub mod consensus;
pub mod error;
pub mod honeypot;
pub mod jobs;
pub mod leaderboard;
pub mod overlap;
pub mod scoring;
pub mod similarity;
pub mod trust;
pub mod types;
