#![forbid(unsafe_code)]
//! Hashing, filesystem, archive, and process helpers for Tessel.

pub mod archive;
pub mod error;
pub mod fs;
pub mod hash;
pub mod process;
