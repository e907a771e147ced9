//! Thin wrappers around Linux kernel primitives.
//!
//! All `unsafe` code is concentrated here with explicit SAFETY comments.
//! Dependency direction: capabilities -> seccomp

pub mod capabilities;
pub mod seccomp;
