//! Integration test crate for CineGraph.
//!
//! This crate exists solely to hold cross-crate integration tests.
//! It depends on every cinegraph crate to verify they work together.

#[cfg(test)]
mod graph;

#[cfg(test)]
mod cache;

#[cfg(test)]
mod render;
