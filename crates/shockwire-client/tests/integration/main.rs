//! Integration test entry point for shockwire-client.
//!
//! Run with: cargo test -p shockwire-client --test integration

mod harness;
mod commands;
mod lifecycle;
