// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Unit tests for the PostgresCluster operator
//!
//! This module contains unit tests for:
//! - Defaulting and validation of declarations
//! - Child resource generators
//! - Each sub-controller against the in-memory store
//! - Status aggregation
//! - Whole reconciliation passes
//! - Admission webhook policies

#[path = "../common/mod.rs"]
mod common;

mod backup;
mod instances;
mod normalize;
mod proxy;
mod resources;
mod validation;
