//! Common test utilities module
//!
//! Provides shared utilities for tests including:
//! - An in-process emulator of the engine's aggregation endpoint
//! - Flights-like and ecommerce-like test tables
//! - A local reference for pandas grouping semantics

#![allow(dead_code)]

pub mod engine;
pub mod fixtures;

pub use engine::{Doc, MockEngine};
pub use fixtures::{
    assert_close, cell, ecommerce_docs, ecommerce_frame, ecommerce_schema, flights_docs,
    flights_frame, flights_schema, frame_with, group_rows, mean, mean_abs_deviation, numbers,
    quantile, variance, Groups,
};
