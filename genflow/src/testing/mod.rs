//! Testing utilities for genflow.
//!
//! This module provides:
//! - In-memory fakes of every service port
//! - Configuration and artifact fixtures

mod fakes;
mod fixtures;

pub use fakes::{
    FakeBackgroundRemover, FakeGenerationProvider, FakeImageOps, FakeMetadataClient,
    FakeQualityGate,
};
pub use fixtures::{test_config, TestPorts};
