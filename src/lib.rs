pub mod common;
pub mod config;
pub mod domain;
pub mod observability;
pub mod pipeline;
pub mod storage;

pub use common::{EtlError, Result};
