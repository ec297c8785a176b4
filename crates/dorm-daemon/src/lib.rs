//! Dormitory helper daemon library
//!
//! This module provides the components of `dormd`:
//! - configuration loading and validation
//! - REST API handlers over the booking and identity services
//! - the recurring identity sweep
//! - server lifecycle management

pub mod api;
pub mod config;
pub mod error;
pub mod server;
pub mod sweeper;

pub use config::DormConfig;
pub use error::{ApiError, DaemonError};
pub use server::Server;
pub use sweeper::Sweeper;
