//! REST adapter over the booking and identity services

pub mod extract;
pub mod handlers;
pub mod router;
pub mod state;
