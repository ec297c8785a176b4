//! API request handlers

mod health;
mod identity;
mod reservations;

pub use health::*;
pub use identity::*;
pub use reservations::*;
