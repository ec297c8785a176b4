//! Storage abstractions for the dormitory helper.
//!
//! This crate defines the storage contract used by the booking and identity
//! services:
//! - reservation reads per resource kind (laundry, kitchen)
//! - identity reads, including the cross-kind "holds a reservation" check
//! - a unit of work whose transactions carry every write
//!
//! Design stance:
//! - PostgreSQL is the transactional source of truth.
//! - The in-memory adapter mirrors the same contract for development and tests.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]
#![warn(rust_2018_idioms)]

mod error;
pub mod memory;
mod model;
#[cfg(feature = "postgres")]
pub mod postgres;
mod traits;

pub use error::{StorageError, StorageResult};
pub use model::{
    IdentityId, IdentityRecord, RangeFilter, Reservation, ReservationId, ResourceKind, TimeWindow,
};
pub use traits::{
    DormStorage, IdentityStore, IdentityWrites, ReservationStore, ReservationWrites,
    StoreTransaction, UnitOfWork,
};
