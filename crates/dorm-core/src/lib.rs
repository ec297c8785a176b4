//! Booking arbitration and ephemeral identity lifecycle for the dormitory
//! helper.
//!
//! This crate holds the domain services a transport layer calls:
//! - [`ReservationService`]: overlap-free laundry and kitchen bookings
//! - [`IdentityLifecycle`]: credential-driven identity resolution and the
//!   expiry sweep
//! - [`CredentialCodec`]: stateless HS256 bearer credentials
//!
//! Services depend only on the [`dorm_storage::DormStorage`] capability
//! bundle and an injected [`Clock`].

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]
#![warn(rust_2018_idioms)]

pub mod arbitration;
pub mod clock;
pub mod credential;
mod error;
pub mod lifecycle;
pub mod unit_of_work;

pub use arbitration::{ReservationPolicy, ReservationService};
pub use clock::{Clock, ManualClock, SystemClock};
pub use credential::{Claims, CredentialCodec, MIN_SECRET_LEN};
pub use error::{CredentialFault, DormError, DormResult};
pub use lifecycle::{
    IdentityLifecycle, IdentityPolicy, ResolveOutcome, ResolvedIdentity, SweepReport,
};
