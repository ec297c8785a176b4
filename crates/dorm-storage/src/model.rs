use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Bookable facility. Each kind has its own table and duration ceiling but
/// shares the arbitration algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Laundry,
    Kitchen,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 2] = [ResourceKind::Laundry, ResourceKind::Kitchen];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Laundry => "laundry",
            Self::Kitchen => "kitchen",
        }
    }

    /// Backing table in relational stores.
    pub fn table(&self) -> &'static str {
        match self {
            Self::Laundry => "laundry_reservations",
            Self::Kitchen => "kitchen_reservations",
        }
    }

    /// Longest bookable interval for this kind.
    pub fn default_ceiling(&self) -> Duration {
        match self {
            Self::Laundry => Duration::hours(2),
            Self::Kitchen => Duration::hours(3),
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "laundry" => Ok(Self::Laundry),
            "kitchen" => Ok(Self::Kitchen),
            other => Err(format!("unknown resource kind '{other}'")),
        }
    }
}

/// Store-assigned reservation identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReservationId(pub i64);

impl fmt::Display for ReservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Store-assigned identity identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityId(pub i64);

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Two windows overlap when they share at least one instant.
    /// Touching endpoints (`a.end == b.start`) do not overlap.
    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Optional bounds for range listings: `start >= from` and `end <= to`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeFilter {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl RangeFilter {
    pub fn new(from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        Self { from, to }
    }

    pub fn admits(&self, window: &TimeWindow) -> bool {
        self.from.map_or(true, |from| window.start >= from)
            && self.to.map_or(true, |to| window.end <= to)
    }
}

/// One booked interval for one resource kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub kind: ResourceKind,
    pub owner: IdentityId,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Reservation {
    pub fn window(&self) -> TimeWindow {
        TimeWindow::new(self.start, self.end)
    }
}

/// Persistent identity joined with its TTL marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub id: IdentityId,
    pub display_name: String,
    pub ttl_deadline: DateTime<Utc>,
}

impl IdentityRecord {
    /// An identity is expired once its deadline is at or before `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.ttl_deadline <= now
    }
}
