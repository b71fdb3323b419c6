use std::{cmp::Ordering, fmt};

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use utility::id::{HasId, Id};

use crate::{driver::Driver, stand::Stand, ExampleData, WithId};

/// Status of a queue entry. Transitions are one way: `Waiting -> Assigned` or
/// `Waiting -> Left`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum QueueStatus {
    Waiting,
    Assigned,
    Left,
}

impl QueueStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Assigned => "assigned",
            Self::Left => "left",
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for QueueStatus {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "waiting" => Ok(Self::Waiting),
            "assigned" => Ok(Self::Assigned),
            "left" => Ok(Self::Left),
            other => Err(format!("unknown queue status '{}'", other)),
        }
    }
}

/// One driver's occupancy of one stand's waiting line.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub stand_id: Id<Stand>,
    pub driver_id: Id<Driver>,
    pub joined_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub status: QueueStatus,
}

impl HasId for QueueEntry {
    type IdType = i64;
}

impl QueueEntry {
    pub fn waiting(
        stand_id: Id<Stand>,
        driver_id: Id<Driver>,
        joined_at: DateTime<Utc>,
    ) -> Self {
        Self {
            stand_id,
            driver_id,
            joined_at,
            assigned_at: None,
            status: QueueStatus::Waiting,
        }
    }

    pub fn is_waiting(&self) -> bool {
        self.status == QueueStatus::Waiting
    }
}

impl ExampleData for QueueEntry {
    fn example_data() -> Self {
        Self::waiting(Id::new(1), Id::new(7), DateTime::default())
    }
}

/// The FIFO key of a queue entry within its stand: join time first, entry id
/// second so that the order is total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueuePosition {
    pub joined_at: DateTime<Utc>,
    pub entry_id: i64,
}

impl QueuePosition {
    pub fn of(entry: &WithId<QueueEntry>) -> Self {
        Self {
            joined_at: entry.content.joined_at,
            entry_id: entry.id.raw(),
        }
    }
}

impl PartialOrd for QueuePosition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuePosition {
    fn cmp(&self, other: &Self) -> Ordering {
        self.joined_at
            .cmp(&other.joined_at)
            .then(self.entry_id.cmp(&other.entry_id))
    }
}
