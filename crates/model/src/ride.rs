use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use utility::id::{HasId, Id};

use crate::{driver::Driver, stand::Stand, user::User, ExampleData};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum RideStatus {
    Pending,
    Accepted,
    Completed,
    Cancelled,
}

impl RideStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Completed and cancelled rides never change status again.
    pub const fn is_final(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        if self.is_final() {
            return self == next;
        }
        match (self, next) {
            (Self::Accepted, Self::Pending) => false,
            _ => true,
        }
    }
}

impl fmt::Display for RideStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for RideStatus {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown ride status '{}'", other)),
        }
    }
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Ride {
    pub user_id: Id<User>,
    pub driver_id: Option<Id<Driver>>,
    pub start_location: String,
    pub end_location: String,
    pub status: RideStatus,
    pub requested_at: DateTime<Utc>,
}

impl HasId for Ride {
    type IdType = i64;
}

impl Ride {
    /// A freshly requested ride: pending and without a driver.
    pub fn requested(
        user_id: Id<User>,
        start_location: String,
        end_location: String,
        requested_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id,
            driver_id: None,
            start_location,
            end_location,
            status: RideStatus::Pending,
            requested_at,
        }
    }

    /// The driver, as long as the ride still occupies them.
    pub fn active_driver(&self) -> Option<&Id<Driver>> {
        self.driver_id.as_ref().filter(|_| !self.status.is_final())
    }
}

impl ExampleData for Ride {
    fn example_data() -> Self {
        Self {
            user_id: Id::new(1),
            driver_id: Some(Id::new(7)),
            start_location: "Central Station".to_owned(),
            end_location: "Harbour".to_owned(),
            status: RideStatus::Accepted,
            requested_at: DateTime::default(),
        }
    }
}

/// Explicit update of a ride's assignment or status.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RideUpdate {
    pub driver_id: Option<Id<Driver>>,
    pub status: Option<RideStatus>,
}

impl RideUpdate {
    pub fn apply(self, ride: Ride) -> Ride {
        Ride {
            driver_id: self.driver_id.or(ride.driver_id),
            status: self.status.unwrap_or(ride.status),
            ..ride
        }
    }
}

/// A ride request. If `stand_id` is set, a driver waiting at that stand is
/// assigned right away when one is available.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewRide {
    pub user_id: Id<User>,
    pub start_location: String,
    pub end_location: String,
    pub stand_id: Option<Id<Stand>>,
}

impl ExampleData for NewRide {
    fn example_data() -> Self {
        Self {
            user_id: Id::new(1),
            start_location: "Central Station".to_owned(),
            end_location: "Harbour".to_owned(),
            stand_id: Some(Id::new(1)),
        }
    }
}
