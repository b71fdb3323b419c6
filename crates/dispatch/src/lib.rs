use std::error::Error;

use model::{driver::Driver, ride::Ride, stand::Stand, user::User};
use thiserror::Error;
use utility::id::Id;

pub mod database;
pub mod dispatcher;
pub mod memory;
pub mod notify;
pub mod queue;
pub mod registry;
pub mod server;

#[cfg(any(test, feature = "conformance"))]
pub mod conformance;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("the requested item does not exist")]
    NotFound,
    #[error("stand {0} does not exist")]
    StandNotFound(Id<Stand>),
    #[error("driver {0} does not exist")]
    DriverNotFound(Id<Driver>),
    #[error("user {0} does not exist")]
    UserNotFound(Id<User>),
    #[error("ride {0} does not exist")]
    RideNotFound(Id<Ride>),
    #[error("driver {driver} is not bound to stand {stand}")]
    DriverStandMismatch { driver: Id<Driver>, stand: Id<Stand> },
    #[error("driver {0} is not waiting at any stand")]
    NotQueued(Id<Driver>),
    #[error("no driver is waiting at stand {0}")]
    NoDriverAvailable(Id<Stand>),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("conflict: {0}")]
    Conflict(String),
    /// The ride was created and stays pending, but claiming a driver for it
    /// failed.
    #[error("ride {ride} was created but auto-assignment failed: {source}")]
    AutoAssignFailed {
        ride: Id<Ride>,
        source: Box<DispatchError>,
    },
    #[error("storage failure: {0}")]
    Storage(Box<dyn Error + Send + Sync>),
}

impl DispatchError {
    pub fn storage<T: Error + Send + Sync + 'static>(why: T) -> Self {
        Self::Storage(Box::new(why))
    }
}

impl From<database::DatabaseError> for DispatchError {
    fn from(value: database::DatabaseError) -> Self {
        match value {
            database::DatabaseError::NotFound => Self::NotFound,
            database::DatabaseError::Conflict(why) => Self::Conflict(why),
            database::DatabaseError::Other(why) => Self::Storage(why),
        }
    }
}

pub type DispatchResult<O> = Result<O, DispatchError>;

/// Replaces a generic `NotFound` with a more specific error.
pub(crate) fn not_found_as<O>(
    result: DispatchResult<O>,
    error: impl FnOnce() -> DispatchError,
) -> DispatchResult<O> {
    match result {
        Err(DispatchError::NotFound) => Err(error()),
        other => other,
    }
}
