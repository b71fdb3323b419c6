use std::{error, result};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use model::{
    driver::Driver, queue::QueueEntry, ride::Ride, stand::Stand, user::User, Page,
    WithId,
};
use thiserror::Error;
use utility::id::Id;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("record not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Other(Box<dyn error::Error + Send + Sync>),
}

impl DatabaseError {
    pub fn other<E>(why: E) -> Self
    where
        E: Into<Box<dyn error::Error + Send + Sync>>,
    {
        Self::Other(why.into())
    }
}

pub type Result<T> = result::Result<T, DatabaseError>;

/// Outcome of an idempotent insert.
#[derive(Debug, Clone, PartialEq)]
pub enum Inserted<T> {
    Created(T),
    /// An equivalent record already existed and was returned unchanged.
    Existing(T),
}

impl<T> Inserted<T> {
    pub fn into_inner(self) -> T {
        match self {
            Self::Created(value) | Self::Existing(value) => value,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

#[async_trait]
pub trait StandRepo {
    async fn stand_exists(&mut self, id: &Id<Stand>) -> Result<bool>;
    async fn get_stand(&mut self, id: &Id<Stand>) -> Result<WithId<Stand>>;
    async fn get_stands(&mut self, page: Page) -> Result<Vec<WithId<Stand>>>;
    async fn insert_stand(&mut self, stand: Stand) -> Result<WithId<Stand>>;
    async fn update_stand(&mut self, stand: WithId<Stand>) -> Result<WithId<Stand>>;
}

#[async_trait]
pub trait DriverRepo {
    async fn driver_exists(&mut self, id: &Id<Driver>) -> Result<bool>;

    /// The stand the driver is currently bound to. Fails with `NotFound` if the
    /// driver does not exist.
    async fn driver_stand(&mut self, id: &Id<Driver>) -> Result<Option<Id<Stand>>>;

    async fn get_driver(&mut self, id: &Id<Driver>) -> Result<WithId<Driver>>;
    async fn get_drivers(&mut self, page: Page) -> Result<Vec<WithId<Driver>>>;
    async fn insert_driver(&mut self, driver: Driver) -> Result<WithId<Driver>>;
    async fn update_driver(
        &mut self,
        driver: WithId<Driver>,
    ) -> Result<WithId<Driver>>;
    async fn set_driver_availability(
        &mut self,
        id: &Id<Driver>,
        available: bool,
    ) -> Result<WithId<Driver>>;
}

#[async_trait]
pub trait UserRepo {
    async fn user_exists(&mut self, id: &Id<User>) -> Result<bool>;
    async fn get_user(&mut self, id: &Id<User>) -> Result<WithId<User>>;
    async fn insert_user(&mut self, user: User) -> Result<WithId<User>>;
}

#[async_trait]
pub trait RideRepo {
    async fn get_ride(&mut self, id: &Id<Ride>) -> Result<WithId<Ride>>;
    async fn get_rides(&mut self, page: Page) -> Result<Vec<WithId<Ride>>>;
    async fn insert_ride(&mut self, ride: Ride) -> Result<WithId<Ride>>;

    /// Replaces a ride read earlier as `seen`. Fails with `Conflict` if the
    /// stored status or driver no longer match `seen`, at the latest on
    /// commit, or if the ride would give its driver a second active ride.
    async fn update_ride(
        &mut self,
        seen: &Ride,
        ride: WithId<Ride>,
    ) -> Result<WithId<Ride>>;

    /// Sets the driver of a ride and moves it to `accepted`. Fails with
    /// `Conflict` if the ride is not pending or the driver already has an
    /// active ride, at the latest on commit.
    async fn assign_ride(
        &mut self,
        id: &Id<Ride>,
        driver: &Id<Driver>,
    ) -> Result<WithId<Ride>>;

    /// Pending or accepted rides the driver is assigned to, ordered by id.
    async fn active_rides_of(
        &mut self,
        driver: &Id<Driver>,
    ) -> Result<Vec<WithId<Ride>>>;
}

/// Storage of stand waiting lines with atomic claim semantics.
///
/// Implementations must guarantee that a waiting entry is handed out by
/// `claim_oldest` to at most one caller, and that a claim never waits for an
/// entry another caller is currently claiming. Within a transaction the claim
/// stays reserved until commit and is released again on rollback.
#[async_trait]
pub trait AtomicClaimableStore {
    /// Adds a waiting entry for the driver. Returns the existing entry instead
    /// if the driver is already waiting anywhere.
    async fn insert_queue_entry(
        &mut self,
        stand: &Id<Stand>,
        driver: &Id<Driver>,
        joined_at: DateTime<Utc>,
    ) -> Result<Inserted<WithId<QueueEntry>>>;

    /// Marks the oldest claimable waiting entry of the stand as assigned and
    /// returns it. Entries reserved by concurrent claims are skipped. `None`
    /// if nothing is claimable.
    async fn claim_oldest(
        &mut self,
        stand: &Id<Stand>,
        assigned_at: DateTime<Utc>,
    ) -> Result<Option<WithId<QueueEntry>>>;

    /// Marks the driver's waiting entry as left. `None` if the driver was not
    /// waiting.
    async fn mark_left(
        &mut self,
        driver: &Id<Driver>,
    ) -> Result<Option<WithId<QueueEntry>>>;

    /// All waiting entries of the stand in FIFO order. Takes no locks.
    async fn list_waiting(
        &mut self,
        stand: &Id<Stand>,
    ) -> Result<Vec<WithId<QueueEntry>>>;

    /// The driver's waiting entry, including one an open claim currently
    /// holds.
    async fn waiting_entry_of(
        &mut self,
        driver: &Id<Driver>,
    ) -> Result<Option<WithId<QueueEntry>>>;

    /// Any entry by id, whatever its status.
    async fn get_queue_entry(
        &mut self,
        id: &Id<QueueEntry>,
    ) -> Result<WithId<QueueEntry>>;
}

pub trait DatabaseOperations:
    StandRepo + DriverRepo + UserRepo + RideRepo + AtomicClaimableStore + Send
{
}

impl<T> DatabaseOperations for T where
    T: StandRepo + DriverRepo + UserRepo + RideRepo + AtomicClaimableStore + Send
{
}

#[async_trait]
pub trait DatabaseTransaction: DatabaseOperations {
    /// Makes every change of the transaction visible at once. Dropping a
    /// transaction without committing it rolls everything back.
    async fn commit(self) -> Result<()>;

    async fn rollback(self) -> Result<()>;
}

pub trait DatabaseAutocommit: DatabaseOperations {}

/// A handle to the dispatch store. Cloning the handle is cheap; every request
/// acquires its own transaction or autocommit session from it.
#[async_trait]
pub trait Database: Clone + Send + Sync + Sized + 'static {
    type Transaction: DatabaseTransaction + Send;
    type Autocommit: DatabaseAutocommit + Send;

    async fn transaction(&self) -> Result<Self::Transaction>;

    fn auto(&self) -> Self::Autocommit;
}
