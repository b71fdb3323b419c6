use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dispatch::database::{DatabaseError, RideRepo, Result};
use model::{
    driver::Driver,
    ride::{Ride, RideStatus},
    Page, WithId,
};
use sqlx::prelude::FromRow;
use utility::id::Id;

use crate::queries::ride::{active_of, assign, get, get_all, insert, update};
use crate::{PgDatabaseAutocommit, PgDatabaseTransaction};

use super::DatabaseRow;

#[derive(Debug, Clone, FromRow)]
pub struct RideRow {
    pub id: i64,
    pub user_id: i64,
    pub driver_id: Option<i64>,
    pub start_location: String,
    pub end_location: String,
    pub status: String,
    pub requested_at: DateTime<Utc>,
}

impl DatabaseRow for RideRow {
    type Model = Ride;

    fn get_id(&self) -> Id<Self::Model> {
        Id::new(self.id)
    }

    fn to_model(self) -> Result<Self::Model> {
        Ok(Ride {
            user_id: Id::new(self.user_id),
            driver_id: self.driver_id.map(Id::new),
            start_location: self.start_location,
            end_location: self.end_location,
            status: RideStatus::try_from(self.status.as_str())
                .map_err(DatabaseError::other)?,
            requested_at: self.requested_at,
        })
    }
}

#[async_trait]
impl RideRepo for PgDatabaseAutocommit {
    async fn get_ride(&mut self, id: &Id<Ride>) -> Result<WithId<Ride>> {
        get(&self.pool, id).await
    }

    async fn get_rides(&mut self, page: Page) -> Result<Vec<WithId<Ride>>> {
        get_all(&self.pool, page).await
    }

    async fn insert_ride(&mut self, ride: Ride) -> Result<WithId<Ride>> {
        insert(&self.pool, ride).await
    }

    async fn update_ride(
        &mut self,
        seen: &Ride,
        ride: WithId<Ride>,
    ) -> Result<WithId<Ride>> {
        update(&self.pool, seen, ride).await
    }

    async fn assign_ride(
        &mut self,
        id: &Id<Ride>,
        driver: &Id<Driver>,
    ) -> Result<WithId<Ride>> {
        assign(&self.pool, id, driver).await
    }

    async fn active_rides_of(
        &mut self,
        driver: &Id<Driver>,
    ) -> Result<Vec<WithId<Ride>>> {
        active_of(&self.pool, driver).await
    }
}

#[async_trait]
impl<'a> RideRepo for PgDatabaseTransaction<'a> {
    async fn get_ride(&mut self, id: &Id<Ride>) -> Result<WithId<Ride>> {
        get(&mut *self.tx, id).await
    }

    async fn get_rides(&mut self, page: Page) -> Result<Vec<WithId<Ride>>> {
        get_all(&mut *self.tx, page).await
    }

    async fn insert_ride(&mut self, ride: Ride) -> Result<WithId<Ride>> {
        insert(&mut *self.tx, ride).await
    }

    async fn update_ride(
        &mut self,
        seen: &Ride,
        ride: WithId<Ride>,
    ) -> Result<WithId<Ride>> {
        update(&mut *self.tx, seen, ride).await
    }

    async fn assign_ride(
        &mut self,
        id: &Id<Ride>,
        driver: &Id<Driver>,
    ) -> Result<WithId<Ride>> {
        assign(&mut *self.tx, id, driver).await
    }

    async fn active_rides_of(
        &mut self,
        driver: &Id<Driver>,
    ) -> Result<Vec<WithId<Ride>>> {
        active_of(&mut *self.tx, driver).await
    }
}
