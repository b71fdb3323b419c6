use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dispatch::database::{DriverRepo, Result};
use model::{driver::Driver, stand::Stand, Page, WithId};
use sqlx::prelude::FromRow;
use utility::id::Id;

use crate::queries::driver::{
    exists, get, get_all, insert, set_availability, stand_of, update,
};
use crate::{PgDatabaseAutocommit, PgDatabaseTransaction};

use super::DatabaseRow;

#[derive(Debug, Clone, FromRow)]
pub struct DriverRow {
    pub id: i64,
    pub name: String,
    pub phone: String,
    pub is_available: bool,
    pub stand_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl DatabaseRow for DriverRow {
    type Model = Driver;

    fn get_id(&self) -> Id<Self::Model> {
        Id::new(self.id)
    }

    fn to_model(self) -> Result<Self::Model> {
        Ok(Driver {
            name: self.name,
            phone: self.phone,
            is_available: self.is_available,
            stand_id: self.stand_id.map(Id::new),
            created_at: self.created_at,
        })
    }
}

#[async_trait]
impl DriverRepo for PgDatabaseAutocommit {
    async fn driver_exists(&mut self, id: &Id<Driver>) -> Result<bool> {
        exists(&self.pool, id).await
    }

    async fn driver_stand(&mut self, id: &Id<Driver>) -> Result<Option<Id<Stand>>> {
        stand_of(&self.pool, id).await
    }

    async fn get_driver(&mut self, id: &Id<Driver>) -> Result<WithId<Driver>> {
        get(&self.pool, id).await
    }

    async fn get_drivers(&mut self, page: Page) -> Result<Vec<WithId<Driver>>> {
        get_all(&self.pool, page).await
    }

    async fn insert_driver(&mut self, driver: Driver) -> Result<WithId<Driver>> {
        insert(&self.pool, driver).await
    }

    async fn update_driver(
        &mut self,
        driver: WithId<Driver>,
    ) -> Result<WithId<Driver>> {
        update(&self.pool, driver).await
    }

    async fn set_driver_availability(
        &mut self,
        id: &Id<Driver>,
        available: bool,
    ) -> Result<WithId<Driver>> {
        set_availability(&self.pool, id, available).await
    }
}

#[async_trait]
impl<'a> DriverRepo for PgDatabaseTransaction<'a> {
    async fn driver_exists(&mut self, id: &Id<Driver>) -> Result<bool> {
        exists(&mut *self.tx, id).await
    }

    async fn driver_stand(&mut self, id: &Id<Driver>) -> Result<Option<Id<Stand>>> {
        stand_of(&mut *self.tx, id).await
    }

    async fn get_driver(&mut self, id: &Id<Driver>) -> Result<WithId<Driver>> {
        get(&mut *self.tx, id).await
    }

    async fn get_drivers(&mut self, page: Page) -> Result<Vec<WithId<Driver>>> {
        get_all(&mut *self.tx, page).await
    }

    async fn insert_driver(&mut self, driver: Driver) -> Result<WithId<Driver>> {
        insert(&mut *self.tx, driver).await
    }

    async fn update_driver(
        &mut self,
        driver: WithId<Driver>,
    ) -> Result<WithId<Driver>> {
        update(&mut *self.tx, driver).await
    }

    async fn set_driver_availability(
        &mut self,
        id: &Id<Driver>,
        available: bool,
    ) -> Result<WithId<Driver>> {
        set_availability(&mut *self.tx, id, available).await
    }
}
