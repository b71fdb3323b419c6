use async_trait::async_trait;
use dispatch::database::{Result, StandRepo};
use model::{stand::Stand, Page, WithId};
use sqlx::prelude::FromRow;
use utility::id::Id;

use crate::queries::stand::{exists, get, get_all, insert, update};
use crate::{PgDatabaseAutocommit, PgDatabaseTransaction};

use super::DatabaseRow;

#[derive(Debug, Clone, FromRow)]
pub struct StandRow {
    pub id: i64,
    pub name: String,
    pub location: String,
}

impl DatabaseRow for StandRow {
    type Model = Stand;

    fn get_id(&self) -> Id<Self::Model> {
        Id::new(self.id)
    }

    fn to_model(self) -> Result<Self::Model> {
        Ok(Stand {
            name: self.name,
            location: self.location,
        })
    }
}

#[async_trait]
impl StandRepo for PgDatabaseAutocommit {
    async fn stand_exists(&mut self, id: &Id<Stand>) -> Result<bool> {
        exists(&self.pool, id).await
    }

    async fn get_stand(&mut self, id: &Id<Stand>) -> Result<WithId<Stand>> {
        get(&self.pool, id).await
    }

    async fn get_stands(&mut self, page: Page) -> Result<Vec<WithId<Stand>>> {
        get_all(&self.pool, page).await
    }

    async fn insert_stand(&mut self, stand: Stand) -> Result<WithId<Stand>> {
        insert(&self.pool, stand).await
    }

    async fn update_stand(&mut self, stand: WithId<Stand>) -> Result<WithId<Stand>> {
        update(&self.pool, stand).await
    }
}

#[async_trait]
impl<'a> StandRepo for PgDatabaseTransaction<'a> {
    async fn stand_exists(&mut self, id: &Id<Stand>) -> Result<bool> {
        exists(&mut *self.tx, id).await
    }

    async fn get_stand(&mut self, id: &Id<Stand>) -> Result<WithId<Stand>> {
        get(&mut *self.tx, id).await
    }

    async fn get_stands(&mut self, page: Page) -> Result<Vec<WithId<Stand>>> {
        get_all(&mut *self.tx, page).await
    }

    async fn insert_stand(&mut self, stand: Stand) -> Result<WithId<Stand>> {
        insert(&mut *self.tx, stand).await
    }

    async fn update_stand(&mut self, stand: WithId<Stand>) -> Result<WithId<Stand>> {
        update(&mut *self.tx, stand).await
    }
}
