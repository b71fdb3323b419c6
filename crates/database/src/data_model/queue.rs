use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dispatch::database::{AtomicClaimableStore, DatabaseError, Inserted, Result};
use model::{
    driver::Driver,
    queue::{QueueEntry, QueueStatus},
    stand::Stand,
    WithId,
};
use sqlx::prelude::FromRow;
use utility::id::Id;

use crate::queries::queue::{
    claim_oldest, get, insert, list_waiting, mark_left, waiting_entry,
};
use crate::{PgDatabaseAutocommit, PgDatabaseTransaction};

use super::DatabaseRow;

#[derive(Debug, Clone, FromRow)]
pub struct QueueEntryRow {
    pub id: i64,
    pub stand_id: i64,
    pub driver_id: i64,
    pub joined_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub status: String,
}

impl DatabaseRow for QueueEntryRow {
    type Model = QueueEntry;

    fn get_id(&self) -> Id<Self::Model> {
        Id::new(self.id)
    }

    fn to_model(self) -> Result<Self::Model> {
        Ok(QueueEntry {
            stand_id: Id::new(self.stand_id),
            driver_id: Id::new(self.driver_id),
            joined_at: self.joined_at,
            assigned_at: self.assigned_at,
            status: QueueStatus::try_from(self.status.as_str())
                .map_err(DatabaseError::other)?,
        })
    }
}

#[async_trait]
impl AtomicClaimableStore for PgDatabaseAutocommit {
    async fn insert_queue_entry(
        &mut self,
        stand: &Id<Stand>,
        driver: &Id<Driver>,
        joined_at: DateTime<Utc>,
    ) -> Result<Inserted<WithId<QueueEntry>>> {
        insert(&self.pool, stand, driver, joined_at).await
    }

    async fn claim_oldest(
        &mut self,
        stand: &Id<Stand>,
        assigned_at: DateTime<Utc>,
    ) -> Result<Option<WithId<QueueEntry>>> {
        claim_oldest(&self.pool, stand, assigned_at).await
    }

    async fn mark_left(
        &mut self,
        driver: &Id<Driver>,
    ) -> Result<Option<WithId<QueueEntry>>> {
        mark_left(&self.pool, driver).await
    }

    async fn list_waiting(
        &mut self,
        stand: &Id<Stand>,
    ) -> Result<Vec<WithId<QueueEntry>>> {
        list_waiting(&self.pool, stand).await
    }

    async fn waiting_entry_of(
        &mut self,
        driver: &Id<Driver>,
    ) -> Result<Option<WithId<QueueEntry>>> {
        waiting_entry(&self.pool, driver).await
    }

    async fn get_queue_entry(
        &mut self,
        id: &Id<QueueEntry>,
    ) -> Result<WithId<QueueEntry>> {
        get(&self.pool, id).await
    }
}

#[async_trait]
impl<'a> AtomicClaimableStore for PgDatabaseTransaction<'a> {
    async fn insert_queue_entry(
        &mut self,
        stand: &Id<Stand>,
        driver: &Id<Driver>,
        joined_at: DateTime<Utc>,
    ) -> Result<Inserted<WithId<QueueEntry>>> {
        insert(&mut *self.tx, stand, driver, joined_at).await
    }

    async fn claim_oldest(
        &mut self,
        stand: &Id<Stand>,
        assigned_at: DateTime<Utc>,
    ) -> Result<Option<WithId<QueueEntry>>> {
        claim_oldest(&mut *self.tx, stand, assigned_at).await
    }

    async fn mark_left(
        &mut self,
        driver: &Id<Driver>,
    ) -> Result<Option<WithId<QueueEntry>>> {
        mark_left(&mut *self.tx, driver).await
    }

    async fn list_waiting(
        &mut self,
        stand: &Id<Stand>,
    ) -> Result<Vec<WithId<QueueEntry>>> {
        list_waiting(&mut *self.tx, stand).await
    }

    async fn waiting_entry_of(
        &mut self,
        driver: &Id<Driver>,
    ) -> Result<Option<WithId<QueueEntry>>> {
        waiting_entry(&mut *self.tx, driver).await
    }

    async fn get_queue_entry(
        &mut self,
        id: &Id<QueueEntry>,
    ) -> Result<WithId<QueueEntry>> {
        get(&mut *self.tx, id).await
    }
}
