use std::future::Future;

use chrono::{DateTime, Utc};
use dispatch::database::{DatabaseError, Inserted, Result};
use model::{driver::Driver, queue::QueueEntry, stand::Stand, WithId};
use sqlx::{Acquire, Executor, Postgres};
use utility::id::Id;

use crate::data_model::{queue::QueueEntryRow, with_id, with_ids};

use super::convert_error;

const COLUMNS: &str = "id, stand_id, driver_id, joined_at, assigned_at, status";

/// How often an insert that lost against a concurrent join looks for the
/// winning entry before giving up.
const INSERT_ATTEMPTS: usize = 3;

/// Inserts a waiting entry unless the driver already waits somewhere. The
/// partial unique index on waiting entries decides between concurrent joins.
pub fn insert<'a, 'c, A>(
    acquire: A,
    stand: &'a Id<Stand>,
    driver: &'a Id<Driver>,
    joined_at: DateTime<Utc>,
) -> impl Future<Output = Result<Inserted<WithId<QueueEntry>>>> + Send + 'a
where
    A: Acquire<'c, Database = Postgres> + Send + 'a,
    A::Connection: Send,
{
    async move {
        let mut connection = acquire.acquire().await.map_err(convert_error)?;
        for _ in 0..INSERT_ATTEMPTS {
            let created: Option<QueueEntryRow> = sqlx::query_as(&format!(
                "
                INSERT INTO queue_entries(
                    stand_id,
                    driver_id,
                    joined_at,
                    status
                )
                VALUES ($1, $2, $3, 'waiting')
                ON CONFLICT (driver_id) WHERE status = 'waiting'
                DO NOTHING
                RETURNING {};
                ",
                COLUMNS
            ))
            .bind(stand.raw())
            .bind(driver.raw())
            .bind(joined_at)
            .fetch_optional(&mut *connection)
            .await
            .map_err(convert_error)?;
            if let Some(row) = created {
                return with_id(row).map(Inserted::Created);
            }

            // the existing entry may have been claimed or left in the meantime
            if let Some(row) = waiting_of(&mut *connection, driver).await? {
                return with_id(row).map(Inserted::Existing);
            }
        }
        Err(DatabaseError::Conflict(format!(
            "driver {} is joining concurrently",
            driver
        )))
    }
}

async fn waiting_of<'c, E>(
    executor: E,
    driver: &Id<Driver>,
) -> Result<Option<QueueEntryRow>>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as(&format!(
        "SELECT {} FROM queue_entries WHERE driver_id = $1 AND status = 'waiting';",
        COLUMNS
    ))
    .bind(driver.raw())
    .fetch_optional(executor)
    .await
    .map_err(convert_error)
}

pub async fn waiting_entry<'c, E>(
    executor: E,
    driver: &Id<Driver>,
) -> Result<Option<WithId<QueueEntry>>>
where
    E: Executor<'c, Database = Postgres>,
{
    waiting_of(executor, driver).await?.map(with_id).transpose()
}

/// Claims the oldest waiting entry of the stand in one statement. Rows locked
/// by concurrent claims are skipped instead of waited for.
pub async fn claim_oldest<'c, E>(
    executor: E,
    stand: &Id<Stand>,
    assigned_at: DateTime<Utc>,
) -> Result<Option<WithId<QueueEntry>>>
where
    E: Executor<'c, Database = Postgres>,
{
    let row: Option<QueueEntryRow> = sqlx::query_as(&format!(
        "
        UPDATE queue_entries
        SET
            status = 'assigned',
            assigned_at = $2
        WHERE id = (
            SELECT id
            FROM queue_entries
            WHERE stand_id = $1 AND status = 'waiting'
            ORDER BY joined_at ASC, id ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
        )
        RETURNING {};
        ",
        COLUMNS
    ))
    .bind(stand.raw())
    .bind(assigned_at)
    .fetch_optional(executor)
    .await
    .map_err(convert_error)?;
    row.map(with_id).transpose()
}

/// Blocks while a concurrent claim holds the driver's entry and then only
/// succeeds if that claim rolled back.
pub async fn mark_left<'c, E>(
    executor: E,
    driver: &Id<Driver>,
) -> Result<Option<WithId<QueueEntry>>>
where
    E: Executor<'c, Database = Postgres>,
{
    let row: Option<QueueEntryRow> = sqlx::query_as(&format!(
        "
        UPDATE queue_entries
        SET
            status = 'left'
        WHERE
            driver_id = $1 AND status = 'waiting'
        RETURNING {};
        ",
        COLUMNS
    ))
    .bind(driver.raw())
    .fetch_optional(executor)
    .await
    .map_err(convert_error)?;
    row.map(with_id).transpose()
}

pub async fn list_waiting<'c, E>(
    executor: E,
    stand: &Id<Stand>,
) -> Result<Vec<WithId<QueueEntry>>>
where
    E: Executor<'c, Database = Postgres>,
{
    let rows: Vec<QueueEntryRow> = sqlx::query_as(&format!(
        "
        SELECT {}
        FROM queue_entries
        WHERE stand_id = $1 AND status = 'waiting'
        ORDER BY joined_at ASC, id ASC;
        ",
        COLUMNS
    ))
    .bind(stand.raw())
    .fetch_all(executor)
    .await
    .map_err(convert_error)?;
    with_ids(rows)
}

pub async fn get<'c, E>(executor: E, id: &Id<QueueEntry>) -> Result<WithId<QueueEntry>>
where
    E: Executor<'c, Database = Postgres>,
{
    let row: QueueEntryRow = sqlx::query_as(&format!(
        "SELECT {} FROM queue_entries WHERE id = $1;",
        COLUMNS
    ))
    .bind(id.raw())
    .fetch_one(executor)
    .await
    .map_err(convert_error)?;
    with_id(row)
}
