use std::future::Future;

use dispatch::database::{DatabaseError, Result};
use model::{driver::Driver, ride::Ride, Page, WithId};
use sqlx::{Acquire, Executor, Postgres};
use utility::id::{Id, IdWrapper};

use crate::data_model::{ride::RideRow, with_id, with_ids};

use super::{bounds, convert_error};

const COLUMNS: &str =
    "id, user_id, driver_id, start_location, end_location, status, requested_at";

pub async fn get<'c, E>(executor: E, id: &Id<Ride>) -> Result<WithId<Ride>>
where
    E: Executor<'c, Database = Postgres>,
{
    let row: RideRow =
        sqlx::query_as(&format!("SELECT {} FROM rides WHERE id = $1;", COLUMNS))
            .bind(id.raw())
            .fetch_one(executor)
            .await
            .map_err(convert_error)?;
    with_id(row)
}

pub async fn get_all<'c, E>(executor: E, page: Page) -> Result<Vec<WithId<Ride>>>
where
    E: Executor<'c, Database = Postgres>,
{
    let (limit, offset) = bounds(page);
    let rows: Vec<RideRow> = sqlx::query_as(&format!(
        "SELECT {} FROM rides ORDER BY id LIMIT $1 OFFSET $2;",
        COLUMNS
    ))
    .bind(limit)
    .bind(offset)
    .fetch_all(executor)
    .await
    .map_err(convert_error)?;
    with_ids(rows)
}

pub async fn insert<'c, E>(executor: E, ride: Ride) -> Result<WithId<Ride>>
where
    E: Executor<'c, Database = Postgres>,
{
    let row: RideRow = sqlx::query_as(&format!(
        "
        INSERT INTO rides(
            user_id,
            driver_id,
            start_location,
            end_location,
            status,
            requested_at
        )
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING {};
        ",
        COLUMNS
    ))
    .bind(ride.user_id.raw())
    .bind(ride.driver_id.raw())
    .bind(ride.start_location)
    .bind(ride.end_location)
    .bind(ride.status.as_str())
    .bind(ride.requested_at)
    .fetch_one(executor)
    .await
    .map_err(convert_error)?;
    with_id(row)
}

/// Only writes if the stored status and driver are still those of `seen`. A
/// concurrent write of the same ride blocks on the row lock, and the
/// condition is checked against the row that write left behind.
pub fn update<'a, 'c, A>(
    acquire: A,
    seen: &'a Ride,
    ride: WithId<Ride>,
) -> impl Future<Output = Result<WithId<Ride>>> + Send + 'a
where
    A: Acquire<'c, Database = Postgres> + Send + 'a,
    A::Connection: Send,
{
    async move {
        let mut connection = acquire.acquire().await.map_err(convert_error)?;
        let updated: Option<RideRow> = sqlx::query_as(&format!(
            "
            UPDATE rides
            SET
                driver_id = $2,
                start_location = $3,
                end_location = $4,
                status = $5
            WHERE
                id = $1
                AND status = $6
                AND driver_id IS NOT DISTINCT FROM $7
            RETURNING {};
            ",
            COLUMNS
        ))
        .bind(ride.id.raw())
        .bind(ride.content.driver_id.raw())
        .bind(ride.content.start_location)
        .bind(ride.content.end_location)
        .bind(ride.content.status.as_str())
        .bind(seen.status.as_str())
        .bind(seen.driver_id.as_ref().raw())
        .fetch_optional(&mut *connection)
        .await
        .map_err(convert_error)?;

        match updated {
            Some(row) => with_id(row),
            None => {
                let current = get(&mut *connection, &ride.id).await?;
                Err(DatabaseError::Conflict(format!(
                    "ride {} was changed concurrently and is now {}",
                    ride.id, current.content.status
                )))
            }
        }
    }
}

pub async fn active_of<'c, E>(
    executor: E,
    driver: &Id<Driver>,
) -> Result<Vec<WithId<Ride>>>
where
    E: Executor<'c, Database = Postgres>,
{
    let rows: Vec<RideRow> = sqlx::query_as(&format!(
        "
        SELECT {}
        FROM rides
        WHERE driver_id = $1 AND status IN ('pending', 'accepted')
        ORDER BY id;
        ",
        COLUMNS
    ))
    .bind(driver.raw())
    .fetch_all(executor)
    .await
    .map_err(convert_error)?;
    with_ids(rows)
}

/// Only a pending ride is assigned. A concurrent assignment of the same ride
/// blocks on the row lock and then finds the ride accepted.
pub fn assign<'a, 'c, A>(
    acquire: A,
    id: &'a Id<Ride>,
    driver: &'a Id<Driver>,
) -> impl Future<Output = Result<WithId<Ride>>> + Send + 'a
where
    A: Acquire<'c, Database = Postgres> + Send + 'a,
    A::Connection: Send,
{
    async move {
        let mut connection = acquire.acquire().await.map_err(convert_error)?;
        let assigned: Option<RideRow> = sqlx::query_as(&format!(
            "
            UPDATE rides
            SET
                driver_id = $2,
                status = 'accepted'
            WHERE
                id = $1 AND status = 'pending'
            RETURNING {};
            ",
            COLUMNS
        ))
        .bind(id.raw())
        .bind(driver.raw())
        .fetch_optional(&mut *connection)
        .await
        .map_err(convert_error)?;

        match assigned {
            Some(row) => with_id(row),
            None => {
                let current = get(&mut *connection, id).await?;
                Err(DatabaseError::Conflict(format!(
                    "ride {} is {}, not pending",
                    id, current.content.status
                )))
            }
        }
    }
}
