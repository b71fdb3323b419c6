use dispatch::database::Result;
use model::{driver::Driver, stand::Stand, Page, WithId};
use sqlx::{Executor, Postgres};
use utility::id::{Id, IdWrapper};

use crate::data_model::{driver::DriverRow, with_id, with_ids};

use super::{bounds, convert_error};

const COLUMNS: &str = "id, name, phone, is_available, stand_id, created_at";

pub async fn exists<'c, E>(executor: E, id: &Id<Driver>) -> Result<bool>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM drivers WHERE id = $1);")
        .bind(id.raw())
        .fetch_one(executor)
        .await
        .map_err(convert_error)
}

pub async fn stand_of<'c, E>(executor: E, id: &Id<Driver>) -> Result<Option<Id<Stand>>>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_scalar("SELECT stand_id FROM drivers WHERE id = $1;")
        .bind(id.raw())
        .fetch_one(executor)
        .await
        .map_err(convert_error)
        .map(|stand: Option<i64>| stand.map(Id::new))
}

pub async fn get<'c, E>(executor: E, id: &Id<Driver>) -> Result<WithId<Driver>>
where
    E: Executor<'c, Database = Postgres>,
{
    let row: DriverRow =
        sqlx::query_as(&format!("SELECT {} FROM drivers WHERE id = $1;", COLUMNS))
            .bind(id.raw())
            .fetch_one(executor)
            .await
            .map_err(convert_error)?;
    with_id(row)
}

pub async fn get_all<'c, E>(executor: E, page: Page) -> Result<Vec<WithId<Driver>>>
where
    E: Executor<'c, Database = Postgres>,
{
    let (limit, offset) = bounds(page);
    let rows: Vec<DriverRow> = sqlx::query_as(&format!(
        "SELECT {} FROM drivers ORDER BY id LIMIT $1 OFFSET $2;",
        COLUMNS
    ))
    .bind(limit)
    .bind(offset)
    .fetch_all(executor)
    .await
    .map_err(convert_error)?;
    with_ids(rows)
}

pub async fn insert<'c, E>(executor: E, driver: Driver) -> Result<WithId<Driver>>
where
    E: Executor<'c, Database = Postgres>,
{
    let row: DriverRow = sqlx::query_as(&format!(
        "
        INSERT INTO drivers(
            name,
            phone,
            is_available,
            stand_id,
            created_at
        )
        VALUES ($1, $2, $3, $4, $5)
        RETURNING {};
        ",
        COLUMNS
    ))
    .bind(driver.name)
    .bind(driver.phone)
    .bind(driver.is_available)
    .bind(driver.stand_id.raw())
    .bind(driver.created_at)
    .fetch_one(executor)
    .await
    .map_err(convert_error)?;
    with_id(row)
}

pub async fn update<'c, E>(executor: E, driver: WithId<Driver>) -> Result<WithId<Driver>>
where
    E: Executor<'c, Database = Postgres>,
{
    let row: DriverRow = sqlx::query_as(&format!(
        "
        UPDATE drivers
        SET
            name = $2,
            phone = $3,
            is_available = $4,
            stand_id = $5
        WHERE
            id = $1
        RETURNING {};
        ",
        COLUMNS
    ))
    .bind(driver.id.raw())
    .bind(driver.content.name)
    .bind(driver.content.phone)
    .bind(driver.content.is_available)
    .bind(driver.content.stand_id.raw())
    .fetch_one(executor)
    .await
    .map_err(convert_error)?;
    with_id(row)
}

pub async fn set_availability<'c, E>(
    executor: E,
    id: &Id<Driver>,
    available: bool,
) -> Result<WithId<Driver>>
where
    E: Executor<'c, Database = Postgres>,
{
    let row: DriverRow = sqlx::query_as(&format!(
        "UPDATE drivers SET is_available = $2 WHERE id = $1 RETURNING {};",
        COLUMNS
    ))
    .bind(id.raw())
    .bind(available)
    .fetch_one(executor)
    .await
    .map_err(convert_error)?;
    with_id(row)
}
