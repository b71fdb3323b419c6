use dispatch::database::Result;
use model::{stand::Stand, Page, WithId};
use sqlx::{Executor, Postgres};
use utility::id::Id;

use crate::data_model::{stand::StandRow, with_id, with_ids};

use super::{bounds, convert_error};

pub async fn exists<'c, E>(executor: E, id: &Id<Stand>) -> Result<bool>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM stands WHERE id = $1);")
        .bind(id.raw())
        .fetch_one(executor)
        .await
        .map_err(convert_error)
}

pub async fn get<'c, E>(executor: E, id: &Id<Stand>) -> Result<WithId<Stand>>
where
    E: Executor<'c, Database = Postgres>,
{
    let row: StandRow = sqlx::query_as(
        "
        SELECT
            id,
            name,
            location
        FROM
            stands
        WHERE
            id = $1;
        ",
    )
    .bind(id.raw())
    .fetch_one(executor)
    .await
    .map_err(convert_error)?;
    with_id(row)
}

pub async fn get_all<'c, E>(executor: E, page: Page) -> Result<Vec<WithId<Stand>>>
where
    E: Executor<'c, Database = Postgres>,
{
    let (limit, offset) = bounds(page);
    let rows: Vec<StandRow> = sqlx::query_as(
        "
        SELECT
            id,
            name,
            location
        FROM
            stands
        ORDER BY id
        LIMIT $1 OFFSET $2;
        ",
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(executor)
    .await
    .map_err(convert_error)?;
    with_ids(rows)
}

pub async fn insert<'c, E>(executor: E, stand: Stand) -> Result<WithId<Stand>>
where
    E: Executor<'c, Database = Postgres>,
{
    let row: StandRow = sqlx::query_as(
        "
        INSERT INTO stands(
            name,
            location
        )
        VALUES ($1, $2)
        RETURNING id, name, location;
        ",
    )
    .bind(stand.name)
    .bind(stand.location)
    .fetch_one(executor)
    .await
    .map_err(convert_error)?;
    with_id(row)
}

pub async fn update<'c, E>(executor: E, stand: WithId<Stand>) -> Result<WithId<Stand>>
where
    E: Executor<'c, Database = Postgres>,
{
    let row: StandRow = sqlx::query_as(
        "
        UPDATE stands
        SET
            name = $2,
            location = $3
        WHERE
            id = $1
        RETURNING id, name, location;
        ",
    )
    .bind(stand.id.raw())
    .bind(stand.content.name)
    .bind(stand.content.location)
    .fetch_one(executor)
    .await
    .map_err(convert_error)?;
    with_id(row)
}
