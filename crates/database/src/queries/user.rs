use dispatch::database::Result;
use model::{user::User, WithId};
use sqlx::{Executor, Postgres};
use utility::id::Id;

use crate::data_model::{user::UserRow, with_id};

use super::convert_error;

pub async fn exists<'c, E>(executor: E, id: &Id<User>) -> Result<bool>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1);")
        .bind(id.raw())
        .fetch_one(executor)
        .await
        .map_err(convert_error)
}

pub async fn get<'c, E>(executor: E, id: &Id<User>) -> Result<WithId<User>>
where
    E: Executor<'c, Database = Postgres>,
{
    let row: UserRow = sqlx::query_as(
        "
        SELECT
            id,
            name,
            email,
            created_at
        FROM
            users
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

pub async fn insert<'c, E>(executor: E, user: User) -> Result<WithId<User>>
where
    E: Executor<'c, Database = Postgres>,
{
    let row: UserRow = sqlx::query_as(
        "
        INSERT INTO users(
            name,
            email,
            created_at
        )
        VALUES ($1, $2, $3)
        RETURNING id, name, email, created_at;
        ",
    )
    .bind(user.name)
    .bind(user.email)
    .bind(user.created_at)
    .fetch_one(executor)
    .await
    .map_err(convert_error)?;
    with_id(row)
}
