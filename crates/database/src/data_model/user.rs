use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dispatch::database::{Result, UserRepo};
use model::{user::User, WithId};
use sqlx::prelude::FromRow;
use utility::id::Id;

use crate::queries::user::{exists, get, insert};
use crate::{PgDatabaseAutocommit, PgDatabaseTransaction};

use super::DatabaseRow;

#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

impl DatabaseRow for UserRow {
    type Model = User;

    fn get_id(&self) -> Id<Self::Model> {
        Id::new(self.id)
    }

    fn to_model(self) -> Result<Self::Model> {
        Ok(User {
            name: self.name,
            email: self.email,
            created_at: self.created_at,
        })
    }
}

#[async_trait]
impl UserRepo for PgDatabaseAutocommit {
    async fn user_exists(&mut self, id: &Id<User>) -> Result<bool> {
        exists(&self.pool, id).await
    }

    async fn get_user(&mut self, id: &Id<User>) -> Result<WithId<User>> {
        get(&self.pool, id).await
    }

    async fn insert_user(&mut self, user: User) -> Result<WithId<User>> {
        insert(&self.pool, user).await
    }
}

#[async_trait]
impl<'a> UserRepo for PgDatabaseTransaction<'a> {
    async fn user_exists(&mut self, id: &Id<User>) -> Result<bool> {
        exists(&mut *self.tx, id).await
    }

    async fn get_user(&mut self, id: &Id<User>) -> Result<WithId<User>> {
        get(&mut *self.tx, id).await
    }

    async fn insert_user(&mut self, user: User) -> Result<WithId<User>> {
        insert(&mut *self.tx, user).await
    }
}
