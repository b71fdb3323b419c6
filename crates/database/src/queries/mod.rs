use dispatch::database::DatabaseError;
use model::Page;

pub mod driver;
pub mod queue;
pub mod ride;
pub mod stand;
pub mod user;

pub(crate) fn convert_error(why: sqlx::Error) -> DatabaseError {
    match why {
        sqlx::Error::RowNotFound => DatabaseError::NotFound,
        sqlx::Error::Database(ref db_error)
            if db_error.is_unique_violation()
                || db_error.is_foreign_key_violation() =>
        {
            DatabaseError::Conflict(db_error.message().to_owned())
        }
        _ => DatabaseError::Other(Box::new(why)),
    }
}

/// `(limit, offset)` ready to bind.
pub(crate) fn bounds(page: Page) -> (i64, i64) {
    (i64::from(page.limit), i64::from(page.offset))
}
