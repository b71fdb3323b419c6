use dispatch::database::Result;
use model::WithId;
use utility::id::{HasId, Id};

pub mod driver;
pub mod queue;
pub mod ride;
pub mod stand;
pub mod user;

pub trait DatabaseRow {
    type Model: HasId<IdType = i64>;

    fn get_id(&self) -> Id<Self::Model>;

    /// Fails if a stored value does not fit the model, e.g. an unknown status.
    fn to_model(self) -> Result<Self::Model>;
}

pub fn with_ids<R: DatabaseRow>(rows: Vec<R>) -> Result<Vec<WithId<R::Model>>> {
    rows.into_iter().map(with_id).collect()
}

pub fn with_id<R: DatabaseRow>(row: R) -> Result<WithId<R::Model>> {
    let id = row.get_id();
    Ok(WithId::new(id, row.to_model()?))
}
