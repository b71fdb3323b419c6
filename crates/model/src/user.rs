use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use utility::id::HasId;

use crate::ExampleData;

/// A rider. Accounts are managed elsewhere; the dispatcher only needs to know
/// that a user exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

impl HasId for User {
    type IdType = i64;
}

impl ExampleData for User {
    fn example_data() -> Self {
        Self {
            name: "Jane Rider".to_owned(),
            email: "jane@example.org".to_owned(),
            created_at: DateTime::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub name: String,
    pub email: String,
}

impl NewUser {
    pub fn into_user(self, created_at: DateTime<Utc>) -> User {
        User {
            name: self.name,
            email: self.email,
            created_at,
        }
    }
}

impl ExampleData for NewUser {
    fn example_data() -> Self {
        Self {
            name: "Jane Rider".to_owned(),
            email: "jane@example.org".to_owned(),
        }
    }
}
