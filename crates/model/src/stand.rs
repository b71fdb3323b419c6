use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use utility::id::HasId;

use crate::ExampleData;

/// A fixed physical location where drivers wait for ride assignments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Stand {
    pub name: String,
    pub location: String,
}

impl HasId for Stand {
    type IdType = i64;
}

impl ExampleData for Stand {
    fn example_data() -> Self {
        Self {
            name: "Central Station".to_owned(),
            location: "Station Square 1".to_owned(),
        }
    }
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StandUpdate {
    pub name: Option<String>,
    pub location: Option<String>,
}

impl StandUpdate {
    pub fn apply(self, stand: Stand) -> Stand {
        Stand {
            name: self.name.unwrap_or(stand.name),
            location: self.location.unwrap_or(stand.location),
        }
    }
}
