use axum::{
    extract::{OriginalUri, Query, Request},
    http::{Method, StatusCode, Uri},
    response::IntoResponse,
    routing::MethodFilter,
    Json,
};
use dispatch::DispatchError;
use model::{ExampleData, Page};
use schemars::{schema_for, schema_for_value, JsonSchema};
use serde::{Deserialize, Serialize};

use crate::hateoas;

pub type RouteResult<O> = Result<O, RouteErrorResponse>;
pub type HateoasResult<O> = RouteResult<Json<hateoas::Response<O>>>;

/// A `MethodFilter` that matches all http methods.
pub(crate) const METHOD_FILTER_ALL: MethodFilter = MethodFilter::GET
    .or(MethodFilter::POST)
    .or(MethodFilter::PATCH)
    .or(MethodFilter::PUT)
    .or(MethodFilter::DELETE);

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub offset: u32,
    pub limit: u32,
    pub items: usize,
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VecResponse<T> {
    pub data: Vec<T>,
    pub pagination: Option<Pagination>,
}

impl<T> VecResponse<T> {
    pub fn non_paginated(data: Vec<T>) -> Self {
        Self {
            data,
            pagination: None,
        }
    }

    pub fn paginated(data: Vec<T>, page: Page) -> Self {
        let items = data.len();
        Self {
            data,
            pagination: Some(Pagination {
                offset: page.offset,
                limit: page.limit,
                items,
            }),
        }
    }

    pub fn hateoas(self) -> hateoas::Response<Self> {
        hateoas::Response::new(self)
    }
}

// - Services returning commonly used responses -

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SchemaParams {
    #[serde(default = "Default::default")]
    example_data: bool,
}

pub(crate) async fn schema<T: ExampleData + JsonSchema + Serialize>(
    Query(params): Query<SchemaParams>,
) -> impl IntoResponse {
    if params.example_data {
        Json(schema_for_value!(T::example_data()))
    } else {
        Json(schema_for!(T))
    }
}

pub(crate) async fn schema_no_example<T: JsonSchema + Serialize>(
    Query(_params): Query<SchemaParams>,
) -> impl IntoResponse {
    Json(schema_for!(T))
}

pub(crate) async fn route_not_found(
    OriginalUri(original_uri): OriginalUri,
    req: Request,
) -> impl IntoResponse {
    RouteErrorResponse::not_found(req.method(), original_uri.path())
}

/// Turns a failed dispatch operation into the error body of the request.
pub(crate) fn route_error<'a>(
    method: &'a Method,
    uri: &'a Uri,
) -> impl FnOnce(DispatchError) -> RouteErrorResponse + 'a {
    move |why| {
        RouteErrorResponse::from(why)
            .with_method(method)
            .with_uri(uri.path())
    }
}

// - Commonly used responeses -

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteErrorResponse {
    #[serde(skip)]
    pub status_code: StatusCode,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_method: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_uri: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub detailed_information: Option<String>,
}

impl RouteErrorResponse {
    pub fn new(status_code: StatusCode) -> Self {
        Self {
            status_code,
            http_method: None,
            requested_uri: None,
            message: None,
            detailed_information: None,
        }
    }

    pub fn not_found(method: &Method, uri: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND)
            .with_method(method)
            .with_uri(uri)
            .with_default_message()
    }

    pub fn with_method(mut self, method: &Method) -> Self {
        self.http_method = Some(method.to_string());
        self
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.requested_uri = Some(uri.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_default_message(self) -> Self {
        let message = self
            .status_code
            .canonical_reason()
            .unwrap_or("unknown error");
        self.with_message(message)
    }

    pub fn with_detailed_information(mut self, message: impl Into<String>) -> Self {
        self.detailed_information = Some(message.into());
        self
    }
}

fn status_of(error: &DispatchError) -> StatusCode {
    match error {
        DispatchError::NotFound
        | DispatchError::StandNotFound(_)
        | DispatchError::DriverNotFound(_)
        | DispatchError::UserNotFound(_)
        | DispatchError::RideNotFound(_)
        | DispatchError::NotQueued(_) => StatusCode::NOT_FOUND,
        DispatchError::DriverStandMismatch { .. }
        | DispatchError::NoDriverAvailable(_)
        | DispatchError::InvalidState(_)
        | DispatchError::Conflict(_) => StatusCode::CONFLICT,
        DispatchError::AutoAssignFailed { .. } | DispatchError::Storage(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl From<DispatchError> for RouteErrorResponse {
    fn from(value: DispatchError) -> Self {
        let response = Self::new(status_of(&value));
        match value {
            DispatchError::Storage(why) => {
                log::error!("Storage failure while handling a request: {}", why);
                response.with_default_message()
            }
            DispatchError::AutoAssignFailed { ride, source } => response
                .with_message(format!("ride {} was created but no driver was assigned", ride))
                .with_detailed_information(source.to_string()),
            other => response.with_message(other.to_string()),
        }
    }
}

impl IntoResponse for RouteErrorResponse {
    fn into_response(self) -> axum::response::Response {
        (self.status_code, Json(self)).into_response()
    }
}
