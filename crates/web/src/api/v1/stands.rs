use std::sync::Arc;

use axum::{
    extract::{OriginalUri, Path, Query, State},
    http::Method,
    routing::{get, on, post},
    Extension, Json, Router,
};
use dispatch::database::Database;
use model::{
    driver::Driver,
    queue::QueueEntry,
    stand::{Stand, StandUpdate},
    Page, WithId,
};
use serde::Deserialize;
use utility::{id::Id, let_also::LetAlso};

use crate::{
    common::{
        route_error, route_not_found, schema, HateoasResult, VecResponse,
        METHOD_FILTER_ALL,
    },
    hateoas,
    middleware::base_url::{base_url_middleware, BaseUrl},
    WebState,
};

macro_rules! resource {
    ($($arg:tt)*) => {
        crate::api::v1::resource!("/stands{}", format_args!($($arg)*))
    };
}
pub(crate) use resource;

pub(crate) fn routes<D>(state: WebState<D>) -> Router
where
    D: Database,
{
    Router::new()
        .route("/schema", get(schema::<Stand>))
        .route("/queue/schema", get(schema::<QueueEntry>))
        .route("/:id/queue/next", post(assign_next::<D>))
        .route("/:id/queue", get(peek_queue::<D>).post(join_queue::<D>))
        .route("/:id", get(get_stand::<D>).put(update_stand::<D>))
        .route("/", get(get_stands::<D>).post(create_stand::<D>))
        .layer(axum::middleware::from_fn(base_url_middleware))
        .with_state(state)
        .fallback_service(on(METHOD_FILTER_ALL, route_not_found))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinRequest {
    driver_id: Id<Driver>,
}

async fn create_stand<D: Database>(
    method: Method,
    OriginalUri(uri): OriginalUri,
    State(WebState { server }): State<WebState<D>>,
    Extension(base_url): Extension<Arc<BaseUrl>>,
    Json(stand): Json<Stand>,
) -> HateoasResult<WithId<Stand>> {
    server
        .registry()
        .create_stand(stand)
        .await
        .map(|stand| stand_hateoas(stand, base_url).json())
        .map_err(route_error(&method, &uri))
}

async fn get_stands<D: Database>(
    method: Method,
    OriginalUri(uri): OriginalUri,
    Query(page): Query<Page>,
    State(WebState { server }): State<WebState<D>>,
    Extension(base_url): Extension<Arc<BaseUrl>>,
) -> HateoasResult<VecResponse<hateoas::Response<WithId<Stand>>>> {
    server
        .registry()
        .get_stands(page)
        .await
        .map(|stands| {
            stands
                .into_iter()
                .map(|stand| stand_hateoas(stand, base_url.clone()))
                .collect::<Vec<_>>()
                .let_owned(|data| VecResponse::paginated(data, page).hateoas().json())
        })
        .map_err(route_error(&method, &uri))
}

async fn get_stand<D: Database>(
    method: Method,
    OriginalUri(uri): OriginalUri,
    Path(id): Path<i64>,
    State(WebState { server }): State<WebState<D>>,
    Extension(base_url): Extension<Arc<BaseUrl>>,
) -> HateoasResult<WithId<Stand>> {
    server
        .registry()
        .get_stand(&Id::new(id))
        .await
        .map(|stand| stand_hateoas(stand, base_url).json())
        .map_err(route_error(&method, &uri))
}

async fn update_stand<D: Database>(
    method: Method,
    OriginalUri(uri): OriginalUri,
    Path(id): Path<i64>,
    State(WebState { server }): State<WebState<D>>,
    Extension(base_url): Extension<Arc<BaseUrl>>,
    Json(update): Json<StandUpdate>,
) -> HateoasResult<WithId<Stand>> {
    server
        .registry()
        .update_stand(&Id::new(id), update)
        .await
        .map(|stand| stand_hateoas(stand, base_url).json())
        .map_err(route_error(&method, &uri))
}

/// The waiting line of the stand, longest waiting driver first.
async fn peek_queue<D: Database>(
    method: Method,
    OriginalUri(uri): OriginalUri,
    Path(id): Path<i64>,
    State(WebState { server }): State<WebState<D>>,
    Extension(base_url): Extension<Arc<BaseUrl>>,
) -> HateoasResult<VecResponse<hateoas::Response<WithId<QueueEntry>>>> {
    server
        .queue()
        .peek_queue(&Id::new(id))
        .await
        .map(|entries| {
            entries
                .into_iter()
                .map(|entry| queue_entry_hateoas(entry, base_url.clone()))
                .collect::<Vec<_>>()
                .let_owned(|data| VecResponse::non_paginated(data).hateoas().json())
        })
        .map_err(route_error(&method, &uri))
}

async fn join_queue<D: Database>(
    method: Method,
    OriginalUri(uri): OriginalUri,
    Path(id): Path<i64>,
    State(WebState { server }): State<WebState<D>>,
    Extension(base_url): Extension<Arc<BaseUrl>>,
    Json(request): Json<JoinRequest>,
) -> HateoasResult<WithId<QueueEntry>> {
    server
        .queue()
        .join(&Id::new(id), &request.driver_id)
        .await
        .map(|entry| queue_entry_hateoas(entry, base_url).json())
        .map_err(route_error(&method, &uri))
}

/// Hands out the longest waiting driver without a ride attached.
async fn assign_next<D: Database>(
    method: Method,
    OriginalUri(uri): OriginalUri,
    Path(id): Path<i64>,
    State(WebState { server }): State<WebState<D>>,
    Extension(base_url): Extension<Arc<BaseUrl>>,
) -> HateoasResult<WithId<QueueEntry>> {
    server
        .queue()
        .assign_next(&Id::new(id))
        .await
        .map(|entry| queue_entry_hateoas(entry, base_url).json())
        .map_err(route_error(&method, &uri))
}

pub(crate) fn stand_hateoas(
    stand: WithId<Stand>,
    base_url: Arc<BaseUrl>,
) -> hateoas::Response<WithId<Stand>> {
    let id = stand.id.raw();
    hateoas::Response::builder(stand, base_url)
        .link("self", resource!("/{}", id))
        .link("queue", resource!("/{}/queue", id))
        .build()
}

pub(crate) fn queue_entry_hateoas(
    entry: WithId<QueueEntry>,
    base_url: Arc<BaseUrl>,
) -> hateoas::Response<WithId<QueueEntry>> {
    let stand = entry.content.stand_id.raw();
    let driver = entry.content.driver_id.raw();
    hateoas::Response::builder(entry, base_url)
        .link("stand", resource!("/{}", stand))
        .link("queue", resource!("/{}/queue", stand))
        .link("driver", super::drivers::resource!("/{}", driver))
        .build()
}
