use std::sync::Arc;

use axum::{
    extract::{OriginalUri, Path, Query, State},
    http::Method,
    routing::{get, on, put},
    Extension, Json, Router,
};
use dispatch::database::Database;
use model::{
    driver::{Driver, DriverUpdate, NewDriver},
    queue::QueueEntry,
    Page, WithId,
};
use serde::Deserialize;
use utility::{
    id::{Id, IdWrapper},
    let_also::LetAlso,
};

use super::stands::{self, queue_entry_hateoas};
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
        crate::api::v1::resource!("/drivers{}", format_args!($($arg)*))
    };
}
pub(crate) use resource;

pub(crate) fn routes<D>(state: WebState<D>) -> Router
where
    D: Database,
{
    Router::new()
        .route("/schema", get(schema::<Driver>))
        .route("/new/schema", get(schema::<NewDriver>))
        .route("/:id/availability", put(set_availability::<D>))
        .route("/:id/queue", axum::routing::delete(leave_queue::<D>))
        .route("/:id", get(get_driver::<D>).put(update_driver::<D>))
        .route("/", get(get_drivers::<D>).post(create_driver::<D>))
        .layer(axum::middleware::from_fn(base_url_middleware))
        .with_state(state)
        .fallback_service(on(METHOD_FILTER_ALL, route_not_found))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AvailabilityRequest {
    is_available: bool,
}

async fn create_driver<D: Database>(
    method: Method,
    OriginalUri(uri): OriginalUri,
    State(WebState { server }): State<WebState<D>>,
    Extension(base_url): Extension<Arc<BaseUrl>>,
    Json(driver): Json<NewDriver>,
) -> HateoasResult<WithId<Driver>> {
    server
        .registry()
        .create_driver(driver)
        .await
        .map(|driver| driver_hateoas(driver, base_url).json())
        .map_err(route_error(&method, &uri))
}

async fn get_drivers<D: Database>(
    method: Method,
    OriginalUri(uri): OriginalUri,
    Query(page): Query<Page>,
    State(WebState { server }): State<WebState<D>>,
    Extension(base_url): Extension<Arc<BaseUrl>>,
) -> HateoasResult<VecResponse<hateoas::Response<WithId<Driver>>>> {
    server
        .registry()
        .get_drivers(page)
        .await
        .map(|drivers| {
            drivers
                .into_iter()
                .map(|driver| driver_hateoas(driver, base_url.clone()))
                .collect::<Vec<_>>()
                .let_owned(|data| VecResponse::paginated(data, page).hateoas().json())
        })
        .map_err(route_error(&method, &uri))
}

async fn get_driver<D: Database>(
    method: Method,
    OriginalUri(uri): OriginalUri,
    Path(id): Path<i64>,
    State(WebState { server }): State<WebState<D>>,
    Extension(base_url): Extension<Arc<BaseUrl>>,
) -> HateoasResult<WithId<Driver>> {
    server
        .registry()
        .get_driver(&Id::new(id))
        .await
        .map(|driver| driver_hateoas(driver, base_url).json())
        .map_err(route_error(&method, &uri))
}

async fn update_driver<D: Database>(
    method: Method,
    OriginalUri(uri): OriginalUri,
    Path(id): Path<i64>,
    State(WebState { server }): State<WebState<D>>,
    Extension(base_url): Extension<Arc<BaseUrl>>,
    Json(update): Json<DriverUpdate>,
) -> HateoasResult<WithId<Driver>> {
    server
        .registry()
        .update_driver(&Id::new(id), update)
        .await
        .map(|driver| driver_hateoas(driver, base_url).json())
        .map_err(route_error(&method, &uri))
}

async fn set_availability<D: Database>(
    method: Method,
    OriginalUri(uri): OriginalUri,
    Path(id): Path<i64>,
    State(WebState { server }): State<WebState<D>>,
    Extension(base_url): Extension<Arc<BaseUrl>>,
    Json(request): Json<AvailabilityRequest>,
) -> HateoasResult<WithId<Driver>> {
    server
        .registry()
        .set_driver_availability(&Id::new(id), request.is_available)
        .await
        .map(|driver| driver_hateoas(driver, base_url).json())
        .map_err(route_error(&method, &uri))
}

/// Removes the driver from whichever waiting line they are in.
async fn leave_queue<D: Database>(
    method: Method,
    OriginalUri(uri): OriginalUri,
    Path(id): Path<i64>,
    State(WebState { server }): State<WebState<D>>,
    Extension(base_url): Extension<Arc<BaseUrl>>,
) -> HateoasResult<WithId<QueueEntry>> {
    server
        .queue()
        .leave(&Id::new(id))
        .await
        .map(|entry| queue_entry_hateoas(entry, base_url).json())
        .map_err(route_error(&method, &uri))
}

pub(crate) fn driver_hateoas(
    driver: WithId<Driver>,
    base_url: Arc<BaseUrl>,
) -> hateoas::Response<WithId<Driver>> {
    let id = driver.id.raw();
    let stand = driver.content.stand_id.as_ref().raw();
    hateoas::Response::builder(driver, base_url)
        .link("self", resource!("/{}", id))
        .link_option("stand", stand.map(|stand| stands::resource!("/{}", stand)))
        .build()
}
