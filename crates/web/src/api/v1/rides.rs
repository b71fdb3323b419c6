use std::sync::Arc;

use axum::{
    extract::{OriginalUri, Path, Query, State},
    http::Method,
    routing::{get, on, post},
    Extension, Json, Router,
};
use dispatch::{database::Database, notify::AssignmentEvent};
use model::{
    ride::{NewRide, Ride, RideUpdate},
    stand::Stand,
    Page, WithId,
};
use serde::Deserialize;
use utility::{
    id::{Id, IdWrapper},
    let_also::LetAlso,
};

use super::{drivers, users};
use crate::{
    common::{
        route_error, route_not_found, schema, schema_no_example, HateoasResult,
        VecResponse, METHOD_FILTER_ALL,
    },
    hateoas,
    middleware::base_url::{base_url_middleware, BaseUrl},
    WebState,
};

macro_rules! resource {
    ($($arg:tt)*) => {
        crate::api::v1::resource!("/rides{}", format_args!($($arg)*))
    };
}
pub(crate) use resource;

pub(crate) fn routes<D>(state: WebState<D>) -> Router
where
    D: Database,
{
    Router::new()
        .route("/schema", get(schema::<Ride>))
        .route("/new/schema", get(schema::<NewRide>))
        .route(
            "/assignments/schema",
            get(schema_no_example::<AssignmentEvent>),
        )
        .route("/:id/assign", post(assign_ride::<D>))
        .route("/:id", get(get_ride::<D>).put(update_ride::<D>))
        .route("/", get(get_rides::<D>).post(create_ride::<D>))
        .layer(axum::middleware::from_fn(base_url_middleware))
        .with_state(state)
        .fallback_service(on(METHOD_FILTER_ALL, route_not_found))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssignRequest {
    stand_id: Id<Stand>,
}

/// Creates the ride and, when a stand is named, assigns its longest waiting
/// driver. An empty stand leaves the ride pending.
async fn create_ride<D: Database>(
    method: Method,
    OriginalUri(uri): OriginalUri,
    State(WebState { server }): State<WebState<D>>,
    Extension(base_url): Extension<Arc<BaseUrl>>,
    Json(ride): Json<NewRide>,
) -> HateoasResult<WithId<Ride>> {
    server
        .dispatcher()
        .create_ride(ride)
        .await
        .map(|ride| ride_hateoas(ride, base_url).json())
        .map_err(route_error(&method, &uri))
}

async fn get_rides<D: Database>(
    method: Method,
    OriginalUri(uri): OriginalUri,
    Query(page): Query<Page>,
    State(WebState { server }): State<WebState<D>>,
    Extension(base_url): Extension<Arc<BaseUrl>>,
) -> HateoasResult<VecResponse<hateoas::Response<WithId<Ride>>>> {
    server
        .dispatcher()
        .get_rides(page)
        .await
        .map(|rides| {
            rides
                .into_iter()
                .map(|ride| ride_hateoas(ride, base_url.clone()))
                .collect::<Vec<_>>()
                .let_owned(|data| VecResponse::paginated(data, page).hateoas().json())
        })
        .map_err(route_error(&method, &uri))
}

async fn get_ride<D: Database>(
    method: Method,
    OriginalUri(uri): OriginalUri,
    Path(id): Path<i64>,
    State(WebState { server }): State<WebState<D>>,
    Extension(base_url): Extension<Arc<BaseUrl>>,
) -> HateoasResult<WithId<Ride>> {
    server
        .dispatcher()
        .get_ride(&Id::new(id))
        .await
        .map(|ride| ride_hateoas(ride, base_url).json())
        .map_err(route_error(&method, &uri))
}

async fn update_ride<D: Database>(
    method: Method,
    OriginalUri(uri): OriginalUri,
    Path(id): Path<i64>,
    State(WebState { server }): State<WebState<D>>,
    Extension(base_url): Extension<Arc<BaseUrl>>,
    Json(update): Json<RideUpdate>,
) -> HateoasResult<WithId<Ride>> {
    server
        .dispatcher()
        .update_ride(&Id::new(id), update)
        .await
        .map(|ride| ride_hateoas(ride, base_url).json())
        .map_err(route_error(&method, &uri))
}

async fn assign_ride<D: Database>(
    method: Method,
    OriginalUri(uri): OriginalUri,
    Path(id): Path<i64>,
    State(WebState { server }): State<WebState<D>>,
    Extension(base_url): Extension<Arc<BaseUrl>>,
    Json(request): Json<AssignRequest>,
) -> HateoasResult<WithId<Ride>> {
    server
        .dispatcher()
        .assign_pending(&Id::new(id), &request.stand_id)
        .await
        .map(|ride| ride_hateoas(ride, base_url).json())
        .map_err(route_error(&method, &uri))
}

fn ride_hateoas(ride: WithId<Ride>, base_url: Arc<BaseUrl>) -> hateoas::Response<WithId<Ride>> {
    let id = ride.id.raw();
    let user = ride.content.user_id.raw();
    let driver = ride.content.driver_id.as_ref().raw();
    hateoas::Response::builder(ride, base_url)
        .link("self", resource!("/{}", id))
        .link("user", users::resource!("/{}", user))
        .link_option("driver", driver.map(|driver| drivers::resource!("/{}", driver)))
        .build()
}
