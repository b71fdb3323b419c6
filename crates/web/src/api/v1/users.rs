use std::sync::Arc;

use axum::{
    extract::{OriginalUri, Path, State},
    http::Method,
    routing::{get, on, post},
    Extension, Json, Router,
};
use dispatch::database::Database;
use model::{
    user::{NewUser, User},
    WithId,
};
use utility::id::Id;

use crate::{
    common::{route_error, route_not_found, schema, HateoasResult, METHOD_FILTER_ALL},
    hateoas,
    middleware::base_url::{base_url_middleware, BaseUrl},
    WebState,
};

macro_rules! resource {
    ($($arg:tt)*) => {
        crate::api::v1::resource!("/users{}", format_args!($($arg)*))
    };
}
pub(crate) use resource;

pub(crate) fn routes<D>(state: WebState<D>) -> Router
where
    D: Database,
{
    Router::new()
        .route("/schema", get(schema::<User>))
        .route("/:id", get(get_user::<D>))
        .route("/", post(create_user::<D>))
        .layer(axum::middleware::from_fn(base_url_middleware))
        .with_state(state)
        .fallback_service(on(METHOD_FILTER_ALL, route_not_found))
}

async fn create_user<D: Database>(
    method: Method,
    OriginalUri(uri): OriginalUri,
    State(WebState { server }): State<WebState<D>>,
    Extension(base_url): Extension<Arc<BaseUrl>>,
    Json(user): Json<NewUser>,
) -> HateoasResult<WithId<User>> {
    server
        .registry()
        .create_user(user)
        .await
        .map(|user| user_hateoas(user, base_url).json())
        .map_err(route_error(&method, &uri))
}

async fn get_user<D: Database>(
    method: Method,
    OriginalUri(uri): OriginalUri,
    Path(id): Path<i64>,
    State(WebState { server }): State<WebState<D>>,
    Extension(base_url): Extension<Arc<BaseUrl>>,
) -> HateoasResult<WithId<User>> {
    server
        .registry()
        .get_user(&Id::new(id))
        .await
        .map(|user| user_hateoas(user, base_url).json())
        .map_err(route_error(&method, &uri))
}

fn user_hateoas(user: WithId<User>, base_url: Arc<BaseUrl>) -> hateoas::Response<WithId<User>> {
    let id = user.id.raw();
    hateoas::Response::builder(user, base_url)
        .link("self", resource!("/{}", id))
        .build()
}
