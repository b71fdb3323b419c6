use axum::{
    routing::{get, on},
    Router,
};
use dispatch::database::Database;

use crate::{
    common::{route_not_found, METHOD_FILTER_ALL},
    WebState,
};

mod drivers;
mod rides;
mod stands;
mod users;

macro_rules! resource {
    ($($arg:tt)*) => {
        crate::api::resource!("/v1{}", format_args!($($arg)*))
    };
}
pub(crate) use resource;

pub(crate) fn routes<D>(state: WebState<D>) -> Router
where
    D: Database,
{
    Router::new()
        .route("/", get(index))
        .nest_service("/stands", stands::routes(state.clone()))
        .nest_service("/drivers", drivers::routes(state.clone()))
        .nest_service("/users", users::routes(state.clone()))
        .nest_service("/rides", rides::routes(state))
        .fallback_service(on(METHOD_FILTER_ALL, route_not_found))
}

async fn index() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "stands": resource!("/stands"),
        "drivers": resource!("/drivers"),
        "users": resource!("/users"),
        "rides": resource!("/rides"),
    }))
}
