pub use crate::common::RouteResult;

use std::net::SocketAddr;

use axum::{routing::on, Router};
use common::{route_not_found, METHOD_FILTER_ALL};
use dispatch::{database::Database, server::Server};
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};

pub mod api;
pub mod common;
pub mod config;
pub mod hateoas;
pub mod middleware;

#[derive(Clone)]
pub struct WebState<D>
where
    D: Database,
{
    pub server: Server<D>,
}

impl<D> WebState<D>
where
    D: Database,
{
    pub fn new(server: Server<D>) -> Self {
        Self { server }
    }
}

/// The complete http surface, without a listener attached.
pub fn app<D>(state: WebState<D>) -> Router
where
    D: Database,
{
    Router::new()
        .nest_service("/api", api::routes(state))
        .fallback_service(on(METHOD_FILTER_ALL, route_not_found))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(tracing::Level::INFO))
                .on_response(DefaultOnResponse::new().level(tracing::Level::INFO)),
        )
}

pub async fn start_web_server<D>(state: WebState<D>, address: SocketAddr) -> std::io::Result<()>
where
    D: Database,
{
    let listener = TcpListener::bind(address).await?;
    log::info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, app(state).into_make_service()).await?;

    Ok(())
}
