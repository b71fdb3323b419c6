use std::sync::Arc;

use database::{DatabaseConnectionInfo, PgDatabase};
use dispatch::{database::Database, memory::MemoryDatabase, notify::ChannelNotifier, server::Server};
use web::{
    config::{ServerConfig, StoreKind},
    start_web_server, WebState,
};

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = ServerConfig::from_env().expect("invalid server configuration in env.");
    log::info!("Starting dispatch server with {:?}", config);

    match config.store {
        StoreKind::Postgres => {
            let database_connection_info = DatabaseConnectionInfo::from_env()
                .expect("expected database connection info in env.");
            let database = PgDatabase::connect(database_connection_info)
                .await
                .expect("could not connect to database.");
            serve(database, &config).await;
        }
        StoreKind::Memory => {
            log::warn!("Using the in-memory store, nothing survives a restart");
            serve(MemoryDatabase::new(), &config).await;
        }
    }
}

async fn serve<D: Database>(database: D, config: &ServerConfig) {
    let notifier = ChannelNotifier::logging(config.notify_buffer);
    let server = Server::new(database).with_notifier(Arc::new(notifier));

    if let Err(why) = start_web_server(WebState::new(server), config.bind_address).await {
        log::error!("Web server stopped: {}", why);
    }
}
