use actix_web::{middleware::Logger, web, App, HttpServer};
use arena_server::config::{settings, MatchTuning};
use arena_server::db::penalty_repo::PgPenaltyStore;
use arena_server::db::session_repo::PgSessionLog;
use arena_server::matchmaking::Matchmaker;
use arena_server::remote::game::HttpGameClient;
use arena_server::remote::users::UsersClient;
use arena_server::ws::hub::WsHub;
use arena_server::{http, metrics, ws};
use sqlx::postgres::PgPoolOptions;
use std::env;
use std::sync::Arc;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();

    // Configuration
    let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let server_addr = env::var("SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".into());

    // Postgres pool
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to create Postgres pool");

    // Remote service clients share one HTTP connection pool
    let http_client = reqwest::Client::new();
    let game_client = HttpGameClient::new(http_client.clone(), settings().game_service_url.clone());
    let users_client = UsersClient::new(http_client, settings().user_service_url.clone());

    // Matchmaking core wired to its collaborators
    let hub = Arc::new(WsHub::new());
    let matchmaker = Matchmaker::new(
        Arc::new(PgPenaltyStore::new(db_pool.clone())),
        Arc::new(PgSessionLog::new(db_pool.clone())),
        Arc::new(game_client.clone()),
        hub.clone(),
        MatchTuning::from_env(),
    );

    // Start the background pairing loop
    matchmaker.clone().start();

    let mm_data = web::Data::from(matchmaker);
    let hub_data = web::Data::from(hub);

    // Start HTTP + WS server
    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(metrics::METRICS.clone())
            .app_data(web::Data::new(db_pool.clone()))
            .app_data(web::Data::new(game_client.clone()))
            .app_data(web::Data::new(users_client.clone()))
            .app_data(mm_data.clone())
            .app_data(hub_data.clone())
            .configure(http::routes::init_routes)
            .configure(ws::routes::init_routes)
    })
    .bind(&server_addr)?
    .run()
    .await
}
