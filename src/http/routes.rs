use crate::http;
use actix_web::web;

/// Mount the admin and probe endpoints.
pub fn init_routes(cfg: &mut web::ServiceConfig) {
    cfg.configure(http::matchmaking::init_routes)
        .configure(http::health::init_routes);
}
