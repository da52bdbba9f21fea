//! Simple liveness / readiness probe

use actix_web::{get, web, HttpResponse, Responder};
use sqlx::PgPool;

use crate::remote::game::{GameService, HttpGameClient};

#[get("/healthz")]
pub async fn healthz(db: web::Data<PgPool>, game: web::Data<HttpGameClient>) -> impl Responder {
    // Check Postgres
    if sqlx::query("SELECT 1").execute(&**db).await.is_err() {
        return HttpResponse::ServiceUnavailable().body("db");
    }

    // Check the Game service
    if !game.health().await {
        return HttpResponse::ServiceUnavailable().body("game");
    }

    HttpResponse::Ok().body("ok")
}

pub fn init_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(healthz);
}
