//! Debug inspection of the live queue.

use actix_web::{get, web, HttpResponse, Responder};

use crate::matchmaking::Matchmaker;

/// GET /matchmaking/queue
#[get("/matchmaking/queue")]
pub async fn queue_state(mm: web::Data<Matchmaker>) -> impl Responder {
    HttpResponse::Ok().json(mm.queue_stats())
}

/// Mount
pub fn init_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(queue_state);
}
