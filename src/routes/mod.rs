use actix_web::{web, HttpResponse, Responder};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::models::registry::SessionRegistry;

/// Match creation request: a time-control selector from the fixed catalog
/// (0 = untimed, then the 1 / 3 / 10 minute presets).
#[derive(Debug, Deserialize)]
pub struct CreateMatchRequest {
    pub time: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateMatchResponse {
    game_id: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

/// HTTP handler creating a new match and returning its id.
pub async fn create_match(
    registry: web::Data<SessionRegistry>,
    body: web::Json<CreateMatchRequest>,
) -> impl Responder {
    match registry.create(body.time) {
        Ok(game_id) => HttpResponse::Ok().json(CreateMatchResponse { game_id }),
        Err(e) => {
            warn!("match creation rejected: {e}");
            HttpResponse::BadRequest().json(ErrorResponse {
                error: e.to_string(),
            })
        }
    }
}

/// Configure the HTTP routes
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/game/create").route(web::post().to(create_match)))
        .service(web::resource("/ws").route(web::get().to(crate::websocket::ws_index)));
}
