use std::time::{Duration, Instant};

use actix_web::{web, App, HttpServer};
use log::info;

use chess_match_server::models::registry::{SessionRegistry, ABANDON_GRACE};
use chess_match_server::routes::configure_routes;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    info!("starting match server at http://127.0.0.1:8080");

    let registry = web::Data::new(SessionRegistry::default());

    // Periodically drop matches whose participants have all gone away.
    let sweeper = registry.clone();
    actix_rt::spawn(async move {
        let mut tick = actix_rt::time::interval(Duration::from_secs(10));
        loop {
            tick.tick().await;
            sweeper.sweep(Instant::now(), ABANDON_GRACE);
        }
    });

    HttpServer::new(move || {
        App::new()
            .app_data(registry.clone())
            .configure(configure_routes)
    })
    .bind("127.0.0.1:8080")?
    .run()
    .await
}
