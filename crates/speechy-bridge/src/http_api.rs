//! HTTP transport for `play_audio` messages.
//!
//! One worker serves every request so chunk messages are handled in arrival order.

use std::net::SocketAddr;

use actix_web::error::{InternalError, JsonPayloadError};
use actix_web::middleware::Logger;
use actix_web::{App, HttpRequest, HttpResponse, HttpServer, Responder, get, post, web};
use anyhow::{Context, Result};
use serde::Serialize;
use speechy_player::listener::handle_message;
use speechy_player::{PlayerError, SessionManager};
use speechy_types::{InboundMessage, PlayAudioResponse};

/// Chunks travel as JSON byte arrays, roughly four times their raw size.
const MAX_MESSAGE_BYTES: usize = 8 * 1024 * 1024;

pub(crate) struct ApiState {
    pub(crate) manager: SessionManager,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[post("/messages")]
async fn post_message(
    state: web::Data<ApiState>,
    body: web::Json<InboundMessage>,
) -> impl Responder {
    let reply = handle_message(&state.manager, body.into_inner()).await;
    HttpResponse::Ok().json(reply)
}

#[get("/status")]
async fn status(state: web::Data<ApiState>) -> impl Responder {
    HttpResponse::Ok().json(state.manager.snapshot())
}

#[get("/health")]
async fn health() -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[post("/stop")]
async fn stop(state: web::Data<ApiState>) -> impl Responder {
    state.manager.cleanup();
    HttpResponse::NoContent().finish()
}

/// Bodies that fail to deserialize still get the `{success, error}` reply.
fn reject_payload(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let reply = PlayAudioResponse::failed(PlayerError::Transport(err.to_string()).to_string());
    tracing::warn!(error = %err, "rejected malformed message body");
    InternalError::from_response(err, HttpResponse::BadRequest().json(reply)).into()
}

fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .limit(MAX_MESSAGE_BYTES)
            .error_handler(reject_payload),
    )
        .service(post_message)
        .service(status)
        .service(health)
        .service(stop);
}

pub(crate) async fn serve(bind: SocketAddr, manager: SessionManager) -> Result<()> {
    let state = web::Data::new(ApiState { manager });
    tracing::info!(bind = %bind, "http api listening");
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(Logger::default().exclude("/status").exclude("/health"))
            .configure(configure)
    })
    .workers(1)
    .bind(bind)
    .with_context(|| format!("bind {bind}"))?
    .run()
    .await
    .context("http server")
}
