//! The `/secret` endpoint serving the bootstrap agent.

use crate::server::admission::is_json;
use crate::service::{GetSecretPayload, SecretService};
use actix_web::{HttpRequest, HttpResponse, web};
use tracing::{error, info};

const TOKEN_HEADER: &str = "X-Token";

/// Validates the transport envelope, then drives the secret pipeline. The
/// token never leaves the header; errors carry no secret material.
pub(crate) async fn secret_handler(
    req: HttpRequest,
    body: web::Bytes,
    service: web::Data<SecretService>,
) -> HttpResponse {
    if !is_json(&req) {
        return HttpResponse::BadRequest()
            .body("unsupported content type, only application/json is supported");
    }
    let token = req
        .headers()
        .get(TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if token.is_empty() {
        return HttpResponse::Unauthorized().body("token is not supplied");
    }
    let payload: GetSecretPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(err) => {
            return HttpResponse::BadRequest().body(format!("could not deserialize request: {err}"));
        }
    };
    if payload.name.is_empty() {
        return HttpResponse::BadRequest().body("malformed payload: name is empty");
    }

    match service.get_secret(token, &payload).await {
        Ok(env) => {
            info!(pod = %payload.name, uid = %payload.uid, "secret request served");
            HttpResponse::Ok().json(env)
        }
        Err(err) => {
            error!(pod = %payload.name, uid = %payload.uid, error = %err, "secret request failed");
            HttpResponse::build(err.status_code()).body(format!("could not get secret: {err}"))
        }
    }
}
