//! The `/mutate` admission endpoint.

use crate::mutate::Mutator;
use actix_web::http::header::CONTENT_TYPE;
use actix_web::{HttpRequest, HttpResponse, web};
use k8s_openapi::api::core::v1::Pod;
use kube::core::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use tracing::{debug, error};

const JSON_CONTENT_TYPE: &str = "application/json";

pub(crate) fn is_json(req: &HttpRequest) -> bool {
    req.headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.split(';').next().unwrap_or_default().trim())
        == Some(JSON_CONTENT_TYPE)
}

/// Handles an admission review: deserializes the pod, runs the mutator and
/// responds with an allowed review carrying the JSON patch, or with a denial
/// when the pod cannot be safely rewritten.
pub(crate) async fn mutate_handler(
    req: HttpRequest,
    body: web::Bytes,
    mutator: web::Data<Mutator>,
) -> HttpResponse {
    if !is_json(&req) {
        return HttpResponse::BadRequest()
            .body(format!("unsupported content type, only {JSON_CONTENT_TYPE} is supported"));
    }
    let review: AdmissionReview<Pod> = match serde_json::from_slice(&body) {
        Ok(review) => review,
        Err(err) => {
            return HttpResponse::BadRequest().body(format!("could not deserialize request: {err}"));
        }
    };
    let request: AdmissionRequest<Pod> = match review.try_into() {
        Ok(request) => request,
        Err(err) => {
            return HttpResponse::BadRequest().body(format!("malformed admission review: {err}"));
        }
    };

    let mut response = AdmissionResponse::from(&request);
    match mutator.mutate(&request).await {
        Ok(None) => {
            debug!("nothing to mutate");
        }
        Ok(Some(mutated)) => {
            let original = match serde_json::to_value(request.object.as_ref()) {
                Ok(value) => value,
                Err(err) => return serialization_failure(err),
            };
            let mutated = match serde_json::to_value(&mutated) {
                Ok(value) => value,
                Err(err) => return serialization_failure(err),
            };
            let patch = json_patch::diff(&original, &mutated);
            response = match response.with_patch(patch) {
                Ok(response) => response,
                Err(err) => return serialization_failure(err),
            };
        }
        Err(err) => {
            error!(error = %err, "error while mutating pod");
            response = AdmissionResponse::invalid(err.to_string());
        }
    }

    let review: AdmissionReview<DynamicObject> = response.into_review();
    HttpResponse::Ok().json(review)
}

fn serialization_failure(err: impl std::fmt::Display) -> HttpResponse {
    error!(error = %err, "could not serialize admission response");
    HttpResponse::InternalServerError().body(format!("could not create JSON patch: {err}"))
}
