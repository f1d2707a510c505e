use actix_web::http::StatusCode;
use actix_web::{HttpRequest, HttpResponse, delete, get, post, web};
use meshkeys::{ControlPlane, NewKey};
use serde::Serialize;

use super::{ApiResult, Bearer, Envelope};

macros_utils::routes! {
    route create_key,
    route list_keys,
    route delete_key,
    route consume_key,
}

/// Lets an enrolling node retry a consumption without spending a second use.
const IDEMPOTENCY_KEY: &str = "Idempotency-Key";

#[derive(Debug, Serialize)]
pub struct Consumed {
    pub value: String,
}

#[post("/api/networks/{netid}/keys")]
pub async fn create_key(
    plane: web::Data<ControlPlane>,
    Bearer(credential): Bearer,
    net_id: web::Path<String>,
    body: web::Json<NewKey>,
) -> ApiResult {
    let key = plane.keys.create_key(&credential, &net_id, body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(key))
}

#[get("/api/networks/{netid}/keys")]
pub async fn list_keys(
    plane: web::Data<ControlPlane>,
    Bearer(credential): Bearer,
    net_id: web::Path<String>,
) -> ApiResult {
    Ok(HttpResponse::Ok().json(plane.keys.list_keys(&credential, &net_id).await?))
}

#[delete("/api/networks/{netid}/keys/{name}")]
pub async fn delete_key(
    plane: web::Data<ControlPlane>,
    Bearer(credential): Bearer,
    path: web::Path<(String, String)>,
) -> ApiResult {
    let (net_id, name) = path.into_inner();
    plane.keys.delete_key(&credential, &net_id, &name).await?;
    Ok(HttpResponse::Ok().json(Envelope::message(StatusCode::OK, format!("access key {name} deleted"))))
}

#[post("/api/networks/{netid}/keys/{name}/consume")]
pub async fn consume_key(
    req: HttpRequest,
    plane: web::Data<ControlPlane>,
    Bearer(credential): Bearer,
    path: web::Path<(String, String)>,
) -> ApiResult {
    plane.auth.require_superuser(&credential)?;
    let (net_id, name) = path.into_inner();
    let attempt = req.headers().get(IDEMPOTENCY_KEY).and_then(|value| value.to_str().ok());

    let value = plane.keys.consume_key(&net_id, &name, attempt).await?;
    Ok(HttpResponse::Ok().json(Consumed { value }))
}
