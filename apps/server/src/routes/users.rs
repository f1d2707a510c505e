use actix_web::http::StatusCode;
use actix_web::{HttpResponse, delete, get, post, web};
use meshkeys::ControlPlane;
use serde::Deserialize;

use super::{ApiResult, Bearer, Envelope};

macros_utils::routes! {
    route has_admin,
    route create_admin,
    route authenticate,
    route get_user,
    route delete_user,
}

const AUTHORIZED: &str = "W1R3: Device admin Authorized";

#[derive(Debug, Deserialize)]
pub struct UserCredentials {
    #[serde(alias = "UserName")]
    pub username: String,
    #[serde(alias = "Password")]
    pub password: String,
}

#[get("/api/users/adm/hasadmin")]
pub async fn has_admin(plane: web::Data<ControlPlane>) -> ApiResult {
    Ok(HttpResponse::Ok().json(plane.admins.has_admin().await?))
}

#[post("/api/users/adm/createadmin")]
pub async fn create_admin(
    plane: web::Data<ControlPlane>,
    Bearer(credential): Bearer,
    body: web::Json<UserCredentials>,
) -> ApiResult {
    let admin = plane.admins.create_admin(&credential, &body.username, &body.password).await?;
    Ok(HttpResponse::Ok().json(admin))
}

/// Credentials travel in the body; the caller must also hold the superuser capability.
#[post("/api/users/adm/authenticate")]
pub async fn authenticate(
    plane: web::Data<ControlPlane>,
    Bearer(credential): Bearer,
    body: web::Json<UserCredentials>,
) -> ApiResult {
    plane.auth.require_superuser(&credential)?;
    let session = plane.admins.authenticate(&body.username, &body.password).await?;
    Ok(HttpResponse::Ok().json(Envelope::ok(AUTHORIZED, session)))
}

#[get("/api/users/{username}")]
pub async fn get_user(
    plane: web::Data<ControlPlane>,
    Bearer(credential): Bearer,
    username: web::Path<String>,
) -> ApiResult {
    Ok(HttpResponse::Ok().json(plane.admins.get_admin(&credential, &username).await?))
}

#[delete("/api/users/{username}")]
pub async fn delete_user(
    plane: web::Data<ControlPlane>,
    Bearer(credential): Bearer,
    username: web::Path<String>,
) -> ApiResult {
    plane.admins.delete_admin(&credential, &username).await?;
    Ok(HttpResponse::Ok().json(Envelope::message(StatusCode::OK, format!("user {username} deleted"))))
}
