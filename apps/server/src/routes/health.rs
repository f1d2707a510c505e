use actix_web::{HttpResponse, Responder, get, web};
use meshkeys::ControlPlane;

macros_utils::routes! {
    route health_route,
}

/// Health check route.
/// The response status is enough: 200 when the store answers, 503 otherwise.
#[get("/health")]
pub async fn health_route(plane: web::Data<ControlPlane>) -> impl Responder {
    match plane.admins.has_admin().await {
        Ok(_) => HttpResponse::Ok(),
        Err(e) => {
            tracing::warn!("Health check failed: {e}");
            HttpResponse::ServiceUnavailable()
        }
    }
}
