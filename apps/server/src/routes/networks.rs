use actix_web::http::StatusCode;
use actix_web::{HttpResponse, delete, get, post, web};
use meshkeys::{ControlPlane, NewNetwork};

use super::{ApiResult, Bearer, Envelope};

macros_utils::routes! {
    route create_network,
    route list_networks,
    route get_network,
    route delete_network,
}

#[post("/api/networks")]
pub async fn create_network(
    plane: web::Data<ControlPlane>,
    Bearer(credential): Bearer,
    body: web::Json<NewNetwork>,
) -> ApiResult {
    let network = plane.networks.create_network(&credential, body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(network))
}

#[get("/api/networks")]
pub async fn list_networks(plane: web::Data<ControlPlane>, Bearer(credential): Bearer) -> ApiResult {
    Ok(HttpResponse::Ok().json(plane.networks.list_networks(&credential).await?))
}

#[get("/api/networks/{netid}")]
pub async fn get_network(
    plane: web::Data<ControlPlane>,
    Bearer(credential): Bearer,
    net_id: web::Path<String>,
) -> ApiResult {
    Ok(HttpResponse::Ok().json(plane.networks.get_network(&credential, &net_id).await?))
}

/// Deletes the network's access keys with it.
#[delete("/api/networks/{netid}")]
pub async fn delete_network(
    plane: web::Data<ControlPlane>,
    Bearer(credential): Bearer,
    net_id: web::Path<String>,
) -> ApiResult {
    plane.networks.delete_network(&credential, &net_id).await?;
    Ok(HttpResponse::Ok().json(Envelope::message(StatusCode::OK, format!("network {net_id} deleted"))))
}
