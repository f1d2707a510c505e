use std::future::{Ready, ready};

use actix_web::http::StatusCode;
use actix_web::{FromRequest, HttpRequest, HttpResponse, dev::Payload, http::header, web};
use meshkeys::{Credential, Error as CoreError};
use serde::Serialize;

use crate::error::ApiError;

mod health;
mod keys;
mod networks;
mod users;


macros_utils::routes! {
    mount health::routes,
    mount users::routes,
    mount networks::routes,
    mount keys::routes,
}

pub type ApiResult = Result<HttpResponse, ApiError>;

/// `{"Code", "Message", "Response"}`, the shape clients of this API expect for
/// messages and errors.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    #[serde(rename = "Code")]
    pub code: u16,
    #[serde(rename = "Message")]
    pub message: String,
    #[serde(rename = "Response", skip_serializing_if = "Option::is_none")]
    pub response: Option<T>,
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(message: impl Into<String>, response: T) -> Self {
        Self { code: StatusCode::OK.as_u16(), message: message.into(), response: Some(response) }
    }
}

impl Envelope<()> {
    pub fn message(status: StatusCode, message: impl Into<String>) -> Self {
        Self { code: status.as_u16(), message: message.into(), response: None }
    }
}

/// The `authorization: Bearer <value>` header, unchecked.
pub struct Bearer(pub Credential);

impl FromRequest for Bearer {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let header = req.headers().get(header::AUTHORIZATION).and_then(|value| value.to_str().ok());
        ready(Ok(Bearer(Credential::from_header(header))))
    }
}

/// Malformed JSON bodies get the same envelope as every other error.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| {
        tracing::debug!("Rejected request body: {err}");
        ApiError(CoreError::invalid(format!("invalid request body: {err}"))).into()
    })
}
