use axum::{
    extract::{FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use validator::Validate;

/// JSON body extractor that parses and validates in one step and answers
/// both kinds of failure with a JSON 400.
pub struct ValidJson<T>(pub T);

fn bad_request(message: String) -> Response {
    tracing::warn!("{}", message);
    let body = json!({
        "message": message,
        "status": 400
    });
    (StatusCode::BAD_REQUEST, Json(body)).into_response()
}

impl<T, S> FromRequest<S> for ValidJson<T>
where
    T: serde::de::DeserializeOwned + Validate + 'static,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| bad_request(format!("Failed to parse JSON request body: {}", rejection)))?;

        value
            .validate()
            .map_err(|e| bad_request(format!("Validation error: {}", e)))?;

        Ok(ValidJson(value))
    }
}
