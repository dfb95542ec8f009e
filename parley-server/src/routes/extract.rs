//! JSON body extractor whose rejections use the `{"error": "..."}` shape.

use axum::Json;
use axum::extract::{FromRequest, OptionalFromRequest, Request};
use serde::de::DeserializeOwned;

use crate::error::ServerError;

/// `axum::Json` with [`ServerError`] as its rejection, so every body
/// rejection is answered with a JSON 400.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ServerError))]
pub struct ApiJson<T>(pub T);

/// A missing body (no `Content-Type`) is `None`; a present but invalid one
/// is still rejected.
impl<T, S> OptionalFromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request(req: Request, state: &S) -> Result<Option<Self>, Self::Rejection> {
        let body = <Json<T> as OptionalFromRequest<S>>::from_request(req, state).await?;
        Ok(body.map(|Json(value)| ApiJson(value)))
    }
}

#[cfg(test)]
mod test {
    use axum::body::Body;
    use axum::http::{StatusCode, header};
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize)]
    struct Named {
        name: String,
    }

    fn request(content_type: Option<&str>, body: &'static str) -> Request {
        let mut builder = Request::builder().method("POST").uri("/");
        if let Some(ct) = content_type {
            builder = builder.header(header::CONTENT_TYPE, ct);
        }
        builder.body(Body::from(body)).unwrap()
    }

    #[tokio::test]
    async fn valid_body_is_extracted() {
        let req = request(Some("application/json"), r#"{"name":"x"}"#);
        let ApiJson(named) = <ApiJson<Named> as FromRequest<()>>::from_request(req, &()).await.unwrap();
        assert_eq!(named.name, "x");
    }

    #[tokio::test]
    async fn wrong_field_type_is_a_bad_request() {
        let req = request(Some("application/json"), r#"{"name":5}"#);
        let err = <ApiJson<Named> as FromRequest<()>>::from_request(req, &()).await.unwrap_err();
        assert!(matches!(err, ServerError::BadRequest(m) if m.contains("name")));
    }

    #[tokio::test]
    async fn missing_content_type_is_a_bad_request() {
        let req = request(None, r#"{"name":"x"}"#);
        let err = <ApiJson<Named> as FromRequest<()>>::from_request(req, &()).await.unwrap_err();
        assert!(matches!(err, ServerError::BadRequest(_)));
    }

    #[tokio::test]
    async fn optional_body_is_absent_without_content_type() {
        let req = request(None, "");
        let body = <ApiJson<Named> as OptionalFromRequest<()>>::from_request(req, &()).await.unwrap();
        assert!(body.is_none());
    }

    #[tokio::test]
    async fn optional_body_still_rejects_malformed_json() {
        let req = request(Some("application/json"), "{not json");
        let err = <ApiJson<Named> as OptionalFromRequest<()>>::from_request(req, &()).await.unwrap_err();
        assert!(matches!(err, ServerError::BadRequest(_)));
    }
}
