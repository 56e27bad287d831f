// src/extract.rs

//! Body extractors whose rejections use the `{"detail": ...}` error shape.

use axum::{
    Form, Json,
    extract::{FromRequest, FromRequestParts, Path, Query, Request},
    http::request::Parts,
};
use chrono::{DateTime, Local, NaiveDateTime};
use serde::{Deserialize, de::{self, DeserializeOwned, Deserializer}};

use crate::error::ApiError;

/// `Json<T>` that rejects malformed or mistyped bodies with a 422.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    fn from_request(
        req: Request,
        state: &S,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        async move {
            Json::<T>::from_request(req, state)
                .await
                .map(|Json(value)| ApiJson(value))
                .map_err(|rejection| ApiError::Validation(rejection.body_text()))
        }
    }
}

/// `Form<T>` counterpart of [`ApiJson`].
pub struct ApiForm<T>(pub T);

impl<S, T> FromRequest<S> for ApiForm<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    fn from_request(
        req: Request,
        state: &S,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        async move {
            Form::<T>::from_request(req, state)
                .await
                .map(|Form(value)| ApiForm(value))
                .map_err(|rejection| ApiError::Validation(rejection.body_text()))
        }
    }
}

/// `Path<T>` that rejects unparsable segments with a 422.
pub struct ApiPath<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        async move {
            Path::<T>::from_request_parts(parts, state)
                .await
                .map(|Path(value)| ApiPath(value))
                .map_err(|rejection| ApiError::Validation(rejection.body_text()))
        }
    }
}

/// `Query<T>` counterpart of [`ApiPath`].
pub struct ApiQuery<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        async move {
            Query::<T>::from_request_parts(parts, state)
                .await
                .map(|Query(value)| ApiQuery(value))
                .map_err(|rejection| ApiError::Validation(rejection.body_text()))
        }
    }
}

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Accepts `2024-03-01T10:00:00[.fff]`, minute precision `2024-03-01T10:00`,
/// and RFC 3339 with `Z` or an offset. Offset forms are converted to the
/// server's local wall-clock time, the same clock "today" is computed on.
pub fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Some(naive) = NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
    {
        return Some(naive);
    }
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M%:z"))
        .ok()
        .map(|dt| dt.with_timezone(&Local).naive_local())
}

/// `deserialize_with` counterpart of [`parse_datetime`].
pub fn flexible_datetime<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_datetime(&raw)
        .ok_or_else(|| de::Error::custom(format!("invalid datetime `{raw}`")))
}

/// Optional [`flexible_datetime`]; use with `#[serde(default)]`.
pub fn flexible_datetime_opt<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(raw) => parse_datetime(&raw)
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("invalid datetime `{raw}`"))),
    }
}

/// For `#[serde(default, deserialize_with = "double_option")]` on patch fields:
/// absent => `None`, `null` => `Some(None)`, value => `Some(Some(v))`.
pub fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    // only called when the field is present
    Option::<T>::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, body::Body, http::{StatusCode, header}, routing::get};
    use serde::Deserialize;
    use tower::ServiceExt;

    #[derive(Debug, Deserialize)]
    struct Booking {
        doctor_id: i64,
    }

    fn json_request(body: &'static str) -> Request {
        axum::http::Request::builder()
            .method("POST")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn accepts_well_formed_body() {
        let ApiJson(booking) = ApiJson::<Booking>::from_request(json_request(r#"{"doctor_id": 5}"#), &())
            .await
            .unwrap();
        assert_eq!(booking.doctor_id, 5);
    }

    #[tokio::test]
    async fn wrong_field_type_is_validation_error() {
        let err = ApiJson::<Booking>::from_request(json_request(r#"{"doctor_id": "five"}"#), &())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[derive(Debug, Deserialize)]
    struct Patch {
        #[serde(default, deserialize_with = "double_option")]
        notes: Option<Option<String>>,
    }

    #[test]
    fn double_option_tells_absent_from_null() {
        let absent: Patch = serde_json::from_str("{}").unwrap();
        assert_eq!(absent.notes, None);

        let null: Patch = serde_json::from_str(r#"{"notes": null}"#).unwrap();
        assert_eq!(null.notes, Some(None));

        let set: Patch = serde_json::from_str(r#"{"notes": "x"}"#).unwrap();
        assert_eq!(set.notes, Some(Some("x".to_string())));
    }

    #[tokio::test]
    async fn form_missing_field_is_validation_error() {
        #[derive(Debug, Deserialize)]
        #[allow(dead_code)]
        struct Login {
            username: String,
            password: String,
        }

        let req = axum::http::Request::builder()
            .method("POST")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("username=a%40b.c"))
            .unwrap();
        let err = ApiForm::<Login>::from_request(req, &()).await.err().unwrap();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    fn local(raw: &str) -> NaiveDateTime {
        DateTime::parse_from_rfc3339(raw)
            .unwrap()
            .with_timezone(&Local)
            .naive_local()
    }

    #[test]
    fn datetime_accepts_seconds_fractions_and_minutes() {
        let ten = NaiveDateTime::parse_from_str("2024-03-01 10:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
        assert_eq!(parse_datetime("2024-03-01T10:00:00"), Some(ten));
        assert_eq!(parse_datetime("2024-03-01 10:00:00"), Some(ten));
        assert_eq!(parse_datetime("2024-03-01T10:00"), Some(ten));
        assert_eq!(
            parse_datetime("2024-03-01T10:00:00.250").map(|t| t.to_string()),
            Some("2024-03-01 10:00:00.250".to_string())
        );
    }

    #[test]
    fn datetime_with_offset_lands_on_local_clock() {
        assert_eq!(
            parse_datetime("2024-03-01T10:00:00.000Z"),
            Some(local("2024-03-01T10:00:00Z"))
        );
        // same instant, different offsets, same slot
        assert_eq!(
            parse_datetime("2024-03-01T15:00:00+05:00"),
            parse_datetime("2024-03-01T10:00:00Z")
        );
        assert_eq!(
            parse_datetime("2024-03-01T15:00+05:00"),
            parse_datetime("2024-03-01T10:00:00Z")
        );
    }

    #[test]
    fn datetime_rejects_garbage() {
        assert_eq!(parse_datetime("tomorrow at ten"), None);
        assert_eq!(parse_datetime("2024-03-01"), None);
        assert_eq!(parse_datetime("2024-13-01T10:00"), None);
    }

    #[derive(Debug, Deserialize)]
    struct Slotted {
        #[serde(deserialize_with = "flexible_datetime")]
        at: NaiveDateTime,
        #[serde(default, deserialize_with = "flexible_datetime_opt")]
        moved_to: Option<NaiveDateTime>,
    }

    #[test]
    fn flexible_datetime_fields_deserialize() {
        let s: Slotted = serde_json::from_str(r#"{"at": "2024-03-01T10:00"}"#).unwrap();
        assert_eq!(s.at.to_string(), "2024-03-01 10:00:00");
        assert_eq!(s.moved_to, None);

        let s: Slotted =
            serde_json::from_str(r#"{"at": "2024-03-01T10:00:00", "moved_to": "2024-03-01T11:30"}"#)
                .unwrap();
        assert_eq!(s.moved_to.map(|t| t.to_string()).as_deref(), Some("2024-03-01 11:30:00"));

        let err = serde_json::from_str::<Slotted>(r#"{"at": "soon"}"#).unwrap_err();
        assert!(err.to_string().contains("invalid datetime `soon`"));
    }

    #[derive(Debug, Deserialize)]
    struct Page {
        month: Option<u32>,
    }

    async fn by_id(ApiPath(id): ApiPath<i64>) -> String {
        id.to_string()
    }

    async fn by_month(ApiQuery(page): ApiQuery<Page>) -> String {
        format!("{:?}", page.month)
    }

    fn app() -> Router {
        Router::new()
            .route("/items/{id}", get(by_id))
            .route("/items", get(by_month))
    }

    async fn call(uri: &str) -> (StatusCode, Vec<u8>) {
        let resp = app()
            .oneshot(
                axum::http::Request::builder()
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, bytes.to_vec())
    }

    fn detail(body: &[u8]) -> String {
        let json: serde_json::Value = serde_json::from_slice(body).unwrap();
        json["detail"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn path_parses_and_bad_segment_is_422_detail() {
        let (status, body) = call("/items/42").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"42");

        let (status, body) = call("/items/abc").await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(detail(&body).contains("abc"));
    }

    #[tokio::test]
    async fn query_parses_and_bad_value_is_422_detail() {
        let (status, body) = call("/items?month=4").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"Some(4)");

        let (status, body) = call("/items?month=april").await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(!detail(&body).is_empty());
    }
}
