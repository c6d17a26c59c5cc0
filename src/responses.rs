use axum::{
    Json,
    body::Body,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Clone, Debug, Serialize)]
pub struct RequestMeta {
    pub request_id: String,
    pub request_at: String, // RFC3339
    pub timestamp: i64,     // unix seconds
}

impl RequestMeta {
    pub fn new() -> Self {
        let now: DateTime<Utc> = Utc::now();
        RequestMeta {
            request_id: Uuid::new_v4().to_string(),
            request_at: now.to_rfc3339(),
            timestamp: now.timestamp(),
        }
    }
}

impl Default for RequestMeta {
    fn default() -> Self {
        Self::new()
    }
}

// Middleware: attaches RequestMeta into request extensions
pub async fn meta_middleware(mut req: Request<Body>, next: Next) -> Response {
    req.extensions_mut().insert(RequestMeta::new());
    next.run(req).await
}

#[derive(Clone, Debug, Serialize)]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
    pub total_pages: u32,
}

impl Pagination {
    pub fn new(page: u32, per_page: u32, total: u64) -> Self {
        let total_pages = total.div_ceil(per_page.max(1) as u64) as u32;
        Self {
            page,
            per_page,
            total,
            total_pages,
        }
    }
}

#[derive(Serialize)]
pub struct SuccessEnvelope<T> {
    pub message: String,
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
    pub meta: RequestMeta,
}

pub struct ApiOk<T> {
    status: StatusCode,
    body: SuccessEnvelope<T>,
}

impl<T> ApiOk<T> {
    fn with_status(status: StatusCode, message: impl Into<String>, data: T, meta: RequestMeta) -> Self {
        Self {
            status,
            body: SuccessEnvelope {
                message: message.into(),
                data,
                pagination: None,
                meta,
            },
        }
    }

    pub fn ok(message: impl Into<String>, data: T, meta: RequestMeta) -> Self {
        Self::with_status(StatusCode::OK, message, data, meta)
    }

    pub fn created(message: impl Into<String>, data: T, meta: RequestMeta) -> Self {
        Self::with_status(StatusCode::CREATED, message, data, meta)
    }

    pub fn paginated(
        message: impl Into<String>,
        data: T,
        pagination: Pagination,
        meta: RequestMeta,
    ) -> Self {
        let mut ok = Self::ok(message, data, meta);
        ok.body.pagination = Some(pagination);
        ok
    }
}

impl<T: Serialize> IntoResponse for ApiOk<T> {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_rounds_pages_up() {
        let p = Pagination::new(1, 50, 101);
        assert_eq!(p.total_pages, 3);
        assert_eq!(Pagination::new(1, 50, 0).total_pages, 0);
    }
}
