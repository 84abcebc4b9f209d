use serde::Serialize;

/// Response envelope used by every endpoint: `{ "data": ..., "error": null }`.
/// Error responses carry `data: null` and a populated `error` object instead
/// (see `errors::AppError`).
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
    pub error: Option<serde_json::Value>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self { data, error: None }
    }
}
