use serde::Serialize;

/// API error payload
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiError {
    pub error: String,
}

impl ApiError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { error: message.into() }
    }
}

/// Body of a successful `DELETE /api/sessions/:id`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeletedResponse {
    pub deleted: String,
    pub filename: String,
}
