//! 请求级日志

use std::fmt;
use std::sync::Arc;

use axum::http::Method;
use tracing::Span;

/// 绑定到单个请求的日志记录器，每条日志都带 request_id
#[derive(Clone)]
pub struct RequestLog {
    span: Span,
    request_id: Arc<str>,
}

impl RequestLog {
    pub fn new(request_id: &str, method: &Method, path: &str) -> Self {
        let span = tracing::info_span!(
            "request",
            request_id = %request_id,
            method = %method,
            path = %path,
        );
        Self {
            span,
            request_id: Arc::from(request_id),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn trace(&self, message: impl fmt::Display) {
        self.span
            .in_scope(|| tracing::trace!(request_id = %self.request_id, "{}", message));
    }

    pub fn debug(&self, message: impl fmt::Display) {
        self.span
            .in_scope(|| tracing::debug!(request_id = %self.request_id, "{}", message));
    }

    pub fn info(&self, message: impl fmt::Display) {
        self.span
            .in_scope(|| tracing::info!(request_id = %self.request_id, "{}", message));
    }

    pub fn warn(&self, message: impl fmt::Display) {
        self.span
            .in_scope(|| tracing::warn!(request_id = %self.request_id, "{}", message));
    }

    pub fn error(&self, message: impl fmt::Display) {
        self.span
            .in_scope(|| tracing::error!(request_id = %self.request_id, "{}", message));
    }
}

impl fmt::Debug for RequestLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestLog")
            .field("request_id", &self.request_id)
            .finish()
    }
}
