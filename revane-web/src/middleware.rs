//! 中间件模块
//!
//! 框架内置的访问日志和请求 ID 中间件

use std::time::Instant;

use axum::{
    extract::{Request, State},
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};

/// 请求 ID，存放在请求扩展中
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

/// 访问日志中间件
pub async fn request_logging(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let request_id = req.extensions().get::<RequestId>().cloned();
    let start = Instant::now();

    let response = next.run(req).await;

    let elapsed = start.elapsed();
    let status = response.status();

    tracing::info!(
        request_id = request_id.as_ref().map(|id| id.0.as_str()).unwrap_or("-"),
        method = %method,
        uri = %uri,
        status = %status.as_u16(),
        elapsed = ?elapsed,
        "Request completed"
    );

    response
}

/// 请求 ID 中间件
///
/// 优先使用请求头中已有的 ID，否则生成 UUID，并回写到响应头。
pub async fn request_id(State(header): State<HeaderName>, mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(&header)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(String::from)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    req.extensions_mut().insert(RequestId(request_id.clone()));

    let mut response = next.run(req).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(header, value);
    }

    response
}
