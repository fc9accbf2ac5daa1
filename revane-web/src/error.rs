//! Web 层错误类型
//!
//! 分两类：
//! 1. **注册期错误** `WebError` - 控制器编译、Bean 解析、监听失败，
//!    通过 `listen()` 返回给调用方
//! 2. **请求期错误** `HandlerError` - 用户方法返回的应用错误，
//!    进入错误处理链（局部 → 全局 → 默认响应）

use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use revane_core::ContainerError;
use serde::Serialize;
use thiserror::Error;

/// 稳定的错误代码
pub mod error_codes {
    pub const REV_ERR_MISSING_MODEL_ATTRIBUTE_CONVERTER: &str =
        "REV_ERR_MISSING_MODEL_ATTRIBUTE_CONVERTER";
    pub const REV_ERR_DUPLICATE_MODEL_ATTRIBUTE_CONVERTER: &str =
        "REV_ERR_DUPLICATE_MODEL_ATTRIBUTE_CONVERTER";
    pub const REV_ERR_NESTED_MODEL_ATTRIBUTE: &str = "REV_ERR_NESTED_MODEL_ATTRIBUTE";
    pub const REV_ERR_ROUTE_CONFLICT: &str = "REV_ERR_ROUTE_CONFLICT";
    pub const REV_ERR_INVALID_ROUTE: &str = "REV_ERR_INVALID_ROUTE";
    pub const REV_ERR_UNSUPPORTED_METHOD: &str = "REV_ERR_UNSUPPORTED_METHOD";
    pub const REV_ERR_NOT_REGISTRABLE: &str = "REV_ERR_NOT_REGISTRABLE";
    pub const REV_ERR_INVALID_BEAN: &str = "REV_ERR_INVALID_BEAN";
    pub const REV_ERR_CONTAINER: &str = "REV_ERR_CONTAINER";
    pub const REV_ERR_PLUGIN: &str = "REV_ERR_PLUGIN";
    pub const REV_ERR_INVALID_ADDRESS: &str = "REV_ERR_INVALID_ADDRESS";
    pub const REV_ERR_BIND: &str = "REV_ERR_BIND";
    pub const REV_ERR_ALREADY_STARTED: &str = "REV_ERR_ALREADY_STARTED";
    pub const REV_ERR_NOT_LISTENING: &str = "REV_ERR_NOT_LISTENING";
    pub const REV_ERR_SERVER: &str = "REV_ERR_SERVER";

    /// 参数转换失败（请求期）
    pub const REV_ERR_INVALID_PARAMETER: &str = "REV_ERR_INVALID_PARAMETER";
    /// 请求体超过限制（请求期）
    pub const REV_ERR_BODY_TOO_LARGE: &str = "REV_ERR_BODY_TOO_LARGE";
}

/// 注册期和服务器生命周期错误
#[derive(Error, Debug)]
pub enum WebError {
    #[error("Missing ModelAttribute Converter with name '{0}'")]
    MissingModelAttributeConverter(String),

    #[error("Duplicate ModelAttribute Converter with name '{0}'")]
    DuplicateModelAttributeConverter(String),

    /// 转换器方法自身不能再声明 model attribute 参数
    #[error("ModelAttribute Converter '{converter}' declares model attribute parameter '{parameter}'")]
    NestedModelAttribute { converter: String, parameter: String },

    #[error("Route conflict: {method} {path} is already registered")]
    RouteConflict { method: String, path: String },

    #[error("Invalid route '{path}': {reason}")]
    InvalidRoute { path: String, reason: String },

    #[error("Unsupported HTTP method: {0}")]
    UnsupportedMethod(String),

    /// Bean 既不是声明式控制器也不是插件
    #[error("Bean '{0}' is neither a decorator driven controller nor a plugin")]
    NotRegistrable(String),

    #[error("Bean '{id}' is not a {expected}")]
    InvalidBean { id: String, expected: &'static str },

    #[error(transparent)]
    Container(#[from] ContainerError),

    /// 插件注册过程中返回的错误
    #[error("Plugin registration failed: {0}")]
    Plugin(#[source] anyhow::Error),

    #[error("Invalid server address: {0}")]
    InvalidAddress(String),

    #[error("Failed to bind to {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server has already been started")]
    AlreadyStarted,

    #[error("Server is not listening")]
    NotListening,

    #[error("Server error: {0}")]
    Server(#[source] std::io::Error),
}

impl WebError {
    /// 稳定的错误代码，用于调用方匹配
    pub fn code(&self) -> &'static str {
        use error_codes::*;
        match self {
            WebError::MissingModelAttributeConverter(_) => REV_ERR_MISSING_MODEL_ATTRIBUTE_CONVERTER,
            WebError::DuplicateModelAttributeConverter(_) => {
                REV_ERR_DUPLICATE_MODEL_ATTRIBUTE_CONVERTER
            }
            WebError::NestedModelAttribute { .. } => REV_ERR_NESTED_MODEL_ATTRIBUTE,
            WebError::RouteConflict { .. } => REV_ERR_ROUTE_CONFLICT,
            WebError::InvalidRoute { .. } => REV_ERR_INVALID_ROUTE,
            WebError::UnsupportedMethod(_) => REV_ERR_UNSUPPORTED_METHOD,
            WebError::NotRegistrable(_) => REV_ERR_NOT_REGISTRABLE,
            WebError::InvalidBean { .. } => REV_ERR_INVALID_BEAN,
            WebError::Container(_) => REV_ERR_CONTAINER,
            WebError::Plugin(_) => REV_ERR_PLUGIN,
            WebError::InvalidAddress(_) => REV_ERR_INVALID_ADDRESS,
            WebError::Bind { .. } => REV_ERR_BIND,
            WebError::AlreadyStarted => REV_ERR_ALREADY_STARTED,
            WebError::NotListening => REV_ERR_NOT_LISTENING,
            WebError::Server(_) => REV_ERR_SERVER,
        }
    }

    /// 插件返回的 anyhow 错误如果本身就是 WebError，保留原始错误
    pub fn from_plugin(error: anyhow::Error) -> Self {
        match error.downcast::<WebError>() {
            Ok(web_error) => web_error,
            Err(other) => WebError::Plugin(other),
        }
    }
}

/// 请求处理过程中的应用错误
///
/// `code` 是应用级错误代码（不是 HTTP 状态码），错误处理器按它匹配；
/// `status` 只在没有任何错误处理器接手时决定默认响应的状态码。
pub struct HandlerError {
    code: Option<String>,
    status: Option<StatusCode>,
    message: String,
    source: Option<anyhow::Error>,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            status: None,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    /// 参数无法转换为方法声明的类型
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::new(message)
            .with_code(error_codes::REV_ERR_INVALID_PARAMETER)
            .with_status(StatusCode::BAD_REQUEST)
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// 被包装的原始错误
    pub fn source_error(&self) -> Option<&anyhow::Error> {
        self.source.as_ref()
    }

    /// 包装的原始错误是否为指定类型
    pub fn is<E>(&self) -> bool
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.source.as_ref().is_some_and(|e| e.is::<E>())
    }
}

/// 任意 `std::error::Error` 和 `anyhow::Error` 都可以转换
///
/// `WebError` 保留自己的错误代码。`HandlerError` 本身不实现 `std::error::Error`，
/// 否则这里会与 `From<T> for T` 冲突。
impl<E> From<E> for HandlerError
where
    E: Into<anyhow::Error>,
{
    fn from(error: E) -> Self {
        let error: anyhow::Error = error.into();
        let code = error.downcast_ref::<WebError>().map(WebError::code);
        Self {
            code: code.map(String::from),
            status: None,
            message: error.to_string(),
            source: Some(error),
        }
    }
}

/// 带应用错误代码的错误类型
///
/// 控制器方法返回实现了此 trait 的错误时，`#[controller]` 生成的代码会把
/// `error_code` 和 `status` 带到 `HandlerError` 上，供 `#[error_handler("CODE")]` 匹配。
pub trait ErrorCode {
    fn error_code(&self) -> Option<String>;

    fn status(&self) -> Option<StatusCode> {
        None
    }
}

impl ErrorCode for WebError {
    fn error_code(&self) -> Option<String> {
        Some(self.code().to_string())
    }
}

impl HandlerError {
    /// 转换并带上 `ErrorCode` 提供的代码和状态码
    pub fn from_coded<E>(error: E) -> Self
    where
        E: ErrorCode + Into<anyhow::Error>,
    {
        let code = error.error_code();
        let status = error.status();
        let mut converted = Self::from(error);
        if code.is_some() {
            converted.code = code;
        }
        if status.is_some() {
            converted.status = status;
        }
        converted
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "[{}] {}", code, self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl fmt::Debug for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerError")
            .field("code", &self.code)
            .field("status", &self.status)
            .field("message", &self.message)
            .field("source", &self.source)
            .finish()
    }
}

/// 宏生成代码使用：按错误类型是否实现 `ErrorCode` 选择转换方式
///
/// `(&error).handler_error_kind().convert(error)`，
/// 实现了 `ErrorCode` 时走 `CodedKind`，否则通过自动引用落到 `PlainKind`。
#[doc(hidden)]
pub mod kind {
    use super::{ErrorCode, HandlerError};

    pub struct Coded;

    pub struct Plain;

    pub trait CodedKind {
        #[inline]
        fn handler_error_kind(&self) -> Coded {
            Coded
        }
    }

    impl<E: ErrorCode> CodedKind for E {}

    pub trait PlainKind {
        #[inline]
        fn handler_error_kind(&self) -> Plain {
            Plain
        }
    }

    impl<E: Into<HandlerError>> PlainKind for &E {}

    impl Coded {
        pub fn convert<E>(self, error: E) -> HandlerError
        where
            E: ErrorCode + Into<anyhow::Error>,
        {
            HandlerError::from_coded(error)
        }
    }

    impl Plain {
        pub fn convert<E: Into<HandlerError>>(self, error: E) -> HandlerError {
            error.into()
        }
    }
}

/// 标准错误响应格式
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub timestamp: String,
    pub status: u16,
    pub error: String,
    pub message: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorResponse {
    pub fn new(status: StatusCode, message: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            status: status.as_u16(),
            error: status.canonical_reason().unwrap_or("Unknown Error").to_string(),
            message: message.into(),
            path: path.into(),
            code: None,
        }
    }

    /// 没有错误处理器接手时的默认响应
    pub fn from_handler_error(error: &HandlerError, path: &str) -> Self {
        let status = error.status().unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = Self::new(status, error.message(), path);
        response.code = error.code().map(String::from);
        response
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_web_error_codes() {
        assert_eq!(
            WebError::MissingModelAttributeConverter("test".into()).code(),
            error_codes::REV_ERR_MISSING_MODEL_ATTRIBUTE_CONVERTER
        );
        assert_eq!(
            WebError::DuplicateModelAttributeConverter("test".into()).to_string(),
            "Duplicate ModelAttribute Converter with name 'test'"
        );
    }

    #[test]
    fn test_from_plugin_keeps_web_error() {
        let error = anyhow::Error::new(WebError::DuplicateModelAttributeConverter("x".into()));
        assert_eq!(
            WebError::from_plugin(error).code(),
            error_codes::REV_ERR_DUPLICATE_MODEL_ATTRIBUTE_CONVERTER
        );

        let other = WebError::from_plugin(anyhow::anyhow!("boom"));
        assert_eq!(other.code(), error_codes::REV_ERR_PLUGIN);
    }

    #[test]
    fn test_handler_error_builder() {
        let error = HandlerError::new("boom")
            .with_code("ERR1")
            .with_status(StatusCode::IM_A_TEAPOT);
        assert_eq!(error.code(), Some("ERR1"));
        assert_eq!(error.status(), Some(StatusCode::IM_A_TEAPOT));
        assert_eq!(error.to_string(), "[ERR1] boom");

        let wrapped = HandlerError::from(std::io::Error::other("disk"));
        assert!(wrapped.is::<std::io::Error>());
        assert_eq!(wrapped.code(), None);
    }

    #[derive(Debug, Error)]
    enum StockError {
        #[error("item {0} is out of stock")]
        OutOfStock(u32),
    }

    impl ErrorCode for StockError {
        fn error_code(&self) -> Option<String> {
            Some("OUT_OF_STOCK".to_string())
        }

        fn status(&self) -> Option<StatusCode> {
            Some(StatusCode::CONFLICT)
        }
    }

    #[test]
    fn test_conversion_from_any_error() {
        let parse = "x".parse::<i32>().map_err(HandlerError::from).unwrap_err();
        assert!(parse.is::<std::num::ParseIntError>());
        assert_eq!(parse.code(), None);

        let plain = HandlerError::from(StockError::OutOfStock(7));
        assert_eq!(plain.message(), "item 7 is out of stock");
        assert_eq!(plain.code(), None);

        let web = HandlerError::from(WebError::MissingModelAttributeConverter("user".into()));
        assert_eq!(web.code(), Some(error_codes::REV_ERR_MISSING_MODEL_ATTRIBUTE_CONVERTER));

        let chained = HandlerError::from(anyhow::anyhow!("outer"));
        assert_eq!(chained.message(), "outer");
    }

    #[test]
    fn test_kind_dispatch() {
        use super::kind::{CodedKind, PlainKind};

        let coded = StockError::OutOfStock(1);
        let converted = (&coded).handler_error_kind().convert(coded);
        assert_eq!(converted.code(), Some("OUT_OF_STOCK"));

        let plain = std::io::Error::other("disk");
        let converted = (&plain).handler_error_kind().convert(plain);
        assert_eq!(converted.code(), None);
        assert_eq!(converted.message(), "disk");
    }

    #[test]
    fn test_coded_conversion() {
        let error = HandlerError::from_coded(StockError::OutOfStock(3));
        assert_eq!(error.code(), Some("OUT_OF_STOCK"));
        assert_eq!(error.status(), Some(StatusCode::CONFLICT));
        assert!(error.is::<StockError>());
    }

    #[test]
    fn test_error_response_uses_status() {
        let error = HandlerError::invalid_parameter("bad id");
        let response = ErrorResponse::from_handler_error(&error, "/user/x");
        assert_eq!(response.status, 400);
        assert_eq!(response.error, "Bad Request");
        assert_eq!(response.code.as_deref(), Some(error_codes::REV_ERR_INVALID_PARAMETER));

        let default = ErrorResponse::from_handler_error(&HandlerError::new("x"), "/");
        assert_eq!(default.status, 500);
    }
}
