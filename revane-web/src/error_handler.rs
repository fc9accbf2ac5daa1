//! 错误处理器
//!
//! 控制器上的 `#[error_handler("CODE")]` 方法按应用错误代码匹配，
//! 不带代码的是兜底处理器。编译结果实现 `ErrorHandler`，
//! 与手写的错误处理器可以互换。

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::future::{BoxFuture, FutureExt};

use crate::bean_provider::Bean;
use crate::error::HandlerError;
use crate::metadata::{ErrorHandlers, FallbackErrorHandler, MetadataStore, Target};
use crate::request::RevaneRequest;
use crate::response::RevaneResponse;

/// 宏生成的错误处理方法调用闭包
pub type ErrorHandlerFunction = Arc<
    dyn Fn(Bean, HandlerError, RevaneRequest, RevaneResponse) -> BoxFuture<'static, Result<Response, HandlerError>>
        + Send
        + Sync,
>;

/// 把异步闭包包装成 `ErrorHandlerFunction`
pub fn error_handler_function<F, Fut>(f: F) -> ErrorHandlerFunction
where
    F: Fn(Bean, HandlerError, RevaneRequest, RevaneResponse) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, HandlerError>> + Send + 'static,
{
    Arc::new(move |bean, error, request, response| f(bean, error, request, response).boxed())
}

/// 错误处理器定义
///
/// `#[response_status]` 可能先于 `#[error_handler]` 写入，
/// 所以除 `handler_name` 外的字段都可能暂时缺失。
#[derive(Clone, Default)]
pub struct ErrorHandlerDefinition {
    pub handler_function: Option<ErrorHandlerFunction>,
    pub error_code: Option<String>,
    pub status_code: Option<u16>,
    pub handler_name: String,
}

impl fmt::Debug for ErrorHandlerDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorHandlerDefinition")
            .field("error_code", &self.error_code)
            .field("status_code", &self.status_code)
            .field("handler_name", &self.handler_name)
            .field("handler_function", &self.handler_function.is_some())
            .finish()
    }
}

/// 方法名 → 错误处理器定义，保持声明顺序
#[derive(Debug, Clone, Default)]
pub struct ErrorHandlerTable {
    handlers: Vec<(String, ErrorHandlerDefinition)>,
}

impl ErrorHandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 取出定义，不存在时创建只带方法名的定义
    pub fn entry(&mut self, method_key: &str) -> &mut ErrorHandlerDefinition {
        let index = match self.handlers.iter().position(|(key, _)| key == method_key) {
            Some(index) => index,
            None => {
                self.handlers.push((
                    method_key.to_string(),
                    ErrorHandlerDefinition {
                        handler_name: method_key.to_string(),
                        ..Default::default()
                    },
                ));
                self.handlers.len() - 1
            }
        };
        &mut self.handlers[index].1
    }

    pub fn get(&self, method_key: &str) -> Option<&ErrorHandlerDefinition> {
        self.handlers
            .iter()
            .find(|(key, _)| key == method_key)
            .map(|(_, definition)| definition)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ErrorHandlerDefinition)> {
        self.handlers.iter().map(|(key, definition)| (key.as_str(), definition))
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// 请求期错误处理器
///
/// 返回 `Err` 表示不处理，错误继续交给下一级处理器。
#[async_trait]
pub trait ErrorHandler: Send + Sync {
    async fn handle(
        &self,
        error: HandlerError,
        request: RevaneRequest,
        response: RevaneResponse,
    ) -> Result<Response, HandlerError>;
}

/// 未匹配路由的处理器
#[async_trait]
pub trait NotFoundHandler: Send + Sync {
    async fn not_found(
        &self,
        request: RevaneRequest,
        response: RevaneResponse,
    ) -> Result<Response, HandlerError>;
}

struct FnErrorHandler<F>(F);

#[async_trait]
impl<F, Fut, R> ErrorHandler for FnErrorHandler<F>
where
    F: Fn(HandlerError, RevaneRequest, RevaneResponse) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
    R: IntoResponse + 'static,
{
    async fn handle(
        &self,
        error: HandlerError,
        request: RevaneRequest,
        response: RevaneResponse,
    ) -> Result<Response, HandlerError> {
        (self.0)(error, request, response)
            .await
            .map(IntoResponse::into_response)
    }
}

/// 用闭包实现错误处理器
pub fn error_handler_fn<F, Fut, R>(f: F) -> Arc<dyn ErrorHandler>
where
    F: Fn(HandlerError, RevaneRequest, RevaneResponse) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
    R: IntoResponse + 'static,
{
    Arc::new(FnErrorHandler(f))
}

struct FnNotFoundHandler<F>(F);

#[async_trait]
impl<F, Fut, R> NotFoundHandler for FnNotFoundHandler<F>
where
    F: Fn(RevaneRequest, RevaneResponse) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
    R: IntoResponse + 'static,
{
    async fn not_found(
        &self,
        request: RevaneRequest,
        response: RevaneResponse,
    ) -> Result<Response, HandlerError> {
        (self.0)(request, response)
            .await
            .map(IntoResponse::into_response)
    }
}

/// 用闭包实现未匹配路由处理器
pub fn not_found_fn<F, Fut, R>(f: F) -> Arc<dyn NotFoundHandler>
where
    F: Fn(RevaneRequest, RevaneResponse) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
    R: IntoResponse + 'static,
{
    Arc::new(FnNotFoundHandler(f))
}

struct CodedHandler {
    code: String,
    status: StatusCode,
    name: String,
    function: ErrorHandlerFunction,
}

struct Fallback {
    status: StatusCode,
    name: String,
    function: ErrorHandlerFunction,
}

/// 编译后的错误处理器
pub struct CompiledErrorHandler {
    target: Target,
    bean: Bean,
    coded: Vec<CodedHandler>,
    fallback: Option<Fallback>,
}

impl CompiledErrorHandler {
    pub fn target(&self) -> Target {
        self.target
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    /// 带代码的处理器，按声明顺序
    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.coded.iter().map(|handler| handler.code.as_str())
    }
}

impl fmt::Debug for CompiledErrorHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledErrorHandler")
            .field("target", &self.target)
            .field("codes", &self.codes().collect::<Vec<_>>())
            .field("fallback", &self.fallback.as_ref().map(|f| f.name.as_str()))
            .finish()
    }
}

#[async_trait]
impl ErrorHandler for CompiledErrorHandler {
    async fn handle(
        &self,
        error: HandlerError,
        request: RevaneRequest,
        response: RevaneResponse,
    ) -> Result<Response, HandlerError> {
        let matched = error
            .code()
            .and_then(|code| self.coded.iter().find(|handler| handler.code == code));

        if let Some(handler) = matched {
            tracing::debug!(
                "Error '{}' handled by {}::{}",
                handler.code,
                self.target.name(),
                handler.name
            );
            response.status(handler.status.as_u16());
            return (handler.function)(Arc::clone(&self.bean), error, request, response).await;
        }

        if let Some(fallback) = &self.fallback {
            tracing::debug!(
                "Error handled by fallback {}::{}",
                self.target.name(),
                fallback.name
            );
            response.status(fallback.status.as_u16());
            return (fallback.function)(Arc::clone(&self.bean), error, request, response).await;
        }

        Err(error)
    }
}

fn status_or_default(status: Option<u16>, handler_name: &str) -> StatusCode {
    match status.map(StatusCode::from_u16) {
        Some(Ok(status)) => status,
        Some(Err(_)) => {
            tracing::warn!(
                "Invalid response status on error handler '{}', using 500",
                handler_name
            );
            StatusCode::INTERNAL_SERVER_ERROR
        }
        None => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// 编译控制器的错误处理器，没有任何错误处理元数据时返回 `None`
pub fn build_error_handler(
    store: &MetadataStore,
    target: Target,
    bean: &Bean,
) -> Option<CompiledErrorHandler> {
    let table = store.get_metadata::<ErrorHandlers>(target);
    let fallback = store.get_metadata::<FallbackErrorHandler>(target);

    if table.as_ref().map_or(true, ErrorHandlerTable::is_empty) && fallback.is_none() {
        return None;
    }
    let table = table.unwrap_or_default();

    let coded = table
        .iter()
        .filter_map(|(name, definition)| {
            let code = definition.error_code.clone()?;
            let function = definition.handler_function.clone()?;
            Some(CodedHandler {
                status: status_or_default(definition.status_code, name),
                code,
                name: name.to_string(),
                function,
            })
        })
        .collect();

    // 兜底状态码：自身配置 → 同名方法上的配置 → 500
    let fallback = fallback.and_then(|definition| {
        let function = definition.handler_function?;
        let status = definition.status_code.or_else(|| {
            table
                .get(&definition.handler_name)
                .and_then(|named| named.status_code)
        });
        Some(Fallback {
            status: status_or_default(status, &definition.handler_name),
            name: definition.handler_name,
            function,
        })
    });

    Some(CompiledErrorHandler {
        target,
        bean: Arc::clone(bean),
        coded,
        fallback,
    })
}

/// 从 advice 中选第一个带错误处理器的，只编译这一个
pub fn build_global_error_handler(
    store: &MetadataStore,
    advices: &[Bean],
) -> Option<CompiledErrorHandler> {
    advices.iter().find_map(|advice| {
        let target = store.target_of(advice.as_ref())?;
        let handler = build_error_handler(store, target, advice)?;
        tracing::debug!("Using {} as global error handler", target.name());
        Some(handler)
    })
}
