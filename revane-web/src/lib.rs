//! # Revane Web
//!
//! 基于 Axum 的注解驱动路由适配器
//!
//! ## 核心特性
//!
//! - **声明式控制器** - `#[controller]` 加 `#[get_mapping]` 等属性声明路由
//! - **参数绑定** - `#[param]`、`#[query]`、`#[body]` 等按声明顺序注入
//! - **错误处理** - 按应用错误代码匹配的 `#[error_handler]`，局部 → 全局 → 默认
//! - **Model attribute** - 跨 Bean 的具名请求转换器
//! - **依赖注入** - 控制器和插件从 Revane Core 容器中获取

pub mod bean_provider;
pub mod constants;
pub mod decorators;
pub mod error;
pub mod error_handler;
pub mod instance;
pub mod log;
pub mod metadata;
pub mod middleware;
pub mod model_attribute;
pub mod options;
pub mod parameter;
pub mod request;
pub mod response;
pub mod route;
pub mod server;

pub use bean_provider::{downcast_bean, Bean, BeanProvider};
pub use error::{error_codes, ErrorCode, ErrorResponse, HandlerError, WebError};
pub use error_handler::{
    build_error_handler, build_global_error_handler, error_handler_fn, not_found_fn,
    CompiledErrorHandler, ErrorHandler, NotFoundHandler,
};
pub use instance::{Plugin, ResolvedBean, RouteEntry, ServerInstance};
pub use log::RequestLog;
pub use metadata::{MetadataRegistration, MetadataStore, Target};
pub use model_attribute::{
    model_attribute_beans, model_attribute_converters_for_parameters, BeanAndMethod,
    ModelAttributeBeans, ModelAttributeConverter,
};
pub use options::RevaneOptions;
pub use parameter::{apply_parameter, Argument, Arguments, Parameter, ParameterType};
pub use request::{RequestContext, RevaneRequest};
pub use response::{CookieOptions, RevaneResponse, SameSite};
pub use route::{build_plugin, CompiledPlugin, HandlerShape, Methods, RouteOptions};
pub use server::RevaneServer;

pub use revane_web_macros::controller;

// 宏生成代码使用
#[doc(hidden)]
pub use error::kind as __error_kind;
#[doc(hidden)]
pub use async_trait;
pub use axum;
#[doc(hidden)]
pub use futures_util::future::BoxFuture;
#[doc(hidden)]
pub use inventory;
pub use serde_json;

pub mod prelude {
    //! 预导入模块

    pub use crate::controller;
    pub use crate::error::{ErrorCode, HandlerError, WebError};
    pub use crate::error_handler::{error_handler_fn, not_found_fn, ErrorHandler, NotFoundHandler};
    pub use crate::instance::{Plugin, ServerInstance};
    pub use crate::log::RequestLog;
    pub use crate::options::RevaneOptions;
    pub use crate::request::RevaneRequest;
    pub use crate::response::{CookieOptions, RevaneResponse, SameSite};
    pub use crate::server::RevaneServer;

    pub use async_trait::async_trait;
    pub use axum::http::StatusCode;
    pub use axum::response::{IntoResponse, Response};
    pub use axum::Router;
    pub use revane_core::{CONTROLLER_ADVICE_COMPONENT, CONTROLLER_COMPONENT};
}
