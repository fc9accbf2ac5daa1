//! 路由记录与路由编译
//!
//! 宏在类型定义时把每个方法的请求映射和参数绑定写入 `RouteTable`，
//! `build_plugin` 在注册时把路由表编译成可直接挂到 axum 上的处理函数。

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{http::Method, response::Response, routing::MethodFilter};
use futures_util::future::{BoxFuture, FutureExt};
use serde_json::{Map, Value};

use crate::bean_provider::Bean;
use crate::error::{HandlerError, WebError};
use crate::error_handler::{build_error_handler, ErrorHandler};
use crate::instance::{Plugin, RouteEntry, ServerInstance};
use crate::metadata::{MetadataStore, Routes, Target};
use crate::model_attribute::{
    model_attribute_converters_for_parameters, ModelAttributeBeans, ModelAttributeConverter,
};
use crate::parameter::{resolve_plain, Argument, Arguments, Parameter, ParameterType};
use crate::request::RequestContext;

/// 路由附加选项，原样交给 ready 回调和路由列表
pub type RouteOptions = Map<String, Value>;

/// 宏生成的方法调用闭包
pub type HandlerFunction =
    Arc<dyn Fn(Bean, Arguments) -> BoxFuture<'static, Result<Response, HandlerError>> + Send + Sync>;

/// 把异步闭包包装成 `HandlerFunction`
pub fn handler_fn<F, Fut>(f: F) -> HandlerFunction
where
    F: Fn(Bean, Arguments) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, HandlerError>> + Send + 'static,
{
    Arc::new(move |bean, args| f(bean, args).boxed())
}

/// 编译后的请求处理函数
pub type RouteHandler =
    Arc<dyn Fn(RequestContext) -> BoxFuture<'static, Result<Response, HandlerError>> + Send + Sync>;

/// 单个 HTTP 方法或全部方法
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Methods {
    One(Method),
    All,
}

impl Methods {
    const ALL: [Method; 7] = [
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::PATCH,
        Method::HEAD,
        Method::DELETE,
        Method::OPTIONS,
    ];

    pub fn methods(&self) -> Vec<Method> {
        match self {
            Methods::One(method) => vec![method.clone()],
            Methods::All => Self::ALL.to_vec(),
        }
    }

    pub fn filter(&self) -> Result<MethodFilter, WebError> {
        let mut methods = self.methods().into_iter();
        let first = methods.next().ok_or_else(|| WebError::UnsupportedMethod(self.to_string()))?;
        let mut filter = method_filter(first)?;
        for method in methods {
            filter = filter.or(method_filter(method)?);
        }
        Ok(filter)
    }
}

fn method_filter(method: Method) -> Result<MethodFilter, WebError> {
    MethodFilter::try_from(method.clone())
        .map_err(|_| WebError::UnsupportedMethod(method.to_string()))
}

impl fmt::Display for Methods {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Methods::One(method) => f.pad(method.as_str()),
            Methods::All => f.pad("ALL"),
        }
    }
}

impl From<Method> for Methods {
    fn from(method: Method) -> Self {
        Methods::One(method)
    }
}

/// 单个方法的路由记录
///
/// 请求映射和参数绑定由不同的声明分别写入，任意一方都可能先到。
#[derive(Clone, Default)]
pub struct RouteRecord {
    pub url: Option<String>,
    pub methods: Option<Methods>,
    pub options: RouteOptions,
    pub handler: Option<HandlerFunction>,
    pub parameters: Vec<Parameter>,
}

impl RouteRecord {
    /// 覆盖映射字段，保留参数列表
    pub fn merge_mapping(
        &mut self,
        methods: Methods,
        url: impl Into<String>,
        options: RouteOptions,
        handler: HandlerFunction,
    ) {
        self.methods = Some(methods);
        self.url = Some(url.into());
        self.options = options;
        self.handler = Some(handler);
    }

    /// 参数声明按从后往前的顺序应用，插到最前面还原声明顺序
    pub fn prepend_parameter(&mut self, parameter: Parameter) {
        self.parameters.insert(0, parameter);
    }

    /// 只有参数没有映射的记录是残片
    pub fn is_complete(&self) -> bool {
        self.url.is_some() && self.methods.is_some() && self.handler.is_some()
    }
}

impl fmt::Debug for RouteRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteRecord")
            .field("url", &self.url)
            .field("methods", &self.methods)
            .field("options", &self.options)
            .field("handler", &self.handler.is_some())
            .field("parameters", &self.parameters)
            .finish()
    }
}

/// 方法名 → 路由记录，保持首次声明的顺序
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<(String, RouteRecord)>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 取出记录，不存在时创建空记录
    pub fn entry(&mut self, method_key: &str) -> &mut RouteRecord {
        let index = match self.routes.iter().position(|(key, _)| key == method_key) {
            Some(index) => index,
            None => {
                self.routes.push((method_key.to_string(), RouteRecord::default()));
                self.routes.len() - 1
            }
        };
        &mut self.routes[index].1
    }

    pub fn get(&self, method_key: &str) -> Option<&RouteRecord> {
        self.routes
            .iter()
            .find(|(key, _)| key == method_key)
            .map(|(_, record)| record)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RouteRecord)> {
        self.routes.iter().map(|(key, record)| (key.as_str(), record))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// 处理函数的参数形态，编译时决定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerShape {
    NoArguments,
    ResponseOnly,
    RequestOnly,
    General,
}

impl HandlerShape {
    pub fn of(parameters: &[Parameter]) -> Self {
        match parameters {
            [] => HandlerShape::NoArguments,
            [only] if only.kind == ParameterType::Response => HandlerShape::ResponseOnly,
            [only] if only.kind == ParameterType::Request => HandlerShape::RequestOnly,
            _ => HandlerShape::General,
        }
    }
}

/// 编译完成的单条路由
#[derive(Clone)]
pub struct CompiledRoute {
    pub method_key: String,
    pub methods: Methods,
    pub url: String,
    pub options: RouteOptions,
    pub shape: HandlerShape,
    pub handler: RouteHandler,
    pub error_handler: Option<Arc<dyn ErrorHandler>>,
}

impl fmt::Debug for CompiledRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledRoute")
            .field("method_key", &self.method_key)
            .field("methods", &self.methods)
            .field("url", &self.url)
            .field("shape", &self.shape)
            .field("error_handler", &self.error_handler.is_some())
            .finish()
    }
}

/// 声明式控制器编译出的插件
#[derive(Debug, Clone)]
pub struct CompiledPlugin {
    target: Target,
    routes: Vec<CompiledRoute>,
}

impl CompiledPlugin {
    pub fn target(&self) -> Target {
        self.target
    }

    pub fn routes(&self) -> &[CompiledRoute] {
        &self.routes
    }
}

#[async_trait]
impl Plugin for CompiledPlugin {
    fn name(&self) -> &str {
        self.target.name()
    }

    async fn register(&self, instance: &mut ServerInstance, _options: &Value) -> anyhow::Result<()> {
        for route in &self.routes {
            instance.route(RouteEntry {
                methods: route.methods.clone(),
                path: route.url.clone(),
                handler: Arc::clone(&route.handler),
                error_handler: route.error_handler.clone(),
                options: route.options.clone(),
                source: format!("{}::{}", self.target.name(), route.method_key),
            })?;
        }
        Ok(())
    }
}

/// 把控制器的路由表编译成插件
pub fn build_plugin(
    store: &MetadataStore,
    target: Target,
    bean: Bean,
    beans: &ModelAttributeBeans,
) -> Result<CompiledPlugin, WebError> {
    let table = store.get_metadata::<Routes>(target).unwrap_or_default();
    let error_handler = build_error_handler(store, target, &bean)
        .map(|handler| Arc::new(handler) as Arc<dyn ErrorHandler>);

    let mut routes = Vec::with_capacity(table.len());
    for (method_key, record) in table.iter() {
        let (Some(url), Some(methods), Some(handler)) =
            (&record.url, &record.methods, &record.handler)
        else {
            tracing::debug!(
                "Skipping route fragment '{}' on {}: no request mapping",
                method_key,
                target.name()
            );
            continue;
        };

        let converters =
            model_attribute_converters_for_parameters(&record.parameters, beans, store)?;
        let shape = HandlerShape::of(&record.parameters);

        tracing::trace!(
            "Compiled {} {} -> {}::{} ({:?})",
            methods,
            url,
            target.name(),
            method_key,
            shape
        );

        routes.push(CompiledRoute {
            method_key: method_key.to_string(),
            methods: methods.clone(),
            url: url.clone(),
            options: record.options.clone(),
            shape,
            handler: build_handler(
                Arc::clone(&bean),
                Arc::clone(handler),
                record.parameters.clone(),
                converters,
                shape,
            ),
            error_handler: error_handler.clone(),
        });
    }

    Ok(CompiledPlugin { target, routes })
}

fn build_handler(
    bean: Bean,
    handler: HandlerFunction,
    parameters: Vec<Parameter>,
    converters: HashMap<String, ModelAttributeConverter>,
    shape: HandlerShape,
) -> RouteHandler {
    match shape {
        HandlerShape::NoArguments => Arc::new(move |_ctx: RequestContext| {
            handler(Arc::clone(&bean), Arguments::new())
        }),
        HandlerShape::ResponseOnly => {
            let name = parameters
                .first()
                .map(|p| p.name.clone())
                .unwrap_or_default();
            Arc::new(move |ctx: RequestContext| {
                let mut args = Arguments::new();
                args.push(name.clone(), Argument::Response(ctx.response));
                handler(Arc::clone(&bean), args)
            })
        }
        HandlerShape::RequestOnly => {
            let name = parameters
                .first()
                .map(|p| p.name.clone())
                .unwrap_or_default();
            Arc::new(move |ctx: RequestContext| {
                let mut args = Arguments::new();
                args.push(name.clone(), Argument::Request(ctx.request));
                handler(Arc::clone(&bean), args)
            })
        }
        HandlerShape::General => {
            let parameters = Arc::new(parameters);
            let converters = Arc::new(converters);
            Arc::new(move |ctx: RequestContext| {
                let bean = Arc::clone(&bean);
                let handler = Arc::clone(&handler);
                let parameters = Arc::clone(&parameters);
                let converters = Arc::clone(&converters);
                async move {
                    let args = resolve_arguments(&parameters, &converters, &ctx).await?;
                    handler(bean, args).await
                }
                .boxed()
            })
        }
    }
}

/// 按声明顺序解析全部参数
async fn resolve_arguments(
    parameters: &[Parameter],
    converters: &HashMap<String, ModelAttributeConverter>,
    ctx: &RequestContext,
) -> Result<Arguments, HandlerError> {
    let mut args = Arguments::new();
    for parameter in parameters {
        let argument = match parameter.kind {
            ParameterType::ModelAttribute => {
                let converter = converters.get(&parameter.name).ok_or_else(|| {
                    HandlerError::from(WebError::MissingModelAttributeConverter(
                        parameter.name.clone(),
                    ))
                })?;
                Argument::ModelAttribute(converter.convert(ctx).await?)
            }
            _ => resolve_plain(parameter, ctx),
        };
        args.push(parameter.name.clone(), argument);
    }
    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decorators;
    use crate::request::RevaneRequest;
    use axum::{body::to_bytes, http::Request, response::IntoResponse};

    struct UserController {
        prefix: &'static str,
    }

    fn echo_handler() -> HandlerFunction {
        handler_fn(|bean: Bean, mut args: Arguments| async move {
            let controller = crate::bean_provider::downcast_bean::<UserController>(bean)?;
            let id: String = args.take_value()?;
            let q: Option<String> = args.take_value()?;
            Ok(format!("{}{}{}", controller.prefix, id, q.unwrap_or_default()).into_response())
        })
    }

    fn context(uri: &str, id: &str) -> RequestContext {
        let (parts, _) = Request::builder().uri(uri).body(()).unwrap().into_parts();
        let mut params = HashMap::new();
        params.insert("id".to_string(), id.to_string());
        let request =
            RevaneRequest::from_parts("test", &parts, params, None, bytes::Bytes::new()).unwrap();
        RequestContext::new(request)
    }

    async fn body_string(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_mapping_preserves_parameters() {
        let mut record = RouteRecord::default();
        record.prepend_parameter(Parameter::sub_value(ParameterType::Query, "q"));
        record.prepend_parameter(Parameter::sub_value(ParameterType::Params, "id"));
        assert!(!record.is_complete());

        record.merge_mapping(Methods::One(Method::GET), "/a", RouteOptions::new(), echo_handler());
        record.merge_mapping(Methods::All, "/b", RouteOptions::new(), echo_handler());

        assert!(record.is_complete());
        assert_eq!(record.url.as_deref(), Some("/b"));
        assert_eq!(record.methods, Some(Methods::All));
        assert_eq!(record.parameters[0].name, "id");
        assert_eq!(record.parameters[1].name, "q");
    }

    #[test]
    fn test_handler_shape() {
        assert_eq!(HandlerShape::of(&[]), HandlerShape::NoArguments);
        assert_eq!(
            HandlerShape::of(&[Parameter::sub_value(ParameterType::Response, "reply")]),
            HandlerShape::ResponseOnly
        );
        assert_eq!(
            HandlerShape::of(&[Parameter::sub_value(ParameterType::Request, "req")]),
            HandlerShape::RequestOnly
        );
        assert_eq!(
            HandlerShape::of(&[Parameter::whole_value(ParameterType::Body)]),
            HandlerShape::General
        );
    }

    #[test]
    fn test_all_methods_filter() {
        assert!(Methods::All.filter().is_ok());
        assert_eq!(Methods::All.methods().len(), 7);
        assert!(Methods::One(Method::from_bytes(b"PURGE").unwrap())
            .filter()
            .is_err());
    }

    #[tokio::test]
    async fn test_build_plugin_resolves_declared_order() {
        let store = MetadataStore::new();
        let target = Target::of::<UserController>();

        // 参数先于映射写入
        decorators::sub_value_parameter(&store, target, "user", ParameterType::Query, "q");
        decorators::sub_value_parameter(&store, target, "user", ParameterType::Params, "id");
        decorators::request_mapping(
            &store,
            target,
            "user",
            Methods::One(Method::GET),
            "/user/:id",
            RouteOptions::new(),
            echo_handler(),
        );
        decorators::sub_value_parameter(&store, target, "fragment", ParameterType::Query, "x");

        let bean: Bean = Arc::new(UserController { prefix: ">" });
        let plugin = build_plugin(&store, target, bean, &ModelAttributeBeans::default()).unwrap();

        assert_eq!(plugin.routes().len(), 1);
        let route = &plugin.routes()[0];
        assert_eq!(route.shape, HandlerShape::General);
        assert!(route.error_handler.is_none());

        let response = (route.handler)(context("/user/42?q=abc", "42")).await.unwrap();
        assert_eq!(body_string(response).await, ">42abc");
    }

    #[tokio::test]
    async fn test_invalid_parameter_propagates() {
        let store = MetadataStore::new();
        let target = Target::of::<UserController>();
        decorators::sub_value_parameter(&store, target, "user", ParameterType::Params, "id");
        decorators::request_mapping(
            &store,
            target,
            "user",
            Methods::One(Method::GET),
            "/user/:id",
            RouteOptions::new(),
            handler_fn(|_bean: Bean, mut args: Arguments| async move {
                let id: u32 = args.take_value()?;
                Ok(id.to_string().into_response())
            }),
        );

        let bean: Bean = Arc::new(UserController { prefix: "" });
        let plugin = build_plugin(&store, target, bean, &ModelAttributeBeans::default()).unwrap();
        let error = (plugin.routes()[0].handler)(context("/user/abc", "abc"))
            .await
            .unwrap_err();
        assert_eq!(error.status(), Some(axum::http::StatusCode::BAD_REQUEST));
    }
}
