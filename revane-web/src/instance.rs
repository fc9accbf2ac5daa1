//! 服务器实例
//!
//! 插件和控制器在注册阶段把路由、错误处理器、中间件写入 `ServerInstance`，
//! 监听前一次性组装成 axum `Router`。

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{ConnectInfo, Path, Request},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::on,
    Router,
};
use serde_json::Value;

use crate::bean_provider::Bean;
use crate::error::{ErrorResponse, HandlerError, WebError};
use crate::error_handler::{ErrorHandler, NotFoundHandler};
use crate::metadata::{MetadataStore, Target};
use crate::request::RequestContext;
use crate::route::{Methods, RouteHandler, RouteOptions};

/// 手写插件
///
/// 与声明式控制器不同，插件直接操作 `ServerInstance`。
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn register(&self, instance: &mut ServerInstance, options: &Value) -> anyhow::Result<()>;
}

/// 注册目标，解析一次后按分支处理
pub enum ResolvedBean {
    DecoratorDriven { target: Target, bean: Bean },
    Plugin(Arc<dyn Plugin>),
    NotRegistrable,
}

impl ResolvedBean {
    /// 插件 Bean 以 `Arc<dyn Plugin>` 形式存放在容器中
    pub fn resolve(store: &MetadataStore, bean: Bean) -> Self {
        if let Some(target) = store.target_of(bean.as_ref()) {
            if store.is_decorator_driven(target) {
                return ResolvedBean::DecoratorDriven { target, bean };
            }
        }
        match bean.downcast_ref::<Arc<dyn Plugin>>() {
            Some(plugin) => ResolvedBean::Plugin(Arc::clone(plugin)),
            None => ResolvedBean::NotRegistrable,
        }
    }
}

/// 一条待挂载的路由
#[derive(Clone)]
pub struct RouteEntry {
    pub methods: Methods,
    pub path: String,
    pub handler: RouteHandler,
    pub error_handler: Option<Arc<dyn ErrorHandler>>,
    pub options: RouteOptions,
    /// 来源，用于路由列表和冲突日志
    pub source: String,
}

type RouterLayer = Box<dyn FnOnce(Router) -> Router + Send>;

/// 注册阶段的服务器状态
#[derive(Default)]
pub struct ServerInstance {
    routes: Vec<RouteEntry>,
    registered: HashSet<(Method, String)>,
    routers: Vec<Router>,
    layers: Vec<RouterLayer>,
    error_handler: Option<Arc<dyn ErrorHandler>>,
    not_found_handler: Option<Arc<dyn NotFoundHandler>>,
}

impl ServerInstance {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加路由，同一方法和路径只能注册一次
    pub fn route(&mut self, entry: RouteEntry) -> Result<(), WebError> {
        if !entry.path.starts_with('/') {
            return Err(WebError::InvalidRoute {
                path: entry.path,
                reason: "path must start with '/'".to_string(),
            });
        }
        entry.methods.filter()?;

        let keys: Vec<(Method, String)> = entry
            .methods
            .methods()
            .into_iter()
            .map(|method| (method, entry.path.clone()))
            .collect();

        if let Some(existing) = self
            .routes
            .iter()
            .find(|route| conflicting_segments(&route.path, &entry.path))
        {
            tracing::error!(
                "Route {} from {} conflicts with {} from {}",
                entry.path,
                entry.source,
                existing.path,
                existing.source
            );
            return Err(WebError::RouteConflict {
                method: entry.methods.to_string(),
                path: entry.path,
            });
        }

        if let Some((method, path)) = keys.iter().find(|key| self.registered.contains(*key)) {
            tracing::error!(
                "Route {} {} from {} is already registered",
                method,
                path,
                entry.source
            );
            return Err(WebError::RouteConflict {
                method: method.to_string(),
                path: path.clone(),
            });
        }

        tracing::debug!("Registering route {} {} -> {}", entry.methods, entry.path, entry.source);
        self.registered.extend(keys);
        self.routes.push(entry);
        Ok(())
    }

    /// 合并原生 axum 路由
    ///
    /// 与 `axum::Router::merge` 相同，和已有路由重叠时在组装阶段 panic。
    pub fn merge(&mut self, router: Router) {
        self.routers.push(router);
    }

    /// 添加作用于全部路由的中间件
    pub fn layer<F>(&mut self, layer: F)
    where
        F: FnOnce(Router) -> Router + Send + 'static,
    {
        self.layers.push(Box::new(layer));
    }

    pub fn set_error_handler(&mut self, handler: Arc<dyn ErrorHandler>) {
        self.error_handler = Some(handler);
    }

    pub fn error_handler(&self) -> Option<&Arc<dyn ErrorHandler>> {
        self.error_handler.as_ref()
    }

    pub fn set_not_found_handler(&mut self, handler: Arc<dyn NotFoundHandler>) {
        self.not_found_handler = Some(handler);
    }

    pub fn has_not_found_handler(&self) -> bool {
        self.not_found_handler.is_some()
    }

    pub fn routes(&self) -> &[RouteEntry] {
        &self.routes
    }

    /// 已注册路由列表，每行一条
    pub fn print_routes(&self) -> String {
        self.routes
            .iter()
            .map(|route| format!("{:<8}{} ({})\n", route.methods, route.path, route.source))
            .collect()
    }

    /// 组装 axum 路由
    pub(crate) fn into_router(self, body_limit: usize) -> Result<Router, WebError> {
        let dispatcher = Arc::new(Dispatcher {
            error_handler: self.error_handler,
            not_found_handler: self.not_found_handler,
            body_limit,
        });

        let mut router = Router::new();
        for entry in self.routes {
            let filter = entry.methods.filter()?;
            let path = entry.path.clone();

            let entry = Arc::new(entry);
            let route_dispatcher = Arc::clone(&dispatcher);
            let method_router = on(
                filter,
                move |connect: Option<ConnectInfo<SocketAddr>>,
                      params: Option<Path<HashMap<String, String>>>,
                      request: Request| {
                    let entry = Arc::clone(&entry);
                    let dispatcher = Arc::clone(&route_dispatcher);
                    async move {
                        dispatcher
                            .route(
                                &entry,
                                connect.map(|c| c.0),
                                params.map(|p| p.0).unwrap_or_default(),
                                request,
                            )
                            .await
                    }
                },
            );

            router = router.route(&path, method_router);
        }

        for other in self.routers {
            router = router.merge(other);
        }

        let fallback_dispatcher = Arc::clone(&dispatcher);
        router = router.fallback(
            move |connect: Option<ConnectInfo<SocketAddr>>, request: Request| {
                let dispatcher = Arc::clone(&fallback_dispatcher);
                async move { dispatcher.not_found(connect.map(|c| c.0), request).await }
            },
        );

        for layer in self.layers {
            router = layer(router);
        }
        Ok(router)
    }
}

/// 两条路径在同一位置使用不同名字的参数或通配符，axum 无法同时挂载
///
/// `/user/:id` 与 `/user/:name/posts` 冲突；`/user/:id` 与 `/users/:name` 不冲突。
fn conflicting_segments(left: &str, right: &str) -> bool {
    let is_capture = |segment: &str| segment.starts_with(':') || segment.starts_with('*');
    for (a, b) in left.split('/').zip(right.split('/')) {
        if a == b {
            continue;
        }
        return is_capture(a) && is_capture(b);
    }
    false
}

/// 请求分发：处理函数 → 局部错误处理器 → 全局错误处理器 → 默认响应
struct Dispatcher {
    error_handler: Option<Arc<dyn ErrorHandler>>,
    not_found_handler: Option<Arc<dyn NotFoundHandler>>,
    body_limit: usize,
}

impl Dispatcher {
    async fn route(
        &self,
        entry: &RouteEntry,
        remote_addr: Option<SocketAddr>,
        params: HashMap<String, String>,
        request: Request,
    ) -> Response {
        let (ctx, body_error) =
            RequestContext::from_request(request, params, remote_addr, self.body_limit).await;

        let result = match body_error {
            Some(error) => Err(error),
            None => (entry.handler)(ctx.clone()).await,
        };

        let response = match result {
            Ok(response) => response,
            Err(error) => {
                self.handle_error(error, entry.error_handler.as_ref(), &ctx)
                    .await
            }
        };
        ctx.response.apply(response)
    }

    async fn not_found(&self, remote_addr: Option<SocketAddr>, request: Request) -> Response {
        let (ctx, _) =
            RequestContext::from_request(request, HashMap::new(), remote_addr, self.body_limit)
                .await;

        let response = match &self.not_found_handler {
            Some(handler) => {
                match handler
                    .not_found(ctx.request.clone(), ctx.response.clone())
                    .await
                {
                    Ok(response) => response,
                    Err(error) => self.handle_error(error, None, &ctx).await,
                }
            }
            None => ErrorResponse::new(
                StatusCode::NOT_FOUND,
                format!(
                    "Route {}:{} not found",
                    ctx.request.method(),
                    ctx.request.path()
                ),
                ctx.request.path(),
            )
            .into_response(),
        };
        ctx.response.apply(response)
    }

    async fn handle_error(
        &self,
        error: HandlerError,
        local: Option<&Arc<dyn ErrorHandler>>,
        ctx: &RequestContext,
    ) -> Response {
        let mut error = error;
        for handler in local.into_iter().chain(self.error_handler.as_ref()) {
            match handler
                .handle(error, ctx.request.clone(), ctx.response.clone())
                .await
            {
                Ok(response) => return response,
                Err(rethrown) => error = rethrown,
            }
        }

        ctx.log.error(format_args!("Unhandled error: {}", error));
        ErrorResponse::from_handler_error(&error, ctx.request.path()).into_response()
    }
}
