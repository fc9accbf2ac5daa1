//! Web 服务器模块
//!
//! `RevaneServer` 把注册调用排成有序步骤，`listen` 时按调用顺序依次执行，
//! 然后组装路由并启动 axum。

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{http::HeaderName, Router};
use revane_core::{Environment, CONTROLLER_ADVICE_COMPONENT, CONTROLLER_COMPONENT};
use serde_json::Value;
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};
use tower_http::compression::CompressionLayer;

use crate::bean_provider::{Bean, BeanProvider};
use crate::constants::DEFAULT_REQUEST_ID_HEADER;
use crate::error::WebError;
use crate::error_handler::{build_global_error_handler, ErrorHandler, NotFoundHandler};
use crate::instance::{Plugin, ResolvedBean, ServerInstance};
use crate::metadata::MetadataStore;
use crate::middleware::{request_id, request_logging};
use crate::model_attribute::{model_attribute_beans, ModelAttributeBeans};
use crate::options::RevaneOptions;
use crate::route::build_plugin;

type Layer = Box<dyn FnOnce(Router) -> Router + Send>;
type AfterCallback = Box<dyn FnOnce(Option<&WebError>) + Send>;
type ReadyCallback = Box<dyn FnOnce(Option<&WebError>, &ServerInstance) + Send>;

enum Step {
    Middleware(Layer),
    Register { id: String, options: Value },
    RegisterPlugin { plugin: Arc<dyn Plugin>, options: Value },
    RegisterControllers,
    RegisterGlobalErrorHandler,
    SetErrorHandler(Arc<dyn ErrorHandler>),
    SetErrorHandlerBean(String),
    SetNotFoundHandler(Arc<dyn NotFoundHandler>),
    SetNotFoundHandlerBean(String),
    After(AfterCallback),
    Ready(ReadyCallback),
}

struct RunningServer {
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<std::io::Result<()>>,
}

enum ServerState {
    Accumulating,
    Listening(RunningServer),
    Closed,
}

/// 注解驱动的 Web 服务器
pub struct RevaneServer {
    provider: Arc<dyn BeanProvider>,
    store: &'static MetadataStore,
    options: RevaneOptions,
    steps: Vec<Step>,
    instance: ServerInstance,
    state: ServerState,
}

impl RevaneServer {
    pub fn new(provider: Arc<dyn BeanProvider>, options: RevaneOptions) -> Self {
        Self {
            provider,
            store: MetadataStore::global(),
            options,
            steps: Vec::new(),
            instance: ServerInstance::new(),
            state: ServerState::Accumulating,
        }
    }

    /// 使用独立的元数据存储
    pub fn with_metadata_store(mut self, store: &'static MetadataStore) -> Self {
        self.store = store;
        self
    }

    pub fn options(&self) -> &RevaneOptions {
        &self.options
    }

    /// 添加中间件
    pub fn use_middleware<F>(&mut self, layer: F) -> &mut Self
    where
        F: FnOnce(Router) -> Router + Send + 'static,
    {
        self.steps.push(Step::Middleware(Box::new(layer)));
        self
    }

    /// 注册容器中的 Bean：声明式控制器或插件
    pub fn register(&mut self, id: impl Into<String>) -> &mut Self {
        self.register_with_options(id, Value::Null)
    }

    pub fn register_with_options(&mut self, id: impl Into<String>, options: Value) -> &mut Self {
        self.steps.push(Step::Register {
            id: id.into(),
            options,
        });
        self
    }

    /// 直接注册插件实例
    pub fn register_plugin<P: Plugin + 'static>(&mut self, plugin: P) -> &mut Self {
        self.register_plugin_with_options(plugin, Value::Null)
    }

    pub fn register_plugin_with_options<P: Plugin + 'static>(
        &mut self,
        plugin: P,
        options: Value,
    ) -> &mut Self {
        self.steps.push(Step::RegisterPlugin {
            plugin: Arc::new(plugin),
            options,
        });
        self
    }

    /// 注册全部 "controller" 组件
    pub fn register_controllers(&mut self) -> &mut Self {
        self.steps.push(Step::RegisterControllers);
        self
    }

    /// 从 "controllerAdvice" 组件中选出全局错误处理器
    pub fn register_global_error_handler(&mut self) -> &mut Self {
        self.steps.push(Step::RegisterGlobalErrorHandler);
        self
    }

    pub fn set_error_handler(&mut self, handler: Arc<dyn ErrorHandler>) -> &mut Self {
        self.steps.push(Step::SetErrorHandler(handler));
        self
    }

    /// Bean 需以 `Arc<dyn ErrorHandler>` 形式注册
    pub fn set_error_handler_bean(&mut self, id: impl Into<String>) -> &mut Self {
        self.steps.push(Step::SetErrorHandlerBean(id.into()));
        self
    }

    pub fn set_not_found_handler(&mut self, handler: Arc<dyn NotFoundHandler>) -> &mut Self {
        self.steps.push(Step::SetNotFoundHandler(handler));
        self
    }

    /// Bean 需以 `Arc<dyn NotFoundHandler>` 形式注册
    pub fn set_not_found_handler_bean(&mut self, id: impl Into<String>) -> &mut Self {
        self.steps.push(Step::SetNotFoundHandlerBean(id.into()));
        self
    }

    /// 前面步骤完成后回调，参数为已发生的错误
    pub fn after<F>(&mut self, callback: F) -> &mut Self
    where
        F: FnOnce(Option<&WebError>) + Send + 'static,
    {
        self.steps.push(Step::After(Box::new(callback)));
        self
    }

    /// 前面步骤完成后回调，可以查看已注册的路由
    pub fn ready<F>(&mut self, callback: F) -> &mut Self
    where
        F: FnOnce(Option<&WebError>, &ServerInstance) + Send + 'static,
    {
        self.steps.push(Step::Ready(Box::new(callback)));
        self
    }

    /// 执行已排队的步骤但不监听
    pub async fn ready_now(&mut self) -> Result<(), WebError> {
        if !matches!(self.state, ServerState::Accumulating) {
            return Err(WebError::AlreadyStarted);
        }
        self.run_steps().await
    }

    /// 执行全部步骤并组装路由，不绑定端口
    pub async fn into_router(mut self) -> Result<Router, WebError> {
        self.ready_now().await?;
        self.build_router()
    }

    /// 执行全部步骤并开始监听
    ///
    /// `address_provider` 是 `Environment` Bean 的 id，
    /// 从中按 `host_key` / `port_key` 读取地址；为 `None` 时使用配置中的地址。
    pub async fn listen(&mut self, address_provider: Option<&str>) -> Result<SocketAddr, WebError> {
        let start = Instant::now();
        self.ready_now().await?;

        let (host, port) = self.resolve_address(address_provider).await?;
        let router = self.build_router()?;

        let address = if host.contains(':') && !host.starts_with('[') {
            format!("[{}]:{}", host, port)
        } else {
            format!("{}:{}", host, port)
        };
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| WebError::Bind {
                address: address.clone(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(WebError::Server)?;

        let (shutdown, signal) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                let _ = signal.await;
            })
            .await
        });

        self.state = ServerState::Listening(RunningServer {
            local_addr,
            shutdown: Some(shutdown),
            task,
        });

        if !self.options.silent {
            tracing::info!("Server started on port {}", local_addr.port());
            tracing::info!("Startup in {} ms", start.elapsed().as_millis());
        }
        Ok(local_addr)
    }

    /// 监听中的端口
    pub fn port(&self) -> Option<u16> {
        self.local_addr().map(|addr| addr.port())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.state {
            ServerState::Listening(running) => Some(running.local_addr),
            _ => None,
        }
    }

    /// 停止服务器，等待进行中的请求完成
    pub async fn close(&mut self) -> Result<(), WebError> {
        match std::mem::replace(&mut self.state, ServerState::Closed) {
            ServerState::Listening(mut running) => {
                if let Some(shutdown) = running.shutdown.take() {
                    let _ = shutdown.send(());
                }
                let result = match running.task.await {
                    Ok(result) => result.map_err(WebError::Server),
                    Err(e) => Err(WebError::Server(std::io::Error::other(e))),
                };
                if !self.options.silent {
                    tracing::info!("Server on {} closed", running.local_addr);
                }
                result
            }
            ServerState::Accumulating | ServerState::Closed => Ok(()),
        }
    }

    /// 按调用顺序执行步骤
    ///
    /// 某一步失败后只执行 after / ready 回调，错误最终返回给调用方。
    async fn run_steps(&mut self) -> Result<(), WebError> {
        let mut failure: Option<WebError> = None;

        for step in std::mem::take(&mut self.steps) {
            match step {
                Step::After(callback) => callback(failure.as_ref()),
                Step::Ready(callback) => callback(failure.as_ref(), &self.instance),
                step if failure.is_none() => {
                    if let Err(e) = self.run_step(step).await {
                        tracing::error!("Registration failed: {}", e);
                        failure = Some(e);
                    }
                }
                _ => tracing::debug!("Skipping registration step after earlier failure"),
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn run_step(&mut self, step: Step) -> Result<(), WebError> {
        let provider = Arc::clone(&self.provider);

        match step {
            Step::Middleware(layer) => self.instance.layer(layer),
            Step::Register { id, options } => {
                let bean = provider.get_by_id(&id).await?;
                let resolved = ResolvedBean::resolve(self.store, bean);
                let beans = match &resolved {
                    ResolvedBean::DecoratorDriven { .. } => {
                        model_attribute_beans(provider.as_ref(), self.store).await?
                    }
                    _ => ModelAttributeBeans::new(),
                };
                self.register_resolved(&id, resolved, &beans, &options)
                    .await?;
            }
            Step::RegisterPlugin { plugin, options } => {
                let label = plugin.name().to_string();
                self.register_resolved(
                    &label,
                    ResolvedBean::Plugin(plugin),
                    &ModelAttributeBeans::new(),
                    &options,
                )
                .await?;
            }
            Step::RegisterControllers => {
                let controllers = provider
                    .get_by_component_type(CONTROLLER_COMPONENT)
                    .await?;
                let beans = model_attribute_beans(provider.as_ref(), self.store).await?;
                tracing::debug!("Registering {} controllers", controllers.len());

                for (index, controller) in controllers.into_iter().enumerate() {
                    let label = format!("{} #{}", CONTROLLER_COMPONENT, index);
                    let resolved = ResolvedBean::resolve(self.store, controller);
                    self.register_resolved(&label, resolved, &beans, &Value::Null)
                        .await?;
                }
            }
            Step::RegisterGlobalErrorHandler => {
                let advices = provider
                    .get_by_component_type(CONTROLLER_ADVICE_COMPONENT)
                    .await?;
                match build_global_error_handler(self.store, &advices) {
                    Some(handler) => self.instance.set_error_handler(Arc::new(handler)),
                    None => tracing::debug!(
                        "No {} with error handlers among {} candidates",
                        CONTROLLER_ADVICE_COMPONENT,
                        advices.len()
                    ),
                }
            }
            Step::SetErrorHandler(handler) => self.instance.set_error_handler(handler),
            Step::SetErrorHandlerBean(id) => {
                let bean = provider.get_by_id(&id).await?;
                let handler = downcast_arc::<dyn ErrorHandler>(&bean).ok_or(
                    WebError::InvalidBean {
                        id,
                        expected: "error handler",
                    },
                )?;
                self.instance.set_error_handler(handler);
            }
            Step::SetNotFoundHandler(handler) => self.instance.set_not_found_handler(handler),
            Step::SetNotFoundHandlerBean(id) => {
                let bean = provider.get_by_id(&id).await?;
                let handler = downcast_arc::<dyn NotFoundHandler>(&bean).ok_or(
                    WebError::InvalidBean {
                        id,
                        expected: "not found handler",
                    },
                )?;
                self.instance.set_not_found_handler(handler);
            }
            Step::After(_) | Step::Ready(_) => {}
        }
        Ok(())
    }

    async fn register_resolved(
        &mut self,
        label: &str,
        resolved: ResolvedBean,
        beans: &ModelAttributeBeans,
        options: &Value,
    ) -> Result<(), WebError> {
        match resolved {
            ResolvedBean::DecoratorDriven { target, bean } => {
                let plugin = build_plugin(self.store, target, bean, beans)?;
                tracing::debug!(
                    "Registering controller {} with {} routes",
                    target.name(),
                    plugin.routes().len()
                );
                plugin
                    .register(&mut self.instance, options)
                    .await
                    .map_err(WebError::from_plugin)
            }
            ResolvedBean::Plugin(plugin) => {
                tracing::debug!("Registering plugin {}", plugin.name());
                plugin
                    .register(&mut self.instance, options)
                    .await
                    .map_err(WebError::from_plugin)
            }
            ResolvedBean::NotRegistrable => Err(WebError::NotRegistrable(label.to_string())),
        }
    }

    async fn resolve_address(&self, provider_id: Option<&str>) -> Result<(String, u16), WebError> {
        let Some(id) = provider_id else {
            return Ok((self.options.host.clone(), self.options.port));
        };

        let bean = self.provider.get_by_id(id).await?;
        let environment = bean
            .downcast_ref::<Arc<Environment>>()
            .ok_or_else(|| WebError::InvalidBean {
                id: id.to_string(),
                expected: "address provider",
            })?;

        let host = environment
            .get_string(&self.options.host_key)
            .unwrap_or_else(|| self.options.host.clone());
        let port = match environment.get(&self.options.port_key) {
            Some(value) => value
                .as_i64()
                .and_then(|port| u16::try_from(port).ok())
                .ok_or_else(|| {
                    WebError::InvalidAddress(format!(
                        "'{}' is not a valid port",
                        value.to_string_value().unwrap_or_default()
                    ))
                })?,
            None => self.options.port,
        };
        Ok((host, port))
    }

    fn build_router(&mut self) -> Result<Router, WebError> {
        let instance = std::mem::take(&mut self.instance);
        if !self.options.silent {
            tracing::debug!("Registered routes:\n{}", instance.print_routes());
        }

        let mut router = instance.into_router(self.options.body_limit)?;
        if self.options.compression {
            router = router.layer(CompressionLayer::new());
        }
        if self.options.access_logging {
            router = router.layer(axum::middleware::from_fn(request_logging));
        }

        let header = HeaderName::try_from(self.options.request_id_header.as_str())
            .unwrap_or_else(|_| {
                tracing::warn!(
                    "Invalid request id header '{}', using '{}'",
                    self.options.request_id_header,
                    DEFAULT_REQUEST_ID_HEADER
                );
                HeaderName::from_static(DEFAULT_REQUEST_ID_HEADER)
            });
        Ok(router.layer(axum::middleware::from_fn_with_state(header, request_id)))
    }
}

/// 容器中的处理器 Bean 以 `Arc<dyn Trait>` 形式存放
fn downcast_arc<T: ?Sized + Send + Sync + 'static>(bean: &Bean) -> Option<Arc<T>> {
    bean.downcast_ref::<Arc<T>>().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::error_codes;
    use revane_core::ApplicationContext;
    use std::sync::Mutex;

    struct FailingPlugin;

    #[async_trait::async_trait]
    impl Plugin for FailingPlugin {
        async fn register(&self, _instance: &mut ServerInstance, _options: &Value) -> anyhow::Result<()> {
            anyhow::bail!("plugin failed")
        }
    }

    fn server() -> RevaneServer {
        let context = Arc::new(ApplicationContext::new());
        RevaneServer::new(context, RevaneOptions::default().port(0).silent(true))
    }

    #[tokio::test]
    async fn test_failing_plugin_reaches_ready_and_listen() {
        let observed = Arc::new(Mutex::new(Vec::new()));
        let after_seen = Arc::clone(&observed);
        let ready_seen = Arc::clone(&observed);

        let mut server = server();
        server
            .register_plugin(FailingPlugin)
            .after(move |error| {
                after_seen
                    .lock()
                    .unwrap()
                    .push(format!("after:{}", error.is_some()))
            })
            .ready(move |error, _instance| {
                ready_seen
                    .lock()
                    .unwrap()
                    .push(format!("ready:{}", error.map(|e| e.code()).unwrap_or("-")))
            });

        let error = server.listen(None).await.unwrap_err();
        assert_eq!(error.code(), error_codes::REV_ERR_PLUGIN);
        assert_eq!(
            *observed.lock().unwrap(),
            vec!["after:true".to_string(), format!("ready:{}", error_codes::REV_ERR_PLUGIN)]
        );
        assert!(server.port().is_none());
    }

    #[tokio::test]
    async fn test_unknown_bean() {
        let mut server = server();
        server.register("missing");
        let error = server.ready_now().await.unwrap_err();
        assert_eq!(error.code(), error_codes::REV_ERR_CONTAINER);
    }

    #[tokio::test]
    async fn test_not_registrable_bean() {
        let context = Arc::new(ApplicationContext::new());
        context.register_singleton("plain", || Ok(42u32)).unwrap();

        let mut server = RevaneServer::new(context, RevaneOptions::default().silent(true));
        server.register("plain");
        let error = server.ready_now().await.unwrap_err();
        assert_eq!(error.code(), error_codes::REV_ERR_NOT_REGISTRABLE);
    }

    #[tokio::test]
    async fn test_listen_and_close() {
        let mut server = server();
        let addr = server.listen(None).await.unwrap();
        assert_eq!(server.port(), Some(addr.port()));
        assert!(matches!(
            server.listen(None).await,
            Err(WebError::AlreadyStarted)
        ));

        server.close().await.unwrap();
        assert!(server.port().is_none());
    }

    #[tokio::test]
    async fn test_address_provider() {
        let context = ApplicationContext::builder()
            .add_property_source(Box::new(
                revane_core::MapPropertySource::new("test")
                    .with_property("app.port", revane_core::ConfigValue::Int(70000)),
            ))
            .build()
            .unwrap();

        let mut server = RevaneServer::new(
            context,
            RevaneOptions::default().port_key("app.port").silent(true),
        );
        let error = server
            .listen(Some(revane_core::ENVIRONMENT_BEAN_NAME))
            .await
            .unwrap_err();
        assert_eq!(error.code(), error_codes::REV_ERR_INVALID_ADDRESS);
    }
}
