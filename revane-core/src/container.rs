use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::constants;
use crate::{
    bean::{BeanDefinition, BeanFactory, ClosureFactory},
    config::{Environment, EnvironmentPropertySource, PropertySource, TomlPropertySource},
    error::{ContainerError, ContainerResult},
    logging::LoggingConfig,
    Scope,
};

/// 容器 trait - 定义依赖注入容器的核心接口
///
/// 此 trait 不包含泛型方法，可以作为 trait object 使用
pub trait Container: Send + Sync {
    /// 注册 Bean 定义
    fn register(&self, definition: BeanDefinition) -> ContainerResult<()>;

    /// 通过名称获取 Bean
    fn get_bean(&self, name: &str) -> ContainerResult<Arc<dyn Any + Send + Sync>>;

    /// 检查是否包含指定名称的 Bean
    fn contains_bean(&self, name: &str) -> bool;

    /// 按注册顺序获取所有 Bean 的名称
    fn get_bean_names(&self) -> Vec<String>;

    /// 不创建实例，返回 Bean 的类型 ID
    fn get_bean_type(&self, name: &str) -> Option<TypeId>;

    /// 按注册顺序获取指定组件类型的所有 Bean
    fn get_beans_by_component_type(
        &self,
        component_type: &str,
    ) -> ContainerResult<Vec<Arc<dyn Any + Send + Sync>>>;
}

/// 应用上下文 - Container 的默认实现
pub struct ApplicationContext {
    /// Bean 定义存储
    definitions: RwLock<HashMap<String, BeanDefinition>>,

    /// 注册顺序
    registration_order: RwLock<Vec<String>>,

    /// 单例 Bean 缓存
    singletons: RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>,

    /// 类型到名称的映射
    type_to_name: RwLock<HashMap<TypeId, String>>,

    /// 循环依赖检测 - 跟踪正在创建的 Bean
    creating: Mutex<HashSet<String>>,

    /// 配置环境
    environment: Arc<Environment>,
}

impl ApplicationContext {
    /// 创建新的应用上下文
    pub fn new() -> Self {
        Self::with_environment(Arc::new(Environment::new()))
    }

    /// 使用给定的 Environment 创建上下文
    pub fn with_environment(environment: Arc<Environment>) -> Self {
        Self {
            definitions: RwLock::new(HashMap::new()),
            registration_order: RwLock::new(Vec::new()),
            singletons: RwLock::new(HashMap::new()),
            type_to_name: RwLock::new(HashMap::new()),
            creating: Mutex::new(HashSet::new()),
            environment,
        }
    }

    /// 构建器模式创建上下文
    pub fn builder() -> ApplicationContextBuilder {
        ApplicationContextBuilder::new()
    }

    /// 获取 Environment
    pub fn environment(&self) -> &Arc<Environment> {
        &self.environment
    }

    /// 注册单例 Bean
    pub fn register_singleton<T, F>(&self, name: impl Into<String>, factory: F) -> ContainerResult<()>
    where
        T: Any + Send + Sync,
        F: Fn() -> ContainerResult<T> + Send + Sync + 'static,
    {
        let definition =
            BeanDefinition::new(name, ClosureFactory::new(factory)).with_scope(Scope::Singleton);
        self.register(definition)
    }

    /// 注册原型 Bean
    pub fn register_prototype<T, F>(&self, name: impl Into<String>, factory: F) -> ContainerResult<()>
    where
        T: Any + Send + Sync,
        F: Fn() -> ContainerResult<T> + Send + Sync + 'static,
    {
        let definition =
            BeanDefinition::new(name, ClosureFactory::new(factory)).with_scope(Scope::Prototype);
        self.register(definition)
    }

    /// 注册带组件类型的单例 Bean
    ///
    /// 组件类型用于按类型批量查找，例如所有 "controller"
    pub fn register_component<T, F>(
        &self,
        name: impl Into<String>,
        component_type: impl Into<String>,
        factory: F,
    ) -> ContainerResult<()>
    where
        T: Any + Send + Sync,
        F: Fn() -> ContainerResult<T> + Send + Sync + 'static,
    {
        let definition = BeanDefinition::new(name, ClosureFactory::new(factory))
            .with_scope(Scope::Singleton)
            .with_component_type(component_type);
        self.register(definition)
    }

    /// 通过类型获取 Bean
    pub fn get_bean_by_type<T: Any + Send + Sync>(&self) -> ContainerResult<Arc<T>> {
        let type_name = std::any::type_name::<T>();
        let name = self
            .type_to_name
            .read()
            .get(&TypeId::of::<T>())
            .cloned()
            .ok_or_else(|| {
                ContainerError::BeanNotFound(format!("No bean found for type '{}'", type_name))
            })?;

        self.get_bean(&name)?
            .downcast::<T>()
            .map_err(|_| ContainerError::TypeMismatch {
                expected: type_name.to_string(),
                found: "unknown".to_string(),
            })
    }

    /// 创建 Bean 实例
    fn create_bean(
        &self,
        name: &str,
        factory: &Arc<dyn BeanFactory>,
    ) -> ContainerResult<Arc<dyn Any + Send + Sync>> {
        if !self.creating.lock().insert(name.to_string()) {
            let chain: Vec<String> = self.creating.lock().iter().cloned().collect();
            tracing::error!(
                "Circular dependency detected while creating '{}'. Creation chain: {:?}",
                name,
                chain
            );
            return Err(ContainerError::CircularDependency(format!(
                "{} -> {}",
                chain.join(" -> "),
                name
            )));
        }

        // 使用 RAII 模式确保在任何情况下都会清理标记
        struct CreationGuard<'a> {
            creating: &'a Mutex<HashSet<String>>,
            name: &'a str,
        }

        impl Drop for CreationGuard<'_> {
            fn drop(&mut self) {
                self.creating.lock().remove(self.name);
            }
        }

        let _guard = CreationGuard {
            creating: &self.creating,
            name,
        };

        let instance = factory.create().map_err(|e| match e {
            ContainerError::CircularDependency(_) => e,
            _ => ContainerError::BeanCreationFailed(format!("{}: {}", name, e)),
        })?;

        Ok(Arc::from(instance))
    }
}

impl Default for ApplicationContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Container for ApplicationContext {
    fn register(&self, definition: BeanDefinition) -> ContainerResult<()> {
        let name = definition.name.clone();
        let type_id = definition.factory.bean_type_id();

        tracing::trace!(
            "Attempting to register bean: name='{}', type='{}', scope={:?}",
            name,
            definition.factory.bean_type_name(),
            definition.scope
        );

        {
            let mut definitions = self.definitions.write();
            if definitions.contains_key(&name) {
                tracing::warn!("Bean '{}' already exists, registration failed", name);
                return Err(ContainerError::BeanAlreadyExists(name));
            }
            definitions.insert(name.clone(), definition);
        }

        self.registration_order.write().push(name.clone());
        self.type_to_name.write().insert(type_id, name.clone());

        tracing::debug!("Bean definition registered successfully: '{}'", name);
        Ok(())
    }

    fn get_bean(&self, name: &str) -> ContainerResult<Arc<dyn Any + Send + Sync>> {
        tracing::trace!("Requesting bean: '{}'", name);

        // 复制工厂引用后立即释放读锁，工厂内部可能再次访问容器
        let (scope, factory) = {
            let definitions = self.definitions.read();
            let definition = definitions.get(name).ok_or_else(|| {
                tracing::debug!("Bean '{}' not found in container", name);
                ContainerError::BeanNotFound(name.to_string())
            })?;
            (definition.scope, Arc::clone(&definition.factory))
        };

        match scope {
            Scope::Singleton => {
                if let Some(bean) = self.singletons.read().get(name) {
                    tracing::trace!("Returning cached instance of singleton bean '{}'", name);
                    return Ok(Arc::clone(bean));
                }

                tracing::debug!("Creating shared instance of singleton bean '{}'", name);
                let bean = self.create_bean(name, &factory)?;

                let mut singletons = self.singletons.write();
                let bean = singletons
                    .entry(name.to_string())
                    .or_insert(bean)
                    .clone();
                Ok(bean)
            }
            Scope::Prototype => {
                tracing::debug!("Creating new instance of prototype bean '{}'", name);
                self.create_bean(name, &factory)
            }
        }
    }

    fn contains_bean(&self, name: &str) -> bool {
        self.definitions.read().contains_key(name)
    }

    fn get_bean_names(&self) -> Vec<String> {
        self.registration_order.read().clone()
    }

    fn get_bean_type(&self, name: &str) -> Option<TypeId> {
        self.definitions
            .read()
            .get(name)
            .map(|definition| definition.factory.bean_type_id())
    }

    fn get_beans_by_component_type(
        &self,
        component_type: &str,
    ) -> ContainerResult<Vec<Arc<dyn Any + Send + Sync>>> {
        let names: Vec<String> = {
            let definitions = self.definitions.read();
            self.registration_order
                .read()
                .iter()
                .filter(|name| {
                    definitions
                        .get(*name)
                        .and_then(|d| d.component_type.as_deref())
                        == Some(component_type)
                })
                .cloned()
                .collect()
        };

        names.iter().map(|name| self.get_bean(name)).collect()
    }
}

/// 应用上下文构建器
///
/// 配置源优先级：环境变量（100）> 代码内配置（50）> 配置文件（0）。
pub struct ApplicationContextBuilder {
    environment: Environment,
    logging: Option<LoggingConfig>,
    logging_from_environment: bool,
}

impl ApplicationContextBuilder {
    pub fn new() -> Self {
        Self {
            environment: Environment::new(),
            logging: None,
            logging_from_environment: false,
        }
    }

    /// 添加配置源到 Environment
    pub fn add_property_source(self, source: Box<dyn PropertySource>) -> Self {
        self.environment.add_property_source(source);
        self
    }

    /// 加载 TOML 配置文件，文件不存在时跳过
    pub fn config_file(self, path: impl AsRef<Path>) -> ContainerResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!("Configuration file not found: {}", path.display());
            return Ok(self);
        }

        let source = TomlPropertySource::from_file(path)?;
        tracing::info!("Loaded configuration from {}", path.display());
        Ok(self.add_property_source(Box::new(source)))
    }

    /// 读取 `REVANE_` 前缀的环境变量，例如 `REVANE_SERVER_PORT`
    pub fn env_variables(self) -> Self {
        self.add_property_source(Box::new(EnvironmentPropertySource::new(constants::ENV_PREFIX)))
    }

    /// 构建时用给定配置初始化日志
    pub fn logging(mut self, config: LoggingConfig) -> Self {
        self.logging = Some(config);
        self
    }

    /// 构建时按 `logging.*` 配置初始化日志
    pub fn logging_from_environment(mut self) -> Self {
        self.logging_from_environment = true;
        self
    }

    /// 构建上下文，并把 Environment 注册为 "environment" Bean
    pub fn build(self) -> ContainerResult<Arc<ApplicationContext>> {
        let logging = match self.logging {
            Some(config) => Some(config),
            None if self.logging_from_environment => {
                Some(LoggingConfig::from_environment(&self.environment))
            }
            None => None,
        };
        if let Some(config) = logging {
            config.init()?;
        }

        let environment = Arc::new(self.environment);
        let context = Arc::new(ApplicationContext::with_environment(Arc::clone(&environment)));

        context.register_singleton(constants::ENVIRONMENT_BEAN_NAME, move || {
            Ok(Arc::clone(&environment))
        })?;

        tracing::debug!("Environment registered as bean '{}'", constants::ENVIRONMENT_BEAN_NAME);
        Ok(context)
    }
}

impl Default for ApplicationContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigValue, MapPropertySource};

    #[derive(Debug)]
    struct UserService {
        name: String,
    }

    #[test]
    fn test_singleton_is_cached() {
        let context = ApplicationContext::new();
        context
            .register_singleton("userService", || {
                Ok(UserService {
                    name: "users".to_string(),
                })
            })
            .unwrap();

        let first = context.get_bean("userService").unwrap();
        let second = context.get_bean("userService").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.downcast_ref::<UserService>().unwrap().name, "users");
    }

    #[test]
    fn test_prototype_creates_new_instances() {
        let context = ApplicationContext::new();
        context
            .register_prototype("userService", || {
                Ok(UserService {
                    name: "users".to_string(),
                })
            })
            .unwrap();

        let first = context.get_bean("userService").unwrap();
        let second = context.get_bean("userService").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let context = ApplicationContext::new();
        context.register_singleton("a", || Ok(1u32)).unwrap();
        let result = context.register_singleton("a", || Ok(2u32));
        assert!(matches!(result, Err(ContainerError::BeanAlreadyExists(name)) if name == "a"));
    }

    #[test]
    fn test_get_bean_by_type() {
        let context = ApplicationContext::new();
        context
            .register_singleton("userService", || {
                Ok(UserService {
                    name: "typed".to_string(),
                })
            })
            .unwrap();

        let service = context.get_bean_by_type::<UserService>().unwrap();
        assert_eq!(service.name, "typed");
        assert!(context.get_bean_by_type::<String>().is_err());
    }

    #[test]
    fn test_component_type_lookup_keeps_registration_order() {
        let context = ApplicationContext::new();
        context.register_component("b", "controller", || Ok("b")).unwrap();
        context.register_singleton("other", || Ok("other")).unwrap();
        context.register_component("a", "controller", || Ok("a")).unwrap();
        context.register_component("advice", "controllerAdvice", || Ok("advice")).unwrap();

        let controllers = context.get_beans_by_component_type("controller").unwrap();
        let names: Vec<&str> = controllers
            .iter()
            .map(|bean| *bean.downcast_ref::<&str>().unwrap())
            .collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn test_bean_type_without_instantiation() {
        let context = ApplicationContext::new();
        context
            .register_prototype("userService", || -> ContainerResult<UserService> {
                Err(ContainerError::BeanCreationFailed("not expected".to_string()))
            })
            .unwrap();

        assert_eq!(
            context.get_bean_type("userService"),
            Some(TypeId::of::<UserService>())
        );
        assert_eq!(context.get_bean_type("missing"), None);
    }

    #[test]
    fn test_missing_bean() {
        let context = ApplicationContext::new();
        assert!(!context.contains_bean("missing"));
        assert!(matches!(
            context.get_bean("missing"),
            Err(ContainerError::BeanNotFound(_))
        ));
    }

    #[test]
    fn test_builder_loads_config_file_and_env_variables() {
        let dir = std::env::temp_dir().join(format!("revane-core-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("revane.toml");
        std::fs::write(&path, "[server]\nport = 4000\nhost = \"0.0.0.0\"\n").unwrap();
        std::env::set_var("REVANE_SERVER_HOST", "10.0.0.2");

        let context = ApplicationContext::builder()
            .config_file(&path)
            .unwrap()
            .config_file(dir.join("missing.toml"))
            .unwrap()
            .env_variables()
            .build()
            .unwrap();

        let environment = context.environment();
        assert_eq!(environment.get_i64("server.port"), Some(4000));
        assert_eq!(environment.get_string("server.host"), Some("10.0.0.2".to_string()));

        std::env::remove_var("REVANE_SERVER_HOST");
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_builder_rejects_broken_config_file() {
        let dir = std::env::temp_dir().join(format!("revane-core-broken-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("revane.toml");
        std::fs::write(&path, "server = [").unwrap();

        let result = ApplicationContext::builder().config_file(&path);
        assert!(matches!(result, Err(ContainerError::Other(_))));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_builder_initializes_logging_once() {
        let build = || {
            ApplicationContext::builder()
                .add_property_source(Box::new(
                    MapPropertySource::new("test")
                        .with_property("logging.level", ConfigValue::String("debug".into())),
                ))
                .logging_from_environment()
                .build()
        };

        assert!(build().is_ok());
        assert!(matches!(build(), Err(ContainerError::LoggingInitFailed(_))));
    }

    #[test]
    fn test_builder_registers_environment() {
        let context = ApplicationContext::builder()
            .add_property_source(Box::new(
                MapPropertySource::new("test").with_property("server.port", ConfigValue::Int(9090)),
            ))
            .build()
            .unwrap();

        let bean = context.get_bean(constants::ENVIRONMENT_BEAN_NAME).unwrap();
        let environment = bean.downcast_ref::<Arc<Environment>>().unwrap();
        assert_eq!(environment.get_i64("server.port"), Some(9090));
    }
}
