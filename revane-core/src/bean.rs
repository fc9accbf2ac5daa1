use std::any::{Any, TypeId};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::{ContainerResult, Scope};

/// 创建控制器、advice 或插件实例
///
/// 类型在注册时就已确定，容器据此在不创建实例的情况下按类型筛选 Bean。
pub trait BeanFactory: Send + Sync {
    fn create(&self) -> ContainerResult<Box<dyn Any + Send + Sync>>;

    fn bean_type_id(&self) -> TypeId;

    fn bean_type_name(&self) -> &str;
}

/// 一个已注册的 Bean
pub struct BeanDefinition {
    pub name: String,
    pub scope: Scope,
    pub factory: Arc<dyn BeanFactory>,
    /// `controller` 或 `controllerAdvice`，普通 Bean 为 `None`
    pub component_type: Option<String>,
}

impl BeanDefinition {
    pub fn new<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: BeanFactory + 'static,
    {
        Self {
            name: name.into(),
            scope: Scope::default(),
            factory: Arc::new(factory),
            component_type: None,
        }
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_component_type(mut self, component_type: impl Into<String>) -> Self {
        self.component_type = Some(component_type.into());
        self
    }
}

impl fmt::Debug for BeanDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeanDefinition")
            .field("name", &self.name)
            .field("scope", &self.scope)
            .field("component_type", &self.component_type)
            .field("type_name", &self.factory.bean_type_name())
            .finish()
    }
}

/// `register_singleton` 等方法使用的闭包工厂
pub(crate) struct ClosureFactory<T, F> {
    create: F,
    _type: PhantomData<fn() -> T>,
}

impl<T, F> ClosureFactory<T, F>
where
    T: Any + Send + Sync,
    F: Fn() -> ContainerResult<T> + Send + Sync,
{
    pub(crate) fn new(create: F) -> Self {
        Self {
            create,
            _type: PhantomData,
        }
    }
}

impl<T, F> BeanFactory for ClosureFactory<T, F>
where
    T: Any + Send + Sync,
    F: Fn() -> ContainerResult<T> + Send + Sync,
{
    fn create(&self) -> ContainerResult<Box<dyn Any + Send + Sync>> {
        Ok(Box::new((self.create)()?))
    }

    fn bean_type_id(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn bean_type_name(&self) -> &str {
        std::any::type_name::<T>()
    }
}
