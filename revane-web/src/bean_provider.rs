//! Bean 查找
//!
//! 适配器只依赖 `BeanProvider` 的四个查询，容器实现见 `revane-core`。

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use revane_core::{ApplicationContext, Container};

use crate::error::{HandlerError, WebError};
use crate::metadata::MetadataStore;

/// 类型擦除的 Bean 实例
pub type Bean = Arc<dyn Any + Send + Sync>;

/// 适配器使用的 Bean 查询接口
#[async_trait]
pub trait BeanProvider: Send + Sync {
    async fn get_by_id(&self, id: &str) -> Result<Bean, WebError>;

    async fn has_by_id(&self, id: &str) -> bool;

    /// 按组件类型查找，保持注册顺序
    async fn get_by_component_type(&self, component_type: &str) -> Result<Vec<Bean>, WebError>;

    /// 查找类型上带有指定元数据键的 Bean
    async fn get_by_metadata(
        &self,
        store: &MetadataStore,
        key: &'static str,
    ) -> Result<Vec<Bean>, WebError>;
}

#[async_trait]
impl BeanProvider for ApplicationContext {
    async fn get_by_id(&self, id: &str) -> Result<Bean, WebError> {
        Ok(self.get_bean(id)?)
    }

    async fn has_by_id(&self, id: &str) -> bool {
        self.contains_bean(id)
    }

    async fn get_by_component_type(&self, component_type: &str) -> Result<Vec<Bean>, WebError> {
        Ok(self.get_beans_by_component_type(component_type)?)
    }

    async fn get_by_metadata(
        &self,
        store: &MetadataStore,
        key: &'static str,
    ) -> Result<Vec<Bean>, WebError> {
        // 先按定义中的类型过滤，只实例化命中的 Bean
        let names: Vec<String> = self
            .get_bean_names()
            .into_iter()
            .filter(|name| {
                self.get_bean_type(name)
                    .is_some_and(|type_id| store.has_metadata_named(type_id, key))
            })
            .collect();

        let mut beans = Vec::with_capacity(names.len());
        for name in names {
            tracing::trace!("Bean '{}' carries metadata '{}'", name, key);
            beans.push(self.get_bean(&name)?);
        }
        Ok(beans)
    }
}

/// 宏生成代码使用：把 Bean 还原为控制器类型
pub fn downcast_bean<T: Any + Send + Sync>(bean: Bean) -> Result<Arc<T>, HandlerError> {
    bean.downcast::<T>().map_err(|_| {
        HandlerError::new(format!(
            "Bean is not an instance of {}",
            std::any::type_name::<T>()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{DecoratorDriven, MetadataKey, Target};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Marked;
    struct Plain;

    #[tokio::test]
    async fn test_get_by_metadata() {
        let context = ApplicationContext::new();
        context.register_singleton("plain", || Ok(Plain)).unwrap();
        context.register_singleton("marked", || Ok(Marked)).unwrap();

        let store = MetadataStore::new();
        store.set_metadata::<DecoratorDriven>(Target::of::<Marked>(), true);

        let beans = context
            .get_by_metadata(&store, DecoratorDriven::NAME)
            .await
            .unwrap();
        assert_eq!(beans.len(), 1);
        assert!(beans[0].downcast_ref::<Marked>().is_some());
        assert!(context.has_by_id("plain").await);
        assert!(!context.has_by_id("nope").await);
    }

    #[tokio::test]
    async fn test_get_by_metadata_skips_unmarked_beans() {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&created);

        let context = ApplicationContext::new();
        context
            .register_prototype("plain", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Plain)
            })
            .unwrap();
        context.register_prototype("marked", || Ok(Marked)).unwrap();

        let store = MetadataStore::new();
        store.set_metadata::<DecoratorDriven>(Target::of::<Marked>(), true);

        let beans = context
            .get_by_metadata(&store, DecoratorDriven::NAME)
            .await
            .unwrap();
        assert_eq!(beans.len(), 1);
        assert_eq!(created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_bean_is_container_error() {
        let context = ApplicationContext::new();
        let error = context.get_by_id("nope").await.unwrap_err();
        assert_eq!(error.code(), crate::error::error_codes::REV_ERR_CONTAINER);
    }

    #[test]
    fn test_downcast_bean() {
        let bean: Bean = Arc::new(Plain);
        assert!(downcast_bean::<Plain>(bean.clone()).is_ok());
        assert!(downcast_bean::<Marked>(bean).is_err());
    }
}
