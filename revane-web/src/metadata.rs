//! 元数据存储
//!
//! 每个控制器类型一张显式的侧表：`Target`（类型标识）→ 键 → 值。
//! 宏在编译期为每个 `#[controller]` 生成一个 `MetadataRegistration`，
//! 全局存储在第一次访问时执行所有注册函数，相当于"类定义时"写入元数据。

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::error_handler::{ErrorHandlerDefinition, ErrorHandlerTable};
use crate::model_attribute::ModelAttributeMethods;
use crate::route::RouteTable;

/// 元数据目标 - 一个控制器类型
#[derive(Clone, Copy)]
pub struct Target {
    id: TypeId,
    name: &'static str,
}

impl Target {
    pub fn of<T: Any>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for Target {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Target {}

impl std::hash::Hash for Target {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// 类型化的元数据键
pub trait MetadataKey: 'static {
    type Value: Clone + Send + Sync + 'static;

    /// 键名，用于按名称查询 Bean
    const NAME: &'static str;
}

/// 路由表
pub struct Routes;

impl MetadataKey for Routes {
    type Value = RouteTable;
    const NAME: &'static str = "revane.Routes";
}

/// 带错误代码的错误处理器
pub struct ErrorHandlers;

impl MetadataKey for ErrorHandlers {
    type Value = ErrorHandlerTable;
    const NAME: &'static str = "revane.ErrorHandlers";
}

/// 兜底错误处理器
pub struct FallbackErrorHandler;

impl MetadataKey for FallbackErrorHandler {
    type Value = ErrorHandlerDefinition;
    const NAME: &'static str = "revane.FallbackErrorHandler";
}

/// 声明式控制器标记
pub struct DecoratorDriven;

impl MetadataKey for DecoratorDriven {
    type Value = bool;
    const NAME: &'static str = "revane.DecoratorDrivenController";
}

/// model attribute 名称 → 方法
pub struct ModelAttributeMethodsKey;

impl MetadataKey for ModelAttributeMethodsKey {
    type Value = ModelAttributeMethods;
    const NAME: &'static str = "revane.modelAttributeMethod";
}

struct TargetEntry {
    target: Target,
    values: HashMap<&'static str, Box<dyn Any + Send + Sync>>,
}

/// 元数据存储
#[derive(Default)]
pub struct MetadataStore {
    entries: RwLock<HashMap<TypeId, TargetEntry>>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 进程级存储，首次访问时执行所有 `MetadataRegistration`
    pub fn global() -> &'static MetadataStore {
        static GLOBAL: Lazy<MetadataStore> = Lazy::new(|| {
            let store = MetadataStore::new();
            let mut count = 0;
            for registration in inventory::iter::<MetadataRegistration> {
                (registration.decorate)(&store);
                count += 1;
            }
            tracing::debug!("Metadata store initialized from {} registrations", count);
            store
        });
        &GLOBAL
    }

    /// 写入元数据，后写覆盖先写
    pub fn set_metadata<K: MetadataKey>(&self, target: Target, value: K::Value) {
        let mut entries = self.entries.write();
        entries
            .entry(target.id)
            .or_insert_with(|| TargetEntry {
                target,
                values: HashMap::new(),
            })
            .values
            .insert(K::NAME, Box::new(value));
    }

    pub fn get_metadata<K: MetadataKey>(&self, target: Target) -> Option<K::Value> {
        let entries = self.entries.read();
        entries
            .get(&target.id)?
            .values
            .get(K::NAME)?
            .downcast_ref::<K::Value>()
            .cloned()
    }

    /// 原地修改元数据，不存在时从默认值开始
    pub fn update_metadata<K, F>(&self, target: Target, f: F)
    where
        K: MetadataKey,
        K::Value: Default,
        F: FnOnce(&mut K::Value),
    {
        let mut entries = self.entries.write();
        let entry = entries.entry(target.id).or_insert_with(|| TargetEntry {
            target,
            values: HashMap::new(),
        });
        let value = entry
            .values
            .entry(K::NAME)
            .or_insert_with(|| Box::new(K::Value::default()));

        match value.downcast_mut::<K::Value>() {
            Some(value) => f(value),
            None => {
                let mut fresh = K::Value::default();
                f(&mut fresh);
                *value = Box::new(fresh);
            }
        }
    }

    pub fn has_metadata<K: MetadataKey>(&self, target: Target) -> bool {
        self.has_metadata_named(target.id, K::NAME)
    }

    /// 按键名检查，用于类型擦除的场景
    pub fn has_metadata_named(&self, type_id: TypeId, key: &str) -> bool {
        self.entries
            .read()
            .get(&type_id)
            .is_some_and(|entry| entry.values.contains_key(key))
    }

    /// 查找 Bean 实例对应的目标
    pub fn target_of(&self, bean: &(dyn Any + Send + Sync)) -> Option<Target> {
        let type_id = bean.type_id();
        self.entries.read().get(&type_id).map(|entry| entry.target)
    }

    /// 是否为声明式控制器
    pub fn is_decorator_driven(&self, target: Target) -> bool {
        self.get_metadata::<DecoratorDriven>(target).unwrap_or(false)
    }
}

impl fmt::Debug for MetadataStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let targets: Vec<Target> = self.entries.read().values().map(|e| e.target).collect();
        f.debug_struct("MetadataStore").field("targets", &targets).finish()
    }
}

/// 编译期提交的元数据注册函数
pub struct MetadataRegistration {
    pub decorate: fn(&MetadataStore),
}

impl MetadataRegistration {
    pub const fn new(decorate: fn(&MetadataStore)) -> Self {
        Self { decorate }
    }
}

inventory::collect!(MetadataRegistration);
