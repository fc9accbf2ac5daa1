//! Model attribute 转换器
//!
//! 任意 Bean 上的 `#[model_attribute("name")]` 方法都是一个具名转换器，
//! 路由参数 `#[model_attribute] user: User` 在请求时调用它得到参数值。
//! 同名转换器在建表时就被标记为重复，使用该名称的路由注册失败。

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};

use crate::bean_provider::{Bean, BeanProvider};
use crate::error::{HandlerError, WebError};
use crate::metadata::{MetadataKey, MetadataStore, ModelAttributeMethodsKey, Routes, Target};
use crate::parameter::{resolve_plain, Arguments, Parameter, ParameterType};
use crate::request::RequestContext;

/// 宏生成的转换方法调用闭包
pub type ConverterFunction = Arc<
    dyn Fn(Bean, Arguments) -> BoxFuture<'static, Result<Box<dyn Any + Send>, HandlerError>>
        + Send
        + Sync,
>;

/// 把异步闭包包装成 `ConverterFunction`
pub fn converter_fn<F, Fut, T>(f: F) -> ConverterFunction
where
    F: Fn(Bean, Arguments) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, HandlerError>> + Send + 'static,
    T: Any + Send,
{
    Arc::new(move |bean, args| {
        f(bean, args)
            .map(|result| result.map(|value| Box::new(value) as Box<dyn Any + Send>))
            .boxed()
    })
}

/// 名称只能注册一次，重复注册后该名称不可用
#[derive(Clone)]
pub enum Registration<T> {
    Unique(T),
    Duplicate,
}

impl<T> Registration<T> {
    fn insert(slot: &mut HashMap<String, Registration<T>>, name: &str, value: T) {
        match slot.get_mut(name) {
            Some(existing) => *existing = Registration::Duplicate,
            None => {
                slot.insert(name.to_string(), Registration::Unique(value));
            }
        }
    }
}

/// 类上的一个转换方法
#[derive(Clone)]
pub struct ModelAttributeMethod {
    pub method_key: String,
    pub function: ConverterFunction,
}

impl fmt::Debug for ModelAttributeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelAttributeMethod")
            .field("method_key", &self.method_key)
            .finish()
    }
}

/// 类上的转换方法：名称 → 方法
#[derive(Clone, Default)]
pub struct ModelAttributeMethods {
    methods: HashMap<String, Registration<ModelAttributeMethod>>,
    order: Vec<String>,
}

impl ModelAttributeMethods {
    /// 同一个类里重复的名称也记为重复
    pub fn insert(&mut self, name: &str, method: ModelAttributeMethod) {
        if !self.methods.contains_key(name) {
            self.order.push(name.to_string());
        }
        Registration::insert(&mut self.methods, name, method);
    }

    pub fn get(&self, name: &str) -> Option<&Registration<ModelAttributeMethod>> {
        self.methods.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Registration<ModelAttributeMethod>)> {
        self.order
            .iter()
            .filter_map(|name| self.methods.get(name).map(|method| (name.as_str(), method)))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl fmt::Debug for ModelAttributeMethods {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.order.iter()).finish()
    }
}

/// Bean 实例和它的一个转换方法
#[derive(Clone)]
pub struct BeanAndMethod {
    pub bean: Bean,
    pub target: Target,
    pub method_key: String,
    pub function: ConverterFunction,
}

impl BeanAndMethod {
    /// 生成转换器，转换方法的参数取自它自己的路由记录
    pub fn to_converter(
        &self,
        name: &str,
        store: &MetadataStore,
    ) -> Result<ModelAttributeConverter, WebError> {
        let parameters = store
            .get_metadata::<Routes>(self.target)
            .and_then(|routes| routes.get(&self.method_key).map(|r| r.parameters.clone()))
            .unwrap_or_default();

        if let Some(nested) = parameters
            .iter()
            .find(|p| p.kind == ParameterType::ModelAttribute)
        {
            return Err(WebError::NestedModelAttribute {
                converter: name.to_string(),
                parameter: nested.name.clone(),
            });
        }

        Ok(ModelAttributeConverter {
            name: name.to_string(),
            bean: Arc::clone(&self.bean),
            parameters: Arc::new(parameters),
            function: Arc::clone(&self.function),
        })
    }
}

impl fmt::Debug for BeanAndMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeanAndMethod")
            .field("target", &self.target)
            .field("method_key", &self.method_key)
            .finish()
    }
}

/// 所有 Bean 上的转换器：名称 → Bean 和方法
#[derive(Clone, Default)]
pub struct ModelAttributeBeans {
    converters: HashMap<String, Registration<BeanAndMethod>>,
}

impl ModelAttributeBeans {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, bean_and_method: BeanAndMethod) {
        Registration::insert(&mut self.converters, name, bean_and_method);
    }

    pub fn get(&self, name: &str) -> Result<&BeanAndMethod, WebError> {
        match self.converters.get(name) {
            Some(Registration::Unique(bean_and_method)) => Ok(bean_and_method),
            Some(Registration::Duplicate) => {
                Err(WebError::DuplicateModelAttributeConverter(name.to_string()))
            }
            None => Err(WebError::MissingModelAttributeConverter(name.to_string())),
        }
    }

    pub fn len(&self) -> usize {
        self.converters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.converters.is_empty()
    }
}

impl fmt::Debug for ModelAttributeBeans {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.converters.keys().collect();
        names.sort();
        f.debug_struct("ModelAttributeBeans")
            .field("names", &names)
            .finish()
    }
}

/// 从容器中收集所有转换器
pub async fn model_attribute_beans(
    provider: &dyn BeanProvider,
    store: &MetadataStore,
) -> Result<ModelAttributeBeans, WebError> {
    let mut beans = ModelAttributeBeans::new();
    for bean in provider
        .get_by_metadata(store, ModelAttributeMethodsKey::NAME)
        .await?
    {
        let Some(target) = store.target_of(bean.as_ref()) else {
            continue;
        };
        let methods = store
            .get_metadata::<ModelAttributeMethodsKey>(target)
            .unwrap_or_default();

        for (name, registration) in methods.iter() {
            match registration {
                Registration::Unique(method) => beans.insert(
                    name,
                    BeanAndMethod {
                        bean: Arc::clone(&bean),
                        target,
                        method_key: method.method_key.clone(),
                        function: Arc::clone(&method.function),
                    },
                ),
                Registration::Duplicate => {
                    beans
                        .converters
                        .insert(name.to_string(), Registration::Duplicate);
                }
            }
        }
    }
    tracing::debug!("Collected {} model attribute converters", beans.len());
    Ok(beans)
}

/// 为路由的 model attribute 参数匹配转换器
pub fn model_attribute_converters_for_parameters(
    parameters: &[Parameter],
    beans: &ModelAttributeBeans,
    store: &MetadataStore,
) -> Result<HashMap<String, ModelAttributeConverter>, WebError> {
    let mut converters = HashMap::new();
    for parameter in parameters
        .iter()
        .filter(|p| p.kind == ParameterType::ModelAttribute)
    {
        if converters.contains_key(&parameter.name) {
            continue;
        }
        let converter = beans.get(&parameter.name)?.to_converter(&parameter.name, store)?;
        converters.insert(parameter.name.clone(), converter);
    }
    Ok(converters)
}

/// 可在请求时调用的转换器
#[derive(Clone)]
pub struct ModelAttributeConverter {
    name: String,
    bean: Bean,
    parameters: Arc<Vec<Parameter>>,
    function: ConverterFunction,
}

impl ModelAttributeConverter {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// 解析转换方法自己的参数并调用
    pub async fn convert(&self, ctx: &RequestContext) -> Result<Box<dyn Any + Send>, HandlerError> {
        let mut args = Arguments::new();
        for parameter in self.parameters.iter() {
            args.push(parameter.name.clone(), resolve_plain(parameter, ctx));
        }
        (self.function)(Arc::clone(&self.bean), args).await
    }
}

impl fmt::Debug for ModelAttributeConverter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelAttributeConverter")
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .finish()
    }
}
