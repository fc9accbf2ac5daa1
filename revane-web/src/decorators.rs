//! 声明写入函数
//!
//! `#[controller]` 宏展开后调用这里的函数写入元数据，
//! 调用顺序与属性书写顺序相反：参数从后往前，方法属性从下往上。

use crate::error_handler::{ErrorHandlerDefinition, ErrorHandlerFunction};
use crate::metadata::{
    DecoratorDriven, ErrorHandlers, FallbackErrorHandler, MetadataStore, ModelAttributeMethodsKey,
    Routes, Target,
};
use crate::model_attribute::{ConverterFunction, ModelAttributeMethod};
use crate::parameter::{Parameter, ParameterType};
use crate::route::{HandlerFunction, Methods, RouteOptions};

/// 请求映射，同时把类型标记为声明式控制器
pub fn request_mapping(
    store: &MetadataStore,
    target: Target,
    method_key: &str,
    methods: Methods,
    url: &str,
    options: RouteOptions,
    handler: HandlerFunction,
) {
    store.update_metadata::<Routes, _>(target, |routes| {
        routes
            .entry(method_key)
            .merge_mapping(methods, url, options, handler);
    });
    store.set_metadata::<DecoratorDriven>(target, true);
}

/// 子对象中的单个值
pub fn sub_value_parameter(
    store: &MetadataStore,
    target: Target,
    method_key: &str,
    kind: ParameterType,
    name: &str,
) {
    prepend(store, target, method_key, Parameter::sub_value(kind, name));
}

/// 整个子对象
pub fn whole_value_parameter(
    store: &MetadataStore,
    target: Target,
    method_key: &str,
    kind: ParameterType,
) {
    prepend(store, target, method_key, Parameter::whole_value(kind));
}

pub fn model_attribute_parameter(
    store: &MetadataStore,
    target: Target,
    method_key: &str,
    name: &str,
) {
    prepend(
        store,
        target,
        method_key,
        Parameter::sub_value(ParameterType::ModelAttribute, name),
    );
}

fn prepend(store: &MetadataStore, target: Target, method_key: &str, parameter: Parameter) {
    store.update_metadata::<Routes, _>(target, |routes| {
        routes.entry(method_key).prepend_parameter(parameter);
    });
}

/// 注册具名转换方法
pub fn model_attribute_method(
    store: &MetadataStore,
    target: Target,
    method_key: &str,
    name: &str,
    function: ConverterFunction,
) {
    store.update_metadata::<ModelAttributeMethodsKey, _>(target, |methods| {
        methods.insert(
            name,
            ModelAttributeMethod {
                method_key: method_key.to_string(),
                function,
            },
        );
    });
}

/// 有代码时注册带代码的处理器，否则注册兜底处理器
pub fn error_handler(
    store: &MetadataStore,
    target: Target,
    method_key: &str,
    error_code: Option<&str>,
    function: ErrorHandlerFunction,
) {
    match error_code {
        Some(code) => store.update_metadata::<ErrorHandlers, _>(target, |handlers| {
            let definition = handlers.entry(method_key);
            definition.error_code = Some(code.to_string());
            definition.handler_function = Some(function);
        }),
        None => store.set_metadata::<FallbackErrorHandler>(
            target,
            ErrorHandlerDefinition {
                handler_function: Some(function),
                error_code: None,
                status_code: None,
                handler_name: method_key.to_string(),
            },
        ),
    }
}

/// 错误处理方法的响应状态码
pub fn response_status(store: &MetadataStore, target: Target, method_key: &str, status: u16) {
    store.update_metadata::<ErrorHandlers, _>(target, |handlers| {
        handlers.entry(method_key).status_code = Some(status);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::handler_fn;
    use axum::{http::Method, response::IntoResponse};

    struct Controller;

    fn noop() -> HandlerFunction {
        handler_fn(|_bean, _args| async { Ok("ok".into_response()) })
    }

    #[test]
    fn test_parameters_keep_declared_order() {
        let store = MetadataStore::new();
        let target = Target::of::<Controller>();

        // f(#[param] id, #[query] q)，从后往前应用
        sub_value_parameter(&store, target, "f", ParameterType::Query, "q");
        request_mapping(
            &store,
            target,
            "f",
            Methods::One(Method::GET),
            "/f/:id",
            RouteOptions::new(),
            noop(),
        );
        sub_value_parameter(&store, target, "f", ParameterType::Params, "id");

        let routes = store.get_metadata::<Routes>(target).unwrap();
        let record = routes.get("f").unwrap();
        let names: Vec<_> = record.parameters.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["id", "q"]);
        assert!(store.is_decorator_driven(target));
    }

    #[test]
    fn test_parameter_alone_does_not_mark_decorator_driven() {
        let store = MetadataStore::new();
        let target = Target::of::<Controller>();
        whole_value_parameter(&store, target, "f", ParameterType::Body);

        assert!(!store.is_decorator_driven(target));
        let routes = store.get_metadata::<Routes>(target).unwrap();
        let record = routes.get("f").unwrap();
        assert!(!record.is_complete());
        assert_eq!(record.parameters[0].name, "body");
    }

    #[test]
    fn test_response_status_merges_into_handler() {
        let store = MetadataStore::new();
        let target = Target::of::<Controller>();
        let function = crate::error_handler::error_handler_function(|_b, _e, _q, _r| async {
            Ok("x".into_response())
        });

        response_status(&store, target, "coded", 505);
        error_handler(&store, target, "coded", Some("ERR1"), function.clone());
        error_handler(&store, target, "all", None, function);

        let handlers = store.get_metadata::<ErrorHandlers>(target).unwrap();
        let coded = handlers.get("coded").unwrap();
        assert_eq!(coded.error_code.as_deref(), Some("ERR1"));
        assert_eq!(coded.status_code, Some(505));
        assert!(coded.handler_function.is_some());

        let fallback = store.get_metadata::<FallbackErrorHandler>(target).unwrap();
        assert_eq!(fallback.handler_name, "all");
        assert!(fallback.error_code.is_none());
    }
}
