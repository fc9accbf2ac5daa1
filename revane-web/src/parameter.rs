//! 参数绑定
//!
//! `Parameter` 描述如何从请求中取出一个方法参数；`Arguments` 是解析后的
//! 参数序列，由宏生成的处理函数按声明顺序逐个取出并转换为具体类型。

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::error::HandlerError;
use crate::log::RequestLog;
use crate::request::{RequestContext, RevaneRequest};
use crate::response::RevaneResponse;

/// 参数来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterType {
    Request,
    Response,
    ModelAttribute,
    Query,
    Params,
    Cookies,
    Headers,
    Body,
    Log,
}

impl ParameterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParameterType::Request => "request",
            ParameterType::Response => "reply",
            ParameterType::ModelAttribute => "model-attribute",
            ParameterType::Query => "query",
            ParameterType::Params => "params",
            ParameterType::Cookies => "cookies",
            ParameterType::Headers => "headers",
            ParameterType::Body => "body",
            ParameterType::Log => "log",
        }
    }
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 参数绑定
///
/// `all = true` 注入整个子对象（例如全部查询参数），
/// 否则按 `name` 取子对象中的一个字段。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub kind: ParameterType,
    pub name: String,
    pub all: bool,
}

impl Parameter {
    /// 子对象中的单个字段
    pub fn sub_value(kind: ParameterType, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            all: false,
        }
    }

    /// 整个子对象，名称即类型名
    pub fn whole_value(kind: ParameterType) -> Self {
        Self {
            kind,
            name: kind.as_str().to_string(),
            all: true,
        }
    }
}

/// 从请求子对象中取值，缺失时为 `Value::Null`
pub fn apply_parameter(request: &RevaneRequest, parameter: &Parameter) -> Value {
    let Some(source) = request.sub_value(parameter.kind) else {
        return Value::Null;
    };

    if parameter.all {
        return source.clone();
    }

    let value = match parameter.kind {
        // 请求头名称不区分大小写
        ParameterType::Headers => source.get(parameter.name.to_ascii_lowercase()),
        _ => source.get(&parameter.name),
    };
    value.cloned().unwrap_or(Value::Null)
}

/// 解析不依赖转换器的参数
pub(crate) fn resolve_plain(parameter: &Parameter, ctx: &RequestContext) -> Argument {
    match parameter.kind {
        ParameterType::Request => Argument::Request(ctx.request.clone()),
        ParameterType::Response => Argument::Response(ctx.response.clone()),
        ParameterType::Log => Argument::Log(ctx.log.clone()),
        _ => Argument::Value(apply_parameter(&ctx.request, parameter)),
    }
}

/// 解析后的单个参数
pub enum Argument {
    Request(RevaneRequest),
    Response(RevaneResponse),
    Log(RequestLog),
    Value(Value),
    ModelAttribute(Box<dyn Any + Send>),
}

impl Argument {
    fn kind(&self) -> &'static str {
        match self {
            Argument::Request(_) => "request",
            Argument::Response(_) => "response",
            Argument::Log(_) => "log",
            Argument::Value(_) => "value",
            Argument::ModelAttribute(_) => "model attribute",
        }
    }
}

/// 按声明顺序排列的参数
#[derive(Default)]
pub struct Arguments {
    values: VecDeque<(String, Argument)>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, argument: Argument) {
        self.values.push_back((name.into(), argument));
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn next(&mut self) -> Result<(String, Argument), HandlerError> {
        self.values
            .pop_front()
            .ok_or_else(|| HandlerError::new("Handler expects more arguments than were bound"))
    }

    fn mismatch(name: &str, expected: &str, found: &Argument) -> HandlerError {
        HandlerError::new(format!(
            "Parameter '{}' expects a {} but a {} was bound",
            name,
            expected,
            found.kind()
        ))
    }

    pub fn take_request(&mut self) -> Result<RevaneRequest, HandlerError> {
        match self.next()? {
            (_, Argument::Request(request)) => Ok(request),
            (name, other) => Err(Self::mismatch(&name, "request", &other)),
        }
    }

    pub fn take_response(&mut self) -> Result<RevaneResponse, HandlerError> {
        match self.next()? {
            (_, Argument::Response(response)) => Ok(response),
            (name, other) => Err(Self::mismatch(&name, "response", &other)),
        }
    }

    pub fn take_log(&mut self) -> Result<RequestLog, HandlerError> {
        match self.next()? {
            (_, Argument::Log(log)) => Ok(log),
            (name, other) => Err(Self::mismatch(&name, "log", &other)),
        }
    }

    /// 取出请求值并反序列化为目标类型
    ///
    /// 字符串值在直接反序列化失败时会再按 JSON 文本解析一次，
    /// 因此路径参数 `"42"` 可以绑定到 `u32`。
    pub fn take_value<T: DeserializeOwned>(&mut self) -> Result<T, HandlerError> {
        match self.next()? {
            (name, Argument::Value(value)) => convert_value(&name, &value),
            (name, other) => Err(Self::mismatch(&name, "value", &other)),
        }
    }

    /// 取出 model attribute 转换器的结果
    pub fn take_model_attribute<T: Any>(&mut self) -> Result<T, HandlerError> {
        match self.next()? {
            (name, Argument::ModelAttribute(value)) => {
                value.downcast::<T>().map(|value| *value).map_err(|_| {
                    HandlerError::new(format!(
                        "Model attribute '{}' is not a {}",
                        name,
                        std::any::type_name::<T>()
                    ))
                })
            }
            (name, other) => Err(Self::mismatch(&name, "model attribute", &other)),
        }
    }
}

fn convert_value<T: DeserializeOwned>(name: &str, value: &Value) -> Result<T, HandlerError> {
    match T::deserialize(value) {
        Ok(converted) => Ok(converted),
        Err(error) => {
            if let Value::String(text) = value {
                if let Ok(converted) = serde_json::from_str::<T>(text) {
                    return Ok(converted);
                }
            }
            Err(HandlerError::invalid_parameter(format!(
                "Invalid value for parameter '{}': {}",
                name, error
            )))
        }
    }
}
