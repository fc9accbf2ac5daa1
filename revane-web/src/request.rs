//! 请求适配器
//!
//! `RevaneRequest` 是传输层请求的只读视图，子对象（params / query /
//! cookies / headers / body）在构造时解析为 JSON 值，参数绑定直接按名称取值。

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{OriginalUri, Query},
    http::{header, request::Parts, HeaderMap, Method, Request, StatusCode, Uri, Version},
};
use bytes::Bytes;
use percent_encoding::percent_decode_str;
use serde_json::{Map, Value};

use crate::error::{error_codes, HandlerError};
use crate::log::RequestLog;
use crate::middleware::RequestId;
use crate::parameter::ParameterType;
use crate::response::RevaneResponse;

struct RequestInner {
    id: String,
    method: Method,
    uri: Uri,
    original_uri: Uri,
    version: Version,
    headers: HeaderMap,
    remote_addr: Option<SocketAddr>,
    params: Value,
    query: Value,
    cookies: Value,
    headers_value: Value,
    body: Value,
}

/// 请求适配器，克隆开销很小
#[derive(Clone)]
pub struct RevaneRequest {
    inner: Arc<RequestInner>,
}

impl RevaneRequest {
    /// 从请求头部构造，`body` 按 Content-Type 解析
    pub fn from_parts(
        id: impl Into<String>,
        parts: &Parts,
        params: HashMap<String, String>,
        remote_addr: Option<SocketAddr>,
        body: Bytes,
    ) -> Result<Self, HandlerError> {
        let body = parse_body(&parts.headers, &body)?;
        Ok(Self::with_body(id, parts, params, remote_addr, body))
    }

    fn with_body(
        id: impl Into<String>,
        parts: &Parts,
        params: HashMap<String, String>,
        remote_addr: Option<SocketAddr>,
        body: Value,
    ) -> Self {
        let original_uri = parts
            .extensions
            .get::<OriginalUri>()
            .map(|original| original.0.clone())
            .unwrap_or_else(|| parts.uri.clone());

        let params = params
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect::<Map<String, Value>>();

        Self {
            inner: Arc::new(RequestInner {
                id: id.into(),
                method: parts.method.clone(),
                uri: parts.uri.clone(),
                original_uri,
                version: parts.version,
                headers: parts.headers.clone(),
                remote_addr,
                params: Value::Object(params),
                query: Value::Object(parse_query(&parts.uri)),
                cookies: Value::Object(parse_cookies(&parts.headers)),
                headers_value: Value::Object(headers_to_map(&parts.headers)),
                body,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn method(&self) -> &Method {
        &self.inner.method
    }

    /// 路径加查询字符串
    pub fn url(&self) -> &str {
        self.inner
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| self.inner.uri.path())
    }

    /// 嵌套路由之前的原始 URL
    pub fn original_url(&self) -> &str {
        self.inner
            .original_uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| self.inner.original_uri.path())
    }

    pub fn path(&self) -> &str {
        self.inner.uri.path()
    }

    pub fn protocol(&self) -> &'static str {
        match self.inner.uri.scheme_str() {
            Some("https") => "https",
            _ => "http",
        }
    }

    pub fn http_version(&self) -> Version {
        self.inner.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.inner.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Host 请求头，含端口
    pub fn host(&self) -> Option<&str> {
        self.header(header::HOST.as_str())
            .or_else(|| self.inner.uri.authority().map(|a| a.as_str()))
    }

    /// 不含端口的主机名
    pub fn hostname(&self) -> Option<&str> {
        self.host().map(|host| split_host(host).0)
    }

    pub fn port(&self) -> Option<u16> {
        self.host()
            .and_then(|host| split_host(host).1)
            .and_then(|port| port.parse().ok())
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner.remote_addr
    }

    /// 客户端 IP
    pub fn ip(&self) -> Option<String> {
        self.inner.remote_addr.map(|addr| addr.ip().to_string())
    }

    /// X-Forwarded-For 链加上直连地址
    pub fn ips(&self) -> Vec<String> {
        let mut ips: Vec<String> = self
            .inner
            .headers
            .get_all("x-forwarded-for")
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .map(|ip| ip.trim().to_string())
            .filter(|ip| !ip.is_empty())
            .collect();
        ips.extend(self.ip());
        ips
    }

    pub fn params(&self) -> &Value {
        &self.inner.params
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.inner.params.get(name).and_then(Value::as_str)
    }

    pub fn query(&self) -> &Value {
        &self.inner.query
    }

    /// 单个查询参数；重复出现时取第一个值
    pub fn query_value(&self, name: &str) -> Option<&str> {
        match self.inner.query.get(name)? {
            Value::Array(values) => values.first().and_then(Value::as_str),
            value => value.as_str(),
        }
    }

    pub fn cookies(&self) -> &Value {
        &self.inner.cookies
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.inner.cookies.get(name).and_then(Value::as_str)
    }

    pub fn body(&self) -> &Value {
        &self.inner.body
    }

    /// 参数绑定使用的子对象
    pub fn sub_value(&self, kind: ParameterType) -> Option<&Value> {
        match kind {
            ParameterType::Params => Some(&self.inner.params),
            ParameterType::Query => Some(&self.inner.query),
            ParameterType::Cookies => Some(&self.inner.cookies),
            ParameterType::Headers => Some(&self.inner.headers_value),
            ParameterType::Body => Some(&self.inner.body),
            ParameterType::Request
            | ParameterType::Response
            | ParameterType::ModelAttribute
            | ParameterType::Log => None,
        }
    }
}

impl std::fmt::Debug for RevaneRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevaneRequest")
            .field("id", &self.inner.id)
            .field("method", &self.inner.method)
            .field("url", &self.url())
            .finish()
    }
}

/// 单个请求的处理上下文
#[derive(Clone)]
pub struct RequestContext {
    pub request: RevaneRequest,
    pub response: RevaneResponse,
    pub log: RequestLog,
}

impl RequestContext {
    pub fn new(request: RevaneRequest) -> Self {
        let log = RequestLog::new(request.id(), request.method(), request.path());
        Self {
            request,
            response: RevaneResponse::new(),
            log,
        }
    }

    /// 从 axum 请求构造上下文
    ///
    /// 请求体读取或解析失败时仍返回上下文（body 为 `Null`），
    /// 错误交给调用方走错误处理链。
    pub(crate) async fn from_request(
        request: Request<Body>,
        params: HashMap<String, String>,
        remote_addr: Option<SocketAddr>,
        body_limit: usize,
    ) -> (Self, Option<HandlerError>) {
        let (parts, body) = request.into_parts();
        let id = parts
            .extensions
            .get::<RequestId>()
            .map(|id| id.0.clone())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let parsed = match axum::body::to_bytes(body, body_limit).await {
            Ok(bytes) => parse_body(&parts.headers, &bytes),
            Err(e) => Err(HandlerError::new(format!("Request body exceeds the limit: {}", e))
                .with_code(error_codes::REV_ERR_BODY_TOO_LARGE)
                .with_status(StatusCode::PAYLOAD_TOO_LARGE)),
        };

        let (body, error) = match parsed {
            Ok(body) => (body, None),
            Err(error) => (Value::Null, Some(error)),
        };

        let request = RevaneRequest::with_body(id, &parts, params, remote_addr, body);
        (Self::new(request), error)
    }
}

fn parse_body(headers: &HeaderMap, bytes: &Bytes) -> Result<Value, HandlerError> {
    if bytes.is_empty() {
        return Ok(Value::Null);
    }

    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("json"));

    if is_json {
        serde_json::from_slice(bytes).map_err(|e| {
            HandlerError::new(format!("Invalid JSON body: {}", e))
                .with_code(error_codes::REV_ERR_INVALID_PARAMETER)
                .with_status(StatusCode::BAD_REQUEST)
        })
    } else {
        Ok(Value::String(String::from_utf8_lossy(bytes).into_owned()))
    }
}

/// 同名参数出现多次时收集为数组：`?tag=a&tag=b` → `{"tag": ["a", "b"]}`
fn parse_query(uri: &Uri) -> Map<String, Value> {
    match Query::<Vec<(String, String)>>::try_from_uri(uri) {
        Ok(Query(pairs)) => {
            let mut query = Map::new();
            for (key, value) in pairs {
                let value = Value::String(value);
                match query.get_mut(&key) {
                    Some(Value::Array(values)) => values.push(value),
                    Some(existing) => {
                        let first = existing.take();
                        *existing = Value::Array(vec![first, value]);
                    }
                    None => {
                        query.insert(key, value);
                    }
                }
            }
            query
        }
        Err(e) => {
            tracing::debug!("Ignoring malformed query string '{:?}': {}", uri.query(), e);
            Map::new()
        }
    }
}

fn parse_cookies(headers: &HeaderMap) -> Map<String, Value> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.split_once('='))
        .map(|(name, value)| {
            let value = percent_decode_str(value.trim().trim_matches('"')).decode_utf8_lossy();
            (name.trim().to_string(), Value::String(value.into_owned()))
        })
        .collect()
}

/// 请求头名称已是小写；同名多值以 ", " 连接
fn headers_to_map(headers: &HeaderMap) -> Map<String, Value> {
    let mut map = Map::new();
    for name in headers.keys() {
        let joined = headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect::<Vec<_>>()
            .join(", ");
        map.insert(name.as_str().to_string(), Value::String(joined));
    }
    map
}

/// 拆分 `host:port`，支持 `[::1]:3000`
fn split_host(host: &str) -> (&str, Option<&str>) {
    if let Some(rest) = host.strip_prefix('[') {
        if let Some((ip, tail)) = rest.split_once(']') {
            return (ip, tail.strip_prefix(':'));
        }
    }
    match host.rsplit_once(':') {
        Some((name, port)) => (name, Some(port)),
        None => (host, None),
    }
}
