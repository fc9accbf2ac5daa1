//! 响应适配器
//!
//! 处理函数通过 `RevaneResponse` 设置状态码、响应头和 Cookie，
//! 方法返回值作为响应体，最后由 `apply` 合并成最终响应。

use std::fmt;
use std::sync::Arc;

use axum::{
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use parking_lot::Mutex;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

/// cookie-octet 之外的字符，外加 `%` 本身
const COOKIE_VALUE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b',')
    .add(b';')
    .add(b'\\')
    .add(b'%');

/// Cookie 名必须是 token
fn valid_cookie_name(name: &str) -> bool {
    const SEPARATORS: &[u8] = b"()<>@,;:\\\"/[]?={} \t";
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_graphic() && !SEPARATORS.contains(&b))
}

/// Path / Domain 属性值不能截断 Cookie
fn valid_attribute(value: &str) -> bool {
    !value.bytes().any(|b| b == b';' || b.is_ascii_control())
}

/// SameSite 属性
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl fmt::Display for SameSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        })
    }
}

/// Cookie 选项
#[derive(Debug, Clone, Default)]
pub struct CookieOptions {
    pub path: Option<String>,
    pub domain: Option<String>,
    pub max_age: Option<i64>,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: Option<SameSite>,
}

impl CookieOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn max_age(mut self, seconds: i64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    pub fn http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = Some(same_site);
        self
    }

    /// 值做百分号编码；名称或属性非法时返回 `None`
    fn serialize(&self, name: &str, value: &str) -> Option<String> {
        if !valid_cookie_name(name) {
            return None;
        }
        let attributes = [self.path.as_deref(), self.domain.as_deref()];
        if !attributes.into_iter().flatten().all(valid_attribute) {
            return None;
        }

        let mut cookie = format!("{}={}", name, utf8_percent_encode(value, COOKIE_VALUE));
        if let Some(path) = &self.path {
            cookie.push_str(&format!("; Path={}", path));
        }
        if let Some(domain) = &self.domain {
            cookie.push_str(&format!("; Domain={}", domain));
        }
        if let Some(max_age) = self.max_age {
            cookie.push_str(&format!("; Max-Age={}", max_age));
        }
        if self.http_only {
            cookie.push_str("; HttpOnly");
        }
        if self.secure {
            cookie.push_str("; Secure");
        }
        if let Some(same_site) = self.same_site {
            cookie.push_str(&format!("; SameSite={}", same_site));
        }
        Some(cookie)
    }
}

#[derive(Default)]
struct ReplyState {
    status: Option<StatusCode>,
    headers: HeaderMap,
    cookies: Vec<HeaderValue>,
}

/// 响应适配器，同一请求内共享
#[derive(Clone, Default)]
pub struct RevaneResponse {
    state: Arc<Mutex<ReplyState>>,
}

impl RevaneResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置状态码，非法值记录警告后忽略
    pub fn status(&self, code: u16) -> &Self {
        match StatusCode::from_u16(code) {
            Ok(status) => self.state.lock().status = Some(status),
            Err(_) => tracing::warn!("Ignoring invalid status code {}", code),
        }
        self
    }

    pub fn status_code(&self) -> Option<StatusCode> {
        self.state.lock().status
    }

    /// 设置响应头，覆盖同名值
    pub fn header(&self, name: &str, value: &str) -> &Self {
        match (
            HeaderName::try_from(name),
            HeaderValue::try_from(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.state.lock().headers.insert(name, value);
            }
            _ => tracing::warn!("Ignoring invalid header '{}'", name),
        }
        self
    }

    pub fn set_headers<'a, I>(&self, headers: I) -> &Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        for (name, value) in headers {
            self.header(name, value);
        }
        self
    }

    pub fn get_header(&self, name: &str) -> Option<String> {
        self.state
            .lock()
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.state.lock().headers.contains_key(name)
    }

    pub fn remove_header(&self, name: &str) -> &Self {
        self.state.lock().headers.remove(name);
        self
    }

    /// 当前已设置的响应头
    pub fn headers(&self) -> HeaderMap {
        self.state.lock().headers.clone()
    }

    /// 追加 Set-Cookie，值中的 `;`、`,`、空白和非 ASCII 字符会被百分号编码
    pub fn set_cookie(&self, name: &str, value: &str, options: &CookieOptions) -> &Self {
        match options
            .serialize(name, value)
            .and_then(|cookie| HeaderValue::try_from(cookie).ok())
        {
            Some(cookie) => self.state.lock().cookies.push(cookie),
            None => tracing::warn!("Ignoring invalid cookie '{}'", name),
        }
        self
    }

    /// 302 重定向
    pub fn redirect(&self, location: &str) -> Response {
        self.redirect_with_status(StatusCode::FOUND.as_u16(), location)
    }

    pub fn redirect_with_status(&self, code: u16, location: &str) -> Response {
        self.status(code).header(header::LOCATION.as_str(), location);
        StatusCode::from_u16(code)
            .unwrap_or(StatusCode::FOUND)
            .into_response()
    }

    /// 把累积的状态合并到处理函数返回的响应上
    ///
    /// 只有返回值未显式设置状态（200）时才使用这里的状态码。
    pub fn apply(&self, mut response: Response) -> Response {
        let state = self.state.lock();
        if let Some(status) = state.status {
            if response.status() == StatusCode::OK {
                *response.status_mut() = status;
            }
        }
        let headers = response.headers_mut();
        for (name, value) in state.headers.iter() {
            headers.insert(name.clone(), value.clone());
        }
        for cookie in &state.cookies {
            headers.append(header::SET_COOKIE, cookie.clone());
        }
        response
    }
}

impl fmt::Debug for RevaneResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RevaneResponse")
            .field("status", &state.status)
            .field("headers", &state.headers)
            .finish()
    }
}
