//! 服务器配置

use revane_core::Environment;
use serde::Deserialize;

use crate::constants::*;

/// 服务器配置
///
/// `host_key` / `port_key` 是 `listen(Some(id))` 时在地址提供者
/// （`Environment` Bean）中查找地址所用的键。
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RevaneOptions {
    pub host: String,
    pub port: u16,
    pub host_key: String,
    pub port_key: String,
    /// 不输出启动日志
    pub silent: bool,
    pub body_limit: usize,
    pub access_logging: bool,
    pub request_id_header: String,
    pub compression: bool,
}

impl Default for RevaneOptions {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            host_key: SERVER_HOST.to_string(),
            port_key: SERVER_PORT.to_string(),
            silent: false,
            body_limit: DEFAULT_BODY_LIMIT,
            access_logging: true,
            request_id_header: DEFAULT_REQUEST_ID_HEADER.to_string(),
            compression: false,
        }
    }
}

impl RevaneOptions {
    /// 从 Environment 加载配置
    pub fn from_environment(env: &Environment) -> Self {
        let defaults = Self::default();
        Self {
            host: env.get_string_or(SERVER_HOST, &defaults.host),
            port: env
                .get_i64(SERVER_PORT)
                .and_then(|port| u16::try_from(port).ok())
                .unwrap_or(defaults.port),
            host_key: defaults.host_key,
            port_key: defaults.port_key,
            silent: env.get_bool_or(SERVER_SILENT, defaults.silent),
            body_limit: env
                .get_i64(SERVER_BODY_LIMIT)
                .and_then(|limit| usize::try_from(limit).ok())
                .unwrap_or(defaults.body_limit),
            access_logging: env.get_bool_or(SERVER_ACCESS_LOGGING, defaults.access_logging),
            request_id_header: env
                .get_string_or(SERVER_REQUEST_ID_HEADER, &defaults.request_id_header),
            compression: env.get_bool_or(SERVER_COMPRESSION, defaults.compression),
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn host_key(mut self, key: impl Into<String>) -> Self {
        self.host_key = key.into();
        self
    }

    pub fn port_key(mut self, key: impl Into<String>) -> Self {
        self.port_key = key.into();
        self
    }

    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    pub fn body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    pub fn access_logging(mut self, enabled: bool) -> Self {
        self.access_logging = enabled;
        self
    }

    pub fn request_id_header(mut self, header: impl Into<String>) -> Self {
        self.request_id_header = header.into();
        self
    }

    pub fn compression(mut self, enabled: bool) -> Self {
        self.compression = enabled;
        self
    }

    /// 监听地址
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use revane_core::{ConfigValue, MapPropertySource};

    #[test]
    fn test_from_environment() {
        let env = Environment::new();
        env.add_property_source(Box::new(
            MapPropertySource::new("test")
                .with_property(SERVER_PORT, ConfigValue::Int(8081))
                .with_property(SERVER_SILENT, ConfigValue::Bool(true))
                .with_property(SERVER_BODY_LIMIT, ConfigValue::Int(-1)),
        ));

        let options = RevaneOptions::from_environment(&env);
        assert_eq!(options.port, 8081);
        assert!(options.silent);
        assert_eq!(options.host, DEFAULT_HOST);
        assert_eq!(options.body_limit, DEFAULT_BODY_LIMIT);
        assert_eq!(options.address(), "127.0.0.1:8081");
    }

    #[test]
    fn test_deserialize_kebab_case() {
        let options: RevaneOptions =
            serde_json::from_str(r#"{"port": 0, "body-limit": 16, "request-id-header": "x-id"}"#)
                .unwrap();
        assert_eq!(options.port, 0);
        assert_eq!(options.body_limit, 16);
        assert_eq!(options.request_id_header, "x-id");
        assert!(options.access_logging);
    }
}
