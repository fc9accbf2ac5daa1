//! 框架配置常量定义
//!
//! 定义所有框架使用的配置键名称

// ==================== Server 配置 ====================

/// 服务器监听地址
pub const SERVER_HOST: &str = "server.host";

/// 服务器监听端口
pub const SERVER_PORT: &str = "server.port";

/// 启动时不输出日志
pub const SERVER_SILENT: &str = "server.silent";

/// 请求体最大字节数
pub const SERVER_BODY_LIMIT: &str = "server.body-limit";

/// 请求 ID 请求头
pub const SERVER_REQUEST_ID_HEADER: &str = "server.request-id-header";

/// 是否启用访问日志
pub const SERVER_ACCESS_LOGGING: &str = "server.access-logging";

/// 是否启用响应压缩
pub const SERVER_COMPRESSION: &str = "server.compression";

// ==================== 默认值 ====================

pub const DEFAULT_HOST: &str = "127.0.0.1";

pub const DEFAULT_PORT: u16 = 3000;

/// 1 MiB
pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

pub const DEFAULT_REQUEST_ID_HEADER: &str = "x-request-id";
