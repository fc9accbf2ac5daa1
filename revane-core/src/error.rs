//! 容器错误类型
//!
//! 容器层使用 thiserror 定义的 `ContainerError`，应用边界可以通过
//! `anyhow::Result` 统一包装。

use thiserror::Error;

/// 统一的应用级 Result 类型
pub use anyhow::Result;

/// 容器操作结果
pub type ContainerResult<T> = std::result::Result<T, ContainerError>;

/// 容器错误
#[derive(Error, Debug)]
pub enum ContainerError {
    /// 找不到指定名称的 Bean
    #[error("Bean not found: {0}")]
    BeanNotFound(String),

    /// 同名 Bean 已注册
    #[error("Bean already exists: {0}")]
    BeanAlreadyExists(String),

    /// Bean 工厂执行失败
    #[error("Bean creation failed: {0}")]
    BeanCreationFailed(String),

    /// 类型向下转换失败
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    /// 创建过程中出现循环依赖
    #[error("Circular dependency detected: {0}")]
    CircularDependency(String),

    /// 日志系统初始化失败
    #[error("Failed to initialize logging: {0}")]
    LoggingInitFailed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
