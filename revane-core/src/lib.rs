// revane-core: Bean 容器、配置与日志
//
// 为 revane-web 提供：
// - 单例和原型作用域的 Bean 容器
// - 按组件类型查找 Bean（controller / controllerAdvice）
// - 多配置源的 Environment
// - 基于 tracing 的日志初始化

pub mod bean;
pub mod config;
pub mod constants;
pub mod container;
pub mod error;
pub mod logging;
pub mod scope;

pub use bean::{BeanDefinition, BeanFactory};
pub use config::{
    ConfigValue, Environment, EnvironmentPropertySource, MapPropertySource, PropertySource,
    TomlPropertySource,
};
pub use constants::*;
pub use container::{ApplicationContext, ApplicationContextBuilder, Container};
pub use error::{ContainerError, ContainerResult, Result};
pub use logging::{LogFormat, LogLevel, LoggingConfig};
pub use scope::Scope;

/// Prelude 模块，包含常用的 traits 和类型
pub mod prelude {
    pub use crate::bean::{BeanDefinition, BeanFactory};
    pub use crate::config::{
        ConfigValue, Environment, EnvironmentPropertySource, MapPropertySource, PropertySource,
        TomlPropertySource,
    };
    pub use crate::container::{ApplicationContext, Container};
    pub use crate::error::{ContainerError, ContainerResult, Result};
    pub use crate::logging::{LogFormat, LogLevel, LoggingConfig};
    pub use crate::scope::Scope;
    pub use anyhow::{anyhow, Context};
}
