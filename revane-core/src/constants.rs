//! 容器内置 Bean 名称和组件类型常量
//!
//! 宏生成的代码和 Web 层都通过这些常量查找 Bean

/// Environment Bean 名称
pub const ENVIRONMENT_BEAN_NAME: &str = "environment";

/// 控制器组件类型
pub const CONTROLLER_COMPONENT: &str = "controller";

/// 全局错误处理组件类型
pub const CONTROLLER_ADVICE_COMPONENT: &str = "controllerAdvice";

/// 环境变量配置前缀
pub const ENV_PREFIX: &str = "REVANE_";
