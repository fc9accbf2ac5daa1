/// Bean 的作用域
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scope {
    /// 首次获取时创建并缓存
    #[default]
    Singleton,

    /// 每次获取都创建新实例
    Prototype,
}

