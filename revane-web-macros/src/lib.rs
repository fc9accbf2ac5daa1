//! Revane Web Macros
//!
//! `#[controller]` 属性宏：把实现块上的路由、参数、错误处理属性
//! 编译为元数据写入函数。

mod attributes;
mod controller;
mod parameter_name;
mod route;

use proc_macro::TokenStream;

/// 控制器宏
///
/// 放在控制器的实现块上，识别以下属性：
///
/// - 方法：`#[get_mapping]`、`#[post_mapping]`、`#[put_mapping]`、`#[delete_mapping]`、
///   `#[patch_mapping]`、`#[head_mapping]`、`#[options_mapping]`、`#[request_mapping]`，
///   `#[error_handler]` / `#[error_handler("CODE")]`、`#[response_status(N)]`、
///   `#[model_attribute("name")]`
/// - 参数：`#[param]`、`#[query]`、`#[cookie]`、`#[header]`、`#[request]`、`#[response]`、
///   `#[model_attribute]`（可带名称），`#[params]`、`#[query_parameters]`、`#[cookies]`、
///   `#[headers]`、`#[body]`、`#[log]`
///
/// # 示例
///
/// ```ignore
/// #[controller]
/// impl UserController {
///     #[get_mapping("/user/:id")]
///     async fn get_user(&self, #[param] id: String) -> String {
///         id
///     }
///
///     #[error_handler("NOT_FOUND")]
///     #[response_status(404)]
///     async fn not_found(&self, error: HandlerError) -> String {
///         error.message().to_string()
///     }
/// }
/// ```
#[proc_macro_attribute]
pub fn controller(attr: TokenStream, item: TokenStream) -> TokenStream {
    controller::expand(attr.into(), item.into())
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}
