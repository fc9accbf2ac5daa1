//! 调用闭包生成
//!
//! 为路由方法、转换方法和错误处理方法生成 `Bean + 参数 -> 结果` 的闭包。

use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{FnArg, ImplItemFn, ReturnType, Type};

use crate::attributes::{Kind, ParamAttr};

/// 已绑定的方法参数
pub struct BoundParam {
    pub attr: ParamAttr,
    pub ty: Type,
}

fn has_receiver(method: &ImplItemFn) -> bool {
    matches!(method.sig.inputs.first(), Some(FnArg::Receiver(_)))
}

/// 返回类型最后一段为 `Result`（`Result`、`anyhow::Result`、`io::Result` 等）时按可失败处理
///
/// 类型别名需要写成完整的 `Result<T, E>`。
fn returns_result(method: &ImplItemFn) -> bool {
    let ReturnType::Type(_, ty) = &method.sig.output else {
        return false;
    };
    match ty.as_ref() {
        Type::Path(path) => path
            .path
            .segments
            .last()
            .map(|segment| segment.ident == "Result")
            .unwrap_or(false),
        _ => false,
    }
}

/// `this` 的取得方式和方法调用表达式
fn invocation(method: &ImplItemFn, args: &[syn::Ident]) -> (TokenStream2, TokenStream2) {
    let ident = &method.sig.ident;
    let await_token = method.sig.asyncness.map(|_| quote!(.await));

    if has_receiver(method) {
        (
            quote! { let this = ::revane_web::downcast_bean::<Self>(bean)?; },
            quote! { this.#ident(#(#args),*) #await_token },
        )
    } else {
        (
            quote! { let _ = bean; },
            quote! { Self::#ident(#(#args),*) #await_token },
        )
    }
}

fn take_argument(param: &BoundParam) -> TokenStream2 {
    let ty = &param.ty;
    match param.attr.kind() {
        Kind::Request => quote!(args.take_request()?),
        Kind::Response => quote!(args.take_response()?),
        Kind::Log => quote!(args.take_log()?),
        Kind::ModelAttribute => quote!(args.take_model_attribute::<#ty>()?),
        _ => quote!(args.take_value::<#ty>()?),
    }
}

/// 按声明顺序取出参数
fn bind_arguments(params: &[BoundParam]) -> (Vec<syn::Ident>, TokenStream2) {
    let names: Vec<_> = (0..params.len())
        .map(|index| format_ident!("__arg{}", index))
        .collect();
    let takes = params.iter().zip(&names).map(|(param, name)| {
        let take = take_argument(param);
        quote! { let #name = #take; }
    });
    (names.clone(), quote! { #(#takes)* })
}

/// 错误转换闭包，实现了 `ErrorCode` 的错误带上代码和状态码
fn convert_error() -> TokenStream2 {
    quote! {
        |error| {
            #[allow(unused_imports)]
            use ::revane_web::__error_kind::{CodedKind as _, PlainKind as _};
            (&error).handler_error_kind().convert(error)
        }
    }
}

fn into_response(method: &ImplItemFn) -> TokenStream2 {
    if returns_result(method) {
        let convert = convert_error();
        quote! {
            result
                .map(::revane_web::axum::response::IntoResponse::into_response)
                .map_err(#convert)
        }
    } else {
        quote! {
            ::core::result::Result::<_, ::revane_web::HandlerError>::Ok(
                ::revane_web::axum::response::IntoResponse::into_response(result)
            )
        }
    }
}

/// 路由方法的 `HandlerFunction`
pub fn handler_closure(method: &ImplItemFn, params: &[BoundParam]) -> TokenStream2 {
    let (names, takes) = bind_arguments(params);
    let (this, call) = invocation(method, &names);
    let respond = into_response(method);
    let args_pat = args_pattern(params);

    quote! {
        ::revane_web::route::handler_fn(
            |bean: ::revane_web::Bean, #args_pat: ::revane_web::Arguments| async move {
                #this
                #takes
                let result = #call;
                #respond
            }
        )
    }
}

/// model attribute 方法的 `ConverterFunction`
pub fn converter_closure(method: &ImplItemFn, params: &[BoundParam]) -> TokenStream2 {
    let (names, takes) = bind_arguments(params);
    let (this, call) = invocation(method, &names);
    let args_pat = args_pattern(params);
    let convert = if returns_result(method) {
        let convert = convert_error();
        quote!(result.map_err(#convert))
    } else {
        quote!(::core::result::Result::<_, ::revane_web::HandlerError>::Ok(result))
    };

    quote! {
        ::revane_web::model_attribute::converter_fn(
            |bean: ::revane_web::Bean, #args_pat: ::revane_web::Arguments| async move {
                #this
                #takes
                let result = #call;
                #convert
            }
        )
    }
}

fn args_pattern(params: &[BoundParam]) -> TokenStream2 {
    if params.is_empty() {
        quote!(_)
    } else {
        quote!(mut args)
    }
}

/// 错误处理方法的 `ErrorHandlerFunction`
///
/// 方法按位置接收最多三个参数：错误、请求、响应。
pub fn error_handler_closure(method: &ImplItemFn, arity: usize) -> TokenStream2 {
    let slots = [
        (format_ident!("error"), quote!(::revane_web::HandlerError)),
        (format_ident!("request"), quote!(::revane_web::RevaneRequest)),
        (format_ident!("response"), quote!(::revane_web::RevaneResponse)),
    ];
    let patterns = slots.iter().enumerate().map(|(index, (name, ty))| {
        if index < arity {
            quote!(#name: #ty)
        } else {
            quote!(_: #ty)
        }
    });
    let names: Vec<_> = slots
        .iter()
        .take(arity)
        .map(|(name, _)| name.clone())
        .collect();
    let (this, call) = invocation(method, &names);
    let respond = into_response(method);

    quote! {
        ::revane_web::error_handler::error_handler_function(
            |bean: ::revane_web::Bean, #(#patterns),*| async move {
                #this
                let result = #call;
                #respond
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syn::parse_quote;

    #[test]
    fn test_returns_result() {
        let plain: ImplItemFn = parse_quote!(async fn a(&self) -> String { String::new() });
        let result: ImplItemFn = parse_quote!(async fn b(&self) -> anyhow::Result<String> { todo!() });
        let named: ImplItemFn = parse_quote!(fn c() -> QueryResult { todo!() });
        let unit: ImplItemFn = parse_quote!(fn d() {});

        assert!(!returns_result(&plain));
        assert!(returns_result(&result));
        assert!(!returns_result(&named));
        assert!(!returns_result(&unit));
    }

    #[test]
    fn test_handler_without_receiver_skips_downcast() {
        let method: ImplItemFn = parse_quote!(fn ping() -> &'static str { "pong" });
        let tokens = handler_closure(&method, &[]).to_string();
        assert!(tokens.contains("Self :: ping ()"));
        assert!(!tokens.contains("downcast_bean"));
        assert!(!tokens.contains(". await"));
    }

    #[test]
    fn test_fallible_handler_dispatches_on_error_kind() {
        let method: ImplItemFn = parse_quote!(
            async fn order(&self) -> Result<String, StockError> { todo!() }
        );
        let tokens = handler_closure(&method, &[]).to_string();
        assert!(tokens.contains("__error_kind"));
        assert!(tokens.contains("(& error) . handler_error_kind () . convert (error)"));
        assert!(!tokens.contains("HandlerError :: from"));

        let infallible: ImplItemFn = parse_quote!(async fn name(&self) -> String { todo!() });
        assert!(!handler_closure(&infallible, &[]).to_string().contains("__error_kind"));
    }

    #[test]
    fn test_error_handler_arity() {
        let method: ImplItemFn =
            parse_quote!(async fn handle(&self, error: HandlerError) -> String { todo!() });
        let tokens = error_handler_closure(&method, 1).to_string();
        assert!(tokens.contains("this . handle (error) . await"));
        assert!(tokens.contains("_ : :: revane_web :: RevaneRequest"));
    }
}
