//! 属性解析
//!
//! 方法属性：请求映射、错误处理、响应状态、model attribute 转换方法；
//! 参数属性：子值绑定和整体绑定。

use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{
    parse::{Parse, ParseStream},
    Attribute, Ident, Lit, LitInt, LitStr, Meta, Token,
};

/// 请求映射参数：`("/path", key = "value", ...)`
pub struct MappingArgs {
    pub path: Option<LitStr>,
    pub options: Vec<(Ident, Lit)>,
}

impl Parse for MappingArgs {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut path = None;
        let mut options = Vec::new();

        if input.peek(LitStr) {
            path = Some(input.parse()?);
            if !input.is_empty() {
                input.parse::<Token![,]>()?;
            }
        }

        while !input.is_empty() {
            let key: Ident = input.parse()?;
            input.parse::<Token![=]>()?;
            let value: Lit = input.parse()?;
            options.push((key, value));
            if !input.is_empty() {
                input.parse::<Token![,]>()?;
            }
        }

        Ok(Self { path, options })
    }
}

impl MappingArgs {
    pub fn path(&self) -> String {
        self.path
            .as_ref()
            .map(LitStr::value)
            .unwrap_or_else(|| "/".to_string())
    }

    /// 生成 `RouteOptions` 构造表达式
    pub fn options_tokens(&self) -> TokenStream2 {
        let inserts = self.options.iter().map(|(key, value)| {
            let key = key.to_string();
            quote! {
                options.insert(
                    ::std::string::String::from(#key),
                    ::revane_web::serde_json::json!(#value),
                );
            }
        });
        quote! {
            {
                #[allow(unused_mut)]
                let mut options = ::revane_web::route::RouteOptions::new();
                #(#inserts)*
                options
            }
        }
    }
}

/// 方法属性
pub enum MethodAttr {
    Mapping { methods: TokenStream2, args: MappingArgs },
    ErrorHandler(Option<LitStr>),
    ResponseStatus(LitInt),
    ModelAttribute(LitStr),
}

fn http_method(name: &str) -> Option<TokenStream2> {
    let constant = match name {
        "get_mapping" => quote!(GET),
        "post_mapping" => quote!(POST),
        "put_mapping" => quote!(PUT),
        "delete_mapping" => quote!(DELETE),
        "patch_mapping" => quote!(PATCH),
        "head_mapping" => quote!(HEAD),
        "options_mapping" => quote!(OPTIONS),
        "request_mapping" => return Some(quote!(::revane_web::route::Methods::All)),
        _ => return None,
    };
    Some(quote!(::revane_web::route::Methods::One(
        ::revane_web::axum::http::Method::#constant
    )))
}

fn attr_name(attr: &Attribute) -> Option<String> {
    attr.path().get_ident().map(|ident| ident.to_string())
}

/// 属性参数，`#[x]` 时为 `None`
fn optional_args<T: Parse>(attr: &Attribute) -> syn::Result<Option<T>> {
    match &attr.meta {
        Meta::Path(_) => Ok(None),
        Meta::List(_) => attr.parse_args().map(Some),
        Meta::NameValue(nv) => Err(syn::Error::new_spanned(
            nv,
            "expected #[attribute] or #[attribute(...)]",
        )),
    }
}

fn required_args<T: Parse>(attr: &Attribute, usage: &str) -> syn::Result<T> {
    optional_args(attr)?.ok_or_else(|| syn::Error::new_spanned(attr, format!("expected {}", usage)))
}

/// 解析方法属性，非本框架的属性返回 `None`
pub fn parse_method_attr(attr: &Attribute) -> syn::Result<Option<MethodAttr>> {
    let Some(name) = attr_name(attr) else {
        return Ok(None);
    };

    if let Some(methods) = http_method(&name) {
        let args = optional_args::<MappingArgs>(attr)?.unwrap_or(MappingArgs {
            path: None,
            options: Vec::new(),
        });
        return Ok(Some(MethodAttr::Mapping { methods, args }));
    }

    let parsed = match name.as_str() {
        "error_handler" => MethodAttr::ErrorHandler(optional_args(attr)?),
        "response_status" => {
            let status: LitInt = required_args(attr, "#[response_status(404)]")?;
            status.base10_parse::<u16>()?;
            MethodAttr::ResponseStatus(status)
        }
        "model_attribute" => {
            MethodAttr::ModelAttribute(required_args(attr, "#[model_attribute(\"name\")]")?)
        }
        _ => return Ok(None),
    };
    Ok(Some(parsed))
}

/// 参数来源，对应运行时的 `ParameterType`
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Request,
    Response,
    ModelAttribute,
    Query,
    Params,
    Cookies,
    Headers,
    Body,
    Log,
}

impl Kind {
    pub fn tokens(&self) -> TokenStream2 {
        let variant = match self {
            Kind::Request => quote!(Request),
            Kind::Response => quote!(Response),
            Kind::ModelAttribute => quote!(ModelAttribute),
            Kind::Query => quote!(Query),
            Kind::Params => quote!(Params),
            Kind::Cookies => quote!(Cookies),
            Kind::Headers => quote!(Headers),
            Kind::Body => quote!(Body),
            Kind::Log => quote!(Log),
        };
        quote!(::revane_web::parameter::ParameterType::#variant)
    }
}

/// 参数属性
pub enum ParamAttr {
    SubValue { kind: Kind, name: Option<LitStr> },
    WholeValue { kind: Kind },
}

impl ParamAttr {
    pub fn kind(&self) -> Kind {
        match self {
            ParamAttr::SubValue { kind, .. } | ParamAttr::WholeValue { kind } => *kind,
        }
    }
}

pub fn parse_param_attr(attr: &Attribute) -> syn::Result<Option<ParamAttr>> {
    let Some(name) = attr_name(attr) else {
        return Ok(None);
    };

    let sub_value = match name.as_str() {
        "param" => Some(Kind::Params),
        "query" => Some(Kind::Query),
        "cookie" => Some(Kind::Cookies),
        "header" => Some(Kind::Headers),
        "request" => Some(Kind::Request),
        "response" => Some(Kind::Response),
        "model_attribute" => Some(Kind::ModelAttribute),
        _ => None,
    };
    if let Some(kind) = sub_value {
        return Ok(Some(ParamAttr::SubValue {
            kind,
            name: optional_args(attr)?,
        }));
    }

    let whole_value = match name.as_str() {
        "params" => Kind::Params,
        "query_parameters" => Kind::Query,
        "cookies" => Kind::Cookies,
        "headers" => Kind::Headers,
        "body" => Kind::Body,
        "log" => Kind::Log,
        _ => return Ok(None),
    };
    if let Meta::List(list) = &attr.meta {
        return Err(syn::Error::new_spanned(
            list,
            format!("#[{}] binds the whole value and takes no name", name),
        ));
    }
    Ok(Some(ParamAttr::WholeValue { kind: whole_value }))
}
