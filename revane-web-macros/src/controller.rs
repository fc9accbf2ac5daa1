//! `#[controller]` 展开
//!
//! 扫描实现块中的方法属性和参数属性，去掉这些属性后原样输出实现块，
//! 再生成 `__revane_decorate` 写入元数据，并通过 inventory 注册。
//! 写入顺序与属性求值顺序一致：参数从后往前，方法属性从下往上。

use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{ext::IdentExt, spanned::Spanned, FnArg, ImplItem, ImplItemFn, ItemImpl, Type};

use crate::attributes::{parse_method_attr, parse_param_attr, Kind, MethodAttr, ParamAttr};
use crate::parameter_name::parameter_name;
use crate::route::{converter_closure, error_handler_closure, handler_closure, BoundParam};

pub fn expand(attr: TokenStream2, item: TokenStream2) -> syn::Result<TokenStream2> {
    if !attr.is_empty() {
        return Err(syn::Error::new_spanned(attr, "#[controller] takes no arguments"));
    }

    let mut item_impl: ItemImpl = syn::parse2(item)?;
    if let Some((_, path, _)) = &item_impl.trait_ {
        return Err(syn::Error::new_spanned(
            path,
            "#[controller] must be placed on an inherent impl block",
        ));
    }
    if !item_impl.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &item_impl.generics,
            "#[controller] does not support generic impl blocks",
        ));
    }

    let mut calls = Vec::new();
    for impl_item in &mut item_impl.items {
        if let ImplItem::Fn(method) = impl_item {
            calls.extend(expand_method(method)?);
        }
    }

    let self_ty = &item_impl.self_ty;
    Ok(quote! {
        #item_impl

        impl #self_ty {
            #[doc(hidden)]
            #[allow(unused_variables)]
            pub fn __revane_decorate(store: &::revane_web::metadata::MetadataStore) {
                let target = ::revane_web::metadata::Target::of::<Self>();
                #(#calls)*
            }
        }

        ::revane_web::inventory::submit! {
            ::revane_web::metadata::MetadataRegistration::new(<#self_ty>::__revane_decorate)
        }
    })
}

/// 取出并去掉方法上的属性，返回该方法的元数据写入语句
fn expand_method(method: &mut ImplItemFn) -> syn::Result<Vec<TokenStream2>> {
    let mut method_attrs = Vec::new();
    let mut kept = Vec::new();
    for attr in method.attrs.drain(..) {
        match parse_method_attr(&attr)? {
            Some(parsed) => method_attrs.push(parsed),
            None => kept.push(attr),
        }
    }
    method.attrs = kept;

    let mut bindings: Vec<(Option<ParamAttr>, Type, proc_macro2::Span)> = Vec::new();
    for input in method.sig.inputs.iter_mut() {
        let FnArg::Typed(pat_type) = input else {
            continue;
        };
        let mut binding = None;
        let mut kept = Vec::new();
        for attr in pat_type.attrs.drain(..) {
            match parse_param_attr(&attr)? {
                Some(_) if binding.is_some() => {
                    return Err(syn::Error::new_spanned(
                        attr,
                        "a parameter can only have one binding attribute",
                    ));
                }
                Some(parsed) => binding = Some(parsed),
                None => kept.push(attr),
            }
        }
        pat_type.attrs = kept;
        bindings.push((binding, (*pat_type.ty).clone(), pat_type.span()));
    }

    if method_attrs.is_empty() {
        if let Some((_, _, span)) = bindings.iter().find(|(binding, _, _)| binding.is_some()) {
            return Err(syn::Error::new(
                *span,
                "binding attributes require a route mapping or #[model_attribute(\"name\")] on the method",
            ));
        }
        return Ok(Vec::new());
    }

    let method_key = method.sig.ident.unraw().to_string();
    let has_error_handler = method_attrs
        .iter()
        .any(|attr| matches!(attr, MethodAttr::ErrorHandler(_)));
    let binds_arguments = method_attrs
        .iter()
        .any(|attr| matches!(attr, MethodAttr::Mapping { .. } | MethodAttr::ModelAttribute(_)));

    if has_error_handler && binds_arguments {
        return Err(syn::Error::new_spanned(
            &method.sig.ident,
            "#[error_handler] cannot be combined with a route mapping or #[model_attribute]",
        ));
    }

    let mut calls = Vec::new();
    let mut bound = Vec::new();

    if binds_arguments {
        for (index, (binding, ty, span)) in bindings.into_iter().enumerate() {
            let Some(binding) = binding else {
                return Err(syn::Error::new(
                    span,
                    "parameter needs a binding attribute such as #[param], #[query] or #[body]",
                ));
            };
            if let Type::Reference(reference) = &ty {
                return Err(syn::Error::new_spanned(
                    reference,
                    "bound parameters must be owned types",
                ));
            }
            bound.push((index, BoundParam { attr: binding, ty }));
        }

        for (index, param) in bound.iter().rev() {
            calls.push(parameter_call(method, &method_key, *index, &param.attr)?);
        }
    } else if has_error_handler {
        if let Some((_, _, span)) = bindings.iter().find(|(binding, _, _)| binding.is_some()) {
            return Err(syn::Error::new(
                *span,
                "error handler parameters are positional: error, request, response",
            ));
        }
        if bindings.len() > 3 {
            return Err(syn::Error::new_spanned(
                &method.sig.inputs,
                "error handlers take at most three parameters: error, request, response",
            ));
        }
    } else if let Some((_, _, span)) = bindings.iter().find(|(binding, _, _)| binding.is_some()) {
        return Err(syn::Error::new(
            *span,
            "binding attributes require a route mapping or #[model_attribute(\"name\")] on the method",
        ));
    }

    let bound: Vec<BoundParam> = bound.into_iter().map(|(_, param)| param).collect();
    let arity = method
        .sig
        .inputs
        .iter()
        .filter(|input| matches!(input, FnArg::Typed(_)))
        .count();

    for attr in method_attrs.iter().rev() {
        let call = match attr {
            MethodAttr::Mapping { methods, args } => {
                let url = args.path();
                let options = args.options_tokens();
                let handler = handler_closure(method, &bound);
                quote! {
                    ::revane_web::decorators::request_mapping(
                        store, target, #method_key, #methods, #url, #options, #handler,
                    );
                }
            }
            MethodAttr::ModelAttribute(name) => {
                let converter = converter_closure(method, &bound);
                quote! {
                    ::revane_web::decorators::model_attribute_method(
                        store, target, #method_key, #name, #converter,
                    );
                }
            }
            MethodAttr::ErrorHandler(code) => {
                let code = match code {
                    Some(code) => quote!(::core::option::Option::Some(#code)),
                    None => quote!(::core::option::Option::None),
                };
                let function = error_handler_closure(method, arity);
                quote! {
                    ::revane_web::decorators::error_handler(
                        store, target, #method_key, #code, #function,
                    );
                }
            }
            MethodAttr::ResponseStatus(status) => quote! {
                ::revane_web::decorators::response_status(store, target, #method_key, #status);
            },
        };
        calls.push(call);
    }

    Ok(calls)
}

fn parameter_call(
    method: &ImplItemFn,
    method_key: &str,
    index: usize,
    attr: &ParamAttr,
) -> syn::Result<TokenStream2> {
    let call = match attr {
        ParamAttr::SubValue { kind, name } => {
            let name = match name {
                Some(name) => name.value(),
                None => parameter_name(&method.sig, index)?,
            };
            if *kind == Kind::ModelAttribute {
                quote! {
                    ::revane_web::decorators::model_attribute_parameter(
                        store, target, #method_key, #name,
                    );
                }
            } else {
                let kind = kind.tokens();
                quote! {
                    ::revane_web::decorators::sub_value_parameter(
                        store, target, #method_key, #kind, #name,
                    );
                }
            }
        }
        ParamAttr::WholeValue { kind } => {
            let kind = kind.tokens();
            quote! {
                ::revane_web::decorators::whole_value_parameter(store, target, #method_key, #kind);
            }
        }
    };
    Ok(call)
}
