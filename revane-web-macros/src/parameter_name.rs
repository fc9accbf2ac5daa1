//! 参数名解析
//!
//! 绑定属性未给出名称时，使用函数签名中的参数名。

use syn::{ext::IdentExt, FnArg, Pat, Signature};

/// 第 `index` 个参数（不含 `self`）的名称
pub fn parameter_name(sig: &Signature, index: usize) -> syn::Result<String> {
    let arg = sig
        .inputs
        .iter()
        .filter_map(|input| match input {
            FnArg::Typed(pat_type) => Some(pat_type),
            FnArg::Receiver(_) => None,
        })
        .nth(index)
        .ok_or_else(|| {
            syn::Error::new_spanned(
                &sig.ident,
                format!("`{}` has no parameter at position {}", sig.ident, index),
            )
        })?;

    match arg.pat.as_ref() {
        Pat::Ident(pat_ident) => Ok(pat_ident.ident.unraw().to_string()),
        other => Err(syn::Error::new_spanned(
            other,
            "cannot infer a name from this pattern, pass one explicitly: #[query(\"name\")]",
        )),
    }
}
