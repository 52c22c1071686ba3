//! Attribute macros backing `#[core_async::test]` and `#[core_async::main]`.
//!
//! Both wrap an `async fn` into a synchronous function that drives the body
//! with `core_async::runtime::block_on`, so crates never name tokio in their
//! entry points or tests.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, ItemFn};

#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
    wrap(attr, item, true)
}

#[proc_macro_attribute]
pub fn main(attr: TokenStream, item: TokenStream) -> TokenStream {
    wrap(attr, item, false)
}

fn wrap(attr: TokenStream, item: TokenStream, is_test: bool) -> TokenStream {
    if !attr.is_empty() {
        let tokens = proc_macro2::TokenStream::from(attr);
        return syn::Error::new_spanned(tokens, "core_async attribute macros take no arguments")
            .to_compile_error()
            .into();
    }

    let ItemFn {
        attrs,
        vis,
        mut sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.take().is_none() {
        return syn::Error::new_spanned(sig.fn_token, "core_async attribute macros require `async fn`")
            .to_compile_error()
            .into();
    }

    let test_attr = if is_test {
        quote!(#[test])
    } else {
        quote!()
    };

    quote! {
        #test_attr
        #(#attrs)*
        #vis #sig {
            ::core_async::runtime::block_on(async move #block)
        }
    }
    .into()
}
