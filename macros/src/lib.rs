use proc_macro::TokenStream;

use quote::quote;
use syn::{parse_macro_input, ItemFn};

/// Wraps a function body in a fresh [`SimulationController`](../eventry/controller/batch/struct.SimulationController.html),
/// running it to completion once the body returns.
#[proc_macro_attribute]
pub fn main(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let item = parse_macro_input!(item as ItemFn);

    let attributes = &item.attrs;
    let visibility = &item.vis;
    let signature = &item.sig;
    let body = &item.block;

    let result = quote! {
        #(#attributes)*
        #visibility #signature {
            ::eventry::controller::batch::run(move |controller| #body)
        }
    };

    result.into()
}
