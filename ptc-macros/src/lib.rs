//! Procedural macros for ptc-lisp builtin functions
//!
//! Provides the `#[builtin]` attribute macro that registers a Rust function
//! into the interpreter's builtin registry via `inventory`, so builtin
//! modules stay self-contained and the registry is assembled at link time.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, ItemFn};

/// Parsed `#[builtin(...)]` arguments.
struct BuiltinArgs {
    name: String,
    category: String,
    aliases: Vec<String>,
    effectful: bool,
}

/// Parse attribute arguments: `name = "..."`, `category = "..."`,
/// `aliases("a", "b")`, `effectful`.
fn parse_builtin_args(attr_stream: TokenStream) -> BuiltinArgs {
    let attr_str = attr_stream.to_string();

    let grab = |key: &str| -> String {
        let marker = format!("{} = \"", key);
        if let Some(start) = attr_str.find(&marker) {
            let rest = &attr_str[start + marker.len()..];
            if let Some(end) = rest.find('"') {
                return rest[..end].to_string();
            }
        }
        String::new()
    };

    let mut aliases = Vec::new();
    if let Some(start) = attr_str.find("aliases") {
        let rest = &attr_str[start..];
        if let (Some(open), Some(close)) = (rest.find('('), rest.find(')')) {
            aliases = rest[open + 1..close]
                .split(',')
                .map(|s| s.trim().trim_matches('"').to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
    }

    // `effectful` is a bare word; make sure we don't match it inside a string
    let effectful = attr_str
        .split(',')
        .any(|part| part.trim() == "effectful");

    BuiltinArgs {
        name: grab("name"),
        category: grab("category"),
        aliases,
        effectful,
    }
}

/// Attribute macro for defining interpreter builtin functions.
///
/// Emits the function unchanged plus an `inventory::submit!` of a
/// `BuiltinSpec`, which `builtins::registry()` collects into the lookup
/// table at first use.
///
/// # Attribute Arguments
///
/// - `name`: the Lisp name for this builtin (e.g., `"sum-by"`)
/// - `category`: registry category (e.g., `"Aggregation"`)
/// - `aliases(...)`: additional Lisp names bound to the same function
/// - `effectful`: the function has signature
///   `fn(&mut Machine, &[Value]) -> Result<Value, Flow>` and may call back
///   into the evaluator (HOFs, println); without it the signature is
///   `fn(&[Value]) -> Result<Value, Error>`
///
/// # Example
///
/// ```ignore
/// #[builtin(name = "inc", category = "Math")]
/// pub fn inc(args: &[Value]) -> Result<Value, Error> {
///     // ...
/// }
/// ```
#[proc_macro_attribute]
pub fn builtin(attr: TokenStream, item: TokenStream) -> TokenStream {
    let func = parse_macro_input!(item as ItemFn);
    let args = parse_builtin_args(attr);

    let fn_name = func.sig.ident.clone();
    let lisp_name = if args.name.is_empty() {
        fn_name.to_string().replace('_', "-")
    } else {
        args.name
    };
    let category = if args.category.is_empty() {
        "Other".to_string()
    } else {
        args.category
    };
    let aliases = args.aliases;

    let kind = if args.effectful {
        quote! { crate::builtins::BuiltinKind::Effectful(#fn_name) }
    } else {
        quote! { crate::builtins::BuiltinKind::Pure(#fn_name) }
    };

    let expanded = quote! {
        #func

        inventory::submit! {
            crate::builtins::BuiltinSpec {
                name: #lisp_name,
                aliases: &[#(#aliases),*],
                category: #category,
                kind: #kind,
            }
        }
    };

    TokenStream::from(expanded)
}
