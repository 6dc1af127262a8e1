//! Proc macros for model output contracts.
//!
//! Provides `#[derive(OutputContract)]` to generate the JSON schema a model
//! response must satisfy, straight from a struct definition.
//!
//! # Example
//!
//! ```ignore
//! /// Offer adventure premises for the selected companions
//! #[derive(OutputContract, Deserialize)]
//! #[contract(name = "offer_scenarios")]
//! struct ScenarioBatch {
//!     /// Between two and five premises
//!     #[contract(min_items = 2, max_items = 5)]
//!     scenarios: Vec<ScenarioOption>,
//! }
//! ```

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::punctuated::Punctuated;
use syn::{
    parse_macro_input, DeriveInput, Field, Lit, LitInt, LitStr, Meta, MetaNameValue, Token, Type,
};

/// Derive macro implementing `story_core::contract::OutputContract`.
///
/// # Attributes
///
/// - `#[contract(name = "...")]` - Override the contract name (defaults to snake_case struct name)
/// - `#[contract(optional)]` on fields - Field is not required
/// - `#[serde(rename = "...")]` on fields - Used as the schema key, so the
///   schema names the key serde actually reads
/// - `#[contract(rename = "...")]` on fields - Allowed only next to a matching
///   `#[serde(rename)]`
/// - `#[contract(min_items = N, max_items = M)]` on `Vec` fields - Bound the array length
/// - `#[contract(non_empty)]` on `String` fields - Reject empty strings
#[proc_macro_derive(OutputContract, attributes(contract))]
pub fn derive_output_contract(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_contract(input)
        .unwrap_or_else(|err| err.to_compile_error())
        .into()
}

/// Per-field options collected from `#[contract(...)]`.
#[derive(Default)]
struct FieldOptions {
    rename: Option<String>,
    optional: bool,
    non_empty: bool,
    min_items: Option<u64>,
    max_items: Option<u64>,
}

fn expand_contract(input: DeriveInput) -> syn::Result<TokenStream2> {
    let struct_name = &input.ident;
    let contract_name = get_contract_name(&input)?;
    let description = get_doc_comment(&input.attrs);
    reject_rename_all(&input)?;

    let fields = match &input.data {
        syn::Data::Struct(data) => match &data.fields {
            syn::Fields::Named(named) => &named.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    &input,
                    "OutputContract derive only supports structs with named fields",
                ))
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                &input,
                "OutputContract derive only supports structs",
            ))
        }
    };

    let mut property_tokens = Vec::new();
    let mut required_fields = Vec::new();

    for field in fields {
        let options = get_field_options(field)?;
        let field_name = match (options.rename.as_deref(), get_serde_rename(field)?) {
            (Some(rename), Some(key)) if rename == key => key,
            (Some(_), _) => {
                return Err(syn::Error::new_spanned(
                    field,
                    "pair #[contract(rename)] with a matching #[serde(rename)]",
                ))
            }
            (None, Some(key)) => key,
            (None, None) => field
                .ident
                .as_ref()
                .map(|ident| ident.to_string())
                .ok_or_else(|| syn::Error::new_spanned(field, "expected a named field"))?,
        };
        let field_desc = get_doc_comment(&field.attrs);
        let type_schema = type_to_schema(&field.ty, &options)?;

        let desc_token = if field_desc.is_empty() {
            quote! {}
        } else {
            quote! { property["description"] = serde_json::json!(#field_desc); }
        };

        property_tokens.push(quote! {
            {
                let mut property = #type_schema;
                #desc_token
                properties.insert(#field_name.to_string(), property);
            }
        });

        if !options.optional && !is_option_type(&field.ty) {
            required_fields.push(field_name);
        }
    }

    Ok(quote! {
        impl ::story_core::contract::OutputContract for #struct_name {
            fn contract_name() -> &'static str {
                #contract_name
            }

            fn contract_description() -> &'static str {
                #description
            }

            fn output_schema() -> serde_json::Value {
                let mut properties = serde_json::Map::new();
                #(#property_tokens)*

                let required: Vec<&str> = vec![#(#required_fields),*];

                serde_json::json!({
                    "type": "object",
                    "properties": properties,
                    "required": required
                })
            }
        }
    })
}

fn get_contract_name(input: &DeriveInput) -> syn::Result<String> {
    for attr in &input.attrs {
        if attr.path().is_ident("contract") {
            let meta = attr.parse_args::<Meta>()?;
            if let Meta::NameValue(nv) = meta {
                if nv.path.is_ident("name") {
                    if let syn::Expr::Lit(expr_lit) = &nv.value {
                        if let Lit::Str(s) = &expr_lit.lit {
                            return Ok(s.value());
                        }
                    }
                }
            }
        }
    }

    Ok(to_snake_case(&input.ident.to_string()))
}

fn get_field_options(field: &Field) -> syn::Result<FieldOptions> {
    let mut options = FieldOptions::default();
    for attr in &field.attrs {
        if !attr.path().is_ident("contract") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("optional") {
                options.optional = true;
            } else if meta.path.is_ident("non_empty") {
                options.non_empty = true;
            } else if meta.path.is_ident("rename") {
                options.rename = Some(meta.value()?.parse::<LitStr>()?.value());
            } else if meta.path.is_ident("min_items") {
                options.min_items = Some(meta.value()?.parse::<LitInt>()?.base10_parse()?);
            } else if meta.path.is_ident("max_items") {
                options.max_items = Some(meta.value()?.parse::<LitInt>()?.base10_parse()?);
            } else {
                return Err(meta.error("unsupported contract attribute"));
            }
            Ok(())
        })?;
    }

    if let (Some(min), Some(max)) = (options.min_items, options.max_items) {
        if min > max {
            return Err(syn::Error::new_spanned(
                field,
                "min_items must not exceed max_items",
            ));
        }
    }
    Ok(options)
}

/// Key serde deserializes this field from, if `#[serde(rename)]` sets one.
fn get_serde_rename(field: &Field) -> syn::Result<Option<String>> {
    for attr in &field.attrs {
        if !attr.path().is_ident("serde") {
            continue;
        }
        let items = attr.parse_args_with(Punctuated::<Meta, Token![,]>::parse_terminated)?;
        for item in items {
            match item {
                Meta::NameValue(nv) if nv.path.is_ident("rename") => {
                    return string_value(&nv.value).map(Some);
                }
                Meta::List(list) if list.path.is_ident("rename") => {
                    let pairs = list.parse_args_with(
                        Punctuated::<MetaNameValue, Token![,]>::parse_terminated,
                    )?;
                    if let Some(pair) = pairs.iter().find(|p| p.path.is_ident("deserialize")) {
                        return string_value(&pair.value).map(Some);
                    }
                }
                _ => {}
            }
        }
    }
    Ok(None)
}

/// Container-level `rename_all` would change every key serde reads.
fn reject_rename_all(input: &DeriveInput) -> syn::Result<()> {
    for attr in &input.attrs {
        if !attr.path().is_ident("serde") {
            continue;
        }
        let items = attr.parse_args_with(Punctuated::<Meta, Token![,]>::parse_terminated)?;
        if let Some(item) = items.iter().find(|m| m.path().is_ident("rename_all")) {
            return Err(syn::Error::new_spanned(
                item,
                "OutputContract does not support #[serde(rename_all)]; rename fields individually",
            ));
        }
    }
    Ok(())
}

fn string_value(expr: &syn::Expr) -> syn::Result<String> {
    match expr {
        syn::Expr::Lit(syn::ExprLit {
            lit: Lit::Str(s), ..
        }) => Ok(s.value()),
        other => Err(syn::Error::new_spanned(other, "expected a string literal")),
    }
}

fn get_doc_comment(attrs: &[syn::Attribute]) -> String {
    let mut docs = Vec::new();
    for attr in attrs {
        if attr.path().is_ident("doc") {
            if let Meta::NameValue(nv) = &attr.meta {
                if let syn::Expr::Lit(expr_lit) = &nv.value {
                    if let Lit::Str(s) = &expr_lit.lit {
                        docs.push(s.value().trim().to_string());
                    }
                }
            }
        }
    }
    docs.join(" ")
}

fn is_option_type(ty: &Type) -> bool {
    if let Type::Path(type_path) = ty {
        if let Some(segment) = type_path.path.segments.last() {
            return segment.ident == "Option";
        }
    }
    false
}

fn first_generic(segment: &syn::PathSegment) -> Option<&Type> {
    if let syn::PathArguments::AngleBracketed(args) = &segment.arguments {
        if let Some(syn::GenericArgument::Type(inner)) = args.args.first() {
            return Some(inner);
        }
    }
    None
}

fn type_to_schema(ty: &Type, options: &FieldOptions) -> syn::Result<TokenStream2> {
    let Type::Path(type_path) = ty else {
        return Ok(quote! { serde_json::json!({}) });
    };
    let Some(segment) = type_path.path.segments.last() else {
        return Ok(quote! { serde_json::json!({}) });
    };

    Ok(match segment.ident.to_string().as_str() {
        "String" | "str" => {
            if options.non_empty {
                quote! { serde_json::json!({"type": "string", "minLength": 1}) }
            } else {
                quote! { serde_json::json!({"type": "string"}) }
            }
        }
        "i8" | "i16" | "i32" | "i64" | "isize" | "u8" | "u16" | "u32" | "u64" | "usize" => {
            quote! { serde_json::json!({"type": "integer"}) }
        }
        "f32" | "f64" => quote! { serde_json::json!({"type": "number"}) },
        "bool" => quote! { serde_json::json!({"type": "boolean"}) },
        "Option" => match first_generic(segment) {
            Some(inner) => type_to_schema(inner, options)?,
            None => quote! { serde_json::json!({}) },
        },
        "Vec" => {
            let items = match first_generic(segment) {
                Some(inner) => type_to_schema(inner, &FieldOptions::default())?,
                None => quote! { serde_json::json!({}) },
            };
            let min_token = options
                .min_items
                .map(|min| quote! { schema["minItems"] = serde_json::json!(#min); });
            let max_token = options
                .max_items
                .map(|max| quote! { schema["maxItems"] = serde_json::json!(#max); });
            quote! {
                {
                    let mut schema = serde_json::json!({
                        "type": "array",
                        "items": #items
                    });
                    #min_token
                    #max_token
                    schema
                }
            }
        }
        // Anything else must itself derive OutputContract.
        _ => quote! { <#ty as ::story_core::contract::OutputContract>::output_schema() },
    })
}

fn to_snake_case(s: &str) -> String {
    let mut result = String::new();
    for (i, c) in s.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                result.push('_');
            }
            result.push(c.to_ascii_lowercase());
        } else {
            result.push(c);
        }
    }
    result
}
