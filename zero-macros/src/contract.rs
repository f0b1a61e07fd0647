//! Contract derive macro implementation

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_quote, Attribute, Data, DeriveInput, Fields, GenericParam, Meta};

/// Implementation of the Contract derive macro
pub fn derive_contract_impl(mut input: DeriveInput) -> TokenStream {
    let name = &input.ident;
    let name_str = name.to_string();

    let body = match &input.data {
        Data::Struct(data_struct) => match &data_struct.fields {
            Fields::Named(fields) => {
                let fields = fields.named.iter().map(|field| {
                    let ident = field.ident.as_ref().map(|i| i.to_string());
                    let ty = &field.ty;
                    quote! {
                        ::zero::Field::new(#ident, <#ty as ::zero::Contract>::descriptor())
                    }
                });
                quote! {
                    ::zero::TypeDescriptor::Record {
                        name: #name_str.to_string(),
                        fields: ::std::vec![#(#fields),*],
                    }
                }
            }
            _ => {
                return error(
                    name,
                    "Contract can only be derived for structs with named fields",
                )
            }
        },
        Data::Enum(data_enum) => {
            let all_unit = data_enum
                .variants
                .iter()
                .all(|v| matches!(v.fields, Fields::Unit));
            let all_newtype = data_enum
                .variants
                .iter()
                .all(|v| matches!(&v.fields, Fields::Unnamed(f) if f.unnamed.len() == 1));

            if all_unit {
                let variants = data_enum.variants.iter().map(|v| v.ident.to_string());
                quote! {
                    ::zero::TypeDescriptor::Enum {
                        name: #name_str.to_string(),
                        variants: ::std::vec![#(#variants.to_string()),*],
                    }
                }
            } else if all_newtype {
                if !is_untagged(&input.attrs) {
                    return error(name, "union enums must be marked #[serde(untagged)]");
                }
                let variants = data_enum.variants.iter().filter_map(|v| {
                    let variant = v.ident.to_string();
                    match &v.fields {
                        Fields::Unnamed(f) => {
                            let ty = &f.unnamed[0].ty;
                            Some(quote! {
                                (#variant.to_string(), <#ty as ::zero::Contract>::descriptor())
                            })
                        }
                        _ => None,
                    }
                });
                quote! {
                    ::zero::TypeDescriptor::Union {
                        name: #name_str.to_string(),
                        variants: ::std::vec![#(#variants),*],
                    }
                }
            } else {
                return error(
                    name,
                    "Contract enums must have only unit variants or only single-field tuple variants",
                );
            }
        }
        Data::Union(_) => return error(name, "Contract cannot be derived for unions"),
    };

    // Generic parameters must themselves be contracts
    for param in input.generics.params.iter_mut() {
        if let GenericParam::Type(ty) = param {
            ty.bounds.push(parse_quote!(::zero::Contract));
        }
    }
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let expanded = quote! {
        impl #impl_generics ::zero::Contract for #name #ty_generics #where_clause {
            fn descriptor() -> ::zero::TypeDescriptor {
                #body
            }
        }
    };

    TokenStream::from(expanded)
}

/// Look for `untagged` inside a #[serde(...)] attribute
fn is_untagged(attrs: &[Attribute]) -> bool {
    attrs.iter().any(|attr| {
        if !attr.path().is_ident("serde") {
            return false;
        }
        match &attr.meta {
            Meta::List(list) => list
                .tokens
                .to_string()
                .split(',')
                .any(|t| t.trim() == "untagged"),
            _ => false,
        }
    })
}

fn error(name: &syn::Ident, message: &str) -> TokenStream {
    syn::Error::new_spanned(name, message)
        .to_compile_error()
        .into()
}
