use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{Data, DeriveInput, Fields, Ident, LitStr, Type, parse_macro_input, spanned::Spanned};

/// Derives `guardctx::Entity` for a struct with named fields.
///
/// The key is the field marked `#[key]`; without one, a field named `id`
/// (or `ID`) is used. The set name defaults to the struct name and can be
/// overridden with `#[entity(name = "...")]`.
#[proc_macro_derive(Entity, attributes(entity, key))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand_entity(input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

struct EntityOptions {
    name: Option<String>,
}

fn expand_entity(input: DeriveInput) -> syn::Result<TokenStream2> {
    let struct_name = input.ident;

    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            input.generics,
            "Entity does not support generic structs",
        ));
    }

    let options = parse_entity_options(&input.attrs)?;

    let data_struct = match input.data {
        Data::Struct(data) => data,
        _ => {
            return Err(syn::Error::new(
                struct_name.span(),
                "Entity can only be derived for structs",
            ));
        }
    };

    let named_fields = match data_struct.fields {
        Fields::Named(fields) => fields,
        _ => {
            return Err(syn::Error::new(
                struct_name.span(),
                "Entity requires named fields",
            ));
        }
    };

    let mut marked: Vec<(Ident, Type)> = Vec::new();
    let mut conventional: Option<(Ident, Type)> = None;

    for field in named_fields.named {
        let ident = field
            .ident
            .clone()
            .ok_or_else(|| syn::Error::new(field.span(), "Entity requires named fields"))?;

        if field.attrs.iter().any(|attr| attr.path().is_ident("key")) {
            marked.push((ident, field.ty));
            continue;
        }

        let lowered = ident.to_string().to_ascii_lowercase();
        if lowered == "id" && conventional.is_none() {
            conventional = Some((ident, field.ty));
        }
    }

    if marked.len() > 1 {
        return Err(syn::Error::new(
            struct_name.span(),
            "Entity supports a single #[key] field",
        ));
    }

    let (key_ident, key_ty) = match marked.pop().or(conventional) {
        Some(key) => key,
        None => {
            return Err(syn::Error::new(
                struct_name.span(),
                "Entity requires a #[key] field or a field named `id`",
            ));
        }
    };

    let set_name = options.name.unwrap_or_else(|| struct_name.to_string());

    Ok(quote! {
        impl ::guardctx::Entity for #struct_name {
            type Key = #key_ty;
            const NAME: &'static str = #set_name;

            fn key(&self) -> Self::Key {
                ::core::clone::Clone::clone(&self.#key_ident)
            }
        }
    })
}

fn parse_entity_options(attrs: &[syn::Attribute]) -> syn::Result<EntityOptions> {
    let mut options = EntityOptions { name: None };

    for attr in attrs {
        if !attr.path().is_ident("entity") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") || meta.path.is_ident("set") {
                let value = meta.value()?;
                let lit: LitStr = value.parse()?;
                options.name = Some(lit.value());
                return Ok(());
            }

            Err(meta.error("Unsupported entity attribute. Supported: name = \"...\""))
        })?;
    }

    Ok(options)
}
