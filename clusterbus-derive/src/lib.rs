//! Derive macros for clusterbus.
//!
//! This crate provides the `#[derive(Event)]` macro, which implements the
//! `clusterbus::Event` trait from a few attributes.

use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::quote;
use syn::spanned::Spanned;
use syn::{parse_macro_input, Attribute, Data, DeriveInput, LitStr, Member, Type};

/// Derives `clusterbus::Event` for structs and enums.
///
/// By default the namespace is the defining module's path and the name is
/// the type's identifier.
///
/// # Attributes
///
/// On the type:
///
/// - `#[event(namespace = "...")]` overrides the namespace.
/// - `#[event(name = "...")]` overrides the name.
/// - `#[event(serde)]` makes the payload projection carry the value
///   serialized with `serde_json`. The type must implement `Serialize`.
///
/// On one struct field:
///
/// - `#[event(parent)]` declares the field's type as the parent event type.
///   Listeners bound to the parent receive a reference to this field.
///
/// # Examples
///
/// ```rust
/// use clusterbus::Event;
///
/// #[derive(Event, Clone, Debug)]
/// #[event(namespace = "tigase.eventbus")]
/// struct Event1 {
///     value: u32,
/// }
///
/// #[derive(Event, Clone, Debug)]
/// #[event(namespace = "tigase.eventbus", name = "Event12")]
/// struct Event12 {
///     #[event(parent)]
///     base: Event1,
/// }
///
/// let leaf = Event12::event_type();
/// assert_eq!(leaf.namespace(), "tigase.eventbus");
/// assert_eq!(leaf.parent(), Some(Event1::event_type()));
/// ```
///
/// ## Enum events
///
/// ```rust
/// use clusterbus::Event;
///
/// #[derive(Event, Clone, Debug)]
/// enum NodeEvent {
///     Joined { node: String },
///     Left { node: String, reason: String },
/// }
///
/// assert_eq!(NodeEvent::event_type().name(), "NodeEvent");
/// ```
#[proc_macro_derive(Event, attributes(event))]
pub fn derive_event(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_event(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

/// Type-level options collected from `#[event(...)]`.
#[derive(Default)]
struct EventOptions {
    namespace: Option<LitStr>,
    name: Option<LitStr>,
    serde: bool,
}

impl EventOptions {
    fn from_attrs(attrs: &[Attribute]) -> syn::Result<Self> {
        let mut options = Self::default();
        for attr in attrs.iter().filter(|attr| attr.path().is_ident("event")) {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("namespace") {
                    options.namespace = Some(non_blank(meta.value()?.parse()?)?);
                    Ok(())
                } else if meta.path.is_ident("name") {
                    options.name = Some(non_blank(meta.value()?.parse()?)?);
                    Ok(())
                } else if meta.path.is_ident("serde") {
                    options.serde = true;
                    Ok(())
                } else {
                    Err(meta.error("expected `namespace`, `name` or `serde`"))
                }
            })?;
        }
        Ok(options)
    }
}

fn non_blank(lit: LitStr) -> syn::Result<LitStr> {
    if lit.value().trim().is_empty() {
        Err(syn::Error::new(lit.span(), "event namespace and name must not be blank"))
    } else {
        Ok(lit)
    }
}

/// The field marked `#[event(parent)]`.
struct ParentField {
    member: Member,
    ty: Type,
}

fn is_parent_attr(attr: &Attribute) -> syn::Result<bool> {
    if !attr.path().is_ident("event") {
        return Ok(false);
    }
    let mut parent = false;
    attr.parse_nested_meta(|meta| {
        if meta.path.is_ident("parent") {
            parent = true;
            Ok(())
        } else {
            Err(meta.error("expected `parent`"))
        }
    })?;
    Ok(parent)
}

fn find_parent(input: &DeriveInput) -> syn::Result<Option<ParentField>> {
    match &input.data {
        Data::Struct(data) => {
            let mut found: Option<ParentField> = None;
            for (index, field) in data.fields.iter().enumerate() {
                let mut marked = false;
                for attr in &field.attrs {
                    marked |= is_parent_attr(attr)?;
                }
                if !marked {
                    continue;
                }
                if found.is_some() {
                    return Err(syn::Error::new(
                        field.span(),
                        "an event can declare at most one `#[event(parent)]` field",
                    ));
                }
                let member = match &field.ident {
                    Some(ident) => Member::Named(ident.clone()),
                    None => Member::Unnamed(syn::Index::from(index)),
                };
                found = Some(ParentField {
                    member,
                    ty: field.ty.clone(),
                });
            }
            Ok(found)
        }
        Data::Enum(data) => {
            for variant in &data.variants {
                for field in &variant.fields {
                    for attr in &field.attrs {
                        if is_parent_attr(attr)? {
                            return Err(syn::Error::new(
                                field.span(),
                                "`#[event(parent)]` is only supported on struct fields",
                            ));
                        }
                    }
                }
            }
            Ok(None)
        }
        Data::Union(_) => Err(syn::Error::new(
            Span::call_site(),
            "Event cannot be derived for union types",
        )),
    }
}

fn expand_event(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let options = EventOptions::from_attrs(&input.attrs)?;
    let parent = find_parent(input)?;

    let ident = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let namespace = match &options.namespace {
        Some(lit) => quote!(#lit),
        None => quote!(::core::module_path!()),
    };
    let name = options
        .name
        .clone()
        .unwrap_or_else(|| LitStr::new(&ident.to_string(), ident.span()));

    let parent_type = match &parent {
        Some(ParentField { ty, .. }) => quote! {
            ::core::option::Option::Some(
                <#ty as ::clusterbus::Event>::event_type as fn() -> ::clusterbus::EventType
            )
        },
        None => quote!(::core::option::Option::None),
    };

    let upcast = parent.as_ref().map(|ParentField { member, .. }| {
        quote! {
            fn upcast(
                &self,
                target: ::core::any::TypeId,
            ) -> ::core::option::Option<&dyn ::core::any::Any> {
                if target == ::core::any::TypeId::of::<Self>() {
                    return ::core::option::Option::Some(self);
                }
                ::clusterbus::Event::upcast(&self.#member, target)
            }
        }
    });

    let to_content = options.serde.then(|| {
        quote! {
            fn to_content(&self) -> ::clusterbus::__private::serde_json::Value {
                ::clusterbus::__private::serde_json::to_value(self)
                    .unwrap_or(::clusterbus::__private::serde_json::Value::Null)
            }
        }
    });

    Ok(quote! {
        impl #impl_generics ::clusterbus::Event for #ident #ty_generics #where_clause {
            fn event_type() -> ::clusterbus::EventType {
                ::clusterbus::EventType::of::<Self>(#namespace, #name, #parent_type)
            }

            #upcast

            #to_content
        }
    })
}
