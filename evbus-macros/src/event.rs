use proc_macro::TokenStream;
use quote::quote;
use syn::punctuated::Punctuated;
use syn::spanned::Spanned;
use syn::{
    Attribute, Ident, Item, LitStr, Result, Token, Type, parse::Parse, parse::ParseStream,
    parse_macro_input,
};

/// #[event] 宏实现
/// - 仅支持结构体与枚举
/// - 合并派生：`Debug`, `Clone`, `serde::Serialize`
/// - 生成 `::evbus::event::Event` 实现（EVENT_TYPE/Output）
/// - 支持：`#[event(event_type = "...", output = Type)]`
pub(crate) fn expand(attr: TokenStream, item: TokenStream) -> TokenStream {
    let cfg = parse_macro_input!(attr as EventAttrConfig);
    let mut input = parse_macro_input!(item as Item);

    let (attrs, ident, generics) = match &mut input {
        Item::Struct(s) => (&mut s.attrs, s.ident.clone(), s.generics.clone()),
        Item::Enum(e) => (&mut e.attrs, e.ident.clone(), e.generics.clone()),
        other => {
            return syn::Error::new(
                other.span(),
                "#[event] can only be used on struct or enum types",
            )
            .to_compile_error()
            .into();
        }
    };

    let required: Vec<syn::Path> = vec![
        syn::parse_quote!(Debug),
        syn::parse_quote!(Clone),
        syn::parse_quote!(serde::Serialize),
    ];
    if let Err(err) = ensure_derives(attrs, &required) {
        return err.to_compile_error().into();
    }

    let event_type = cfg
        .event_type
        .unwrap_or_else(|| LitStr::new(&ident.to_string(), ident.span()));
    let output = cfg.output.unwrap_or_else(|| syn::parse_quote! { () });
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let out = quote! {
        #input

        impl #impl_generics ::evbus::event::Event for #ident #ty_generics #where_clause {
            const EVENT_TYPE: &'static str = #event_type;
            type Output = #output;
        }
    };

    TokenStream::from(out)
}

/// 将 `required` 与已有的 derive 合并为一条置于最前的 `#[derive(...)]`
///
/// 以路径末段判重，`Serialize` 与 `serde::Serialize` 视为同一项，保留 `required` 中的写法。
/// derive 置于最前，`#[serde(...)]` 等辅助属性才能被识别。
fn ensure_derives(attrs: &mut Vec<Attribute>, required: &[syn::Path]) -> Result<()> {
    let mut derives: Vec<syn::Path> = required.to_vec();
    let mut rest = Vec::with_capacity(attrs.len());

    for attr in attrs.drain(..) {
        if !attr.path().is_ident("derive") {
            rest.push(attr);
            continue;
        }
        let listed = attr.parse_args_with(Punctuated::<syn::Path, Token![,]>::parse_terminated)?;
        for path in listed {
            if !derives.iter().any(|d| same_derive(d, &path)) {
                derives.push(path);
            }
        }
    }

    attrs.push(syn::parse_quote!(#[derive(#(#derives),*)]));
    attrs.extend(rest);
    Ok(())
}

fn same_derive(a: &syn::Path, b: &syn::Path) -> bool {
    match (a.segments.last(), b.segments.last()) {
        (Some(x), Some(y)) => x.ident == y.ident,
        _ => false,
    }
}

// 解析 event 宏键值参数：event_type = "<str>"、output = <Type>
struct EventAttrConfig {
    event_type: Option<LitStr>,
    output: Option<Type>,
}

impl Parse for EventAttrConfig {
    fn parse(input: ParseStream) -> Result<Self> {
        let mut event_type: Option<LitStr> = None;
        let mut output: Option<Type> = None;

        while !input.is_empty() {
            let key: Ident = input.parse()?;
            input.parse::<Token![=]>()?;

            match key.to_string().as_str() {
                "event_type" => {
                    if event_type.is_some() {
                        return Err(syn::Error::new(
                            key.span(),
                            "duplicate key 'event_type' in attribute",
                        ));
                    }
                    let lit: LitStr = input.parse()?;
                    if lit.value().is_empty() {
                        return Err(syn::Error::new(
                            lit.span(),
                            "'event_type' must not be empty",
                        ));
                    }
                    event_type = Some(lit);
                }
                "output" => {
                    if output.is_some() {
                        return Err(syn::Error::new(
                            key.span(),
                            "duplicate key 'output' in attribute",
                        ));
                    }
                    output = Some(input.parse()?);
                }
                _ => {
                    return Err(syn::Error::new(
                        key.span(),
                        "unknown key; expected 'event_type' | 'output'",
                    ));
                }
            }

            if input.is_empty() {
                break;
            }
            input.parse::<Token![,]>()?;
        }

        Ok(Self { event_type, output })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_keys() {
        let cfg: EventAttrConfig =
            syn::parse_str(r#"event_type = "task.process", output = Vec<String>"#).unwrap();
        assert_eq!(cfg.event_type.unwrap().value(), "task.process");
        assert!(cfg.output.is_some());
    }

    #[test]
    fn empty_attribute_uses_defaults() {
        let cfg: EventAttrConfig = syn::parse_str("").unwrap();
        assert!(cfg.event_type.is_none());
        assert!(cfg.output.is_none());
    }

    #[test]
    fn rejects_unknown_and_duplicate_keys() {
        assert!(syn::parse_str::<EventAttrConfig>("version = 1").is_err());
        assert!(
            syn::parse_str::<EventAttrConfig>(r#"event_type = "a", event_type = "b""#).is_err()
        );
        assert!(syn::parse_str::<EventAttrConfig>(r#"event_type = """#).is_err());
    }

    fn derive_names(attr: &Attribute) -> Vec<String> {
        attr.parse_args_with(Punctuated::<syn::Path, Token![,]>::parse_terminated)
            .unwrap()
            .iter()
            .map(|p| p.segments.last().unwrap().ident.to_string())
            .collect()
    }

    #[test]
    fn derives_are_merged_ahead_of_helper_attributes() {
        let mut attrs: Vec<Attribute> = vec![
            syn::parse_quote!(#[serde(rename_all = "camelCase")]),
            syn::parse_quote!(#[derive(Serialize, PartialEq)]),
            syn::parse_quote!(#[derive(Clone)]),
        ];
        let required: Vec<syn::Path> = vec![
            syn::parse_quote!(Debug),
            syn::parse_quote!(Clone),
            syn::parse_quote!(serde::Serialize),
        ];
        ensure_derives(&mut attrs, &required).unwrap();

        assert_eq!(attrs.len(), 2);
        assert!(attrs[0].path().is_ident("derive"));
        assert_eq!(
            derive_names(&attrs[0]),
            vec!["Debug", "Clone", "Serialize", "PartialEq"]
        );
        assert!(attrs[1].path().is_ident("serde"));
    }

    #[test]
    fn malformed_derive_list_is_reported() {
        let mut attrs: Vec<Attribute> = vec![syn::parse_quote!(#[derive(Debug, "oops")])];
        assert!(ensure_derives(&mut attrs, &[]).is_err());
    }
}
