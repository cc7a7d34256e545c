//! `#[localset_test]`: turns `async fn name() { body }` into a `#[test]` that
//! runs `body` on a current-thread tokio runtime inside a `tokio::task::LocalSet`,
//! so `tokio::task::spawn_local` works in the test.

use proc_macro::{Delimiter, Group, TokenStream, TokenTree};

#[proc_macro_attribute]
pub fn localset_test(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let mut tokens: Vec<TokenTree> = item.into_iter().collect();

    // The body is the trailing brace group.
    let body = match tokens.pop() {
        Some(TokenTree::Group(g)) if g.delimiter() == Delimiter::Brace => g,
        _ => panic!("#[localset_test] expects an `async fn` with a body"),
    };

    // Drop the `async` keyword from the signature.
    let before = tokens.len();
    tokens.retain(|t| !matches!(t, TokenTree::Ident(i) if i.to_string() == "async"));
    assert!(tokens.len() < before, "#[localset_test] expects an `async fn`");

    let wrapper: TokenStream = format!(
        "{{ \
            let __rt = ::tokio::runtime::Builder::new_current_thread() \
                .enable_all() \
                .build() \
                .expect(\"failed to build tokio runtime\"); \
            ::tokio::task::LocalSet::new().block_on(&__rt, async move {}) \
        }}",
        body
    )
    .parse()
    .expect("generated wrapper parses");

    let mut out: TokenStream = "#[::core::prelude::v1::test]".parse().unwrap();
    out.extend(tokens);
    out.extend([TokenTree::Group(Group::new(Delimiter::Brace, wrapper))]);
    out
}
