use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{
    parse::{Parse, ParseStream},
    parse_macro_input,
    spanned::Spanned,
    BinOp, Block, Expr, ExprLit, ExprUnary, Ident, Pat, Stmt, Token, UnOp,
};

/// Build terms on a tape from plain arithmetic.
///
/// ```ignore
/// let tape = Tape::new();
/// scalargrad! { tape;
///     let x = 2.;
///     let y = tanh(x * x + 1.);
/// }
/// y.backward().unwrap();
/// ```
///
/// A literal bound by `let`, negative or not, becomes a named variable, other literals become
/// constants. `exp(e)`, `tanh(e)` and `powf(e, k)` map to the methods of the same name.
#[proc_macro]
pub fn scalargrad(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as MacroInput);

    let mut objs = vec![];
    for stmt in &input.stmts {
        if let Err(e) = traverse_stmt(&input.tape, stmt, &mut objs) {
            return e.to_compile_error().into();
        }
    }

    let expanded = quote! {
        #(#objs)*
    };

    TokenStream::from(expanded)
}

struct MacroInput {
    tape: Ident,
    stmts: Vec<Stmt>,
}

impl Parse for MacroInput {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let tape = input.parse()?;
        input.parse::<Token![;]>()?;
        let stmts = Block::parse_within(input)?;
        Ok(Self { tape, stmts })
    }
}

fn traverse_stmt(tape: &Ident, input: &Stmt, terms: &mut Vec<TokenStream2>) -> syn::Result<()> {
    let Stmt::Local(local) = input else {
        return Err(syn::Error::new(
            input.span(),
            "only `let` statements are supported",
        ));
    };
    let (Pat::Ident(id), Some(init)) = (&local.pat, &local.init) else {
        return Err(syn::Error::new(
            local.span(),
            "expected `let name = expression;`",
        ));
    };
    let name = id.ident.clone();
    let ts = match &*init.expr {
        Expr::Lit(lit) => quote! {
            let #name = #tape.term(stringify!(#name), (#lit) as f64);
        },
        Expr::Unary(ExprUnary {
            op: UnOp::Neg(_),
            expr,
            ..
        }) if matches!(&**expr, Expr::Lit(_)) => quote! {
            let #name = #tape.term(stringify!(#name), -((#expr) as f64));
        },
        ex => {
            let res = traverse_expr(tape, ex, terms)?;
            quote! {
                let #name = #res;
            }
        }
    };
    terms.push(ts);
    Ok(())
}

fn var_name(terms: &[TokenStream2]) -> String {
    format!("_a{}", terms.len())
}

fn format_constant(tape: &Ident, ex: &ExprLit, terms: &mut Vec<TokenStream2>) -> Ident {
    let name = Ident::new(&var_name(terms), ex.span());
    let ts = quote! {
        let #name = #tape.constant((#ex) as f64);
    };
    terms.push(ts);
    name
}

fn push_term(terms: &mut Vec<TokenStream2>, ex: &Expr, value: TokenStream2) -> Ident {
    let name = Ident::new(&var_name(terms), ex.span());
    terms.push(quote! {
        let #name = #value;
    });
    name
}

fn traverse_expr(tape: &Ident, input: &Expr, terms: &mut Vec<TokenStream2>) -> syn::Result<Ident> {
    match input {
        Expr::Binary(ex) => {
            let lhs = traverse_expr(tape, &ex.left, terms)?;
            let rhs = traverse_expr(tape, &ex.right, terms)?;
            let binop = match ex.op {
                BinOp::Add(_) => quote! { #lhs + #rhs },
                BinOp::Sub(_) => quote! { #lhs - #rhs },
                BinOp::Mul(_) => quote! { #lhs * #rhs },
                BinOp::Div(_) => quote! { #lhs / #rhs },
                _ => return Err(syn::Error::new(ex.op.span(), "unsupported operator")),
            };
            Ok(push_term(terms, input, binop))
        }
        Expr::Unary(ex) if matches!(ex.op, UnOp::Neg(_)) => {
            let term = traverse_expr(tape, &ex.expr, terms)?;
            Ok(push_term(terms, input, quote! { -#term }))
        }
        Expr::Paren(ex) => traverse_expr(tape, &ex.expr, terms),
        Expr::Lit(lit) => Ok(format_constant(tape, lit, terms)),
        Expr::Path(path) => path
            .path
            .get_ident()
            .cloned()
            .ok_or_else(|| syn::Error::new(path.span(), "expected a variable name")),
        Expr::Call(call) => {
            let Expr::Path(func) = &*call.func else {
                return Err(syn::Error::new(call.func.span(), "expected a function name"));
            };
            let func_name = func
                .path
                .get_ident()
                .map(|ident| ident.to_string())
                .unwrap_or_default();
            let args: Vec<_> = call.args.iter().collect();
            let call_ts = match (func_name.as_str(), args.as_slice()) {
                ("exp", [arg]) => {
                    let arg = traverse_expr(tape, arg, terms)?;
                    quote! { #arg.exp() }
                }
                ("tanh", [arg]) => {
                    let arg = traverse_expr(tape, arg, terms)?;
                    quote! { #arg.tanh() }
                }
                ("powf", [arg, Expr::Lit(exponent)]) => {
                    let arg = traverse_expr(tape, arg, terms)?;
                    quote! { #arg.powf((#exponent) as f64) }
                }
                ("powf", [arg, exponent]) => {
                    let arg = traverse_expr(tape, arg, terms)?;
                    let exponent = traverse_expr(tape, exponent, terms)?;
                    quote! { #arg.pow(#exponent) }
                }
                _ => {
                    return Err(syn::Error::new(
                        call.span(),
                        "expected exp(x), tanh(x) or powf(x, k)",
                    ))
                }
            };
            Ok(push_term(terms, input, call_ts))
        }
        _ => Err(syn::Error::new(input.span(), "unsupported expression")),
    }
}
