//! Procedural macros for zero

use proc_macro::TokenStream;
use syn::{parse_macro_input, DeriveInput};

mod contract;

/// Derive `zero::Contract` for a type used in handler signatures
///
/// - a struct with named fields becomes a record;
/// - an enum whose variants carry no data becomes an enumeration;
/// - an enum whose variants each wrap exactly one type becomes a union and
///   must also carry `#[serde(untagged)]`.
///
/// ```rust,ignore
/// use serde::{Deserialize, Serialize};
/// use zero::Contract;
///
/// #[derive(Contract, Serialize, Deserialize)]
/// pub struct Order {
///     pub id: i64,
///     pub items: Vec<String>,
/// }
/// ```
#[proc_macro_derive(Contract)]
pub fn contract(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    contract::derive_contract_impl(input)
}
