//! Client stub generation
//!
//! Answers the reserved `get_rpc_contract` method with Rust source for a
//! typed client of the running server: definitions for every record,
//! enumeration and union reachable from the handler signatures, and an
//! `RpcClient` with one method per handler.

use crate::contract::{ScalarType, TypeDescriptor};
use crate::registry::RpcRegistry;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;

const KEYWORDS: &[&str] = &[
    "as", "async", "await", "break", "const", "continue", "crate", "dyn", "else", "enum",
    "extern", "false", "fn", "for", "if", "impl", "in", "let", "loop", "match", "mod", "move",
    "mut", "pub", "ref", "return", "self", "static", "struct", "super", "trait", "true", "type",
    "unsafe", "use", "where", "while", "yield",
];

/// Generate client source for `registry`, pointing at `host:port`.
/// The error is a human-readable reason.
pub fn generate(registry: &RpcRegistry, host: &str, port: u16) -> Result<String, String> {
    let mut gen = Generator::default();

    for entry in registry.entries() {
        if let Some(input) = &entry.input {
            gen.collect(input)?;
        }
        gen.collect(&entry.output)?;
    }

    let mut methods = String::new();
    for entry in registry.entries() {
        let method = identifier(&entry.name);
        let output = gen.rust_type(&entry.output);
        let _ = writeln!(methods);
        match &entry.input {
            Some(input) => {
                let input = gen.rust_type(input);
                let _ = writeln!(
                    methods,
                    "    pub fn {method}(&self, msg: {input}) -> Result<{output}> {{"
                );
                let _ = writeln!(
                    methods,
                    "        self.zero_client.call({:?}, msg)",
                    entry.name
                );
            }
            None => {
                let _ = writeln!(methods, "    pub fn {method}(&self) -> Result<{output}> {{");
                let _ = writeln!(
                    methods,
                    "        self.zero_client.call({:?}, ())",
                    entry.name
                );
            }
        }
        let _ = writeln!(methods, "    }}");
    }

    let mut models = String::new();
    for ty in gen.definitions.values().cloned().collect::<Vec<_>>() {
        models.push_str(&gen.definition(&ty));
        models.push('\n');
    }

    let mut code = String::new();
    code.push_str("// Generated by zero\n");
    code.push_str("// Regenerate with the server's `get_rpc_contract` method after changing handlers\n\n");
    if !gen.definitions.is_empty() {
        gen.imports.insert("serde::Deserialize".to_string());
        gen.imports.insert("serde::Serialize".to_string());
    }
    gen.imports.insert("zero::Result".to_string());
    gen.imports.insert("zero::ZeroClient".to_string());
    for import in &gen.imports {
        let _ = writeln!(code, "use {import};");
    }
    code.push('\n');
    code.push_str(&models);
    let _ = write!(
        code,
        "pub fn zero_client() -> ZeroClient {{\n    ZeroClient::new({host:?}, {port})\n}}\n\n"
    );
    code.push_str("pub struct RpcClient {\n    zero_client: ZeroClient,\n}\n\n");
    code.push_str("impl RpcClient {\n");
    code.push_str("    pub fn new(zero_client: ZeroClient) -> Self {\n        Self { zero_client }\n    }\n");
    code.push_str(&methods);
    code.push_str("}\n");
    Ok(code)
}

#[derive(Default)]
struct Generator {
    /// Nominal types by name
    definitions: BTreeMap<String, TypeDescriptor>,
    imports: BTreeSet<String>,
}

impl Generator {
    /// Record every nominal type reachable from `ty`
    fn collect(&mut self, ty: &TypeDescriptor) -> Result<(), String> {
        if let Some(name) = ty.nominal_name() {
            match self.definitions.get(name) {
                Some(existing) if existing == ty => return Ok(()),
                Some(_) => return Err(format!("Conflicting definitions for type `{name}`")),
                None => {
                    self.definitions.insert(name.to_string(), ty.clone());
                }
            }
        }
        match ty {
            TypeDescriptor::List(inner)
            | TypeDescriptor::Set(inner)
            | TypeDescriptor::Optional(inner) => self.collect(inner),
            TypeDescriptor::Map(k, v) => {
                self.collect(k)?;
                self.collect(v)
            }
            TypeDescriptor::Tuple(items) => items.iter().try_for_each(|t| self.collect(t)),
            TypeDescriptor::Union { variants, .. } => {
                variants.iter().try_for_each(|(_, t)| self.collect(t))
            }
            TypeDescriptor::Record { fields, .. } => {
                fields.iter().try_for_each(|f| self.collect(&f.ty))
            }
            _ => Ok(()),
        }
    }

    fn rust_type(&mut self, ty: &TypeDescriptor) -> String {
        match ty {
            TypeDescriptor::Unit => "()".to_string(),
            TypeDescriptor::Any => self.imported("zero::Value", "Value"),
            TypeDescriptor::Scalar(scalar) => self.scalar(*scalar),
            TypeDescriptor::List(inner) => format!("Vec<{}>", self.rust_type(inner)),
            TypeDescriptor::Set(inner) => {
                let inner = self.rust_type(inner);
                format!("{}<{inner}>", self.imported("std::collections::HashSet", "HashSet"))
            }
            TypeDescriptor::Map(k, v) => {
                let k = self.rust_type(k);
                let v = self.rust_type(v);
                format!("{}<{k}, {v}>", self.imported("std::collections::HashMap", "HashMap"))
            }
            TypeDescriptor::Tuple(items) => {
                let items: Vec<_> = items.iter().map(|t| self.rust_type(t)).collect();
                if items.len() == 1 {
                    format!("({},)", items[0])
                } else {
                    format!("({})", items.join(", "))
                }
            }
            TypeDescriptor::Optional(inner) => format!("Option<{}>", self.rust_type(inner)),
            TypeDescriptor::Enum { name, .. }
            | TypeDescriptor::Union { name, .. }
            | TypeDescriptor::Record { name, .. } => name.clone(),
        }
    }

    fn scalar(&mut self, scalar: ScalarType) -> String {
        match scalar {
            ScalarType::Bool => "bool".to_string(),
            ScalarType::I8 => "i8".to_string(),
            ScalarType::I16 => "i16".to_string(),
            ScalarType::I32 => "i32".to_string(),
            ScalarType::I64 => "i64".to_string(),
            ScalarType::U8 => "u8".to_string(),
            ScalarType::U16 => "u16".to_string(),
            ScalarType::U32 => "u32".to_string(),
            ScalarType::U64 => "u64".to_string(),
            ScalarType::F32 => "f32".to_string(),
            ScalarType::F64 => "f64".to_string(),
            ScalarType::Str => "String".to_string(),
            ScalarType::Bytes => self.imported("bytes::Bytes", "Bytes"),
            ScalarType::DateTime => {
                self.imports.insert("chrono::Utc".to_string());
                format!("{}<Utc>", self.imported("chrono::DateTime", "DateTime"))
            }
            ScalarType::NaiveDateTime => self.imported("chrono::NaiveDateTime", "NaiveDateTime"),
            ScalarType::Date => self.imported("chrono::NaiveDate", "NaiveDate"),
            ScalarType::Time => self.imported("chrono::NaiveTime", "NaiveTime"),
            ScalarType::Uuid => self.imported("uuid::Uuid", "Uuid"),
            ScalarType::Decimal => self.imported("zero::Decimal", "Decimal"),
        }
    }

    fn imported(&mut self, path: &str, name: &str) -> String {
        self.imports.insert(path.to_string());
        name.to_string()
    }

    fn definition(&mut self, ty: &TypeDescriptor) -> String {
        let mut out = String::new();
        match ty {
            TypeDescriptor::Record { name, fields } => {
                out.push_str("#[derive(Debug, Clone, Serialize, Deserialize)]\n");
                let _ = writeln!(out, "pub struct {name} {{");
                for field in fields {
                    let ty = self.rust_type(&field.ty);
                    let _ = writeln!(out, "    pub {}: {ty},", identifier(&field.name));
                }
                out.push_str("}\n");
            }
            TypeDescriptor::Enum { name, variants } => {
                out.push_str(
                    "#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]\n",
                );
                let _ = writeln!(out, "pub enum {name} {{");
                for variant in variants {
                    let _ = writeln!(out, "    {variant},");
                }
                out.push_str("}\n");
            }
            TypeDescriptor::Union { name, variants } => {
                out.push_str("#[derive(Debug, Clone, Serialize, Deserialize)]\n");
                out.push_str("#[serde(untagged)]\n");
                let _ = writeln!(out, "pub enum {name} {{");
                for (variant, member) in variants {
                    let member = self.rust_type(member);
                    let _ = writeln!(out, "    {variant}({member}),");
                }
                out.push_str("}\n");
            }
            _ => {}
        }
        out
    }
}

/// Turn a handler or field name into a Rust identifier
fn identifier(name: &str) -> String {
    let mut ident: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if ident.starts_with(|c: char| c.is_ascii_digit()) {
        ident.insert(0, '_');
    }
    if matches!(ident.as_str(), "self" | "Self" | "crate" | "super") {
        // Not usable as raw identifiers
        ident.push('_');
    } else if KEYWORDS.contains(&ident.as_str()) {
        ident.insert_str(0, "r#");
    }
    ident
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::Field;
    use crate::registry::{async_entry, sync_entry};
    use crate::{Contract, MsgPackEncoder, Result};
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;

    #[derive(Debug, Clone, Contract, Serialize, Deserialize)]
    pub struct Order {
        pub id: uuid::Uuid,
        pub items: Vec<String>,
        pub placed_at: chrono::DateTime<chrono::Utc>,
    }

    fn echo(msg: String) -> Result<String> {
        Ok(msg)
    }

    fn hello_world() -> Result<String> {
        Ok("hello world".to_string())
    }

    fn orders(by_customer: HashMap<String, Order>) -> Result<Vec<Order>> {
        Ok(by_customer.into_values().collect())
    }

    async fn count(items: Vec<i64>) -> Result<u32> {
        Ok(items.len() as u32)
    }

    fn registry() -> RpcRegistry {
        let mut registry = RpcRegistry::new();
        registry.insert(sync_entry("echo", echo, MsgPackEncoder)).unwrap();
        registry
            .insert(sync_entry("hello_world", hello_world, MsgPackEncoder))
            .unwrap();
        registry.insert(sync_entry("orders", orders, MsgPackEncoder)).unwrap();
        registry.insert(async_entry("type", count, MsgPackEncoder)).unwrap();
        registry
    }

    #[test]
    fn test_generated_client() {
        let code = generate(&registry(), "localhost", 5559).unwrap();

        assert!(code.contains("ZeroClient::new(\"localhost\", 5559)"));
        assert!(code.contains("pub fn echo(&self, msg: String) -> Result<String> {"));
        assert!(code.contains("self.zero_client.call(\"hello_world\", ())"));
        assert!(code.contains(
            "pub fn orders(&self, msg: HashMap<String, Order>) -> Result<Vec<Order>> {"
        ));
        assert!(code.contains("pub fn r#type(&self, msg: Vec<i64>) -> Result<u32> {"));
        assert!(code.contains("self.zero_client.call(\"type\", msg)"));
    }

    #[test]
    fn test_generated_models_and_imports() {
        let code = generate(&registry(), "localhost", 5559).unwrap();

        assert!(code.contains("pub struct Order {\n    pub id: Uuid,\n"));
        assert!(code.contains("    pub placed_at: DateTime<Utc>,\n"));
        for import in [
            "use chrono::DateTime;",
            "use chrono::Utc;",
            "use serde::Deserialize;",
            "use std::collections::HashMap;",
            "use uuid::Uuid;",
            "use zero::ZeroClient;",
        ] {
            assert!(code.contains(import), "missing `{import}`");
        }
        assert_eq!(code.matches("pub struct Order").count(), 1);
    }

    #[test]
    fn test_conflicting_definitions() {
        let mut registry = registry();
        let mut entry = sync_entry("other_order", echo, MsgPackEncoder);
        entry.output = TypeDescriptor::Record {
            name: "Order".to_string(),
            fields: vec![Field::new("id", i64::descriptor())],
        };
        registry.insert(entry).unwrap();

        let err = generate(&registry, "localhost", 5559).unwrap_err();
        assert_eq!(err, "Conflicting definitions for type `Order`");
    }

    #[test]
    fn test_identifiers() {
        assert_eq!(identifier("get-user"), "get_user");
        assert_eq!(identifier("1st"), "_1st");
        assert_eq!(identifier("match"), "r#match");
        assert_eq!(identifier("self"), "self_");
    }
}
