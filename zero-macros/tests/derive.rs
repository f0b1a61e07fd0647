//! Derive tests for `#[derive(Contract)]`

use serde::{Deserialize, Serialize};
use zero::{Contract, Field, ScalarType, TypeDescriptor};

#[derive(Debug, Contract, Serialize, Deserialize, Clone, PartialEq)]
pub struct Order {
    pub id: i64,
    pub items: Vec<String>,
    pub note: Option<String>,
}

#[derive(Debug, Contract, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub enum Color {
    Red,
    Green,
}

#[derive(Debug, Contract, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum IntOrText {
    Int(i64),
    Text(String),
}

#[derive(Debug, Contract, Serialize, Deserialize, Clone, PartialEq)]
pub struct Page<T> {
    pub rows: Vec<T>,
    pub total: u32,
}

#[test]
fn test_record_descriptor() {
    let expected = TypeDescriptor::Record {
        name: "Order".to_string(),
        fields: vec![
            Field::new("id", TypeDescriptor::Scalar(ScalarType::I64)),
            Field::new(
                "items",
                TypeDescriptor::list(TypeDescriptor::Scalar(ScalarType::Str)),
            ),
            Field::new(
                "note",
                TypeDescriptor::optional(TypeDescriptor::Scalar(ScalarType::Str)),
            ),
        ],
    };
    assert_eq!(Order::descriptor(), expected);
    assert!(Order::descriptor().validate().is_ok());
}

#[test]
fn test_enum_and_union_descriptors() {
    assert_eq!(
        Color::descriptor(),
        TypeDescriptor::Enum {
            name: "Color".to_string(),
            variants: vec!["Red".to_string(), "Green".to_string()],
        }
    );

    match IntOrText::descriptor() {
        TypeDescriptor::Union { name, variants } => {
            assert_eq!(name, "IntOrText");
            assert_eq!(variants.len(), 2);
            assert_eq!(variants[1].1, TypeDescriptor::Scalar(ScalarType::Str));
        }
        other => panic!("Expected union, got {other:?}"),
    }
}

#[test]
fn test_generic_record() {
    match <Page<Color>>::descriptor() {
        TypeDescriptor::Record { fields, .. } => {
            assert_eq!(fields[0].ty, TypeDescriptor::list(Color::descriptor()));
        }
        other => panic!("Expected record, got {other:?}"),
    }
}
