//! Type contracts for handler signatures
//!
//! Every argument and return type of a registered handler implements
//! [`Contract`], which describes the type as a [`TypeDescriptor`]. The
//! descriptor drives registration-time validation and client code
//! generation. Records, enumerations and unions get the trait through
//! `#[derive(Contract)]`.

use crate::Value;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;

/// Fixed-point decimal, carried on the wire as its string form
pub use rust_decimal::Decimal;

/// Leaf types of the allowed-type set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Str,
    Bytes,
    DateTime,
    NaiveDateTime,
    Date,
    Time,
    Uuid,
    Decimal,
}

/// A named member of a record
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub ty: TypeDescriptor,
}

impl Field {
    pub fn new(name: impl Into<String>, ty: TypeDescriptor) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Structural description of an encodable type
#[derive(Debug, Clone, PartialEq)]
pub enum TypeDescriptor {
    /// No value; only valid as "no input"
    Unit,
    /// Arbitrary data, decoded as [`Value`]
    Any,
    Scalar(ScalarType),
    List(Box<TypeDescriptor>),
    Set(Box<TypeDescriptor>),
    Map(Box<TypeDescriptor>, Box<TypeDescriptor>),
    Tuple(Vec<TypeDescriptor>),
    Optional(Box<TypeDescriptor>),
    /// Tagged enumeration of named constants
    Enum { name: String, variants: Vec<String> },
    /// One of several member types, each under a variant name
    Union {
        name: String,
        variants: Vec<(String, TypeDescriptor)>,
    },
    Record { name: String, fields: Vec<Field> },
}

impl TypeDescriptor {
    pub fn list(inner: TypeDescriptor) -> Self {
        Self::List(Box::new(inner))
    }

    pub fn set(inner: TypeDescriptor) -> Self {
        Self::Set(Box::new(inner))
    }

    pub fn map(key: TypeDescriptor, value: TypeDescriptor) -> Self {
        Self::Map(Box::new(key), Box::new(value))
    }

    pub fn optional(inner: TypeDescriptor) -> Self {
        Self::Optional(Box::new(inner))
    }

    pub fn is_unit(&self) -> bool {
        matches!(self, Self::Unit)
    }

    pub fn is_optional(&self) -> bool {
        matches!(self, Self::Optional(_))
    }

    /// Name of a nominal type (record, enum or union)
    pub fn nominal_name(&self) -> Option<&str> {
        match self {
            Self::Enum { name, .. } | Self::Union { name, .. } | Self::Record { name, .. } => {
                Some(name)
            }
            _ => None,
        }
    }

    /// Check the structural rules that the type system cannot express.
    /// Returns the reason for the first violation.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Unit => Err("unit is not a valid member type".to_string()),
            Self::Any | Self::Scalar(_) => Ok(()),
            Self::List(inner) | Self::Set(inner) | Self::Optional(inner) => inner.validate(),
            Self::Map(key, value) => {
                if !matches!(**key, Self::Scalar(_) | Self::Enum { .. }) {
                    return Err(format!("map keys must be scalar, found {key}"));
                }
                value.validate()
            }
            Self::Tuple(items) => {
                if items.is_empty() {
                    return Err("empty tuples are not allowed".to_string());
                }
                items.iter().try_for_each(Self::validate)
            }
            Self::Enum { name, variants } => {
                if variants.is_empty() {
                    return Err(format!("enumeration `{name}` has no variants"));
                }
                Ok(())
            }
            Self::Union { name, variants } => {
                if variants.len() < 2 {
                    return Err(format!("union `{name}` needs at least two members"));
                }
                variants.iter().try_for_each(|(_, ty)| ty.validate())
            }
            Self::Record { fields, .. } => fields.iter().try_for_each(|f| f.ty.validate()),
        }
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unit => write!(f, "()"),
            Self::Any => write!(f, "Any"),
            Self::Scalar(s) => write!(f, "{s:?}"),
            Self::List(inner) => write!(f, "List[{inner}]"),
            Self::Set(inner) => write!(f, "Set[{inner}]"),
            Self::Map(k, v) => write!(f, "Map[{k}, {v}]"),
            Self::Tuple(items) => {
                write!(f, "Tuple[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Optional(inner) => write!(f, "Optional[{inner}]"),
            Self::Enum { name, .. } | Self::Union { name, .. } | Self::Record { name, .. } => {
                write!(f, "{name}")
            }
        }
    }
}

/// A type that may cross the wire as a handler argument or return value
pub trait Contract: Serialize + DeserializeOwned + Send + 'static {
    fn descriptor() -> TypeDescriptor;
}

macro_rules! scalar_contract {
    ($($ty:ty => $scalar:ident),* $(,)?) => {
        $(
            impl Contract for $ty {
                fn descriptor() -> TypeDescriptor {
                    TypeDescriptor::Scalar(ScalarType::$scalar)
                }
            }
        )*
    };
}

scalar_contract! {
    bool => Bool,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    f32 => F32,
    f64 => F64,
    String => Str,
    bytes::Bytes => Bytes,
    chrono::DateTime<chrono::Utc> => DateTime,
    chrono::NaiveDateTime => NaiveDateTime,
    chrono::NaiveDate => Date,
    chrono::NaiveTime => Time,
    uuid::Uuid => Uuid,
    Decimal => Decimal,
}

impl Contract for () {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::Unit
    }
}

impl Contract for Value {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::Any
    }
}

impl<T: Contract> Contract for Option<T> {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::optional(T::descriptor())
    }
}

impl<T: Contract> Contract for Vec<T> {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::list(T::descriptor())
    }
}

impl<T: Contract> Contract for VecDeque<T> {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::list(T::descriptor())
    }
}

impl<T: Contract + Eq + Hash> Contract for HashSet<T> {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::set(T::descriptor())
    }
}

impl<T: Contract + Ord> Contract for BTreeSet<T> {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::set(T::descriptor())
    }
}

impl<K: Contract + Eq + Hash, V: Contract> Contract for HashMap<K, V> {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::map(K::descriptor(), V::descriptor())
    }
}

impl<K: Contract + Ord, V: Contract> Contract for BTreeMap<K, V> {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::map(K::descriptor(), V::descriptor())
    }
}

macro_rules! tuple_contract {
    ($($name:ident),+) => {
        impl<$($name: Contract),+> Contract for ($($name,)+) {
            fn descriptor() -> TypeDescriptor {
                TypeDescriptor::Tuple(vec![$($name::descriptor()),+])
            }
        }
    };
}

tuple_contract!(A);
tuple_contract!(A, B);
tuple_contract!(A, B, C);
tuple_contract!(A, B, C, D);
tuple_contract!(A, B, C, D, E);
tuple_contract!(A, B, C, D, E, F);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Encoder, MsgPackEncoder};

    #[test]
    fn test_std_descriptors() {
        assert_eq!(
            <HashMap<i64, String>>::descriptor(),
            TypeDescriptor::map(
                TypeDescriptor::Scalar(ScalarType::I64),
                TypeDescriptor::Scalar(ScalarType::Str)
            )
        );
        assert_eq!(
            <(String, u16)>::descriptor(),
            TypeDescriptor::Tuple(vec![
                TypeDescriptor::Scalar(ScalarType::Str),
                TypeDescriptor::Scalar(ScalarType::U16)
            ])
        );
        assert!(<Option<Vec<f64>>>::descriptor().is_optional());
        assert_eq!(Value::descriptor(), TypeDescriptor::Any);
    }

    #[test]
    fn test_map_keys_must_be_scalar() {
        assert!(<HashMap<String, Vec<i32>>>::descriptor().validate().is_ok());

        let bad = TypeDescriptor::map(
            TypeDescriptor::list(TypeDescriptor::Scalar(ScalarType::I32)),
            TypeDescriptor::Any,
        );
        let reason = bad.validate().unwrap_err();
        assert!(reason.contains("map keys must be scalar"));
    }

    #[test]
    fn test_union_needs_two_members() {
        let single = TypeDescriptor::Union {
            name: "Only".to_string(),
            variants: vec![("A".to_string(), i32::descriptor())],
        };
        assert!(single.validate().is_err());
    }

    #[test]
    fn test_decimal_travels_as_its_string_form() {
        let encoder = MsgPackEncoder;
        let price: Decimal = "-12.50".parse().unwrap();
        let encoded = encoder.encode(&price).unwrap();
        let as_text: String = encoder.decode_type(&encoded).unwrap();
        assert_eq!(as_text, "-12.50");

        let total = price + Decimal::new(250, 2);
        assert_eq!(total.normalize().to_string(), "-10");
    }

    #[test]
    fn test_decimal_rejects_garbage_on_decode() {
        let encoder = MsgPackEncoder;
        let ok = encoder.encode("19.99").unwrap();
        let price: Decimal = encoder.decode_type(&ok).unwrap();
        assert_eq!(price, Decimal::new(1999, 2));

        for bad in ["nineteen", "1.2.3", ""] {
            let encoded = encoder.encode(bad).unwrap();
            assert!(encoder.decode_type::<Decimal>(&encoded).is_err(), "{bad} decoded");
        }
    }
}
