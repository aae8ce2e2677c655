// ABOUTME: The closed enumeration of engine data types and their compatibility relation

use std::fmt;

/// The declared signature of a FUNCTION value. A function whose
/// `argument_types` are declared has every argument checked for
/// compatibility at parse time; `minimum_arguments` permits trailing
/// arguments to be optional.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionType {
    pub return_type: DataType,
    pub argument_types: Option<Vec<DataType>>,
    pub minimum_arguments: Option<usize>,
}

impl FunctionType {
    /// A function about which nothing is declared.
    pub fn undefined() -> Self {
        FunctionType {
            return_type: DataType::Undefined,
            argument_types: None,
            minimum_arguments: None,
        }
    }

    /// A fully declared signature. Every declared argument is required.
    pub fn new(return_type: DataType, argument_types: Vec<DataType>) -> Self {
        let minimum_arguments = Some(argument_types.len());
        FunctionType {
            return_type,
            argument_types: Some(argument_types),
            minimum_arguments,
        }
    }

    pub fn with_minimum_arguments(mut self, minimum_arguments: usize) -> Self {
        self.minimum_arguments = Some(minimum_arguments);
        self
    }
}

/// A collection of constants representing the supported data types. Scalar
/// types are plain variants; compound types carry their member types, with
/// `Undefined` standing in for "not yet known". The `nullable` flag records
/// whether members may be NULL, which is the default for values coerced from
/// host data.
#[derive(Debug, Clone, PartialEq)]
pub enum DataType {
    Boolean,
    Bytes,
    Datetime,
    Float,
    Null,
    String,
    Timedelta,
    Undefined,
    Array {
        value_type: Box<DataType>,
        nullable: bool,
    },
    Set {
        value_type: Box<DataType>,
        nullable: bool,
    },
    Mapping {
        key_type: Box<DataType>,
        value_type: Box<DataType>,
        nullable: bool,
    },
    Function(Box<FunctionType>),
}

impl DataType {
    /// An ARRAY with an unspecified member type.
    pub fn array() -> Self {
        DataType::array_of(DataType::Undefined)
    }

    pub fn array_of(value_type: DataType) -> Self {
        DataType::Array {
            value_type: Box::new(value_type),
            nullable: true,
        }
    }

    /// A SET with an unspecified member type.
    pub fn set() -> Self {
        DataType::set_of(DataType::Undefined)
    }

    pub fn set_of(value_type: DataType) -> Self {
        DataType::Set {
            value_type: Box::new(value_type),
            nullable: true,
        }
    }

    /// A MAPPING with unspecified key and value types.
    pub fn mapping() -> Self {
        DataType::mapping_of(DataType::Undefined, DataType::Undefined)
    }

    pub fn mapping_of(key_type: DataType, value_type: DataType) -> Self {
        DataType::Mapping {
            key_type: Box::new(key_type),
            value_type: Box::new(value_type),
            nullable: true,
        }
    }

    /// A FUNCTION about which nothing is declared.
    pub fn function() -> Self {
        DataType::Function(Box::new(FunctionType::undefined()))
    }

    pub fn is_compound(&self) -> bool {
        matches!(
            self,
            DataType::Array { .. } | DataType::Set { .. } | DataType::Mapping { .. }
        )
    }

    pub fn is_scalar(&self) -> bool {
        !self.is_compound()
    }

    /// Whether values of this type may be used as mapping keys. ARRAY is the
    /// only compound type permitted because its members are compared by
    /// structure; sets and mappings are not themselves valid keys.
    pub fn is_valid_key(&self) -> bool {
        match self {
            DataType::Array { .. } => true,
            DataType::Function(_) => false,
            other => other.is_scalar(),
        }
    }

    /// The member type produced by iterating a value of this type, or `None`
    /// when the type is not iterable. Iterating a mapping yields its keys.
    pub fn iterable_value_type(&self) -> Option<&DataType> {
        match self {
            DataType::Array { value_type, .. } | DataType::Set { value_type, .. } => {
                Some(value_type)
            }
            DataType::Mapping { key_type, .. } => Some(key_type),
            DataType::String => Some(&DataType::String),
            _ => None,
        }
    }

    /// Check whether two data types are compatible without any conversion.
    /// The relation is reflexive and symmetric, `Undefined` is compatible
    /// with everything, and compound member types are checked recursively in
    /// the same manner.
    pub fn is_compatible(&self, other: &DataType) -> bool {
        match (self, other) {
            (DataType::Undefined, _) | (_, DataType::Undefined) => true,
            (
                DataType::Array { value_type: v1, .. },
                DataType::Array { value_type: v2, .. },
            ) => v1.is_compatible(v2),
            (DataType::Set { value_type: v1, .. }, DataType::Set { value_type: v2, .. }) => {
                v1.is_compatible(v2)
            }
            (
                DataType::Mapping {
                    key_type: k1,
                    value_type: v1,
                    ..
                },
                DataType::Mapping {
                    key_type: k2,
                    value_type: v2,
                    ..
                },
            ) => k1.is_compatible(k2) && v1.is_compatible(v2),
            (DataType::Function(f1), DataType::Function(f2)) => {
                if !f1.return_type.is_compatible(&f2.return_type) {
                    return false;
                }
                if let (Some(args1), Some(args2)) = (&f1.argument_types, &f2.argument_types) {
                    if args1.len() != args2.len() {
                        return false;
                    }
                    if !args1
                        .iter()
                        .zip(args2.iter())
                        .all(|(a1, a2)| a1.is_compatible(a2))
                    {
                        return false;
                    }
                }
                if let (Some(min1), Some(min2)) = (f1.minimum_arguments, f2.minimum_arguments) {
                    if min1 != min2 {
                        return false;
                    }
                }
                true
            }
            (left, right) => left == right,
        }
    }

    /// The bare name of the type, as used in diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            DataType::Boolean => "BOOLEAN",
            DataType::Bytes => "BYTES",
            DataType::Datetime => "DATETIME",
            DataType::Float => "FLOAT",
            DataType::Null => "NULL",
            DataType::String => "STRING",
            DataType::Timedelta => "TIMEDELTA",
            DataType::Undefined => "UNDEFINED",
            DataType::Array { .. } => "ARRAY",
            DataType::Set { .. } => "SET",
            DataType::Mapping { .. } => "MAPPING",
            DataType::Function(_) => "FUNCTION",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Infer the common member type of an iterable from the types of its
/// members. NULL members are treated as a special case so typed containers
/// may hold a specified type *or* NULL; mixed member types collapse to
/// `Undefined`.
pub fn common_member_type<'a>(member_types: impl Iterator<Item = &'a DataType>) -> DataType {
    let mut common: Option<DataType> = None;
    for member_type in member_types {
        if *member_type == DataType::Null {
            continue;
        }
        match &common {
            None => common = Some(member_type.clone()),
            Some(existing) if existing == member_type => {}
            Some(_) => return DataType::Undefined,
        }
    }
    common.unwrap_or(DataType::Undefined)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_scalars() -> Vec<DataType> {
        vec![
            DataType::Boolean,
            DataType::Bytes,
            DataType::Datetime,
            DataType::Float,
            DataType::Null,
            DataType::String,
            DataType::Timedelta,
        ]
    }

    #[test]
    fn test_compatibility_is_reflexive() {
        for dt in all_scalars() {
            assert!(dt.is_compatible(&dt), "{dt} should be self-compatible");
        }
        assert!(DataType::array().is_compatible(&DataType::array()));
    }

    #[test]
    fn test_undefined_absorbs_everything() {
        for dt in all_scalars() {
            assert!(DataType::Undefined.is_compatible(&dt));
            assert!(dt.is_compatible(&DataType::Undefined));
        }
    }

    #[test]
    fn test_distinct_scalars_are_incompatible() {
        assert!(!DataType::Float.is_compatible(&DataType::String));
        assert!(!DataType::Boolean.is_compatible(&DataType::Null));
        assert!(!DataType::Datetime.is_compatible(&DataType::Timedelta));
    }

    #[test]
    fn test_compound_compatibility_is_recursive() {
        let floats = DataType::array_of(DataType::Float);
        let strings = DataType::array_of(DataType::String);
        assert!(floats.is_compatible(&DataType::array()));
        assert!(!floats.is_compatible(&strings));
        assert!(!floats.is_compatible(&DataType::set_of(DataType::Float)));

        let str_to_float = DataType::mapping_of(DataType::String, DataType::Float);
        assert!(str_to_float.is_compatible(&DataType::mapping()));
        assert!(!str_to_float
            .is_compatible(&DataType::mapping_of(DataType::Float, DataType::Float)));
    }

    #[test]
    fn test_function_compatibility_zips_arguments() {
        let declared = DataType::Function(Box::new(FunctionType::new(
            DataType::Boolean,
            vec![DataType::Float, DataType::String],
        )));
        let undeclared = DataType::function();
        assert!(declared.is_compatible(&undeclared));

        let mismatched_arity = DataType::Function(Box::new(FunctionType::new(
            DataType::Boolean,
            vec![DataType::Float],
        )));
        assert!(!declared.is_compatible(&mismatched_arity));

        let mismatched_return = DataType::Function(Box::new(FunctionType::new(
            DataType::Float,
            vec![DataType::Float, DataType::String],
        )));
        assert!(!declared.is_compatible(&mismatched_return));
    }

    #[test]
    fn test_mapping_key_validity() {
        assert!(DataType::String.is_valid_key());
        assert!(DataType::array().is_valid_key());
        assert!(!DataType::set().is_valid_key());
        assert!(!DataType::mapping().is_valid_key());
        assert!(!DataType::function().is_valid_key());
    }

    #[test]
    fn test_common_member_type_null_special_case() {
        let members = [DataType::Float, DataType::Null, DataType::Float];
        assert_eq!(common_member_type(members.iter()), DataType::Float);

        let mixed = [DataType::Float, DataType::String];
        assert_eq!(common_member_type(mixed.iter()), DataType::Undefined);

        let only_null = [DataType::Null];
        assert_eq!(common_member_type(only_null.iter()), DataType::Undefined);
    }
}
