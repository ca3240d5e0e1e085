//! Value types carried by operands.
//!
//! Type inference happens outside this crate. The decoding layer hands over whatever it knows
//! about each register. The pipeline only rewrites types in one place: the result of a
//! MOVE_EXCEPTION is forced to the catch type of its handler.

use std::fmt;

/// Fully qualified name of the root exception class.
pub const THROWABLE_CLASS: &str = "java.lang.Throwable";

/// The type of a register, literal or method return value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum ArgType {
    /// No value (method return type only)
    Void,
    /// `boolean`
    Boolean,
    /// `byte`
    Byte,
    /// `char`
    Char,
    /// `short`
    Short,
    /// `int`
    Int,
    /// `long`
    Long,
    /// `float`
    Float,
    /// `double`
    Double,
    /// A class or interface, by fully qualified name
    Object(String),
    /// An array of the element type
    Array(Box<ArgType>),
    /// Not known yet
    #[default]
    Unknown,
}

impl ArgType {
    /// Creates an object type from a fully qualified class name.
    pub fn object(name: impl Into<String>) -> Self {
        ArgType::Object(name.into())
    }

    /// The universal exception type bound by catch-all handlers.
    #[must_use]
    pub fn throwable() -> Self {
        ArgType::Object(THROWABLE_CLASS.to_string())
    }

    /// Returns `true` for [`ArgType::Void`].
    #[must_use]
    pub fn is_void(&self) -> bool {
        matches!(self, ArgType::Void)
    }

    /// Returns `true` for 64-bit primitives, which occupy a register pair.
    #[must_use]
    pub fn is_wide(&self) -> bool {
        matches!(self, ArgType::Long | ArgType::Double)
    }
}

impl fmt::Display for ArgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgType::Void => f.write_str("void"),
            ArgType::Boolean => f.write_str("boolean"),
            ArgType::Byte => f.write_str("byte"),
            ArgType::Char => f.write_str("char"),
            ArgType::Short => f.write_str("short"),
            ArgType::Int => f.write_str("int"),
            ArgType::Long => f.write_str("long"),
            ArgType::Float => f.write_str("float"),
            ArgType::Double => f.write_str("double"),
            ArgType::Object(name) => f.write_str(name),
            ArgType::Array(elem) => write!(f, "{elem}[]"),
            ArgType::Unknown => f.write_str("?"),
        }
    }
}
