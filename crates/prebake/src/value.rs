use bitflags::bitflags;

use crate::{
    abstract_value::AbstractId,
    heap::ObjectId,
    intern::{StringId, SymbolId},
};

/// Primary value type flowing through the interpreter.
///
/// Deliberately small and `Copy`: primitives are stored inline, strings and
/// symbols by intern id, objects and abstract values as arena indices into
/// the owning realm.
#[derive(Debug, Clone, Copy)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    /// IEEE-754 double, the only numeric type.
    Number(f64),
    /// An interned, immutable string.
    Str(StringId),
    /// An identity-unique symbol.
    Symbol(SymbolId),
    /// A mutable object with identity, stored in the realm's heap arena.
    Object(ObjectId),
    /// An unknown runtime value, stored in the realm's abstract arena.
    Abstract(AbstractId),
}

impl Value {
    /// Whether this value is fully known at build time.
    #[inline]
    pub fn is_concrete(self) -> bool {
        !matches!(self, Self::Abstract(_))
    }

    /// The object id, if this is a concrete object.
    #[inline]
    pub fn object_id(self) -> Option<ObjectId> {
        match self {
            Self::Object(id) => Some(id),
            _ => None,
        }
    }

    /// The abstract id, if this is an abstract value.
    #[inline]
    pub fn abstract_id(self) -> Option<AbstractId> {
        match self {
            Self::Abstract(id) => Some(id),
            _ => None,
        }
    }

    /// SameValue comparison: identity for objects, symbols, and abstracts;
    /// bit-level for numbers (NaN equals NaN, `-0` differs from `0`).
    pub fn same_value(self, other: Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a.to_bits() == b.to_bits(),
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Symbol(a), Self::Symbol(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a == b,
            (Self::Abstract(a), Self::Abstract(b)) => a == b,
            _ => false,
        }
    }

    /// Strict equality (`===`) for concrete operands.
    ///
    /// Differs from [`Self::same_value`] in the number arm only: NaN is not
    /// equal to itself and `-0 === 0`. Returns `None` when either side is
    /// abstract, because the outcome is not known at build time.
    pub fn strict_equals(self, other: Self) -> Option<bool> {
        match (self, other) {
            (Self::Abstract(_), _) | (_, Self::Abstract(_)) => None,
            (Self::Number(a), Self::Number(b)) => Some(a == b),
            _ => Some(self.same_value(other)),
        }
    }

    /// ToBoolean for concrete values; `None` when abstract.
    pub fn to_boolean(self) -> Option<bool> {
        match self {
            Self::Undefined | Self::Null => Some(false),
            Self::Bool(b) => Some(b),
            Self::Number(n) => Some(n != 0.0 && !n.is_nan()),
            Self::Str(_) => None, // needs the intern table; see Realm::to_boolean
            Self::Symbol(_) | Self::Object(_) => Some(true),
            Self::Abstract(_) => None,
        }
    }
}

bitflags! {
    /// The set of value arms an abstract value may take at runtime.
    ///
    /// `FUNCTION` is tracked separately from `OBJECT` so calls through
    /// abstract callees can be validated; a callable object contributes both
    /// bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TypesDomain: u16 {
        const UNDEFINED = 1 << 0;
        const NULL = 1 << 1;
        const BOOLEAN = 1 << 2;
        const NUMBER = 1 << 3;
        const STRING = 1 << 4;
        const SYMBOL = 1 << 5;
        const OBJECT = 1 << 6;
        const FUNCTION = 1 << 7;
    }
}

impl TypesDomain {
    /// The ⊤ element: any arm is possible.
    pub const TOP: Self = Self::all();

    /// Parses a type name as accepted by the `__abstract` helper.
    pub fn from_type_name(name: &str) -> Option<Self> {
        Some(match name {
            "undefined" => Self::UNDEFINED,
            "null" => Self::NULL,
            "boolean" => Self::BOOLEAN,
            "number" => Self::NUMBER,
            "string" => Self::STRING,
            "symbol" => Self::SYMBOL,
            "object" => Self::OBJECT,
            "function" => Self::FUNCTION,
            _ => return None,
        })
    }

    /// Whether values in this domain might be objects (or functions).
    #[inline]
    pub fn might_be_object(self) -> bool {
        self.intersects(Self::OBJECT | Self::FUNCTION)
    }

    /// Whether every value in this domain is an object (or function).
    #[inline]
    pub fn must_be_object(self) -> bool {
        !self.is_empty() && (Self::OBJECT | Self::FUNCTION).contains(self)
    }

    /// Whether this domain might include falsy values.
    pub fn might_be_falsy(self) -> bool {
        // Objects and symbols are always truthy; everything else has a falsy
        // inhabitant.
        self.intersects(Self::UNDEFINED | Self::NULL | Self::BOOLEAN | Self::NUMBER | Self::STRING)
    }

    /// The `typeof` result when the domain pins down a single arm.
    pub fn typeof_result(self) -> Option<&'static str> {
        if self == Self::UNDEFINED {
            Some("undefined")
        } else if self == Self::BOOLEAN {
            Some("boolean")
        } else if self == Self::NUMBER {
            Some("number")
        } else if self == Self::STRING {
            Some("string")
        } else if self == Self::SYMBOL {
            Some("symbol")
        } else if self == Self::NULL || self == Self::OBJECT || self == Self::NULL | Self::OBJECT {
            Some("object")
        } else if self == Self::FUNCTION {
            Some("function")
        } else {
            None
        }
    }

    /// Whether `typeof` on a value from this domain could yield `name`.
    pub fn admits_typeof(self, name: &str) -> bool {
        match name {
            "undefined" => self.contains(Self::UNDEFINED),
            "boolean" => self.contains(Self::BOOLEAN),
            "number" => self.contains(Self::NUMBER),
            "string" => self.contains(Self::STRING),
            "symbol" => self.contains(Self::SYMBOL),
            "object" => self.intersects(Self::NULL | Self::OBJECT),
            "function" => self.contains(Self::FUNCTION),
            _ => false,
        }
    }
}

/// The finite set of candidate concrete values an abstract value may take,
/// or ⊤ when unconstrained.
#[derive(Debug, Clone)]
pub enum ValuesDomain {
    Top,
    /// A finite candidate set; every element is concrete.
    Finite(Vec<Value>),
}

impl ValuesDomain {
    /// The lattice join of two domains.
    pub fn join(&self, other: &Self) -> Self {
        match (self, other) {
            (Self::Finite(a), Self::Finite(b)) => {
                let mut merged = a.clone();
                for v in b {
                    if !merged.iter().any(|m| m.same_value(*v)) {
                        merged.push(*v);
                    }
                }
                Self::Finite(merged)
            }
            _ => Self::Top,
        }
    }

    /// The candidate set, when finite.
    pub fn candidates(&self) -> Option<&[Value]> {
        match self {
            Self::Top => None,
            Self::Finite(values) => Some(values),
        }
    }
}

/// Formats a number the way the language's ToString does: integers without a
/// decimal point, `NaN`/`Infinity` by name, everything else via the shortest
/// round-tripping representation.
pub(crate) fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_owned();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity".to_owned() } else { "-Infinity".to_owned() };
    }
    if n == 0.0 {
        // Both zeroes print as "0".
        return "0".to_owned();
    }
    if n.fract() == 0.0 && n.abs() < 1e21 {
        return format!("{}", n as i128);
    }
    let mut buffer = ryu::Buffer::new();
    let printed = buffer.format(n);
    // ryu prints exponents as `1.5e300`; the language prints `1.5e+300`.
    match printed.find('e') {
        Some(pos) if !printed[pos + 1..].starts_with('-') => {
            let mut s = String::with_capacity(printed.len() + 1);
            s.push_str(&printed[..=pos]);
            s.push('+');
            s.push_str(&printed[pos + 1..]);
            s
        }
        _ => printed.to_owned(),
    }
}

/// ToNumber for a string payload (after interning lookup).
pub(crate) fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        return match u64::from_str_radix(hex, 16) {
            Ok(v) => v as f64,
            Err(_) => f64::NAN,
        };
    }
    match trimmed {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ => trimmed.parse::<f64>().unwrap_or(f64::NAN),
    }
}

/// ToInt32, used by the bitwise and shift operators.
pub(crate) fn to_int32(n: f64) -> i32 {
    if !n.is_finite() || n == 0.0 {
        return 0;
    }
    let modulus = 2f64.powi(32);
    let mut m = n.trunc() % modulus;
    if m < 0.0 {
        m += modulus;
    }
    if m >= modulus / 2.0 { (m - modulus) as i32 } else { m as i32 }
}

/// ToUint32, used by the unsigned shift operator.
pub(crate) fn to_uint32(n: f64) -> u32 {
    if !n.is_finite() || n == 0.0 {
        return 0;
    }
    let modulus = 2f64.powi(32);
    let mut m = n.trunc() % modulus;
    if m < 0.0 {
        m += modulus;
    }
    m as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_value_distinguishes_zero_signs() {
        assert!(Value::Number(f64::NAN).same_value(Value::Number(f64::NAN)));
        assert!(!Value::Number(-0.0).same_value(Value::Number(0.0)));
        assert_eq!(Value::Number(f64::NAN).strict_equals(Value::Number(f64::NAN)), Some(false));
        assert_eq!(Value::Number(-0.0).strict_equals(Value::Number(0.0)), Some(true));
    }

    #[test]
    fn format_number_matches_language_rules() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(1.5), "1.5");
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(format_number(f64::NEG_INFINITY), "-Infinity");
        assert_eq!(format_number(1e21), "1e+21");
    }

    #[test]
    fn string_to_number_handles_edges() {
        assert_eq!(string_to_number(""), 0.0);
        assert_eq!(string_to_number("  42 "), 42.0);
        assert_eq!(string_to_number("0x10"), 16.0);
        assert!(string_to_number("bogus").is_nan());
        assert_eq!(string_to_number("-Infinity"), f64::NEG_INFINITY);
    }

    #[test]
    fn types_domain_typeof() {
        assert_eq!(TypesDomain::NUMBER.typeof_result(), Some("number"));
        assert_eq!(TypesDomain::NULL.typeof_result(), Some("object"));
        assert_eq!(TypesDomain::TOP.typeof_result(), None);
        assert!(TypesDomain::OBJECT.admits_typeof("object"));
        assert!(!TypesDomain::OBJECT.admits_typeof("number"));
        assert!(!(TypesDomain::OBJECT).might_be_falsy());
    }

    #[test]
    fn to_int32_wraps() {
        assert_eq!(to_int32(2f64.powi(32) + 5.0), 5);
        assert_eq!(to_int32(-1.0), -1);
        assert_eq!(to_uint32(-1.0), u32::MAX);
        assert_eq!(to_int32(f64::NAN), 0);
    }
}
