//! Value types, primitive kinds and conversion utilities.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// The fixed set of primitive kinds a leaf can be registered and coerced as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
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
    String,
    Duration,
}

impl Kind {
    /// Returns the Rust type name of the kind.
    pub fn name(&self) -> &'static str {
        match self {
            Kind::Bool => "bool",
            Kind::I8 => "i8",
            Kind::I16 => "i16",
            Kind::I32 => "i32",
            Kind::I64 => "i64",
            Kind::U8 => "u8",
            Kind::U16 => "u16",
            Kind::U32 => "u32",
            Kind::U64 => "u64",
            Kind::F32 => "f32",
            Kind::F64 => "f64",
            Kind::String => "String",
            Kind::Duration => "Duration",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A dynamically typed value moving between sources, hooks and leaves.
///
/// Decoded files only ever produce `Bool`, `I64`, `F64`, `String`, `List`,
/// `Map` and `Null`; the remaining scalar variants carry the exact type of a
/// leaf so that assignment can be checked without loss.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),
    Duration(Duration),
    /// Array of values
    List(Vec<Value>),
    /// Nested key-value pairs
    Map(BTreeMap<String, Value>),
    /// Null value
    Null,
}

impl Value {
    /// Returns the primitive kind of a scalar value, `None` for lists, maps and null.
    pub fn kind(&self) -> Option<Kind> {
        match self {
            Value::Bool(_) => Some(Kind::Bool),
            Value::I8(_) => Some(Kind::I8),
            Value::I16(_) => Some(Kind::I16),
            Value::I32(_) => Some(Kind::I32),
            Value::I64(_) => Some(Kind::I64),
            Value::U8(_) => Some(Kind::U8),
            Value::U16(_) => Some(Kind::U16),
            Value::U32(_) => Some(Kind::U32),
            Value::U64(_) => Some(Kind::U64),
            Value::F32(_) => Some(Kind::F32),
            Value::F64(_) => Some(Kind::F64),
            Value::String(_) => Some(Kind::String),
            Value::Duration(_) => Some(Kind::Duration),
            Value::List(_) | Value::Map(_) | Value::Null => None,
        }
    }

    /// Returns the type name of the value, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::List(_) => "List",
            Value::Map(_) => "Map",
            Value::Null => "Null",
            scalar => scalar.kind().map(|k| k.name()).unwrap_or("Null"),
        }
    }

    /// Returns the value as a string reference if it's a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the value as a map reference if it's a map.
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Checks if the value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    fn as_i128(&self) -> Option<i128> {
        match *self {
            Value::I8(v) => Some(v as i128),
            Value::I16(v) => Some(v as i128),
            Value::I32(v) => Some(v as i128),
            Value::I64(v) => Some(v as i128),
            Value::U8(v) => Some(v as i128),
            Value::U16(v) => Some(v as i128),
            Value::U32(v) => Some(v as i128),
            Value::U64(v) => Some(v as i128),
            _ => None,
        }
    }

    /// Converts the value to `kind` when that can be done without loss.
    ///
    /// Integers convert between widths when the number is in range and widen
    /// to floats, `F64` narrows to `F32`, and strings convert to `Duration`
    /// through [`parse_duration`]. Anything else, notably strings to numbers,
    /// is refused and the original value handed back.
    pub fn coerce_to(self, kind: Kind) -> Result<Value, Value> {
        if self.kind() == Some(kind) {
            return Ok(self);
        }

        if let Some(n) = self.as_i128() {
            let converted = match kind {
                Kind::I8 => i8::try_from(n).ok().map(Value::I8),
                Kind::I16 => i16::try_from(n).ok().map(Value::I16),
                Kind::I32 => i32::try_from(n).ok().map(Value::I32),
                Kind::I64 => i64::try_from(n).ok().map(Value::I64),
                Kind::U8 => u8::try_from(n).ok().map(Value::U8),
                Kind::U16 => u16::try_from(n).ok().map(Value::U16),
                Kind::U32 => u32::try_from(n).ok().map(Value::U32),
                Kind::U64 => u64::try_from(n).ok().map(Value::U64),
                Kind::F32 => Some(Value::F32(n as f32)),
                Kind::F64 => Some(Value::F64(n as f64)),
                _ => None,
            };
            return converted.ok_or(self);
        }

        match (self, kind) {
            (Value::F64(f), Kind::F32) => Ok(Value::F32(f as f32)),
            (Value::F32(f), Kind::F64) => Ok(Value::F64(f as f64)),
            (Value::String(s), Kind::Duration) => match parse_duration(&s) {
                Ok(d) => Ok(Value::Duration(d)),
                Err(_) => Err(Value::String(s)),
            },
            (other, _) => Err(other),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{v}"),
            Value::I8(v) => write!(f, "{v}"),
            Value::I16(v) => write!(f, "{v}"),
            Value::I32(v) => write!(f, "{v}"),
            Value::I64(v) => write!(f, "{v}"),
            Value::U8(v) => write!(f, "{v}"),
            Value::U16(v) => write!(f, "{v}"),
            Value::U32(v) => write!(f, "{v}"),
            Value::U64(v) => write!(f, "{v}"),
            Value::F32(v) => write!(f, "{v}"),
            Value::F64(v) => write!(f, "{v}"),
            Value::String(s) => f.write_str(s),
            Value::Duration(d) => f.write_str(&format_duration(*d)),
            Value::List(items) => {
                let rendered: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                f.write_str(&rendered.join(","))
            }
            Value::Map(map) => {
                let rendered: Vec<String> = map.iter().map(|(k, v)| format!("{k}={v}")).collect();
                write!(f, "{{{}}}", rendered.join(","))
            }
            Value::Null => Ok(()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

/// Storage types a leaf can hold.
///
/// `KIND` is the primitive kind used for flag registration and coercion. Types
/// without a primitive counterpart set it to `None`; such leaves are offered
/// as string flags and need a parse hook before any source can set them.
///
/// # Example
/// ```
/// use spicetree::{FieldType, Kind, Value};
///
/// #[derive(Debug, Clone, PartialEq)]
/// struct Port(u16);
///
/// impl FieldType for Port {
///     const KIND: Option<Kind> = None;
///
///     fn to_value(&self) -> Value {
///         Value::U16(self.0)
///     }
///
///     fn from_value(value: Value) -> Result<Self, Value> {
///         match value {
///             Value::U16(p) => Ok(Port(p)),
///             other => Err(other),
///         }
///     }
/// }
/// ```
pub trait FieldType: Sized + Send + Sync + 'static {
    const KIND: Option<Kind>;

    /// Name used in error messages.
    fn type_name() -> &'static str {
        std::any::type_name::<Self>()
    }

    fn to_value(&self) -> Value;

    /// Takes the value back out, handing it back untouched when the variant
    /// does not belong to this type.
    fn from_value(value: Value) -> Result<Self, Value>;
}

macro_rules! primitive_field_type {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl FieldType for $ty {
                const KIND: Option<Kind> = Some(Kind::$variant);

                fn type_name() -> &'static str {
                    Kind::$variant.name()
                }

                fn to_value(&self) -> Value {
                    Value::$variant(self.clone())
                }

                fn from_value(value: Value) -> Result<Self, Value> {
                    match value {
                        Value::$variant(v) => Ok(v),
                        other => Err(other),
                    }
                }
            }

            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

primitive_field_type! {
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
    String => String,
    Duration => Duration,
}

impl FieldType for Vec<String> {
    const KIND: Option<Kind> = None;

    fn type_name() -> &'static str {
        "Vec<String>"
    }

    fn to_value(&self) -> Value {
        Value::List(self.iter().cloned().map(Value::String).collect())
    }

    fn from_value(value: Value) -> Result<Self, Value> {
        match value {
            Value::List(items) if items.iter().all(|v| v.as_str().is_some()) => Ok(items
                .into_iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s),
                    _ => None,
                })
                .collect()),
            other => Err(other),
        }
    }
}

const NANOS_PER_UNIT: &[(&str, u128)] = &[
    ("ns", 1),
    ("us", 1_000),
    ("µs", 1_000),
    ("ms", 1_000_000),
    ("s", 1_000_000_000),
    ("m", 60 * 1_000_000_000),
    ("h", 60 * 60 * 1_000_000_000),
    ("d", 24 * 60 * 60 * 1_000_000_000),
];

/// Parse a human readable duration such as `"1h30m"`, `"250ms"` or `"1.5h"`.
///
/// A bare integer is read as seconds.
///
/// # Example
/// ```
/// use spicetree::value::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
/// assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
/// assert_eq!(parse_duration("10").unwrap(), Duration::from_secs(10));
/// ```
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("duration cannot be empty".to_string());
    }

    if let Ok(secs) = input.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total: u128 = 0;
    let mut rest = input;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| format!("missing unit in duration '{input}'"))?;
        if number_len == 0 {
            return Err(format!("invalid duration '{input}'"));
        }
        let number: f64 = rest[..number_len]
            .parse()
            .map_err(|_| format!("invalid number in duration '{input}'"))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        let (_, nanos) = NANOS_PER_UNIT
            .iter()
            .find(|(name, _)| *name == unit)
            .ok_or_else(|| format!("unknown unit '{unit}' in duration '{input}'"))?;
        let nanos = number * *nanos as f64;
        if !nanos.is_finite() || nanos >= u128::MAX as f64 {
            return Err(format!("duration '{input}' is too large"));
        }
        total = total
            .checked_add(nanos as u128)
            .ok_or_else(|| format!("duration '{input}' is too large"))?;
        rest = &rest[unit_len..];
    }

    let secs = u64::try_from(total / 1_000_000_000)
        .map_err(|_| format!("duration '{input}' is too large"))?;
    Ok(Duration::new(secs, (total % 1_000_000_000) as u32))
}

/// Render a duration in the format read by [`parse_duration`].
pub fn format_duration(duration: Duration) -> String {
    if duration.is_zero() {
        return "0s".to_string();
    }

    let secs = duration.as_secs();
    let nanos = duration.subsec_nanos();
    let mut out = String::new();

    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if minutes > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    if seconds > 0 {
        out.push_str(&format!("{seconds}s"));
    }

    if nanos > 0 {
        if nanos % 1_000_000 == 0 {
            out.push_str(&format!("{}ms", nanos / 1_000_000));
        } else if nanos % 1_000 == 0 {
            out.push_str(&format!("{}us", nanos / 1_000));
        } else {
            out.push_str(&format!("{nanos}ns"));
        }
    }

    out
}
