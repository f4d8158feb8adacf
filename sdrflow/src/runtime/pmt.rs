use std::collections::BTreeMap;

/// Opaque tagged value carried by tags and messages.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Pmt {
    #[default]
    Null,
    Bool(bool),
    U64(u64),
    I64(i64),
    F64(f64),
    String(String),
    Blob(Vec<u8>),
    VecF32(Vec<f32>),
    Map(BTreeMap<String, Pmt>),
}

impl Pmt {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Pmt::U64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Pmt::F64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Pmt::String(s) => Some(s),
            _ => None,
        }
    }
}

macro_rules! impl_from {
    ($($t:ty => $variant:ident),*) => {
        $(
            impl From<$t> for Pmt {
                fn from(value: $t) -> Pmt {
                    Pmt::$variant(value.into())
                }
            }
        )*
    };
}

impl_from!(
    bool => Bool,
    u64 => U64,
    u32 => U64,
    i64 => I64,
    i32 => I64,
    f64 => F64,
    f32 => F64,
    String => String,
    &str => String,
    Vec<u8> => Blob,
    Vec<f32> => VecF32
);
