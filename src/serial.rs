//! Serde integration support.

use std::fmt;

use serde::de::{Error, Unexpected, Visitor};
use serde::*;

/// Ignore deserialization errors and revert to default.
pub fn ignore_errors<'d, T: Deserialize<'d> + Default, D: Deserializer<'d>>(
    d: D,
) -> Result<T, D::Error> {
    use serde_json::Value;

    let v = Value::deserialize(d)?;
    Ok(T::deserialize(v).ok().unwrap_or_default())
}

/// Deserialize a maybe-string ID into a u64.
pub fn deserialize_id<'d, D: Deserializer<'d>>(d: D) -> Result<u64, D::Error> {
    struct IdVisitor;
    impl<'d> Visitor<'d> for IdVisitor {
        type Value = u64;

        fn expecting(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
            write!(fmt, "a u64 or parseable string")
        }

        fn visit_i64<E: Error>(self, v: i64) -> Result<u64, E> {
            if v >= 0 {
                Ok(v as u64)
            } else {
                Err(E::invalid_value(Unexpected::Signed(v), &self))
            }
        }

        fn visit_u64<E: Error>(self, v: u64) -> Result<u64, E> {
            Ok(v)
        }

        fn visit_str<E: Error>(self, v: &str) -> Result<u64, E> {
            v.parse::<u64>()
                .map_err(|_| E::invalid_value(Unexpected::Str(v), &self))
        }
    }

    d.deserialize_any(IdVisitor)
}

/// Make sure a field holds a certain numeric value, or fail otherwise.
///
/// Lets `#[serde(untagged)]` wire enums discriminate on a fixed opcode.
#[derive(Debug, Clone, Copy, Default)]
pub struct Opcode<const N: u64>;

impl<'de, const N: u64> Deserialize<'de> for Opcode<N> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct NumberVisitor<const N: u64>;

        impl<'d, const N: u64> Visitor<'d> for NumberVisitor<N> {
            type Value = u64;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                write!(formatter, "the number {}", N)
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: Error,
            {
                if v == N {
                    Ok(v)
                } else {
                    Err(E::invalid_value(Unexpected::Unsigned(v), &self))
                }
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: Error,
            {
                if v >= 0 && v as u64 == N {
                    Ok(v as u64)
                } else {
                    Err(E::invalid_value(Unexpected::Signed(v), &self))
                }
            }
        }

        deserializer.deserialize_any(NumberVisitor::<N>)?;
        Ok(Self)
    }
}

impl<const N: u64> Serialize for Opcode<N> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(N)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct WithId {
        #[serde(deserialize_with = "deserialize_id")]
        id: u64,
    }

    #[test]
    fn id_accepts_string_and_number() {
        let b: WithId = serde_json::from_str(r#"{"id": "116785174"}"#).unwrap();
        assert_eq!(b.id, 116785174);

        let c: WithId = serde_json::from_str(r#"{"id": 116785174}"#).unwrap();
        assert_eq!(c.id, 116785174);

        assert!(serde_json::from_str::<WithId>(r#"{"id": "not-a-number"}"#).is_err());
    }

    #[test]
    fn opcode_discriminates() {
        assert!(serde_json::from_str::<Opcode<10>>("10").is_ok());
        assert!(serde_json::from_str::<Opcode<10>>("11").is_err());
        assert_eq!(serde_json::to_string(&Opcode::<2>).unwrap(), "2");
    }
}
