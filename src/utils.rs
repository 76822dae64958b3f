//! Misc serde helpers.

use base64ct::{Base64UrlUnpadded, Encoding};
use serde::{
    de::{DeserializeOwned, Error as _, SeqAccess, Visitor},
    Deserialize, Deserializer, Serialize, Serializer,
};

use std::{fmt, marker::PhantomData};

/// (De)serializes a `Vec` checking that its length is within `MIN..=MAX`.
///
/// Used for poll options, so that a stored or submitted poll never carries
/// fewer than `MIN_OPTIONS` or more than `MAX_OPTIONS` options.
pub(crate) struct VecHelper<T, const MIN: usize, const MAX: usize>(PhantomData<T>);

impl<T, const MIN: usize, const MAX: usize> VecHelper<T, MIN, MAX>
where
    T: Serialize + DeserializeOwned,
{
    fn new() -> Self {
        Self(PhantomData)
    }

    pub fn serialize<S>(values: &[T], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        debug_assert!(values.len() >= MIN && values.len() <= MAX);
        serializer.collect_seq(values.iter())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<T>, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_seq(Self::new())
    }
}

impl<'de, T, const MIN: usize, const MAX: usize> Visitor<'de> for VecHelper<T, MIN, MAX>
where
    T: DeserializeOwned,
{
    type Value = Vec<T>;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "at least {MIN} and at most {MAX} items")
    }

    fn visit_seq<S>(self, mut access: S) -> Result<Self::Value, S::Error>
    where
        S: SeqAccess<'de>,
    {
        let mut items: Vec<T> = if let Some(size) = access.size_hint() {
            if size < MIN || size > MAX {
                return Err(S::Error::invalid_length(size, &self));
            }
            Vec::with_capacity(size)
        } else {
            Vec::new()
        };

        while let Some(value) = access.next_element::<T>()? {
            items.push(value);
        }
        if items.len() >= MIN && items.len() <= MAX {
            Ok(items)
        } else {
            Err(S::Error::invalid_length(items.len(), &self))
        }
    }
}

/// Implements `Debug`, `Display`, `FromStr` and serde traits for a newtype around `[u8; 32]`.
/// The string form is unpadded URL-safe base64.
macro_rules! impl_base64_id {
    ($name:ident) => {
        impl std::fmt::Debug for $name {
            fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                formatter
                    .debug_tuple(stringify!($name))
                    .field(&self.to_string())
                    .finish()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                use base64ct::Encoding as _;

                let s = base64ct::Base64UrlUnpadded::encode_string(&self.0);
                formatter.write_str(&s)
            }
        }

        impl std::str::FromStr for $name {
            type Err = Box<dyn std::error::Error>;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                use base64ct::Encoding as _;

                const EXPECTED_INPUT_LEN: usize = 43; // ceil(32 * 4 / 3)
                const LEN_ERROR: &str = concat!("Unexpected ", stringify!($name), " length");

                if s.len() != EXPECTED_INPUT_LEN {
                    return Err(LEN_ERROR.into());
                }
                let mut buffer = [0_u8; 32];
                let decoded = base64ct::Base64UrlUnpadded::decode(s, &mut buffer)?;
                if decoded.len() != 32 {
                    return Err(LEN_ERROR.into());
                }
                Ok(Self(buffer))
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                use serde::de::Error as _;

                let s = <String as serde::Deserialize>::deserialize(deserializer)?;
                s.parse().map_err(D::Error::custom)
            }
        }
    };
}

pub(crate) use impl_base64_id;

/// (De)serializes bytes as an unpadded URL-safe base64 string.
pub(crate) mod base64_bytes {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&Base64UrlUnpadded::encode_string(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        Base64UrlUnpadded::decode_vec(&s).map_err(D::Error::custom)
    }
}
