//! Solidity value types.
//!
//! Every type here serializes to its abi slot(s) when the serializer is not
//! human readable (our abi [Serializer](super::Serializer)) and to a string
//! otherwise: `0x` prefixed hex for byte strings and addresses, decimal for
//! integers. The JSON wire format relies on the latter.

use core::{fmt, str::FromStr};

use num_bigint::BigInt;
use rand::{distributions::Standard, prelude::Distribution};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use uint::construct_uint;

/// Error returned when parsing one of the types from a string.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("expected {expected} bytes, got {got}")]
    Length { expected: usize, got: usize },
    #[error("invalid integer {0:?}")]
    Integer(String),
}

fn decode_hex<const N: usize>(s: &str) -> Result<[u8; N], ParseError> {
    let s = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    let bytes = hex::decode(s)?;
    bytes.as_slice().try_into().map_err(|_| ParseError::Length {
        expected: N,
        got: bytes.len(),
    })
}

macro_rules! impl_hex_fmt {
    ($T:ident) => {
        impl fmt::Debug for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(self, f)
            }
        }

        impl fmt::Display for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("0x")?;
                for b in self.0 {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }
    };
}

macro_rules! impl_hex_parse {
    ($T:ident, $N:literal) => {
        impl FromStr for $T {
            type Err = ParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                decode_hex::<$N>(s).map($T)
            }
        }

        impl<'de> Deserialize<'de> for $T {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(de::Error::custom)
            }
        }
    };
}

macro_rules! bytesN {
    ( $T:ident, $N:literal ) => {
        #[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Copy, Clone)]
        pub struct $T(pub [u8; $N]);

        impl Serialize for $T {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                if serializer.is_human_readable() {
                    serializer.collect_str(self)
                } else {
                    serializer.serialize_bytes(&self.0)
                }
            }
        }

        impl Distribution<$T> for Standard {
            fn sample<R: rand::Rng + ?Sized>(&self, rng: &mut R) -> $T {
                let mut bytes = [0u8; $N];
                rng.fill(&mut bytes[..]);
                $T(bytes)
            }
        }

        impl Default for $T {
            fn default() -> Self {
                Self([0; $N])
            }
        }

        impl_hex_fmt!($T);
        impl_hex_parse!($T, $N);
    };
}

bytesN!(Hash, 32);
bytesN!(Signature, 65);

impl Hash {
    pub const ZERO: Hash = Hash([0; 32]);

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl Signature {
    pub fn new(rs: &[u8; 64], v: u8) -> Self {
        let mut sig = Signature([0; 65]);
        sig.0[..64].copy_from_slice(rs);
        sig.0[64] = v;
        sig
    }
}

// We could use primitive_types:U256 or ethereum_types::U256 here, too. Both
// have the ability to serde serialize, but unfortunately to a hex string, which
// is neither the abi encoding nor the decimal string the wire format uses.
construct_uint! {
    pub struct U256(4);
}

impl Serialize for U256 {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            serializer.collect_str(self)
        } else {
            let mut bytes = [0u8; 32];
            self.to_big_endian(&mut bytes);
            serializer.serialize_bytes(&bytes)
        }
    }
}

impl<'de> Deserialize<'de> for U256 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        U256::from_dec_str(&s).map_err(|_| de::Error::custom(ParseError::Integer(s)))
    }
}

impl Distribution<U256> for Standard {
    fn sample<R: rand::Rng + ?Sized>(&self, rng: &mut R) -> U256 {
        let buf: [u8; 32] = rng.gen();
        U256::from_big_endian(&buf)
    }
}

/// Solidity `int256`: two's complement, big endian.
///
/// Only used as an encoding target, arithmetic happens on
/// [Decimal](crate::Decimal) before conversion.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct I256(pub [u8; 32]);

impl I256 {
    pub fn is_negative(&self) -> bool {
        self.0[0] & 0x80 != 0
    }

    pub fn to_big_int(&self) -> BigInt {
        BigInt::from_signed_bytes_be(&self.0)
    }
}

impl From<i64> for I256 {
    fn from(v: i64) -> Self {
        let mut bytes = [if v < 0 { 0xff } else { 0x00 }; 32];
        bytes[24..].copy_from_slice(&v.to_be_bytes());
        I256(bytes)
    }
}

impl fmt::Debug for I256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.to_big_int(), f)
    }
}

impl Serialize for I256 {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            serializer.collect_str(&self.to_big_int())
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(pub [u8; 20]);
impl_hex_fmt!(Address);
impl_hex_parse!(Address, 20);

impl Address {
    pub const ZERO: Address = Address([0; 20]);
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            return serializer.collect_str(self);
        }
        // For some unknown reason abi encoding has addresses right aligned
        // (like uints) instead of left aligned like bytes/bytesN.
        let mut bytes = [0u8; 32];
        bytes[32 - 20..].copy_from_slice(self.0.as_slice());
        serializer.serialize_bytes(&bytes)
    }
}

impl Distribution<Address> for Standard {
    fn sample<R: rand::Rng + ?Sized>(&self, rng: &mut R) -> Address {
        Address(rng.gen())
    }
}

/// Addresses used as account references occupy a right aligned `bytes32`,
/// the same way they do in an abi slot.
impl From<Address> for Hash {
    fn from(addr: Address) -> Self {
        let mut bytes = [0u8; 32];
        bytes[32 - 20..].copy_from_slice(&addr.0);
        Hash(bytes)
    }
}
