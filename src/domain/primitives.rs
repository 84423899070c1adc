//! Domain primitives: entity ids and the Money type.

use rust_decimal::Decimal as RustDecimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a fresh random id.
            pub fn new() -> Self {
                $name(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map($name)
            }
        }
    };
}

uuid_id!(
    /// Auction identity.
    AuctionId
);
uuid_id!(
    /// User identity, owned by the external user service.
    UserId
);
uuid_id!(
    /// Bid identity.
    BidId
);
uuid_id!(
    /// Auto-bid rule identity.
    AutoBidId
);
uuid_id!(
    /// Product identity, owned by the external catalog service.
    ProductId
);

/// Monetary amount backed by rust_decimal.
///
/// Stored as a canonical string, serialized to JSON as a number.
/// Avoids float drift in bid arithmetic.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Money(#[serde(with = "rust_decimal::serde::float")] RustDecimal);

impl Money {
    pub fn new(value: RustDecimal) -> Self {
        Money(value)
    }

    /// Parse from a canonical decimal string.
    ///
    /// # Errors
    /// Returns an error if the string is not a valid decimal number.
    pub fn from_canonical(s: &str) -> Result<Self, rust_decimal::Error> {
        RustDecimal::from_str(s).map(Money)
    }

    /// Format without exponent notation or trailing zeros.
    pub fn to_canonical_string(&self) -> String {
        format!("{}", self.0.normalize())
    }

    pub fn zero() -> Self {
        Money(RustDecimal::ZERO)
    }

    /// The minimum outbid increment: a whole 1.00.
    pub fn one() -> Self {
        Money(RustDecimal::ONE)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        !self.is_zero() && self.0.is_sign_positive()
    }

    pub fn inner(&self) -> RustDecimal {
        self.0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_canonical_string())
    }
}

impl FromStr for Money {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_canonical(s)
    }
}

impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_canonical_string_strips_trailing_zeros() {
        let m = Money::from_canonical("10.500").unwrap();
        assert_eq!(m.to_canonical_string(), "10.5");
    }

    #[test]
    fn test_money_ordering() {
        let a = Money::from_canonical("10").unwrap();
        let b = Money::from_canonical("10.01").unwrap();
        assert!(b > a);
        assert_eq!(a + Money::one(), Money::from_canonical("11").unwrap());
    }

    #[test]
    fn test_money_is_positive() {
        assert!(Money::from_canonical("0.01").unwrap().is_positive());
        assert!(!Money::zero().is_positive());
        assert!(!Money::from_canonical("-1").unwrap().is_positive());
    }

    #[test]
    fn test_money_json_roundtrip_as_number() {
        let m = Money::from_canonical("12.5").unwrap();
        let json = serde_json::to_string(&m).unwrap();
        assert_eq!(json, "12.5");
        let back: Money = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn test_id_parse_roundtrip() {
        let id = AuctionId::new();
        let parsed: AuctionId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }
}
