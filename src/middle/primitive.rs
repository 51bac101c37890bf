use std::str::FromStr;

use strum::{EnumIter, EnumString};

use crate::frontend::ast::{BinaryOperatorKind, UnaryOperatorKind};

/// Fixed width integer types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum IntKind {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
}

impl core::fmt::Display for IntKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntKind::I8 => write!(f, "i8"),
            IntKind::I16 => write!(f, "i16"),
            IntKind::I32 => write!(f, "i32"),
            IntKind::I64 => write!(f, "i64"),
            IntKind::U8 => write!(f, "u8"),
            IntKind::U16 => write!(f, "u16"),
            IntKind::U32 => write!(f, "u32"),
            IntKind::U64 => write!(f, "u64"),
        }
    }
}

impl IntKind {
    /// Order in which an unconstrained integer literal picks its type
    pub const LITERAL_PRIORITY: [IntKind; 4] = [IntKind::I32, IntKind::U32, IntKind::I64, IntKind::U64];

    pub fn from_parts(is_signed: bool, bit_width: u32) -> Option<Self> {
        Some(match (is_signed, bit_width) {
            (true, 8) => IntKind::I8,
            (true, 16) => IntKind::I16,
            (true, 32) => IntKind::I32,
            (true, 64) => IntKind::I64,
            (false, 8) => IntKind::U8,
            (false, 16) => IntKind::U16,
            (false, 32) => IntKind::U32,
            (false, 64) => IntKind::U64,
            _ => return None,
        })
    }

    pub fn is_signed(self) -> bool {
        matches!(self, IntKind::I8 | IntKind::I16 | IntKind::I32 | IntKind::I64)
    }

    pub fn bit_width(self) -> u32 {
        match self {
            IntKind::I8 | IntKind::U8 => 8,
            IntKind::I16 | IntKind::U16 => 16,
            IntKind::I32 | IntKind::U32 => 32,
            IntKind::I64 | IntKind::U64 => 64,
        }
    }

    /// Largest non negative value representable by this kind
    pub fn max_value(self) -> u64 {
        let bits = self.bit_width() - self.is_signed() as u32;

        if bits == 64 { u64::MAX } else { (1u64 << bits) - 1 }
    }

    pub fn fits(self, value: u64) -> bool {
        value <= self.max_value()
    }

    /// Whether `-magnitude` is representable
    pub fn fits_negated(self, magnitude: u64) -> bool {
        if self.is_signed() {
            magnitude <= self.max_value() + 1
        } else {
            magnitude == 0
        }
    }

    /// First kind in [`Self::LITERAL_PRIORITY`] able to hold `value`
    pub fn for_unconstrained_literal(value: u64) -> Option<Self> {
        Self::LITERAL_PRIORITY
            .into_iter()
            .find(|kind| kind.fits(value))
    }

    pub fn supports_binary_op(self, kind: BinaryOperatorKind) -> bool {
        match kind {
            BinaryOperatorKind::Add
            | BinaryOperatorKind::Subtract
            | BinaryOperatorKind::Multiply
            | BinaryOperatorKind::Divide
            | BinaryOperatorKind::Modulus
            | BinaryOperatorKind::Equals
            | BinaryOperatorKind::NotEquals
            | BinaryOperatorKind::LessThan
            | BinaryOperatorKind::LessThanOrEqualTo
            | BinaryOperatorKind::GreaterThan
            | BinaryOperatorKind::GreaterThanOrEqualTo
            | BinaryOperatorKind::BitwiseAnd
            | BinaryOperatorKind::BitwiseOr
            | BinaryOperatorKind::BitwiseXor
            | BinaryOperatorKind::ShiftLeft
            | BinaryOperatorKind::ShiftRight => true,
            BinaryOperatorKind::LogicalAnd | BinaryOperatorKind::LogicalOr => false,
        }
    }

    pub fn supports_unary_op(self, kind: UnaryOperatorKind) -> bool {
        match kind {
            UnaryOperatorKind::BitwiseNot => true,
            UnaryOperatorKind::Negate | UnaryOperatorKind::Plus => self.is_signed(),
            UnaryOperatorKind::LogicalNot => false,
        }
    }
}

/// Type names which never resolve to a class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveKind {
    Void,
    Bool,
    Int(IntKind),
}

impl FromStr for PrimitiveKind {
    type Err = strum::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "void" => Ok(PrimitiveKind::Void),
            "bool" => Ok(PrimitiveKind::Bool),
            _ => IntKind::from_str(s).map(PrimitiveKind::Int),
        }
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn literal_priority_picks_the_first_fitting_kind() {
        assert_eq!(IntKind::for_unconstrained_literal(42), Some(IntKind::I32));
        assert_eq!(
            IntKind::for_unconstrained_literal(4_294_967_295),
            Some(IntKind::U32)
        );
        assert_eq!(
            IntKind::for_unconstrained_literal(9_223_372_036_854_775_807),
            Some(IntKind::I64)
        );
        assert_eq!(IntKind::for_unconstrained_literal(u64::MAX), Some(IntKind::U64));
    }

    #[test]
    fn bounds_match_the_bit_width() {
        assert_eq!(IntKind::I8.max_value(), 127);
        assert_eq!(IntKind::U8.max_value(), 255);
        assert!(!IntKind::U16.fits(65_536));
        assert_eq!(IntKind::U64.max_value(), u64::MAX);
        assert!(IntKind::I8.fits_negated(128));
        assert!(!IntKind::I8.fits_negated(129));
        assert!(IntKind::I64.fits_negated(1 << 63));
        assert!(!IntKind::U32.fits_negated(1));
    }

    #[test]
    fn names_round_trip_through_strum() {
        for kind in IntKind::iter() {
            assert_eq!(IntKind::from_str(&kind.to_string()), Ok(kind));
            assert_eq!(IntKind::from_parts(kind.is_signed(), kind.bit_width()), Some(kind));
        }

        assert_eq!(PrimitiveKind::from_str("void"), Ok(PrimitiveKind::Void));
        assert!(PrimitiveKind::from_str("Vector").is_err());
    }
}
