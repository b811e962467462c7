//! Work-type capability flags for queue routing.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Bitset describing which kinds of GPU work a queue family can execute.
///
/// Routing treats a request as satisfied by any family whose flags are a
/// superset of the requested set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkTypeFlags {
    /// Raw bit pattern.
    pub bits: u32,
}

impl WorkTypeFlags {
    /// No capabilities.
    pub const NONE: Self = Self { bits: 0 };
    /// Rasterization and render passes.
    pub const GRAPHICS: Self = Self { bits: 1 << 0 };
    /// Copies between buffers and images.
    pub const TRANSFER: Self = Self { bits: 1 << 1 };
    /// Compute dispatches.
    pub const COMPUTE: Self = Self { bits: 1 << 2 };
    /// Swapchain presentation.
    pub const PRESENTATION: Self = Self { bits: 1 << 3 };

    /// All four capabilities.
    pub const ALL: Self = Self { bits: 0b1111 };

    /// Whether every flag in `other` is present in `self`.
    pub fn contains(self, other: Self) -> bool {
        self.bits & other.bits == other.bits
    }

    /// Whether no flags are set.
    pub fn is_empty(self) -> bool {
        self.bits == 0
    }
}

impl BitOr for WorkTypeFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self {
            bits: self.bits | rhs.bits,
        }
    }
}

impl BitOrAssign for WorkTypeFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.bits |= rhs.bits;
    }
}

impl fmt::Display for WorkTypeFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "none");
        }
        let mut first = true;
        for (flag, name) in [
            (Self::GRAPHICS, "graphics"),
            (Self::TRANSFER, "transfer"),
            (Self::COMPUTE, "compute"),
            (Self::PRESENTATION, "presentation"),
        ] {
            if self.contains(flag) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_is_superset() {
        let family = WorkTypeFlags::GRAPHICS | WorkTypeFlags::TRANSFER;
        assert!(family.contains(WorkTypeFlags::GRAPHICS));
        assert!(family.contains(WorkTypeFlags::GRAPHICS | WorkTypeFlags::TRANSFER));
        assert!(!family.contains(WorkTypeFlags::COMPUTE));
        assert!(!family.contains(WorkTypeFlags::GRAPHICS | WorkTypeFlags::COMPUTE));
        assert!(WorkTypeFlags::ALL.contains(family));
    }

    #[test]
    fn test_display_lists_set_flags() {
        assert_eq!(WorkTypeFlags::NONE.to_string(), "none");
        assert_eq!(
            (WorkTypeFlags::GRAPHICS | WorkTypeFlags::PRESENTATION).to_string(),
            "graphics|presentation"
        );
    }
}
