// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A macro to declare bitflag sets for descriptor and state masks.
//!
//! The generated type is a transparent wrapper around an integer with `const`
//! set operations, so flag tables (state legality, combinable read states)
//! can be evaluated in `const` context.

#[macro_export]
#[doc(hidden)]
macro_rules! keel_bitflags {
    (
        $(#[$attr:meta])*
        $vis:vis struct $name:ident: $ty:ty {
            $(
                $(#[$flag_attr:meta])*
                const $flag_name:ident = $flag_value:expr;
            )*
        }
    ) => {
        $(#[$attr])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
        $vis struct $name {
            bits: $ty,
        }

        #[allow(dead_code)]
        impl $name {
            /// An empty set of flags.
            pub const EMPTY: Self = Self { bits: 0 };

            $(
                $(#[$flag_attr])*
                pub const $flag_name: Self = Self { bits: $flag_value };
            )*

            /// Creates a flag set from raw bits, keeping unknown bits.
            pub const fn from_bits_retain(bits: $ty) -> Self {
                Self { bits }
            }

            /// Returns the raw value of the flag set.
            pub const fn bits(&self) -> $ty {
                self.bits
            }

            /// Returns `true` if no flag is set.
            pub const fn is_empty(&self) -> bool {
                self.bits == 0
            }

            /// Returns `true` if all flags in `other` are set in `self`.
            pub const fn contains(&self, other: Self) -> bool {
                (self.bits & other.bits) == other.bits
            }

            /// Returns `true` if any flag in `other` is set in `self`.
            pub const fn intersects(&self, other: Self) -> bool {
                (self.bits & other.bits) != 0
            }

            /// Returns the union of both sets.
            #[must_use]
            pub const fn union(self, other: Self) -> Self {
                Self { bits: self.bits | other.bits }
            }

            /// Returns the intersection of both sets.
            #[must_use]
            pub const fn intersection(self, other: Self) -> Self {
                Self { bits: self.bits & other.bits }
            }

            /// Returns `self` without the flags in `other`.
            #[must_use]
            pub const fn difference(self, other: Self) -> Self {
                Self { bits: self.bits & !other.bits }
            }

            /// Inserts the flags in `other`.
            pub fn insert(&mut self, other: Self) {
                self.bits |= other.bits;
            }

            /// Removes the flags in `other`.
            pub fn remove(&mut self, other: Self) {
                self.bits &= !other.bits;
            }

            /// Sets or clears the flags in `other`.
            pub fn set(&mut self, other: Self, value: bool) {
                if value {
                    self.insert(other);
                } else {
                    self.remove(other);
                }
            }
        }

        impl core::ops::BitOr for $name {
            type Output = Self;
            fn bitor(self, other: Self) -> Self {
                self.union(other)
            }
        }

        impl core::ops::BitAnd for $name {
            type Output = Self;
            fn bitand(self, other: Self) -> Self {
                self.intersection(other)
            }
        }

        impl core::ops::Not for $name {
            type Output = Self;
            fn not(self) -> Self {
                Self { bits: !self.bits }
            }
        }

        impl core::ops::BitOrAssign for $name {
            fn bitor_assign(&mut self, other: Self) {
                self.bits |= other.bits;
            }
        }

        impl core::ops::BitAndAssign for $name {
            fn bitand_assign(&mut self, other: Self) {
                self.bits &= other.bits;
            }
        }

        impl core::fmt::Debug for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                let mut remaining = self.bits;
                let mut first = true;

                write!(f, "{}(", stringify!($name))?;
                $(
                    let flag: $ty = $flag_value;
                    if flag != 0 && (remaining & flag) == flag {
                        if !first {
                            write!(f, " | ")?;
                        }
                        write!(f, "{}", stringify!($flag_name))?;
                        remaining &= !flag;
                        first = false;
                    }
                )*
                if remaining != 0 {
                    if !first {
                        write!(f, " | ")?;
                    }
                    write!(f, "{:#x}", remaining)?;
                    first = false;
                }
                if first {
                    write!(f, "EMPTY")?;
                }
                write!(f, ")")
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::keel_bitflags;

    keel_bitflags! {
        /// Flags used to exercise the macro.
        pub struct Access: u32 {
            const READ = 1 << 0;
            const WRITE = 1 << 1;
            const COPY = 1 << 2;
            const READ_COPY = Self::READ.bits() | Self::COPY.bits();
        }
    }

    #[test]
    fn test_set_operations() {
        let rw = Access::READ | Access::WRITE;
        assert!(rw.contains(Access::READ));
        assert!(!rw.contains(Access::READ_COPY));
        assert!(rw.intersects(Access::READ_COPY));
        assert_eq!(rw.difference(Access::WRITE), Access::READ);
        assert_eq!((rw & Access::READ_COPY), Access::READ);
        assert!(Access::EMPTY.is_empty());
        assert_eq!(Access::default(), Access::EMPTY);
    }

    #[test]
    fn test_mutation() {
        let mut flags = Access::READ;
        flags.set(Access::COPY, true);
        assert_eq!(flags, Access::READ_COPY);
        flags.set(Access::READ, false);
        assert_eq!(flags, Access::COPY);
        flags |= Access::WRITE;
        flags.remove(Access::COPY);
        assert_eq!(flags, Access::WRITE);
    }

    #[test]
    fn test_debug_output() {
        assert_eq!(format!("{:?}", Access::EMPTY), "Access(EMPTY)");
        assert_eq!(
            format!("{:?}", Access::READ | Access::WRITE),
            "Access(READ | WRITE)"
        );
        assert_eq!(
            format!("{:?}", Access::READ_COPY),
            "Access(READ | COPY)"
        );
        assert_eq!(
            format!("{:?}", Access::from_bits_retain(0x100)),
            "Access(0x100)"
        );
    }
}
