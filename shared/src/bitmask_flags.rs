//! Small typed bitmask helper used for collision groups, visibility groups and
//! per-record flags.
//!
//! A flag enum is declared with [`define_bitmask_flags!`]; each variant's discriminant
//! is its bit index. [`BitmaskFlags`] stores a set of such flags in any primitive
//! integer, so the same helper serves the `u32` group masks rapier wants and the
//! `u8` flags kept per record.

use num_traits::{One, PrimInt};

/// Trait implemented by flag enums declared with [`define_bitmask_flags!`].
pub trait FlagBitmask {
    type Storage: PrimInt;

    fn bit_index(&self) -> u8;

    fn mask(&self) -> Self::Storage {
        // NOTE: `bit_index()` must be < number of bits in `Storage`.
        Self::Storage::one() << (self.bit_index() as usize)
    }
}

/// A set of flags packed into a primitive integer.
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BitmaskFlags<T: PrimInt> {
    pub bits: T,
}

impl<T: PrimInt> BitmaskFlags<T> {
    pub fn new(bits: T) -> Self {
        Self { bits }
    }

    /// Empty set.
    pub fn empty() -> Self {
        Self { bits: T::zero() }
    }

    /// Set containing exactly `tags`.
    pub fn of<U: FlagBitmask<Storage = T> + Copy>(tags: &[U]) -> Self {
        Self {
            bits: combined(tags),
        }
    }

    pub fn bits(&self) -> T {
        self.bits
    }

    pub fn is_empty(&self) -> bool {
        self.bits == T::zero()
    }

    pub fn add<U: FlagBitmask<Storage = T>>(&mut self, tag: U) {
        self.bits = self.bits | tag.mask();
    }

    pub fn remove<U: FlagBitmask<Storage = T>>(&mut self, tag: U) {
        self.bits = self.bits & !tag.mask();
    }

    /// Adds or removes `tag` depending on `on`.
    pub fn set<U: FlagBitmask<Storage = T>>(&mut self, tag: U, on: bool) {
        if on {
            self.add(tag);
        } else {
            self.remove(tag);
        }
    }

    pub fn has<U: FlagBitmask<Storage = T>>(&self, tag: U) -> bool {
        (self.bits & tag.mask()) != T::zero()
    }

    pub fn has_any<U: FlagBitmask<Storage = T> + Copy>(&self, tags: &[U]) -> bool {
        if tags.is_empty() {
            return false;
        }
        (self.bits & combined(tags)) != T::zero()
    }

    pub fn intersects(&self, other: Self) -> bool {
        (self.bits & other.bits) != T::zero()
    }

    pub fn clear(&mut self) {
        self.bits = T::zero();
    }
}

fn combined<T: PrimInt, U: FlagBitmask<Storage = T> + Copy>(tags: &[U]) -> T {
    tags.iter().fold(T::zero(), |acc, t| acc | t.mask())
}

/// Declare a bitmask-backed enum and implement `FlagBitmask` for it.
///
/// Example:
/// ```rust
/// domain_shared::define_bitmask_flags!(Layer, u32, {
///     Ground,
///     Water,
/// });
/// ```
#[macro_export]
macro_rules! define_bitmask_flags {
    ($name:ident, $storage:ty, { $($(#[$meta:meta])* $variant:ident),* $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum $name {
            $($(#[$meta])* $variant),*
        }

        impl $crate::bitmask_flags::FlagBitmask for $name {
            type Storage = $storage;

            fn bit_index(&self) -> u8 {
                *self as u8
            }
        }
    };
}

define_bitmask_flags!(CollisionGroup, u32, {
    /// Regular simulated bodies.
    Physical,
    /// Bodies that only collide with terrain (non-solid free entities).
    NonPhysical,
    /// Terrain segments, world borders and water bodies.
    Terrain,
    /// Fixed and planted solid entities.
    Static,
});

define_bitmask_flags!(VisibilityGroup, u32, {
    Observer,
    Observable,
    ObservablePrivate,
});

pub type GroupMask = BitmaskFlags<u32>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn of_and_has() {
        let flags = GroupMask::of(&[CollisionGroup::Physical, CollisionGroup::Static]);
        assert!(flags.has(CollisionGroup::Physical));
        assert!(flags.has(CollisionGroup::Static));
        assert!(!flags.has(CollisionGroup::Terrain));
        assert_eq!(flags.bits(), 0b1001);
    }

    #[test]
    fn set_toggles() {
        let mut flags = GroupMask::empty();
        flags.set(CollisionGroup::Terrain, true);
        assert!(flags.has(CollisionGroup::Terrain));
        flags.set(CollisionGroup::Terrain, false);
        assert!(flags.is_empty());
    }

    #[test]
    fn has_any_on_empty_slice_is_false() {
        let flags = GroupMask::of(&[CollisionGroup::Physical]);
        assert!(!flags.has_any::<CollisionGroup>(&[]));
        assert!(flags.has_any(&[CollisionGroup::Static, CollisionGroup::Physical]));
    }
}
