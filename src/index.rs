/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! Typed `u32` indices and index-keyed storage.

#[macro_export]
macro_rules! define_index {
    ($ix:ident, $storage:ident, $elem:ty) => {
        /// Index into the matching storage. Only handed out by `push`.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $ix(u32);

        impl $ix {
            #[inline(always)]
            fn index(self) -> usize {
                self.0 as usize
            }
        }

        /// Dense storage keyed by the matching index type.
        #[derive(Clone, Debug, Default)]
        pub struct $storage {
            storage: Vec<$elem>,
        }

        impl $storage {
            #[inline(always)]
            pub fn with_capacity(n: usize) -> Self {
                Self {
                    storage: Vec::with_capacity(n),
                }
            }

            #[inline(always)]
            pub fn push(&mut self, value: $elem) -> $ix {
                let idx = $ix(self.storage.len() as u32);
                self.storage.push(value);
                idx
            }
        }

        impl core::ops::Index<$ix> for $storage {
            type Output = $elem;

            #[inline(always)]
            fn index(&self, i: $ix) -> &Self::Output {
                &self.storage[i.index()]
            }
        }

        impl core::ops::IndexMut<$ix> for $storage {
            #[inline(always)]
            fn index_mut(&mut self, i: $ix) -> &mut Self::Output {
                &mut self.storage[i.index()]
            }
        }
    };

    ($ix:ident) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[cfg_attr(
            feature = "enable-serde",
            derive(::serde::Serialize, ::serde::Deserialize)
        )]
        pub struct $ix(pub u32);
        impl $ix {
            #[inline(always)]
            pub fn new(i: usize) -> Self {
                Self(i as u32)
            }
            #[inline(always)]
            pub fn index(self) -> usize {
                debug_assert!(self.is_valid());
                self.0 as usize
            }
            #[inline(always)]
            pub fn invalid() -> Self {
                Self(u32::MAX)
            }
            #[inline(always)]
            pub fn is_invalid(self) -> bool {
                self == Self::invalid()
            }
            #[inline(always)]
            pub fn is_valid(self) -> bool {
                self != Self::invalid()
            }
            #[inline(always)]
            pub fn next(self) -> $ix {
                debug_assert!(self.is_valid());
                Self(self.0 + 1)
            }
            #[inline(always)]
            pub fn prev(self) -> $ix {
                debug_assert!(self.is_valid());
                Self(self.0 - 1)
            }
            #[inline(always)]
            pub fn raw_u32(self) -> u32 {
                self.0
            }
        }
    };
}

define_index!(Block);

/// A half-open run of consecutive blocks in program order, such as
/// the body of a loop from its header up to (excluding) its exit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockRange {
    from: Block,
    to: Block,
}

impl BlockRange {
    #[inline(always)]
    pub fn new(from: Block, to: Block) -> Self {
        debug_assert!(from.index() <= to.index());
        BlockRange { from, to }
    }

    #[inline(always)]
    pub fn first(self) -> Block {
        self.from
    }

    #[inline(always)]
    pub fn len(self) -> usize {
        self.to.index() - self.from.index()
    }

    #[inline(always)]
    pub fn is_empty(self) -> bool {
        self.len() == 0
    }

    #[inline(always)]
    pub fn contains(self, block: Block) -> bool {
        self.from <= block && block < self.to
    }

    pub fn iter(self) -> impl Iterator<Item = Block> {
        (self.from.0..self.to.0).map(Block)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_block_range() {
        let range = BlockRange::new(Block::new(2), Block::new(2));
        assert!(range.is_empty());

        let range = BlockRange::new(Block::new(1), Block::new(4));
        assert_eq!(range.len(), 3);
        assert!(range.contains(Block::new(1)));
        assert!(!range.contains(Block::new(4)));
        assert_eq!(
            range.iter().collect::<Vec<_>>(),
            vec![Block::new(1), Block::new(2), Block::new(3)]
        );
    }

    #[test]
    fn test_block_index() {
        let b = Block::new(7);
        assert_eq!(b.next().index(), 8);
        assert_eq!(b.prev().index(), 6);
        assert!(Block::invalid().is_invalid());
    }
}
