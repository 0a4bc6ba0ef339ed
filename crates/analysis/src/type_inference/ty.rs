//! The type lattice of SSA registers.
//!
//! A type is a set of bits that only ever grows while inference runs. The
//! value flags describe the register itself; the array flags describe the
//! innermost element of an array reference and mirror the value flags
//! shifted left by [`ARRAY_TYPE_SHIFT`]. The array depth lives in the bits
//! above the flags.
use std::fmt;

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TypeFlags: u32 {
        /// Defined by an instruction rather than a possibly-null constant;
        /// array information of such a type is reliable.
        const NON_NULL = 1 << 0;
        const WIDE = 1 << 1;
        const NARROW = 1 << 2;
        const FP = 1 << 3;
        const CORE = 1 << 4;
        const REF = 1 << 5;
        const LOW_WORD = 1 << 6;
        const HIGH_WORD = 1 << 7;
        const ARRAY_WIDE = 1 << 8;
        const ARRAY_NARROW = 1 << 9;
        const ARRAY_FP = 1 << 10;
        const ARRAY_CORE = 1 << 11;
        const ARRAY_REF = 1 << 12;
    }
}

pub const ARRAY_TYPE_SHIFT: u32 = 7;
const ARRAY_DEPTH_START: u32 = 13;
pub const MAX_ARRAY_DEPTH: u32 = u32::MAX >> ARRAY_DEPTH_START;

const MASK_WIDE: u32 = TypeFlags::WIDE.bits() | TypeFlags::NARROW.bits();
const MASK_TYPE: u32 = TypeFlags::FP.bits() | TypeFlags::CORE.bits() | TypeFlags::REF.bits();
const MASK_WORD: u32 = TypeFlags::LOW_WORD.bits() | TypeFlags::HIGH_WORD.bits();
const MASK_WIDE_AND_TYPE: u32 = MASK_WIDE | MASK_TYPE;
const MASK_ARRAY_WIDE_AND_TYPE: u32 = MASK_WIDE_AND_TYPE << ARRAY_TYPE_SHIFT;
const MASK_ARRAY_DEPTH: u32 = u32::MAX << ARRAY_DEPTH_START;
const MASK_NON_ARRAY: u32 = !(MASK_ARRAY_WIDE_AND_TYPE | MASK_ARRAY_DEPTH);

const REF_LOW: u32 =
    TypeFlags::NARROW.bits() | TypeFlags::REF.bits() | TypeFlags::LOW_WORD.bits();
const DEPTH_ONE: u32 = 1 << ARRAY_DEPTH_START;

const _: () = assert!(TypeFlags::ARRAY_WIDE.bits() == TypeFlags::WIDE.bits() << ARRAY_TYPE_SHIFT);
const _: () = assert!(TypeFlags::ARRAY_REF.bits() == TypeFlags::REF.bits() << ARRAY_TYPE_SHIFT);

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SsaType(u32);

impl SsaType {
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn unknown() -> Self {
        Self(0)
    }

    pub const fn non_array_ref() -> Self {
        Self(REF_LOW)
    }

    /// `[?`: an array whose element type is not known yet.
    pub const fn unknown_array() -> Self {
        Self(REF_LOW | DEPTH_ONE)
    }

    pub const fn object_array() -> Self {
        Self(
            REF_LOW
                | DEPTH_ONE
                | TypeFlags::ARRAY_NARROW.bits()
                | TypeFlags::ARRAY_REF.bits(),
        )
    }

    /// An array of `long` or `double`.
    pub const fn wide_array() -> Self {
        Self(REF_LOW | DEPTH_ONE | TypeFlags::ARRAY_WIDE.bits())
    }

    /// An array of `int` or `float`.
    pub const fn narrow_array() -> Self {
        Self(REF_LOW | DEPTH_ONE | TypeFlags::ARRAY_NARROW.bits())
    }

    /// An array of `boolean`, `byte`, `char` or `short`.
    pub const fn narrow_core_array() -> Self {
        Self(
            REF_LOW
                | DEPTH_ONE
                | TypeFlags::ARRAY_NARROW.bits()
                | TypeFlags::ARRAY_CORE.bits(),
        )
    }

    pub fn array_type(depth: u32, nested: SsaType) -> Self {
        debug_assert!(depth != 0);
        debug_assert!(depth <= MAX_ARRAY_DEPTH);
        let array_bits = (nested.0 & MASK_WIDE_AND_TYPE) << ARRAY_TYPE_SHIFT;
        Self((depth << ARRAY_DEPTH_START) | array_bits | REF_LOW)
    }

    pub fn array_type_from_component(component: SsaType) -> Self {
        match component.array_depth() {
            0 => Self::array_type(1, component),
            MAX_ARRAY_DEPTH => component,
            _ => Self(component.0 + DEPTH_ONE),
        }
    }

    /// The type of a value of the given shorty character.
    pub fn shorty(shorty: char) -> Self {
        let bits = match shorty {
            'L' | '[' => REF_LOW,
            'D' => TypeFlags::LOW_WORD.bits() | TypeFlags::WIDE.bits() | TypeFlags::FP.bits(),
            'J' => TypeFlags::LOW_WORD.bits() | TypeFlags::WIDE.bits() | TypeFlags::CORE.bits(),
            'F' => TypeFlags::LOW_WORD.bits() | TypeFlags::NARROW.bits() | TypeFlags::FP.bits(),
            'V' => 0,
            _ => {
                debug_assert!(matches!(shorty, 'I' | 'S' | 'C' | 'B' | 'Z'), "bad shorty {shorty}");
                TypeFlags::LOW_WORD.bits() | TypeFlags::NARROW.bits() | TypeFlags::CORE.bits()
            }
        };
        Self(bits)
    }

    /// The type of a value of the given type descriptor. `V` yields the
    /// unknown type.
    pub fn from_descriptor(descriptor: &str) -> Self {
        let depth = descriptor.bytes().take_while(|&b| b == b'[').count();
        let Some(element) = descriptor[depth..].chars().next() else {
            return Self::unknown();
        };
        if depth == 0 {
            return Self::shorty(element);
        }

        let depth = match u32::try_from(depth) {
            Ok(depth) if depth <= MAX_ARRAY_DEPTH => depth,
            _ => {
                tracing::warn!(
                    depth,
                    max = MAX_ARRAY_DEPTH,
                    descriptor = &descriptor[depth..],
                    "array depth exceeds the representable maximum"
                );
                MAX_ARRAY_DEPTH
            }
        };
        Self::array_type(depth, Self::shorty(element))
    }

    fn has(self, flag: TypeFlags) -> bool {
        self.0 & flag.bits() != 0
    }

    fn set(&mut self, bits: u32) {
        self.0 |= bits;
    }

    fn merge_bits(&mut self, src: SsaType, mask: u32) -> bool {
        let new_bits = self.0 | (src.0 & mask);
        let changed = new_bits != self.0;
        self.0 = new_bits;
        changed
    }

    pub fn is_defined(self) -> bool {
        self.0 != 0
    }

    pub fn non_null(self) -> bool {
        self.has(TypeFlags::NON_NULL)
    }

    pub fn wide(self) -> bool {
        self.has(TypeFlags::WIDE)
    }

    pub fn narrow(self) -> bool {
        self.has(TypeFlags::NARROW)
    }

    pub fn fp(self) -> bool {
        self.has(TypeFlags::FP)
    }

    pub fn core(self) -> bool {
        self.has(TypeFlags::CORE)
    }

    pub fn is_ref(self) -> bool {
        self.has(TypeFlags::REF)
    }

    pub fn low_word(self) -> bool {
        self.has(TypeFlags::LOW_WORD)
    }

    pub fn high_word(self) -> bool {
        self.has(TypeFlags::HIGH_WORD)
    }

    pub fn array_depth(self) -> u32 {
        self.0 >> ARRAY_DEPTH_START
    }

    pub fn set_wide(&mut self) {
        self.set(TypeFlags::WIDE.bits());
    }

    pub fn set_narrow(&mut self) {
        self.set(TypeFlags::NARROW.bits());
    }

    pub fn set_fp(&mut self) {
        self.set(TypeFlags::FP.bits());
    }

    pub fn set_core(&mut self) {
        self.set(TypeFlags::CORE.bits());
    }

    pub fn set_ref(&mut self) {
        self.set(TypeFlags::REF.bits());
    }

    pub fn set_low_word(&mut self) {
        self.set(TypeFlags::LOW_WORD.bits());
    }

    pub fn set_high_word(&mut self) {
        self.set(TypeFlags::HIGH_WORD.bits());
    }

    /// Width and category of the innermost array element.
    pub fn nested_type(self) -> SsaType {
        debug_assert!(self.array_depth() != 0);
        Self(TypeFlags::LOW_WORD.bits() | ((self.0 & MASK_ARRAY_WIDE_AND_TYPE) >> ARRAY_TYPE_SHIFT))
    }

    /// The type of an element of this array type.
    pub fn component_type(self) -> SsaType {
        debug_assert!(self.array_depth() != 0);
        let outer_removed = Self(self.0 - DEPTH_ONE);
        if outer_removed.array_depth() != 0 {
            outer_removed.as_null()
        } else {
            self.nested_type()
        }
    }

    /// The high word of a wide low word type.
    pub fn to_high_word(self) -> SsaType {
        debug_assert!(self.wide() && self.low_word());
        Self(self.0 ^ MASK_WORD)
    }

    pub fn as_null(self) -> SsaType {
        Self(self.0 & !TypeFlags::NON_NULL.bits())
    }

    pub fn as_non_null(self) -> SsaType {
        Self(self.0 | TypeFlags::NON_NULL.bits())
    }

    /// Replaces the type; returns `true` if it changed.
    pub fn copy_from(&mut self, src: SsaType) -> bool {
        let changed = self.0 != src.0;
        self.0 = src.0;
        changed
    }

    pub fn merge_non_array_flags(&mut self, src: SsaType) -> bool {
        self.merge_bits(src, MASK_NON_ARRAY)
    }

    /// Merges the width and category of a wide low word into this high word.
    pub fn merge_high_word(&mut self, low_word: SsaType) -> bool {
        debug_assert!(low_word.wide() && low_word.low_word());
        self.merge_bits(
            Self(low_word.0 | TypeFlags::HIGH_WORD.bits()),
            MASK_WIDE_AND_TYPE | TypeFlags::HIGH_WORD.bits(),
        )
    }

    /// Merges arrays of different depths: the element gets every category
    /// and the depth collapses to one.
    pub fn merge_array_conflict(&mut self, src: SsaType) -> bool {
        debug_assert!(self.is_ref());
        debug_assert!(self.array_depth() != src.array_depth());
        debug_assert!(self.array_depth().min(src.array_depth()) >= 1);
        let size_conflict = (self.array_depth() == 1 && self.has(TypeFlags::ARRAY_WIDE))
            || (src.array_depth() == 1 && src.has(TypeFlags::ARRAY_WIDE));
        let mut bits = (self.0 & MASK_NON_ARRAY)
            | DEPTH_ONE
            | TypeFlags::ARRAY_CORE.bits()
            | TypeFlags::ARRAY_REF.bits()
            | TypeFlags::ARRAY_FP.bits()
            | TypeFlags::ARRAY_NARROW.bits();
        if size_conflict {
            bits |= TypeFlags::ARRAY_WIDE.bits();
        }
        self.copy_from(Self(bits))
    }

    /// `[?` or `[L`: depth one with no more element information than a
    /// reference.
    fn is_shallow_array(self) -> bool {
        let array_bits = |ty: SsaType| ty.0 & MASK_ARRAY_WIDE_AND_TYPE;
        self.array_depth() == 1
            && (array_bits(self) == array_bits(Self::unknown_array())
                || array_bits(self) == array_bits(Self::object_array()))
    }

    /// Merge for definitions: array information is taken from `src` even
    /// when it may be null.
    pub fn merge_strong(&mut self, src: SsaType) -> bool {
        let mut changed = self.merge_non_array_flags(src);
        if src.array_depth() == 0 {
            return changed;
        }

        if self.array_depth() == 0 {
            debug_assert!(self.0 & !MASK_NON_ARRAY == 0);
            debug_assert!(src.is_ref());
            self.0 |= src.0 & (!MASK_NON_ARRAY | TypeFlags::REF.bits());
            changed = true;
        } else if self.array_depth() == src.array_depth() {
            changed |= self.merge_bits(src, MASK_ARRAY_WIDE_AND_TYPE);
        } else if src.is_shallow_array() {
            // `self` is at least `[[`; keep it.
        } else if self.is_shallow_array() {
            // Overwrite `[?` or `[L` with the deeper source array type.
            self.0 = (self.0 & MASK_NON_ARRAY) | (src.0 & !MASK_NON_ARRAY);
            changed = true;
        } else {
            changed |= self.merge_array_conflict(src);
        }
        changed
    }

    /// Merge for upward propagation: array information is taken only from
    /// definitely defined sources.
    pub fn merge_weak(&mut self, src: SsaType) -> bool {
        let mut changed = self.merge_non_array_flags(src);
        if src.array_depth() == 0 || !src.non_null() {
            return changed;
        }

        if self.array_depth() == 0 {
            debug_assert!(self.0 & !MASK_NON_ARRAY == 0);
        } else if self.array_depth() == src.array_depth() {
            changed |= self.merge_bits(src, MASK_ARRAY_WIDE_AND_TYPE);
        } else if src.is_shallow_array() {
            // `self` is at least `[[`; keep it.
        } else if self.is_shallow_array() {
            // The source is at least `[[`, so `[?` becomes `[L`.
            changed |= self.merge_bits(Self::object_array(), MASK_ARRAY_WIDE_AND_TYPE);
        } else {
            changed |= self.merge_array_conflict(src);
        }
        changed
    }

    /// Used both as 32-bit and 64-bit value, or as both words of a pair.
    pub fn size_conflict(self) -> bool {
        (self.wide() && self.narrow()) || (self.high_word() && self.low_word())
    }

    /// Two or more of the core, fp and reference categories.
    pub fn type_conflict(self) -> bool {
        (self.0 & MASK_TYPE).count_ones() >= 2
    }

    pub fn mark_size_conflict(&mut self) {
        self.set(MASK_WORD);
    }

    /// Sets every category so that no further merge can change them.
    pub fn mark_type_conflict(&mut self) {
        self.set(MASK_TYPE);
    }
}

fn write_flags(f: &mut fmt::Formatter<'_>, bits: u32) -> fmt::Result {
    const NAMES: [(TypeFlags, &str); 7] = [
        (TypeFlags::WIDE, "wide"),
        (TypeFlags::NARROW, "narrow"),
        (TypeFlags::FP, "fp"),
        (TypeFlags::CORE, "core"),
        (TypeFlags::REF, "ref"),
        (TypeFlags::LOW_WORD, "low"),
        (TypeFlags::HIGH_WORD, "high"),
    ];
    let mut first = true;
    for (flag, name) in NAMES {
        if bits & flag.bits() != 0 {
            if !first {
                f.write_str(" ")?;
            }
            f.write_str(name)?;
            first = false;
        }
    }
    Ok(())
}

impl fmt::Display for SsaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_defined() {
            return f.write_str("undefined");
        }
        write_flags(f, self.0)?;
        if self.non_null() {
            f.write_str(" non-null")?;
        }
        if self.array_depth() != 0 {
            write!(f, " [{}:", self.array_depth())?;
            let element = (self.0 & MASK_ARRAY_WIDE_AND_TYPE) >> ARRAY_TYPE_SHIFT;
            if element == 0 {
                f.write_str("?")?;
            } else {
                write_flags(f, element)?;
            }
            f.write_str("]")?;
        }
        Ok(())
    }
}

impl fmt::Debug for SsaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SsaType({self})")
    }
}
