//! SSA register names.
use std::fmt;

use cranelift_entity::entity_impl;

/// An SSA register name.
///
/// Names below the graph's `num_ssa_regs` are assigned by the upstream
/// renaming step; analyses may allocate synthetic names past that bound.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SsaReg(pub u32);
entity_impl!(SsaReg);

impl SsaReg {
    /// The name of the high word of a wide pair whose low word is `self`.
    pub fn high_word(self) -> SsaReg {
        SsaReg(self.0 + 1)
    }
}

impl fmt::Debug for SsaReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

impl fmt::Display for SsaReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// A virtual (bytecode) register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VReg(pub u32);
entity_impl!(VReg);
