//! Resolution records supplied by the external field/method resolver.
//!
//! Instructions refer to these records through their `meta` index; the
//! records themselves are owned by the [`MirGraph`](crate::MirGraph).
use cranelift_entity::entity_impl;
use smallvec::SmallVec;
use smol_str::SmolStr;

/// Index of a [`FieldLoweringInfo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldInfoId(pub u32);
entity_impl!(FieldInfoId);

/// Index of a [`MethodLoweringInfo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodInfoId(pub u32);
entity_impl!(MethodInfoId);

/// Index into the method's type descriptor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeIdx(pub u32);
entity_impl!(TypeIdx);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLoweringInfo {
    /// Identity of the field, shared by all records of the same field.
    pub field_idx: u32,
    pub declaring_class: SmolStr,
    /// Type descriptor of the field, e.g. `I`, `J` or `[Ljava/lang/String;`.
    pub field_type: SmolStr,
    pub is_static: bool,
    pub is_volatile: bool,
    pub is_resolved: bool,
}

impl FieldLoweringInfo {
    pub fn instance(field_idx: u32, declaring_class: &str, field_type: &str) -> Self {
        Self {
            field_idx,
            declaring_class: declaring_class.into(),
            field_type: field_type.into(),
            is_static: false,
            is_volatile: false,
            is_resolved: true,
        }
    }

    pub fn static_field(field_idx: u32, declaring_class: &str, field_type: &str) -> Self {
        Self {
            is_static: true,
            ..Self::instance(field_idx, declaring_class, field_type)
        }
    }

    pub fn volatile(mut self) -> Self {
        self.is_volatile = true;
        self
    }

    pub fn unresolved(mut self) -> Self {
        self.is_resolved = false;
        self
    }

    /// Accesses that can never be proven redundant.
    pub fn is_opaque(&self) -> bool {
        self.is_volatile || !self.is_resolved
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvokeType {
    Static,
    Direct,
    Virtual,
    Super,
    Interface,
}

impl InvokeType {
    pub fn has_receiver(self) -> bool {
        !matches!(self, InvokeType::Static)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodLoweringInfo {
    pub method_idx: u32,
    pub invoke_type: InvokeType,
    pub declaring_class: SmolStr,
    pub params: SmallVec<[SmolStr; 4]>,
    pub return_type: SmolStr,
    pub is_resolved: bool,
}

impl MethodLoweringInfo {
    pub fn new(
        method_idx: u32,
        invoke_type: InvokeType,
        declaring_class: &str,
        params: &[&str],
        return_type: &str,
    ) -> Self {
        Self {
            method_idx,
            invoke_type,
            declaring_class: declaring_class.into(),
            params: params.iter().map(|&p| SmolStr::from(p)).collect(),
            return_type: return_type.into(),
            is_resolved: true,
        }
    }

    pub fn unresolved(mut self) -> Self {
        self.is_resolved = false;
        self
    }
}

/// Description of the method under compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDesc {
    pub name: SmolStr,
    pub declaring_class: SmolStr,
    pub is_static: bool,
    pub params: SmallVec<[SmolStr; 4]>,
    pub return_type: SmolStr,
}

impl MethodDesc {
    pub fn new(
        name: &str,
        declaring_class: &str,
        is_static: bool,
        params: &[&str],
        return_type: &str,
    ) -> Self {
        Self {
            name: name.into(),
            declaring_class: declaring_class.into(),
            is_static,
            params: params.iter().map(|&p| SmolStr::from(p)).collect(),
            return_type: return_type.into(),
        }
    }

    /// Number of virtual registers taken by the incoming arguments,
    /// including the receiver.
    pub fn num_in_words(&self) -> u32 {
        let this_words = u32::from(!self.is_static);
        this_words
            + self
                .params
                .iter()
                .map(|p| if is_wide_descriptor(p) { 2 } else { 1 })
                .sum::<u32>()
    }

    pub fn pretty(&self) -> String {
        format!("{}.{}", self.declaring_class, self.name)
    }
}

/// Returns `true` for `J` and `D`.
pub fn is_wide_descriptor(desc: &str) -> bool {
    matches!(desc.as_bytes().first(), Some(b'J' | b'D'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_words_count_wide_params_twice() {
        let desc = MethodDesc::new("f", "LFoo;", false, &["I", "J", "[D", "D"], "V");
        assert_eq!(desc.num_in_words(), 1 + 1 + 2 + 1 + 2);

        let desc = MethodDesc::new("g", "LFoo;", true, &[], "V");
        assert_eq!(desc.num_in_words(), 0);
    }
}
