use mirflow_ir::{MethodDesc, MethodLoweringInfo};
use smallvec::SmallVec;

use super::SsaType;

/// Lattice types of a method's parameters and return value.
///
/// The receiver of instance methods is not part of `params`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signature {
    pub return_type: SsaType,
    pub params: SmallVec<[SsaType; 4]>,
}

impl Signature {
    pub fn new<'a>(params: impl IntoIterator<Item = &'a str>, return_type: &str) -> Self {
        Self {
            return_type: SsaType::from_descriptor(return_type),
            params: params.into_iter().map(SsaType::from_descriptor).collect(),
        }
    }

    pub fn of_method(desc: &MethodDesc) -> Self {
        Self::new(desc.params.iter().map(|p| p.as_str()), &desc.return_type)
    }

    pub fn of_callee(info: &MethodLoweringInfo) -> Self {
        Self::new(info.params.iter().map(|p| p.as_str()), &info.return_type)
    }

    /// The type of every argument word in order, the high word of a wide
    /// parameter following its low word.
    pub fn word_types(&self) -> impl Iterator<Item = SsaType> + '_ {
        self.params.iter().flat_map(|&param| {
            let high = param.wide().then(|| param.to_high_word());
            std::iter::once(param).chain(high)
        })
    }

    pub fn num_words(&self) -> usize {
        self.word_types().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wide_params_take_two_words() {
        let desc = MethodDesc::new("f", "LFoo;", false, &["I", "J", "[Ljava/lang/String;"], "D");
        let sig = Signature::of_method(&desc);
        assert_eq!(sig.params.len(), 3);
        assert_eq!(sig.num_words(), 4);
        assert!(sig.return_type.wide() && sig.return_type.fp());

        let words: Vec<_> = sig.word_types().collect();
        assert!(words[1].low_word() && words[1].core());
        assert!(words[2].high_word() && !words[2].low_word());
        assert_eq!(words[3], SsaType::object_array());
    }

    #[test]
    fn void_return_is_unknown() {
        let sig = Signature::new([], "V");
        assert!(!sig.return_type.is_defined());
        assert_eq!(sig.num_words(), 0);
    }
}
