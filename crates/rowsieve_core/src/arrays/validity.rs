/// Validity (null-ness) for the values in an array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validity {
    /// Every value is valid.
    AllValid,
    /// Per-row validity, `true` meaning valid.
    Mask(Vec<bool>),
}

impl Validity {
    pub fn from_mask(mask: Vec<bool>) -> Self {
        if mask.iter().all(|v| *v) {
            Validity::AllValid
        } else {
            Validity::Mask(mask)
        }
    }

    pub fn all_valid(&self) -> bool {
        matches!(self, Validity::AllValid)
    }

    pub fn is_valid(&self, idx: usize) -> bool {
        match self {
            Self::AllValid => true,
            Self::Mask(mask) => mask[idx],
        }
    }

    /// Length of the mask, if this validity holds one.
    pub fn mask_len(&self) -> Option<usize> {
        match self {
            Self::AllValid => None,
            Self::Mask(mask) => Some(mask.len()),
        }
    }

    /// Create a new validity by selecting rows from this one.
    pub fn select(&self, sel: &[usize]) -> Self {
        match self {
            Self::AllValid => Self::AllValid,
            Self::Mask(mask) => Self::from_mask(sel.iter().map(|&idx| mask[idx]).collect()),
        }
    }
}
