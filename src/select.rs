//! Stride-based choice of shots to keep.
use crate::InputError;

use std::collections::BTreeSet;
use std::num::NonZeroUsize;

/// Keep every `keep_every`-th shot starting at position `offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubsetPolicy {
    keep_every: NonZeroUsize,
    offset: usize,
}

impl SubsetPolicy {
    /// Validate user supplied stride and offset.
    pub fn new(keep_every: i64, offset: i64) -> Result<Self, InputError> {
        if keep_every <= 0 {
            return Err(InputError::NonPositiveStride(keep_every));
        }
        if offset < 0 {
            return Err(InputError::NegativeOffset(offset));
        }
        let keep_every =
            NonZeroUsize::new(keep_every as usize).ok_or(InputError::NonPositiveStride(0))?;
        Ok(SubsetPolicy {
            keep_every,
            offset: offset as usize,
        })
    }

    pub fn keep_every(&self) -> usize {
        self.keep_every.get()
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Whether the shot at zero-based `position` is kept.
    pub fn keeps(&self, position: usize) -> bool {
        position >= self.offset && (position - self.offset) % self.keep_every.get() == 0
    }
}

/// Keys at the positions kept by `policy`, in the order given.
pub fn select<I, S>(ordered_keys: I, policy: &SubsetPolicy) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    ordered_keys
        .into_iter()
        .enumerate()
        .filter(|(p, _)| policy.keeps(*p))
        .map(|(_, k)| k.as_ref().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{:06}", i)).collect()
    }

    fn positions(selected: &BTreeSet<String>) -> Vec<usize> {
        selected.iter().map(|k| k.parse().unwrap()).collect()
    }

    #[test]
    fn stride_positions() {
        for n in 0..20 {
            for k in 1..6 {
                let policy = SubsetPolicy::new(k as i64, 0).unwrap();
                let selected = select(keys(n), &policy);
                assert_eq!(selected.len(), (n + k - 1) / k);
                assert_eq!(positions(&selected), (0..n).step_by(k).collect::<Vec<_>>());
            }
        }
    }

    #[test]
    fn offset() {
        let policy = SubsetPolicy::new(3, 2).unwrap();
        assert_eq!(positions(&select(keys(10), &policy)), vec![2, 5, 8]);
        // offset past the end keeps nothing
        let policy = SubsetPolicy::new(3, 10).unwrap();
        assert!(select(keys(10), &policy).is_empty());
    }

    #[test]
    fn identity() {
        let policy = SubsetPolicy::new(1, 0).unwrap();
        assert_eq!(select(keys(7), &policy).len(), 7);
    }

    #[test]
    fn single_lens_letters() {
        let names = ["a", "b", "c", "d", "e", "f", "g", "h", "i", "j"];
        let policy = SubsetPolicy::new(4, 0).unwrap();
        let selected: Vec<_> = select(names.iter(), &policy).into_iter().collect();
        assert_eq!(selected, vec!["a", "e", "i"]);
    }

    #[test]
    fn rejects_bad_policy() {
        assert_eq!(
            SubsetPolicy::new(0, 0),
            Err(InputError::NonPositiveStride(0))
        );
        assert_eq!(
            SubsetPolicy::new(-4, 0),
            Err(InputError::NonPositiveStride(-4))
        );
        assert_eq!(SubsetPolicy::new(2, -1), Err(InputError::NegativeOffset(-1)));
    }
}
