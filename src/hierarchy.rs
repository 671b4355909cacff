//! Enumeration of the auxiliary-density-operator (ADO) hierarchy.
//!
//! An ADO label is an occupation vector over bath expansion terms, bounded
//! per-mode by a dimension vector and in total by an excitation tier. The
//! enumerator fixes a canonical ordering and exposes the bijection between
//! labels and linear indices in both directions.

use rustc_hash::FxHashMap as HashMap;
use crate::{ HeomError, HeomResult };

/// The finite set of valid ADO labels for a dimension vector `dims` and a
/// total excitation tier, in canonical order.
///
/// A label `s` is valid iff `s[k] < dims[k]` for every mode `k` and the
/// components sum to at most the tier. The canonical order starts from the
/// all-zero label and repeatedly increments the rightmost coordinate,
/// zeroing and carrying left whenever a coordinate bound or the tier is
/// reached.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Hierarchy {
    dims: Vec<usize>,
    tier: usize,
    idx2label: Vec<Vec<usize>>,
    label2idx: HashMap<Vec<usize>, usize>,
}

impl Hierarchy {
    /// Enumerate all valid labels.
    ///
    /// Fails if `dims` is empty; `tier = 0` yields the single all-zero
    /// label.
    pub fn build(dims: &[usize], tier: usize) -> HeomResult<Self> {
        if dims.is_empty() { return Err(HeomError::EmptyBath); }
        let K = dims.len();
        let mut idx2label: Vec<Vec<usize>> = Vec::new();
        let mut s: Vec<usize> = vec![0; K];
        'emit: loop {
            idx2label.push(s.clone());
            let mut pos = K;
            loop {
                if pos == 0 { break 'emit; }
                pos -= 1;
                let total: usize = s.iter().sum();
                if s[pos] + 1 < dims[pos] && total + 1 <= tier {
                    s[pos] += 1;
                    continue 'emit;
                }
                s[pos] = 0;
            }
        }
        let label2idx: HashMap<Vec<usize>, usize>
            = idx2label.iter().enumerate()
            .map(|(idx, label)| (label.clone(), idx))
            .collect();
        Ok(Self { dims: dims.to_vec(), tier, idx2label, label2idx })
    }

    /// Return the number of valid labels.
    pub fn len(&self) -> usize { self.idx2label.len() }

    /// Return `true` if no labels are present.
    ///
    /// This can only happen for the trivial hierarchy of a zero-mode label
    /// space, which [`Self::build`] rejects.
    pub fn is_empty(&self) -> bool { self.idx2label.is_empty() }

    /// Return the number of modes `K`.
    pub fn num_modes(&self) -> usize { self.dims.len() }

    /// Return the total excitation tier.
    pub fn tier(&self) -> usize { self.tier }

    /// Return the label at a linear index.
    pub fn label(&self, idx: usize) -> Option<&[usize]> {
        self.idx2label.get(idx).map(|l| l.as_slice())
    }

    /// Return the linear index of a label.
    pub fn index(&self, label: &[usize]) -> Option<usize> {
        self.label2idx.get(label).copied()
    }

    /// Iterate over `(index, label)` pairs in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &[usize])> + '_ {
        self.idx2label.iter().enumerate()
            .map(|(idx, label)| (idx, label.as_slice()))
    }

    /// Return the index of the label obtained by lowering coordinate `k` of
    /// the label at `idx` by one, if that coordinate is occupied.
    pub fn lowered(&self, idx: usize, k: usize) -> Option<usize> {
        let label = self.idx2label.get(idx)?;
        if label[k] == 0 { return None; }
        let mut neighbor = label.clone();
        neighbor[k] -= 1;
        self.index(&neighbor)
    }

    /// Return the index of the label obtained by raising coordinate `k` of
    /// the label at `idx` by one, if the raised label is still valid.
    pub fn raised(&self, idx: usize, k: usize) -> Option<usize> {
        let label = self.idx2label.get(idx)?;
        let total: usize = label.iter().sum();
        if label[k] + 1 >= self.dims[k] || total + 1 > self.tier {
            return None;
        }
        let mut neighbor = label.clone();
        neighbor[k] += 1;
        self.index(&neighbor)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn binom(n: usize, k: usize) -> usize {
        if k > n { return 0; }
        (0..k).fold(1, |acc, j| acc * (n - j) / (j + 1))
    }

    #[test]
    fn counts_match_closed_form() {
        // untruncated: dims[k] > T for all k
        let h = Hierarchy::build(&[4, 4, 4, 4, 4], 3).unwrap();
        assert_eq!(h.len(), 56);
        let expected: usize = (0..=3).map(|n| binom(n + 4, 4)).sum();
        assert_eq!(h.len(), expected);

        // fully truncated: every binary label fits under the tier
        let h = Hierarchy::build(&[2, 2, 2, 2], 4).unwrap();
        assert_eq!(h.len(), 16);
    }

    #[test]
    fn bijection_round_trips() {
        let h = Hierarchy::build(&[3, 5, 2, 4], 4).unwrap();
        for (idx, label) in h.iter() {
            assert_eq!(h.index(label), Some(idx));
        }
        for idx in 0..h.len() {
            let label = h.label(idx).unwrap();
            assert_eq!(h.label(h.index(label).unwrap()), Some(label));
        }
    }

    #[test]
    fn canonical_order_prefix() {
        let h = Hierarchy::build(&[2, 2], 1).unwrap();
        let labels: Vec<&[usize]>
            = (0..h.len()).map(|i| h.label(i).unwrap()).collect();
        assert_eq!(labels, vec![&[0, 0][..], &[0, 1][..], &[1, 0][..]]);
    }

    #[test]
    fn tier_zero_single_label() {
        let h = Hierarchy::build(&[4, 4, 4], 0).unwrap();
        assert_eq!(h.len(), 1);
        assert_eq!(h.label(0), Some(&[0, 0, 0][..]));
    }

    #[test]
    fn zero_modes_rejected() {
        assert!(Hierarchy::build(&[], 3).is_err());
    }

    #[test]
    fn neighbors() {
        let h = Hierarchy::build(&[4, 4], 3).unwrap();
        let idx = h.index(&[1, 1]).unwrap();
        assert_eq!(h.lowered(idx, 0), h.index(&[0, 1]));
        assert_eq!(h.lowered(idx, 1), h.index(&[1, 0]));
        assert_eq!(h.raised(idx, 0), h.index(&[2, 1]));
        let top = h.index(&[3, 0]).unwrap();
        assert_eq!(h.raised(top, 0), None);
        assert_eq!(h.lowered(0, 0), None);
    }
}
