/// Fixed-size set of small integers.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub(crate) struct BitSet {
    words: Vec<u64>,
    len: usize,
}

impl BitSet {
    pub(crate) fn new_empty(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(64)],
            len,
        }
    }

    pub(crate) fn get(&self, index: usize) -> bool {
        index < self.len && self.words[index / 64] & (1 << (index % 64)) != 0
    }

    pub(crate) fn set(&mut self, index: usize) {
        debug_assert!(index < self.len);
        if index < self.len {
            self.words[index / 64] |= 1 << (index % 64);
        }
    }

    pub(crate) fn union_with(&mut self, other: &BitSet) {
        for (word, other) in self.words.iter_mut().zip(&other.words) {
            *word |= *other;
        }
    }

    pub(crate) fn subtract_with(&mut self, other: &BitSet) {
        for (word, other) in self.words.iter_mut().zip(&other.words) {
            *word &= !*other;
        }
    }

    pub(crate) fn count(&self) -> usize {
        self.words.iter().map(|word| word.count_ones() as usize).sum()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.words.iter().all(|word| *word == 0)
    }

    /// Whether every element of `self` is also in `other`.
    pub(crate) fn is_subset(&self, other: &BitSet) -> bool {
        self.words
            .iter()
            .zip(&other.words)
            .all(|(word, other)| *word & !*other == 0)
    }

    /// Elements in increasing order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).filter(|index| self.get(*index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_operations() {
        let mut a = BitSet::new_empty(70);
        a.set(1);
        a.set(65);
        let mut b = BitSet::new_empty(70);
        b.set(65);
        b.set(3);

        assert!(a.get(65));
        assert!(!a.get(3));
        assert!(!a.get(200));

        let mut union = a.clone();
        union.union_with(&b);
        assert_eq!(union.iter().collect::<Vec<_>>(), vec![1, 3, 65]);
        assert!(a.is_subset(&union));
        assert!(!union.is_subset(&a));

        a.subtract_with(&b);
        assert_eq!(a.iter().collect::<Vec<_>>(), vec![1]);
        assert_eq!(a.count(), 1);
        assert!(BitSet::new_empty(0).is_empty());
    }
}
