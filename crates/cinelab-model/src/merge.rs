//! K-way merge of sorted streams.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// A value ordered by its key alone.
#[derive(Debug, Clone)]
pub struct Keyed<K, V> {
    pub key: K,
    pub value: V,
}

impl<K: Ord, V> PartialEq for Keyed<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<K: Ord, V> Eq for Keyed<K, V> {}

impl<K: Ord, V> PartialOrd for Keyed<K, V> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: Ord, V> Ord for Keyed<K, V> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

/// Merge of several ascending streams into one ascending stream.
/// Consecutive equal values are yielded once.
pub struct Interclass<I: Iterator> {
    sources: Vec<I>,
    heap: BinaryHeap<Reverse<(I::Item, usize)>>,
    last: Option<I::Item>,
}

pub fn interclass<I>(sources: impl IntoIterator<Item = I>) -> Interclass<I>
where
    I: Iterator,
    I::Item: Ord + Clone,
{
    let mut sources: Vec<I> = sources.into_iter().collect();
    let mut heap = BinaryHeap::with_capacity(sources.len());
    for (index, source) in sources.iter_mut().enumerate() {
        if let Some(first) = source.next() {
            heap.push(Reverse((first, index)));
        }
    }
    Interclass {
        sources,
        heap,
        last: None,
    }
}

impl<I> Iterator for Interclass<I>
where
    I: Iterator,
    I::Item: Ord + Clone,
{
    type Item = I::Item;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let Reverse((item, index)) = self.heap.pop()?;
            if let Some(following) = self.sources[index].next() {
                self.heap.push(Reverse((following, index)));
            }
            if self.last.as_ref() == Some(&item) {
                continue;
            }
            self.last = Some(item.clone());
            return Some(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merges_in_order() {
        let merged: Vec<_> = interclass(vec![
            vec![1, 4, 7].into_iter(),
            vec![2, 5].into_iter(),
            vec![].into_iter(),
            vec![3, 6, 8, 9].into_iter(),
        ])
        .collect();
        assert_eq!(merged, (1..=9).collect::<Vec<_>>());
    }

    #[test]
    fn test_suppresses_duplicates() {
        let merged: Vec<_> = interclass(vec![
            vec![1, 2, 2, 5].into_iter(),
            vec![2, 5, 6].into_iter(),
        ])
        .collect();
        assert_eq!(merged, vec![1, 2, 5, 6]);
    }

    #[test]
    fn test_keyed_ignores_value() {
        let a = Keyed { key: 1, value: "a" };
        let b = Keyed { key: 1, value: "b" };
        assert_eq!(a, b);
        let merged: Vec<_> = interclass(vec![vec![a].into_iter(), vec![b].into_iter()]).collect();
        assert_eq!(merged.len(), 1);
    }
}
