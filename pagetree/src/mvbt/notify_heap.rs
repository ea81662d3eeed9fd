//! Binary min-heap that reports element moves.
//!
//! Every time an element lands on a new position the observer is told, so an
//! outside map can keep the position of each element and ask the heap to
//! remove it in `O(log n)` without searching.

/// Receives the new position of an element after it moved.
pub trait HeapObserver<T> {
    fn moved(&mut self, item: &T, pos: usize);
}

/// Observer that ignores moves.
impl<T> HeapObserver<T> for () {
    fn moved(&mut self, _item: &T, _pos: usize) {}
}

#[derive(Debug, Clone)]
pub struct NotifyHeap<T> {
    items: Vec<T>,
}

impl<T> Default for NotifyHeap<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T: Ord> NotifyHeap<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn peek(&self) -> Option<&T> {
        self.items.first()
    }

    pub fn get(&self, pos: usize) -> Option<&T> {
        self.items.get(pos)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn push<O: HeapObserver<T>>(&mut self, item: T, observer: &mut O) {
        self.items.push(item);
        let pos = self.items.len() - 1;
        self.sift_up(pos, observer);
    }

    pub fn pop<O: HeapObserver<T>>(&mut self, observer: &mut O) -> Option<T> {
        self.remove_at(0, observer)
    }

    /// Removes the element at `pos`.
    pub fn remove_at<O: HeapObserver<T>>(&mut self, pos: usize, observer: &mut O) -> Option<T> {
        if pos >= self.items.len() {
            return None;
        }
        let item = self.items.swap_remove(pos);
        if pos < self.items.len() {
            let pos = self.sift_down(pos, observer);
            self.sift_up(pos, observer);
        }
        Some(item)
    }

    /// Replaces the element at `pos` and restores the heap order.
    pub fn replace_at<O: HeapObserver<T>>(
        &mut self,
        pos: usize,
        item: T,
        observer: &mut O,
    ) -> Option<T> {
        let slot = self.items.get_mut(pos)?;
        let old = std::mem::replace(slot, item);
        let pos = self.sift_down(pos, observer);
        self.sift_up(pos, observer);
        Some(old)
    }

    /// Verifies the heap order.
    pub fn is_valid(&self) -> bool {
        (1..self.items.len()).all(|i| self.items[(i - 1) / 2] <= self.items[i])
    }

    fn sift_up<O: HeapObserver<T>>(&mut self, mut pos: usize, observer: &mut O) -> usize {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if self.items[pos] >= self.items[parent] {
                break;
            }
            self.items.swap(pos, parent);
            observer.moved(&self.items[pos], pos);
            pos = parent;
        }
        observer.moved(&self.items[pos], pos);
        pos
    }

    fn sift_down<O: HeapObserver<T>>(&mut self, mut pos: usize, observer: &mut O) -> usize {
        let len = self.items.len();
        loop {
            let left = 2 * pos + 1;
            let right = left + 1;
            let mut smallest = pos;
            if left < len && self.items[left] < self.items[smallest] {
                smallest = left;
            }
            if right < len && self.items[right] < self.items[smallest] {
                smallest = right;
            }
            if smallest == pos {
                break;
            }
            self.items.swap(pos, smallest);
            observer.moved(&self.items[pos], pos);
            pos = smallest;
        }
        observer.moved(&self.items[pos], pos);
        pos
    }
}
