/// A bounded collection that retains the `k` largest items pushed into it.
///
/// Items are stored as a min-heap, so the current worst member sits at the
/// root. Once full, a new item is admitted only if it is strictly greater
/// than that worst member, which it then replaces.
#[derive(Clone, Debug)]
pub struct BoundedHeap<T> {
    k: usize,
    data: Vec<T>,
}

impl<T: Ord> BoundedHeap<T> {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            data: Vec::with_capacity(k),
        }
    }

    pub fn capacity(&self) -> usize {
        self.k
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The smallest retained item
    pub fn worst(&self) -> Option<&T> {
        self.data.first()
    }

    /// The largest retained item. Among equal items, the same one that
    /// [`BoundedHeap::sorted`] and [`BoundedHeap::into_sorted_vec`] put first
    pub fn best(&self) -> Option<&T> {
        self.data
            .iter()
            .reduce(|best, item| if item > best { item } else { best })
    }

    /// Insert `item`, returning `true` if it was retained
    pub fn push(&mut self, item: T) -> bool {
        if self.k == 0 {
            return false;
        }
        if self.data.len() < self.k {
            self.data.push(item);
            let idx = self.data.len() - 1;
            sift_up(&mut self.data, idx);
            debug_assert!(check_heap(&self.data));
            return true;
        }
        if item > self.data[0] {
            self.data[0] = item;
            sift_down(&mut self.data, 0);
            debug_assert!(check_heap(&self.data));
            return true;
        }
        false
    }

    /// Retained items in unspecified order
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.data.iter()
    }

    /// Retained items, largest first
    pub fn sorted(&self) -> Vec<&T> {
        let mut items = self.data.iter().collect::<Vec<_>>();
        items.sort_by(|a, b| b.cmp(a));
        items
    }

    /// Consume the heap, returning items largest first
    pub fn into_sorted_vec(mut self) -> Vec<T> {
        self.data.sort_by(|a, b| b.cmp(a));
        self.data
    }
}

fn check_heap<T: Ord>(slice: &[T]) -> bool {
    for i in 1..slice.len() {
        let parent = (i - 1) / 2;
        if slice[parent] > slice[i] {
            return false;
        }
    }
    true
}

fn sift_up<T: Ord>(slice: &mut [T], mut index: usize) {
    while index > 0 {
        let parent = (index - 1) / 2;
        if slice[index] < slice[parent] {
            slice.swap(index, parent);
            index = parent;
        } else {
            break;
        }
    }
}

fn sift_down<T: Ord>(slice: &mut [T], mut index: usize) {
    while let Some(left) = slice.get(index * 2 + 1) {
        let mut smallest = index;
        if left < &slice[smallest] {
            smallest = index * 2 + 1;
        }

        if let Some(right) = slice.get(index * 2 + 2) {
            if right < &slice[smallest] {
                smallest = index * 2 + 2;
            }
        }

        if smallest != index {
            slice.swap(smallest, index);
            index = smallest;
        } else {
            break;
        }
    }
}
