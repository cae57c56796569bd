use std::{fmt, mem::replace};

/// 缓冲区在会话内的键，从 0 开始单调递增，释放后不复用。
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(transparent)]
pub struct BufferKey(pub(crate) usize);

/// 内核在会话内的序号，按创建顺序分配。
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(transparent)]
pub struct KernelId(pub(crate) usize);

impl BufferKey {
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl KernelId {
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for BufferKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "buffer #{}", self.0)
    }
}

impl fmt::Display for KernelId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "kernel #{}", self.0)
    }
}

#[derive(Debug)]
pub(crate) enum Slot<T> {
    Empty,
    Occupied(T),
}

/// 只追加的槽位表。
///
/// 每次插入消耗一个新序号，即使插入的是空槽；取出对象后槽位留空，序号不再分配。
pub(crate) struct SlotTable<T>(Vec<Slot<T>>);

impl<T> Default for SlotTable<T> {
    #[inline]
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<T> SlotTable<T> {
    pub fn push(&mut self, value: Option<T>) -> usize {
        let idx = self.0.len();
        self.0.push(match value {
            Some(value) => Slot::Occupied(value),
            None => Slot::Empty,
        });
        idx
    }

    #[inline]
    pub fn get(&self, idx: usize) -> Option<&T> {
        match self.0.get(idx)? {
            Slot::Occupied(value) => Some(value),
            Slot::Empty => None,
        }
    }

    #[inline]
    pub fn get_mut(&mut self, idx: usize) -> Option<&mut T> {
        match self.0.get_mut(idx)? {
            Slot::Occupied(value) => Some(value),
            Slot::Empty => None,
        }
    }

    pub fn take(&mut self, idx: usize) -> Option<T> {
        match replace(self.0.get_mut(idx)?, Slot::Empty) {
            Slot::Occupied(value) => Some(value),
            Slot::Empty => None,
        }
    }

    /// 下一个将要分配的序号。
    #[inline]
    pub fn next_index(&self) -> usize {
        self.0.len()
    }

    pub fn occupied(&self) -> usize {
        self.0
            .iter()
            .filter(|slot| matches!(slot, Slot::Occupied(_)))
            .count()
    }

    /// 按序号顺序释放所有对象，序号计数保持不变。
    pub fn clear(&mut self) {
        for slot in &mut self.0 {
            *slot = Slot::Empty
        }
    }
}

#[cfg(test)]
mod test {
    use super::SlotTable;

    #[test]
    fn test_tombstone() {
        let mut table = SlotTable::default();
        assert_eq!(table.push(Some("a")), 0);
        assert_eq!(table.push(None), 1);
        assert_eq!(table.push(Some("c")), 2);
        assert_eq!(table.occupied(), 2);

        assert_eq!(table.take(0), Some("a"));
        assert_eq!(table.take(0), None);
        assert_eq!(table.take(1), None);
        assert_eq!(table.take(42), None);
        assert_eq!(table.get(2), Some(&"c"));

        // 空槽不会被复用
        assert_eq!(table.push(Some("d")), 3);
        assert_eq!(table.next_index(), 4);

        table.clear();
        assert_eq!(table.occupied(), 0);
        assert_eq!(table.push(Some("e")), 4);
    }
}
