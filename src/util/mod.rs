//! Small internal data structures shared by the runtime.

mod min_heap;
pub(crate) use min_heap::MinHeap;
