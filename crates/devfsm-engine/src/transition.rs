//! 状态转换表
//!
//! (源状态, 结果) → 目标状态。状态自己声明的后继优先于表项；
//! 表项只在状态没有声明后继、或结果为 Error 时参与解析。
//!
//! [`StateSequence`] 是状态在回调中排入的后继序列，Completed 时优先于
//! 声明的后继和转换表。

use crate::error::RegistryError;
use crate::identity::StateId;
use crate::state::StateResult;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use tracing::warn;

/// 状态序列默认容量
pub const DEFAULT_SEQUENCE_CAPACITY: usize = 32;

/// 状态序列已满
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceFull {
    pub capacity: usize,
}

/// 有界的后继状态序列（FIFO）
///
/// 工作线程写入和消费，其他线程只读长度。
pub struct StateSequence {
    inner: Mutex<VecDeque<StateId>>,
    capacity: usize,
}

impl StateSequence {
    /// 创建序列（容量至少为 1）
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 追加一个状态，满时序列不变
    pub fn push(&self, id: StateId) -> Result<(), SequenceFull> {
        let mut q = self.inner.lock();
        if q.len() >= self.capacity {
            return Err(SequenceFull {
                capacity: self.capacity,
            });
        }
        q.push_back(id);
        Ok(())
    }

    /// 整体追加；放不下时一个都不追加
    pub fn extend(&self, ids: impl IntoIterator<Item = StateId>) -> Result<(), SequenceFull> {
        let ids: Vec<StateId> = ids.into_iter().collect();
        let mut q = self.inner.lock();
        if q.len() + ids.len() > self.capacity {
            return Err(SequenceFull {
                capacity: self.capacity,
            });
        }
        q.extend(ids);
        Ok(())
    }

    pub fn pop(&self) -> Option<StateId> {
        self.inner.lock().pop_front()
    }

    /// 清空，返回被丢弃的数量
    pub fn clear(&self) -> usize {
        let mut q = self.inner.lock();
        let n = q.len();
        q.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl Default for StateSequence {
    fn default() -> Self {
        Self::new(DEFAULT_SEQUENCE_CAPACITY)
    }
}

impl std::fmt::Debug for StateSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateSequence")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct TransitionTable {
    entries: HashMap<(StateId, StateResult), StateId>,
}

impl TransitionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加转换
    ///
    /// 与已有表项完全相同时只记录警告；目标不同则返回
    /// [`RegistryError::ConflictingTransition`]。
    pub fn add(
        &mut self,
        from: StateId,
        result: StateResult,
        to: StateId,
    ) -> Result<(), RegistryError> {
        if result == StateResult::Working {
            return Err(RegistryError::InvalidTrigger { from, result });
        }
        match self.entries.get(&(from.clone(), result)) {
            Some(existing) if *existing == to => {
                warn!("Duplicate transition {} --{:?}--> {} ignored", from, result, to);
                Ok(())
            },
            Some(existing) => Err(RegistryError::ConflictingTransition {
                existing: existing.clone(),
                from,
                result,
                new: to,
            }),
            None => {
                self.entries.insert((from, result), to);
                Ok(())
            },
        }
    }

    pub fn get(&self, from: &StateId, result: StateResult) -> Option<&StateId> {
        self.entries.get(&(from.clone(), result))
    }

    pub fn contains(&self, from: &StateId, result: StateResult) -> bool {
        self.get(from, result).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StateId, StateResult, &StateId)> {
        self.entries.iter().map(|((from, r), to)| (from, *r, to))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDLE: StateId = StateId::new_static("Idle", 100);
    const BUSY: StateId = StateId::new_static("Busy", 101);

    #[test]
    fn test_add_and_get() {
        let mut t = TransitionTable::new();
        t.add(IDLE, StateResult::Completed, BUSY).unwrap();
        t.add(BUSY, StateResult::Error, StateId::STOP).unwrap();

        assert_eq!(t.get(&IDLE, StateResult::Completed), Some(&BUSY));
        assert_eq!(t.get(&IDLE, StateResult::Error), None);
        assert!(t.contains(&StateId::new("busy", 101), StateResult::Error));
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn test_identical_duplicate_accepted() {
        let mut t = TransitionTable::new();
        t.add(IDLE, StateResult::Completed, BUSY).unwrap();
        t.add(IDLE, StateResult::Completed, BUSY).unwrap();
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_conflicting_duplicate_rejected() {
        let mut t = TransitionTable::new();
        t.add(IDLE, StateResult::Completed, BUSY).unwrap();
        let err = t.add(IDLE, StateResult::Completed, StateId::END).unwrap_err();
        assert!(matches!(err, RegistryError::ConflictingTransition { .. }));
        assert_eq!(t.get(&IDLE, StateResult::Completed), Some(&BUSY));
    }

    #[test]
    fn test_working_is_not_a_trigger() {
        let mut t = TransitionTable::new();
        assert_eq!(
            t.add(IDLE, StateResult::Working, BUSY),
            Err(RegistryError::InvalidTrigger {
                from: IDLE,
                result: StateResult::Working
            })
        );
        assert!(t.is_empty());
    }

    #[test]
    fn test_sequence_is_fifo() {
        let seq = StateSequence::new(4);
        seq.push(IDLE).unwrap();
        seq.extend([BUSY, StateId::STOP]).unwrap();
        assert_eq!(seq.len(), 3);
        assert_eq!(seq.pop(), Some(IDLE));
        assert_eq!(seq.pop(), Some(BUSY));
        assert_eq!(seq.pop(), Some(StateId::STOP));
        assert_eq!(seq.pop(), None);
        assert!(seq.is_empty());
    }

    #[test]
    fn test_sequence_full_leaves_contents() {
        let seq = StateSequence::new(2);
        seq.push(IDLE).unwrap();
        seq.push(BUSY).unwrap();
        assert_eq!(seq.push(StateId::STOP), Err(SequenceFull { capacity: 2 }));

        // 整体追加放不下时不做部分写入
        assert_eq!(seq.pop(), Some(IDLE));
        assert!(seq.extend([StateId::STOP, StateId::END]).is_err());
        assert_eq!(seq.len(), 1);
        assert_eq!(seq.clear(), 1);
        assert!(seq.is_empty());
    }
}
