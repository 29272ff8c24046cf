//! 有界命令队列
//!
//! 多生产者（任意调用方线程）、单消费者（工作线程）的 FIFO。
//! 满时 `push` 明确失败，调用方据此把命令置为 Ignored；只有显式
//! `force = true` 才会挤掉最老的命令，并把它交还给调用方处理。

use crate::command::Command;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// 默认容量
pub const DEFAULT_QUEUE_CAPACITY: usize = 128;

/// 队列已满（非强制 push）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFull {
    pub capacity: usize,
}

pub struct CommandQueue<K> {
    inner: Mutex<VecDeque<Arc<Command<K>>>>,
    capacity: usize,
}

impl<K> CommandQueue<K> {
    /// 创建队列（容量至少为 1）
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_QUEUE_CAPACITY))),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 入队
    ///
    /// - 未满：追加到队尾，返回 `Ok(None)`
    /// - 已满且 `force == false`：返回 `Err(QueueFull)`，队列不变
    /// - 已满且 `force == true`：移除队首并追加，返回 `Ok(Some(被挤掉的命令))`
    pub fn push(
        &self,
        cmd: Arc<Command<K>>,
        force: bool,
    ) -> Result<Option<Arc<Command<K>>>, QueueFull> {
        let mut q = self.inner.lock();
        if q.len() < self.capacity {
            q.push_back(cmd);
            return Ok(None);
        }
        if !force {
            return Err(QueueFull {
                capacity: self.capacity,
            });
        }
        let evicted = q.pop_front();
        q.push_back(cmd);
        Ok(evicted)
    }

    pub fn peek(&self) -> Option<Arc<Command<K>>> {
        self.inner.lock().front().cloned()
    }

    pub fn pop(&self) -> Option<Arc<Command<K>>> {
        self.inner.lock().pop_front()
    }

    /// 一次性取出全部命令（保持 FIFO 顺序）
    pub fn drain(&self) -> Vec<Arc<Command<K>>> {
        self.inner.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.inner.lock().len() >= self.capacity
    }
}

impl<K> Default for CommandQueue<K> {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl<K> std::fmt::Debug for CommandQueue<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
