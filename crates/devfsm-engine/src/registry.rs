//! 状态注册表
//!
//! 构建引擎时一次性填充，之后不再修改。数值 id 和名称（不区分大小写）
//! 在同一引擎内都必须唯一；查找缺失时返回 `None`，不会 panic。

use crate::error::RegistryError;
use crate::identity::StateId;
use crate::profile::DeviceProfile;
use crate::state::State;
use std::collections::HashMap;

pub struct StateRegistry<P: DeviceProfile> {
    states: Vec<Box<dyn State<P>>>,
    by_id: HashMap<i32, usize>,
}

impl<P: DeviceProfile> StateRegistry<P> {
    pub fn new() -> Self {
        Self {
            states: Vec::new(),
            by_id: HashMap::new(),
        }
    }

    pub fn add(&mut self, state: Box<dyn State<P>>) -> Result<(), RegistryError> {
        let new = state.id().clone();
        if let Some(existing) = self.clash(&new) {
            return Err(RegistryError::Duplicate {
                existing: existing.clone(),
                new,
            });
        }
        self.by_id.insert(new.id(), self.states.len());
        self.states.push(state);
        Ok(())
    }

    fn clash(&self, id: &StateId) -> Option<&StateId> {
        if let Some(&idx) = self.by_id.get(&id.id()) {
            return Some(self.states[idx].id());
        }
        self.find_by_name(id.name())
    }

    /// 精确匹配（id 和名称都相同）
    pub fn contains(&self, id: &StateId) -> bool {
        self.index_of(id).is_some()
    }

    pub(crate) fn index_of(&self, id: &StateId) -> Option<usize> {
        self.by_id
            .get(&id.id())
            .copied()
            .filter(|&idx| self.states[idx].id() == id)
    }

    pub fn find_by_id(&self, id: i32) -> Option<&StateId> {
        self.by_id.get(&id).map(|&idx| self.states[idx].id())
    }

    pub fn find_by_name(&self, name: &str) -> Option<&StateId> {
        self.states
            .iter()
            .map(|s| s.id())
            .find(|id| id.matches_name(name))
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> &mut dyn State<P> {
        self.states[index].as_mut()
    }

    pub(crate) fn get(&self, index: usize) -> &dyn State<P> {
        self.states[index].as_ref()
    }

    /// 按注册顺序列出全部标识
    pub fn ids(&self) -> Vec<StateId> {
        self.states.iter().map(|s| s.id().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

impl<P: DeviceProfile> Default for StateRegistry<P> {
    fn default() -> Self {
        Self::new()
    }
}
