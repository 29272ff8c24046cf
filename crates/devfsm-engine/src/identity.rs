//! 状态标识
//!
//! `StateId` 是不可变的 (名称, 数值 id) 对。两个字段都参与相等比较，
//! 名称比较不区分大小写（ASCII）。
//!
//! 标识集合是开放的：具体设备用 [`StateId::new_static`] 声明自己的状态，
//! 引擎内核只认识下面的预定义标识。
//!
//! ```
//! use devfsm_engine::StateId;
//!
//! const IDLE: StateId = StateId::new_static("Idle", 100);
//!
//! assert_eq!(IDLE, StateId::new("IDLE", 100));
//! assert_ne!(IDLE, StateId::new("Idle", 101));
//! ```

use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StateId {
    name: Cow<'static, str>,
    id: i32,
}

impl StateId {
    pub const NA: StateId = StateId::new_static("NA", 0);
    pub const START: StateId = StateId::new_static("Start", 1);
    pub const STOP: StateId = StateId::new_static("Stop", 2);
    pub const END: StateId = StateId::new_static("End", 3);
    pub const GENERIC_ERROR: StateId = StateId::new_static("GenericError", 4);
    pub const LOADED: StateId = StateId::new_static("Loaded", 5);
    pub const TRANSITION_ERROR: StateId = StateId::new_static("TransitionError", 6);
    pub const PAUSE: StateId = StateId::new_static("Pause", 7);
    pub const RESUME: StateId = StateId::new_static("Resume", 8);

    /// 内核预定义的全部标识
    pub const PREDEFINED: [StateId; 9] = [
        Self::NA,
        Self::START,
        Self::STOP,
        Self::END,
        Self::GENERIC_ERROR,
        Self::LOADED,
        Self::TRANSITION_ERROR,
        Self::PAUSE,
        Self::RESUME,
    ];

    pub const fn new_static(name: &'static str, id: i32) -> Self {
        Self {
            name: Cow::Borrowed(name),
            id,
        }
    }

    pub fn new(name: impl Into<Cow<'static, str>>, id: i32) -> Self {
        Self {
            name: name.into(),
            id,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    /// 名称比较（不区分大小写）
    pub fn matches_name(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    pub fn is_predefined(&self) -> bool {
        Self::PREDEFINED.contains(self)
    }

    /// GenericError / TransitionError
    pub fn is_error(&self) -> bool {
        *self == Self::GENERIC_ERROR || *self == Self::TRANSITION_ERROR
    }
}

impl PartialEq for StateId {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.name.eq_ignore_ascii_case(&other.name)
    }
}

impl Eq for StateId {}

impl Hash for StateId {
    // 必须与 eq 一致：名称按 ASCII 小写参与哈希
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        for b in self.name.bytes() {
            state.write_u8(b.to_ascii_lowercase());
        }
        state.write_u8(0xff);
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.id)
    }
}

impl Default for StateId {
    fn default() -> Self {
        Self::NA
    }
}
