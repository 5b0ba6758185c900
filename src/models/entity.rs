use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 记录生命周期: 删除只打墓碑, 不物理删除
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RecordState {
    Live,
    Deleted { at: DateTime<Utc> },
}

impl RecordState {
    pub fn from_deleted_at(deleted_at: Option<DateTime<Utc>>) -> Self {
        match deleted_at {
            Some(at) => RecordState::Deleted { at },
            None => RecordState::Live,
        }
    }

    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        match self {
            RecordState::Live => None,
            RecordState::Deleted { at } => Some(*at),
        }
    }
}

/// 聚合共用的标识与时间戳, 以组合方式嵌入各实体
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMeta {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub record_state: RecordState,
}

impl EntityMeta {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            record_state: RecordState::Live,
        }
    }

    pub fn restore(
        id: Uuid,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        deleted_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            created_at,
            updated_at,
            record_state: RecordState::from_deleted_at(deleted_at),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self.record_state, RecordState::Deleted { .. })
    }

    pub fn mark_deleted(&mut self) {
        let now = Utc::now();
        self.record_state = RecordState::Deleted { at: now };
        self.updated_at = now;
    }
}

impl Default for EntityMeta {
    fn default() -> Self {
        Self::new()
    }
}
