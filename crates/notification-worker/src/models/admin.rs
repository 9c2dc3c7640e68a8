//! 管理员身份上下文
//!
//! 角色检查不依赖全局状态，而是以显式上下文传入每个需要鉴权的调用。

use serde::{Deserialize, Serialize};

use super::campaign::AdminCreator;

/// 管理员角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserRole {
    #[serde(rename = "Super Admin")]
    SuperAdmin,
    #[serde(rename = "Sub Admin")]
    SubAdmin,
}

impl UserRole {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "Super Admin" | "super_admin" | "SUPER_ADMIN" => Some(Self::SuperAdmin),
            "Sub Admin" | "sub_admin" | "SUB_ADMIN" => Some(Self::SubAdmin),
            _ => None,
        }
    }
}

/// 发起操作的管理员
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminContext {
    pub uid: String,
    pub name: String,
    pub email: String,
    pub role: UserRole,
}

impl AdminContext {
    /// 创建者快照，写入活动后不可变
    pub fn creator(&self) -> AdminCreator {
        AdminCreator {
            uid: self.uid.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
        }
    }

    /// 超级管理员可以取消任意定时活动，子管理员只能取消自己创建的
    pub fn can_cancel(&self, creator: &AdminCreator) -> bool {
        self.role == UserRole::SuperAdmin || self.uid == creator.uid
    }
}
