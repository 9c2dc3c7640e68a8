//! 用户目录中的用户

use serde::{Deserialize, Serialize};

/// 展开目标时使用的用户引用
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRef {
    pub id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

/// App 用户，携带其所有已注册的设备 token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppUser {
    pub id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    #[serde(default)]
    pub fcm_tokens: Vec<String>,
}

impl AppUser {
    pub fn to_ref(&self) -> UserRef {
        UserRef {
            id: self.id.clone(),
            email: self.email.clone(),
            display_name: self.display_name.clone(),
        }
    }
}
