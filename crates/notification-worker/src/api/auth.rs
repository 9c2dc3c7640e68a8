//! 管理员身份提取
//!
//! 认证在网关完成，网关把已验证的管理员身份写入 x-admin-* 请求头。

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::error::NotificationError;
use crate::models::{AdminContext, UserRole};

pub const HEADER_ADMIN_UID: &str = "x-admin-uid";
pub const HEADER_ADMIN_NAME: &str = "x-admin-name";
pub const HEADER_ADMIN_EMAIL: &str = "x-admin-email";
pub const HEADER_ADMIN_ROLE: &str = "x-admin-role";

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

impl<S> FromRequestParts<S> for AdminContext
where
    S: Send + Sync,
{
    type Rejection = NotificationError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let uid = header(parts, HEADER_ADMIN_UID)
            .ok_or_else(|| NotificationError::Unauthorized("缺少管理员身份".to_string()))?;
        let role = header(parts, HEADER_ADMIN_ROLE)
            .and_then(UserRole::parse)
            .ok_or_else(|| NotificationError::Forbidden("无效的管理员角色".to_string()))?;

        Ok(AdminContext {
            uid: uid.to_string(),
            name: header(parts, HEADER_ADMIN_NAME).unwrap_or(uid).to_string(),
            email: header(parts, HEADER_ADMIN_EMAIL)
                .unwrap_or_default()
                .to_string(),
            role,
        })
    }
}
