//! 领域模型

mod admin;
mod campaign;
mod status;
mod target;
mod user;

pub use admin::{AdminContext, UserRole};
pub use campaign::{
    AdminCreator, AudienceSelector, DeliverySummary, NotificationContent, NotificationLog,
};
pub use status::{CampaignStatus, TargetStatus};
pub use target::{NotificationTarget, TargetKey, TargetPatch};
pub use user::{AppUser, UserRef};
