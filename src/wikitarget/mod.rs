pub mod controller;
pub mod types;

pub use types::{TargetRef, WikiTarget, WikiTargetMode, WikiTargetSpec, WikiTargetStatus};
