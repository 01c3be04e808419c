pub mod client;
pub mod factory;

pub use client::{
    CreatePageRequest, PageContent, PageSummary, UpdatePageRequest, WikiClient, WikiError,
};
pub use factory::WikiClientFactory;
