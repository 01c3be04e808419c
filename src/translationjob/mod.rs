pub mod controller;
pub mod resources;
pub mod title;
pub mod types;

pub use types::{TranslationJob, TranslationJobSpec, TranslationJobState, TranslationJobStatus};
