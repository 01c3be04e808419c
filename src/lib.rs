//! Expose all controller components used by `main` and `crdgen`.
pub mod catalogue;
pub mod diagnostics;
pub mod http;
pub mod translate;
pub mod translationjob;
pub mod util;
pub mod wiki;
pub mod wikitarget;
pub mod worker;
