pub mod client;

/// Generated protobuf/gRPC stubs for the translation-service wire protocol (§4.2/§6).
pub mod proto {
    tonic::include_proto!("glooscap.translate.v1");
}

pub use client::{CheckTitleOutcome, TranslateClient, TranslateConfig, TranslateError, TranslateOutcome};
