//! Typed client (T) to the in-cluster translation service.
//!
//! Binary RPC over `tonic`, generated from `proto/translate.proto`. The
//! client never retries internally — retry policy belongs to the caller
//! (a worker, or the translation-service diagnostic).

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;
use tokio_stream::{Stream, StreamExt};
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Status};

use super::proto::{translate_client, CheckTitleRequest, DocumentChunk, Document as ProtoDocument, HealthRequest, Primitive as ProtoPrimitive, TranslateRequest as ProtoTranslateRequest, TranslateResponse as ProtoTranslateResponse};

#[derive(Error, Debug)]
pub enum TranslateError {
    #[error("translation service unreachable: {0}")]
    Unavailable(String),
    #[error("translation service error: {0}")]
    Rpc(String),
}

impl From<tonic::transport::Error> for TranslateError {
    fn from(e: tonic::transport::Error) -> Self {
        TranslateError::Unavailable(e.to_string())
    }
}

impl From<Status> for TranslateError {
    fn from(s: Status) -> Self {
        match s.code() {
            tonic::Code::Unavailable | tonic::Code::DeadlineExceeded => {
                TranslateError::Unavailable(s.message().to_string())
            }
            _ => TranslateError::Rpc(s.message().to_string()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct TranslateConfig {
    pub address: String,
    pub secure: bool,
    pub client_id: String,
    pub namespace: String,
    pub timeout: Duration,
}

impl Default for TranslateConfig {
    fn default() -> Self {
        TranslateConfig {
            address: "http://glooscap-translate.glooscap.svc.cluster.local:9443".to_string(),
            secure: false,
            client_id: "glooscap-operator".to_string(),
            namespace: "default".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    Title,
    DocTranslate,
}

impl From<Primitive> for i32 {
    fn from(p: Primitive) -> Self {
        match p {
            Primitive::Title => ProtoPrimitive::Title as i32,
            Primitive::DocTranslate => ProtoPrimitive::DocTranslate as i32,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Document {
    pub title: String,
    pub markdown: String,
    pub slug: String,
    pub metadata: HashMap<String, String>,
}

impl From<Document> for ProtoDocument {
    fn from(d: Document) -> Self {
        ProtoDocument {
            title: d.title,
            markdown: d.markdown,
            slug: d.slug,
            metadata: d.metadata,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TranslateOutcome {
    pub success: bool,
    pub translated_title: String,
    pub translated_markdown: String,
    pub error_message: Option<String>,
    pub tokens_used: u64,
    pub inference_seconds: f64,
}

impl From<ProtoTranslateResponse> for TranslateOutcome {
    fn from(r: ProtoTranslateResponse) -> Self {
        TranslateOutcome {
            success: r.success,
            translated_title: r.translated_title,
            translated_markdown: r.translated_markdown,
            error_message: if r.error_message.is_empty() {
                None
            } else {
                Some(r.error_message)
            },
            tokens_used: r.tokens_used,
            inference_seconds: r.inference_time_seconds,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CheckTitleOutcome {
    pub ready: bool,
    pub message: String,
    pub estimated_seconds: u32,
}

pub struct TranslateRequestArgs {
    pub job_id: String,
    pub primitive: Primitive,
    pub document: Document,
    pub source_lang: String,
    pub target_lang: String,
    pub source_wiki_uri: String,
    pub page_id: String,
    pub page_slug: String,
}

/// Client configured once per process against the translation service.
#[derive(Clone)]
pub struct TranslateClient {
    config: TranslateConfig,
    channel: Channel,
}

impl TranslateClient {
    pub fn new(config: TranslateConfig) -> Result<Self, TranslateError> {
        let endpoint = Endpoint::from_shared(config.address.clone())?
            .timeout(config.timeout)
            .connect_timeout(Duration::from_secs(5));
        let channel = endpoint.connect_lazy();
        Ok(TranslateClient { config, channel })
    }

    fn client(&self) -> translate_client::TranslateClient<Channel> {
        translate_client::TranslateClient::new(self.channel.clone())
    }

    pub async fn health(&self) -> Result<bool, TranslateError> {
        let mut client = self.client();
        let response = client.health(Request::new(HealthRequest {})).await?;
        Ok(response.into_inner().ok)
    }

    pub async fn check_title(
        &self,
        title: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<CheckTitleOutcome, TranslateError> {
        let mut client = self.client();
        let response = client
            .check_title(Request::new(CheckTitleRequest {
                title: title.to_string(),
                source_lang: source_lang.to_string(),
                target_lang: target_lang.to_string(),
            }))
            .await?
            .into_inner();
        Ok(CheckTitleOutcome {
            ready: response.ready,
            message: response.message,
            estimated_seconds: response.estimated_seconds,
        })
    }

    pub async fn translate(&self, args: TranslateRequestArgs) -> Result<TranslateOutcome, TranslateError> {
        let mut client = self.client();
        let request = ProtoTranslateRequest {
            job_id: args.job_id,
            namespace: self.config.namespace.clone(),
            primitive: args.primitive.into(),
            document: Some(args.document.into()),
            template_helper: None,
            source_language: args.source_lang,
            target_language: args.target_lang,
            source_wiki_uri: args.source_wiki_uri,
            page_id: args.page_id,
            page_slug: args.page_slug,
            requested_at: chrono::Utc::now().to_rfc3339(),
        };
        let response = client.translate_doc(Request::new(request)).await?;
        Ok(response.into_inner().into())
    }

    /// Bidirectional streaming translate for large documents. `chunks` is
    /// consumed in order; the returned stream yields response chunks as they
    /// arrive, honouring the caller's cancellation.
    pub async fn translate_stream(
        &self,
        chunks: impl Stream<Item = DocumentChunk> + Send + 'static,
    ) -> Result<impl Stream<Item = Result<DocumentChunk, TranslateError>>, TranslateError> {
        let mut client = self.client();
        let response = client.translate_stream(Request::new(chunks)).await?;
        Ok(response.into_inner().map(|r| r.map_err(TranslateError::from)))
    }
}
