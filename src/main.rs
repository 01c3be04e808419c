mod catalogue;
mod diagnostics;
mod http;
mod translate;
mod translationjob;
mod util;
mod wiki;
mod wikitarget;
mod worker;

use std::sync::Arc;

use util::{metrics::Metrics, telemetry};

fn operator_namespace() -> String {
    std::env::var("GLOOSCAP_NAMESPACE").unwrap_or_else(|_| "default".to_string())
}

fn translate_config() -> translate::client::TranslateConfig {
    let mut config = translate::client::TranslateConfig::default();
    if let Ok(addr) = std::env::var("GLOOSCAP_TRANSLATE_ADDR") {
        config.address = addr;
    }
    config.namespace = operator_namespace();
    config.secure = std::env::var("GLOOSCAP_TRANSLATE_SECURE")
        .map(|v| v == "true")
        .unwrap_or(false);
    config
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init().await;

    let client = kube::Client::try_default().await?;
    let namespace = operator_namespace();

    let catalogue = Arc::new(catalogue::Store::new());
    let wiki_factory = Arc::new(wiki::factory::WikiClientFactory::new(client.clone()));
    let translate_client = Arc::new(translate::client::TranslateClient::new(translate_config())?);

    let registry = prometheus::Registry::new();
    let metrics = Metrics::default().register(&registry).unwrap();

    let wikitarget_state = wikitarget::controller::State::new(metrics.clone(), catalogue.clone());
    let translationjob_state = translationjob::controller::State::new(metrics.clone());

    let wikitarget_controller = wikitarget::controller::run(client.clone(), wikitarget_state.clone(), wiki_factory.clone());
    let translationjob_controller = translationjob::controller::run(
        client.clone(),
        translationjob_state.clone(),
        catalogue.clone(),
        wiki_factory.clone(),
        translate_client.clone(),
    );

    let translation_probe = diagnostics::translation_probe::run(client.clone(), namespace.clone(), metrics.clone());
    let wiki_write_probe = diagnostics::wiki_write_probe::WikiWriteProbe::new(
        client.clone(),
        namespace.clone(),
        wiki_factory.clone(),
        metrics.clone(),
    )
    .run();

    let server = http::serve(
        http::AppState {
            wikitarget: wikitarget_state,
            translationjob: translationjob_state,
            registry,
        },
        "0.0.0.0:8080",
    );

    tokio::join!(
        wikitarget_controller,
        translationjob_controller,
        translation_probe,
        wiki_write_probe,
        server,
    )
    .4?;
    Ok(())
}
