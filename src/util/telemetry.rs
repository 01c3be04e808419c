use tracing_subscriber::{prelude::*, EnvFilter, Registry};

#[cfg(feature = "telemetry")]
use opentelemetry::sdk::{trace, Resource};
#[cfg(feature = "telemetry")]
use opentelemetry::KeyValue;

/// Initialize tracing, wiring OTLP export when the `telemetry` feature is enabled.
pub async fn init() {
    let logger = tracing_subscriber::fmt::layer().compact();
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();

    #[cfg(feature = "telemetry")]
    {
        let otlp_exporter = opentelemetry_otlp::new_exporter().tonic();
        let telemetry = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_trace_config(
                trace::config().with_resource(Resource::new(vec![KeyValue::new(
                    "service.name",
                    "glooscap-operator",
                )])),
            )
            .with_exporter(otlp_exporter)
            .install_batch(opentelemetry::runtime::Tokio)
            .unwrap();
        let collector = Registry::default()
            .with(telemetry_layer(telemetry))
            .with(env_filter)
            .with(logger);
        tracing::subscriber::set_global_default(collector).unwrap();
        return;
    }

    #[cfg(not(feature = "telemetry"))]
    {
        let collector = Registry::default().with(logger).with(env_filter);
        tracing::subscriber::set_global_default(collector).unwrap();
    }
}

#[cfg(feature = "telemetry")]
fn telemetry_layer(
    tracer: opentelemetry::sdk::trace::Tracer,
) -> tracing_opentelemetry::OpenTelemetryLayer<Registry, opentelemetry::sdk::trace::Tracer> {
    tracing_opentelemetry::layer().with_tracer(tracer)
}

/// Fetch the current span's trace id, or a placeholder when tracing is unset.
pub fn get_trace_id() -> String {
    use opentelemetry::trace::TraceContextExt as _;
    use tracing_opentelemetry::OpenTelemetrySpanExt as _;

    let context = tracing::Span::current().context();
    let trace_id = context.span().span_context().trace_id();
    if trace_id == opentelemetry::trace::TraceId::INVALID {
        "unset".to_string()
    } else {
        trace_id.to_string()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn get_trace_id_without_global_subscriber_is_unset() {
        assert_eq!(get_trace_id(), "unset".to_string());
    }
}
