use anyhow::Context;
use examprep_session::{
    config::Config,
    handlers::console,
    metrics::render_metrics,
    models::SessionPhase,
    AppState, EngineEvent,
};
use opentelemetry_sdk::trace::SdkTracerProvider;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // OpenTelemetry export is opt-in via OTEL_EXPORTER_OTLP_ENDPOINT
    let provider = init_telemetry();
    let otel_layer = provider.as_ref().map(|provider| {
        use opentelemetry::trace::TracerProvider as _;
        tracing_opentelemetry::layer().with_tracer(provider.tracer("examprep-session"))
    });

    // Logs go to stderr so they don't interleave with the console UI
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "examprep_session=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(otel_layer)
        .init();

    let config = Config::load().context("Failed to load configuration")?;
    tracing::info!(
        "Configuration loaded for environment: {}",
        std::env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string())
    );

    let session_id = std::env::args()
        .nth(1)
        .context("usage: examprep-session <session-id>")?;

    let state = AppState::new(config.clone())?;
    if let Some(snapshot) = state.cache.peek().await {
        tracing::warn!(
            "Found recovery snapshot for session {} loaded at {}",
            snapshot.session.id,
            snapshot.loaded_at
        );
    }

    let mut engine = state.session_engine();
    if let Err(e) = engine.load(&session_id).await {
        eprintln!(
            "Could not start session {}: {}\nReturn to session setup and choose another session.",
            session_id, e
        );
        shutdown_telemetry(provider);
        std::process::exit(2);
    }

    let questions = engine.questions().to_vec();
    println!("{}", console::HELP);
    if let Some(question) = engine.current_question() {
        println!(
            "{}{}",
            console::render_question(question, 0, questions.len(), engine.current_answer()),
            console::render_summary(&engine.summary())
        );
    }

    let (command_tx, command_rx) = mpsc::channel(32);
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();

    // Stdin reads block and cannot be cancelled, so they run on a plain thread
    // that the process may exit past
    let (index_tx, index_rx) = tokio::sync::watch::channel(0usize);
    let reader_questions = questions.clone();
    std::thread::spawn(move || {
        console::read_commands(
            std::io::stdin().lock(),
            &reader_questions,
            &index_rx,
            &command_tx,
        )
    });

    let printer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            if let EngineEvent::Updated { current_index, .. } = &event {
                let _ = index_tx.send(*current_index);
            }
            if let Some(text) = console::render_event(&event, &questions) {
                println!("{}", text);
            }
        }
    });

    let phase = engine.run(command_rx, event_tx).await;
    let _ = printer.await;
    tracing::info!("Session finished in phase {}", phase);

    if config.metrics_dump_on_exit {
        match render_metrics() {
            Ok(text) => eprintln!("{}", text),
            Err(e) => tracing::warn!("Failed to render metrics: {}", e),
        }
    }

    shutdown_telemetry(provider);

    if phase != SessionPhase::Completed && phase != SessionPhase::Abandoned {
        std::process::exit(1);
    }
    Ok(())
}

fn init_telemetry() -> Option<SdkTracerProvider> {
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::Resource;

    let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?;

    let exporter = match opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(otlp_endpoint.clone())
        .build()
    {
        Ok(exporter) => exporter,
        Err(e) => {
            eprintln!("WARNING: OTLP exporter disabled: {}", e);
            return None;
        }
    };

    let resource = Resource::builder_empty()
        .with_service_name("examprep-session")
        .with_attributes(vec![KeyValue::new(
            "service.version",
            env!("CARGO_PKG_VERSION"),
        )])
        .build();

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource)
        .build();

    opentelemetry::global::set_tracer_provider(provider.clone());
    eprintln!("OpenTelemetry export enabled: {}", otlp_endpoint);

    Some(provider)
}

fn shutdown_telemetry(provider: Option<SdkTracerProvider>) {
    if let Some(provider) = provider {
        if let Err(e) = provider.shutdown() {
            eprintln!("WARNING: OpenTelemetry shutdown failed: {}", e);
        }
    }
}
