use tracing_subscriber::{
    fmt::{self, format::FmtSpan, MakeWriter},
    layer::Layer,
    registry::LookupSpan,
};

use super::config::{LogFormat, LoggingConfig};

/// Консольный слой в формате из конфигурации.
///
/// Возвращается boxed trait-объект, чтобы стереть конкретный тип формата.
pub fn build_layer<S, W>(
    config: &LoggingConfig,
    writer: W,
) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    match config.format {
        LogFormat::Json => fmt::layer()
            .event_format(fmt::format().json().with_current_span(true))
            .with_writer(writer)
            .with_ansi(false)
            .with_target(config.with_target)
            .with_thread_names(config.with_thread_names)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .event_format(fmt::format().pretty())
            .with_span_events(FmtSpan::CLOSE)
            .with_writer(writer)
            .with_ansi(config.with_ansi)
            .with_target(config.with_target)
            .with_thread_names(config.with_thread_names)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .event_format(fmt::format().compact())
            .with_writer(writer)
            .with_ansi(config.with_ansi)
            .with_target(config.with_target)
            .with_thread_names(config.with_thread_names)
            .boxed(),
    }
}

#[cfg(test)]
mod tests {
    use tracing_subscriber::{prelude::*, registry::Registry};

    use super::*;
    use crate::logging::test_writer::VecMakeWriter;

    fn emit(format: LogFormat) -> String {
        let cfg = LoggingConfig {
            format,
            with_ansi: false,
            ..Default::default()
        };
        let (writer, buffer) = VecMakeWriter::new();
        let subscriber = Registry::default().with(build_layer(&cfg, writer));
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(tag = "sensors/temp", "Listener registered");
        });
        buffer.contents()
    }

    #[test]
    fn test_json_format_emits_fields() {
        let out = emit(LogFormat::Json);
        let line: serde_json::Value = serde_json::from_str(out.trim()).unwrap();
        assert_eq!(line["fields"]["message"], "Listener registered");
        assert_eq!(line["fields"]["tag"], "sensors/temp");
        assert_eq!(line["level"], "INFO");
    }

    #[test]
    fn test_text_formats_emit_message() {
        for format in [LogFormat::Compact, LogFormat::Pretty] {
            let out = emit(format);
            assert!(out.contains("Listener registered"), "{format}: {out}");
            assert!(out.contains("sensors/temp"), "{format}: {out}");
        }
    }
}
