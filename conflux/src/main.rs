#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

mod args;

use std::io::Write;

use anyhow::Context;
use args::Args;
use clap::Parser;
use conflux_config::Config;
use conflux_llm::{
    ChatCompletionRequest, Completion, InputMessage, LlmError, OutputMessage, StreamCloser, StreamHandler,
    build_provider,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::load(&args.config)?;

    // Initialize telemetry
    conflux_telemetry::init(&config.log)?;

    let (name, provider_config) = match &args.provider {
        Some(name) => config
            .providers
            .get_key_value(name)
            .with_context(|| format!("provider '{name}' is not configured"))?,
        None => config.providers.first().context("no providers configured")?,
    };

    tracing::info!(
        config_path = %args.config.display(),
        provider = %name,
        kind = provider_config.kind(),
        model = %args.model,
        "starting conflux"
    );

    let provider = build_provider(name, provider_config, &config.stream)?;

    let mut request = ChatCompletionRequest::new(args.model.clone(), vec![InputMessage::user(args.prompt_text())]);
    request.system_prompt.clone_from(&args.system);
    request.json_mode = args.json;

    if args.no_stream {
        let response = provider.create_chat_completion(&request).await?;
        let message = response
            .choice()
            .map_or_else(|| OutputMessage::new(String::new(), Vec::new()), |c| c.message.clone());

        let mut printer = Printer::new(std::io::stdout(), None);
        printer.on_token(&message.content);
        printer.on_complete(&message);
        printer.finish().context("failed to write to stdout")?;

        tracing::info!(
            finish_reason = ?response.finish_reason(),
            prompt_tokens = response.usage.prompt_tokens,
            completion_tokens = response.usage.completion_tokens,
            "completion finished"
        );
        return Ok(());
    }

    let stream = provider.create_chat_completion_stream(&request).await?;
    tokio::spawn(close_on_interrupt(stream.closer()));

    let mut printer = Printer::new(std::io::stdout(), Some(stream.closer()));
    let result = conflux_llm::pump(stream, &mut printer).await;
    printer.finish().context("failed to write to stdout")?;

    match result {
        Ok(Completion {
            finish_reason, usage, ..
        }) => {
            tracing::info!(
                finish_reason = ?finish_reason,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "stream finished"
            );
            Ok(())
        }
        Err(LlmError::Cancelled) => {
            tracing::info!("stream cancelled");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Close the stream on `SIGINT`
async fn close_on_interrupt(closer: StreamCloser) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("interrupt received, closing stream");
            closer.close();
        }
        Err(e) => tracing::warn!(error = %e, "failed to install Ctrl+C handler"),
    }
}

/// Writes tokens to `out` as they arrive
///
/// The first failed write closes the stream; later output is dropped and the
/// error is returned from [`Printer::finish`].
struct Printer<W> {
    out: W,
    closer: Option<StreamCloser>,
    wrote_text: bool,
    error: Option<std::io::Error>,
}

impl<W: Write> Printer<W> {
    const fn new(out: W, closer: Option<StreamCloser>) -> Self {
        Self {
            out,
            closer,
            wrote_text: false,
            error: None,
        }
    }

    fn write(&mut self, f: impl FnOnce(&mut W) -> std::io::Result<()>) {
        if self.error.is_some() {
            return;
        }

        if let Err(e) = f(&mut self.out).and_then(|()| self.out.flush()) {
            tracing::debug!(error = %e, "output closed, stopping stream");
            if let Some(closer) = &self.closer {
                closer.close();
            }
            self.error = Some(e);
        }
    }

    fn finish(self) -> std::io::Result<()> {
        self.error.map_or(Ok(()), Err)
    }
}

impl<W: Write + Send> StreamHandler for Printer<W> {
    fn on_token(&mut self, text: &str) {
        self.write(|out| out.write_all(text.as_bytes()));
        self.wrote_text |= !text.is_empty();
    }

    fn on_complete(&mut self, message: &OutputMessage) {
        let wrote_text = self.wrote_text;
        self.write(|out| {
            if wrote_text {
                writeln!(out)?;
            }
            for call in &message.tool_calls {
                writeln!(out, "-> {}({})", call.function.name, call.function.arguments)?;
            }
            Ok(())
        });
    }
}
