mod logging;
mod report;
mod run;
mod settings;

use settings::{ReportFormat, Settings};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

fn main() -> ExitCode {
    let settings = Settings::from_cli();
    let _logging = logging::setup_logging_and_profiling();
    tracing::info!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(err) => {
            tracing::error!("Failed to start the async runtime: {}", err);
            return ExitCode::FAILURE;
        }
    };

    rt.block_on(async {
        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, finishing the current step");
                on_interrupt.cancel();
            }
        });

        let report = match run::run(&settings, cancel).await {
            Ok(report) => report,
            Err(err) => {
                tracing::error!("{}", err);
                return ExitCode::FAILURE;
            }
        };

        let stdout = std::io::stdout().lock();
        let written = match settings.format {
            ReportFormat::Text => report.write_text(stdout),
            ReportFormat::Json => report.write_json(stdout),
        };
        if let Err(err) = written {
            tracing::error!("Failed to print the report: {}", err);
        }
        report.exit_code()
    })
}
