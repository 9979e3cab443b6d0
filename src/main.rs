use clap::Parser;
use ruuvi_gateway::app::{self, Mode, Options, RealScanner, RunError};
use ruuvi_gateway::config;
use ruuvi_gateway::delivery::HttpTransport;
use ruuvi_gateway::enrollment::EnrollmentStore;
use ruuvi_gateway::logging;
use ruuvi_gateway::sink::{DisplayMode, LogSink, StatusSink, TerminalSink};
use std::io::{self, Write};
use std::panic::{self, PanicHookInfo};
use std::sync::Arc;

/// Exit codes for the application
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;

fn build_sink(display: DisplayMode) -> Arc<dyn StatusSink> {
    match display {
        DisplayMode::Log => Arc::new(LogSink),
        DisplayMode::Terminal => {
            let terminal = Arc::new(TerminalSink::new(io::stdout()));
            terminal.redraw();
            let _refresh = terminal.spawn_refresh();
            terminal
        }
    }
}

/// Load the credential, then either enroll sensors or run the gateway.
///
/// # Errors
/// Returns `RunError` for a missing credential, an unreadable enrollment
/// file, a failed scan start, or when frame capture stops.
async fn run(options: Options) -> Result<(), RunError> {
    let credential_path = match &options.credential_file {
        Some(path) => path.clone(),
        None => config::default_credential_path()?,
    };
    let token = config::load_token(&credential_path)?;

    let store = EnrollmentStore::new(options.enrollment_file.clone());
    let scanner = RealScanner;
    let mut stdout = io::stdout();

    match app::select_mode(&options, &store)? {
        Mode::Enroll => {
            app::enroll_with_io(&options, &scanner, &store, &mut stdout).await?;
            Ok(())
        }
        Mode::Monitor(enrolled) => {
            writeln!(
                stdout,
                "Reading only {} enrolled sensor(s):",
                enrolled.len()
            )?;
            app::print_enrolled(&enrolled, &mut stdout)?;

            let settings = Arc::new(options.settings(token)?);
            let transport = Arc::new(HttpTransport::new(settings.request_timeout)?);
            let sink = build_sink(options.display);

            app::run_gateway(settings, enrolled, &scanner, options.backend, transport, sink).await
        }
    }
}

#[tokio::main]
async fn main() {
    // Set up panic hook to ensure clean exit codes for process managers
    // (e.g., systemd) that monitor exit status
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    let options = Options::parse();

    if let Err(why) = logging::init(options.display) {
        eprintln!("error: invalid log filter: {}", why);
        std::process::exit(EXIT_ERROR);
    }

    match run(options).await {
        Ok(_) => std::process::exit(EXIT_SUCCESS),
        Err(why) => {
            tracing::error!(error = %why, "gateway stopped");
            eprintln!("error: {}", why);
            std::process::exit(EXIT_ERROR);
        }
    }
}
