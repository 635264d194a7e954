mod terminal;

use clap::Parser;
use slugc_core::{BuildRequest, Compiler, Settings, Tier};
use slugc_runtime::ProcessRunner;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use terminal::TerminalOutput;

pub const EXIT_SUCCESS: u8 = 0;
/// The application or buildpack rejected the build.
pub const EXIT_USER_FAILURE: u8 = 1;
/// The build could not be carried out: bad arguments, fetch or I/O failure.
pub const EXIT_INFRA_FAILURE: u8 = 2;

#[derive(Debug, Parser)]
#[command(
    name = "slugc",
    version,
    about = "Compile an application tree into a slug with a buildpack"
)]
struct Cli {
    /// Application source tree. Modified in place.
    build_dir: PathBuf,

    /// Buildpack tarball URL, local directory, or git URL with optional #ref.
    buildpack: String,

    /// Directory kept between builds of the same application.
    cache_dir: PathBuf,

    /// Directory receiving slug.tgz and processes.json.
    output_dir: PathBuf,

    /// Print the build result as JSON on stdout. Progress moves to stderr.
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false)]
    trace: bool,

    /// Whole-fetch deadline in seconds (overrides BUILDPACK_FETCH_TIMEOUT).
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    fetch_timeout: Option<u64>,

    /// bin/compile deadline in seconds (overrides COMPILE_TIMEOUT).
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    compile_timeout: Option<u64>,
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("SLUGC_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    match run(&cli) {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            ExitCode::from(EXIT_INFRA_FAILURE)
        }
    }
}

fn run(cli: &Cli) -> Result<u8, String> {
    if !cli.build_dir.is_dir() {
        return Err(format!(
            "build directory {} does not exist",
            cli.build_dir.display()
        ));
    }

    let settings = settings(cli);
    let progress = if cli.json {
        TerminalOutput::stderr()
    } else {
        TerminalOutput::stdout()
    };
    let runner = ProcessRunner;
    let request = BuildRequest::new(
        &cli.build_dir,
        cli.buildpack.as_str(),
        &cli.cache_dir,
        &cli.output_dir,
    );

    match Compiler::new(settings, &runner, &progress).run(&request) {
        Ok(result) => {
            if cli.json {
                let payload = serde_json::to_string_pretty(&result)
                    .map_err(|e| format!("JSON serialization failed: {e}"))?;
                println!("{payload}");
            }
            Ok(EXIT_SUCCESS)
        }
        Err(e) => {
            TerminalOutput::stderr().failure(&e);
            Ok(match e.tier() {
                Tier::User => EXIT_USER_FAILURE,
                Tier::Infrastructure => EXIT_INFRA_FAILURE,
            })
        }
    }
}

fn settings(cli: &Cli) -> Settings {
    let mut settings = Settings::from_env();
    if let Some(secs) = cli.fetch_timeout {
        settings.fetch_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = cli.compile_timeout {
        settings.compile_timeout = Duration::from_secs(secs);
    }
    settings
}
