//! Tracing subscriber setup shared by the index server binaries.
//!
//! Behaviour is driven by environment variables so the same binary can log
//! human-readable output on a developer machine and JSON lines in a container:
//!
//! | Variable        | Values                      | Default               |
//! |-----------------|-----------------------------|-----------------------|
//! | `LOG_LEVEL`     | any `EnvFilter` directive   | `info`                |
//! | `LOG_FORMAT`    | `human`, `json`             | `human`               |
//! | `LOG_OUTPUT`    | `console`, `file`, `both`   | `console`             |
//! | `LOG_FILE_PATH` | path of the rolling log     | `/tmp/vcs-pypi.log`   |
//!
//! `RUST_LOG` takes precedence over `LOG_LEVEL` when set.

use std::{
    env,
    io::{self, Write},
    path::{Path, PathBuf},
};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt::MakeWriter, prelude::*, registry, EnvFilter};

const NOISY_TARGETS: &[&str] = &["tokio=warn", "hyper=warn", "hyper_util=warn", "reqwest=warn"];

struct Tee<A, B> {
    a: A,
    b: B,
}

impl<A, B> Write for Tee<A, B>
where
    A: Write,
    B: Write,
{
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let res_a = self.a.write(buf);
        let res_b = self.b.write(buf);
        res_a.or(res_b)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.a.flush()?;
        self.b.flush()
    }
}

#[derive(Clone)]
struct MakeTee<A, B> {
    make_a: A,
    make_b: B,
}

impl<'a, A, B, W1, W2> MakeWriter<'a> for MakeTee<A, B>
where
    A: MakeWriter<'a, Writer = W1>,
    B: MakeWriter<'a, Writer = W2>,
    W1: Write + 'a,
    W2: Write + 'a,
{
    type Writer = Tee<W1, W2>;
    fn make_writer(&'a self) -> Self::Writer {
        Tee {
            a: self.make_a.make_writer(),
            b: self.make_b.make_writer(),
        }
    }
}

/// Where log lines are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Console,
    File,
    Both,
}

impl LogOutput {
    fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "file" => LogOutput::File,
            "both" => LogOutput::Both,
            _ => LogOutput::Console,
        }
    }

    fn console(self) -> bool {
        matches!(self, LogOutput::Console | LogOutput::Both)
    }

    fn file(self) -> bool {
        matches!(self, LogOutput::File | LogOutput::Both)
    }
}

/// Logging settings resolved from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
    pub output: LogOutput,
    pub file_path: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            output: LogOutput::Console,
            file_path: PathBuf::from("/tmp/vcs-pypi.log"),
        }
    }
}

impl LoggingConfig {
    /// Reads `LOG_LEVEL`, `LOG_FORMAT`, `LOG_OUTPUT` and `LOG_FILE_PATH`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            level: lookup("LOG_LEVEL").unwrap_or(defaults.level),
            json: lookup("LOG_FORMAT").is_some_and(|format| format.eq_ignore_ascii_case("json")),
            output: lookup("LOG_OUTPUT")
                .map(|output| LogOutput::parse(&output))
                .unwrap_or(defaults.output),
            file_path: lookup("LOG_FILE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.file_path),
        }
    }

    fn env_filter(&self) -> EnvFilter {
        let mut filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));
        for directive in NOISY_TARGETS {
            if let Ok(directive) = directive.parse() {
                filter = filter.add_directive(directive);
            }
        }
        filter
    }
}

/// Initializes the global tracing subscriber from the environment.
///
/// The returned guard must be kept alive for as long as file logging is
/// needed; dropping it flushes and stops the background writer.
pub fn init_subscriber() -> Option<WorkerGuard> {
    init_with(&LoggingConfig::from_env())
}

/// Initializes the global tracing subscriber with explicit settings.
pub fn init_with(config: &LoggingConfig) -> Option<WorkerGuard> {
    let subscriber = registry().with(config.env_filter());

    let log_dir = config
        .file_path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("/tmp"));
    let log_filename = config
        .file_path
        .file_name()
        .unwrap_or("vcs-pypi.log".as_ref());

    let mut guard: Option<WorkerGuard> = None;

    match (config.output.console(), config.output.file()) {
        (true, true) => {
            let file_appender = tracing_appender::rolling::daily(log_dir, log_filename);
            let (non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);
            guard = Some(file_guard);

            let tee_writer = MakeTee {
                make_a: std::io::stdout,
                make_b: non_blocking,
            };
            let fmt_layer = tracing_subscriber::fmt::layer().with_writer(tee_writer);
            if config.json {
                subscriber.with(fmt_layer.json()).init();
            } else {
                subscriber.with(fmt_layer).init();
            }
        }
        (false, true) => {
            let file_appender = tracing_appender::rolling::daily(log_dir, log_filename);
            let (non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);
            guard = Some(file_guard);

            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking);
            if config.json {
                subscriber.with(fmt_layer.json()).init();
            } else {
                subscriber.with(fmt_layer).init();
            }
        }
        _ => {
            let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stdout);
            if config.json {
                subscriber.with(fmt_layer.json()).init();
            } else {
                subscriber.with(fmt_layer).init();
            }
        }
    }

    guard
}
