//! Logging bootstrapper shared by the outer and initramfs binaries.
//!
//! Both halves of a transaction write to the same terminal, so every line
//! carries the program name and pid.

use env_logger::{Builder, Env};
use log::Record;
use serde_json::json;
use std::env;
use std::io::{self, Write};
use std::sync::OnceLock;

static INIT: OnceLock<()> = OnceLock::new();

const FORMAT_ENV: &str = "LUKSUSPEND_LOG_FORMAT";
const LEVEL_ENV: &str = "LUKSUSPEND_LOG_LEVEL";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Plain,
    Json,
}

impl LogFormat {
    fn from_env_value(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Plain,
        }
    }
}

/// Initialize the global logger.
///
/// The first caller wins; later calls are no-ops. If `RUST_LOG` is unset the
/// `default_level` argument applies, overridable via `LUKSUSPEND_LOG_LEVEL`.
/// Output is plain text on stderr unless `LUKSUSPEND_LOG_FORMAT=json`.
pub fn init(default_level: &str) {
    let _ = INIT.get_or_init(|| configure(default_level));
}

fn configure(default_level: &str) {
    let level = env::var(LEVEL_ENV).unwrap_or_else(|_| default_level.to_string());
    let format = LogFormat::from_env_value(env::var(FORMAT_ENV).ok().as_deref());
    let program = program_name();

    let mut builder = Builder::from_env(Env::default().default_filter_or(level));
    builder.format(move |buf, record| match format {
        LogFormat::Json => writeln!(buf, "{}", json_line(&program, record)),
        LogFormat::Plain => writeln!(
            buf,
            "{}[{}] {}: {}",
            program,
            std::process::id(),
            level_name(record),
            record.args()
        ),
    });

    if let Err(err) = builder.try_init() {
        let _ = writeln!(io::stderr(), "failed to initialize logger: {err}");
    }
}

fn program_name() -> String {
    env::args()
        .next()
        .and_then(|arg0| {
            std::path::Path::new(&arg0)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| "luksuspend".to_string())
}

fn level_name(record: &Record) -> String {
    record.level().as_str().to_lowercase()
}

fn json_line(program: &str, record: &Record) -> serde_json::Value {
    json!({
        "program": program,
        "pid": std::process::id(),
        "level": level_name(record),
        "target": record.target(),
        "message": record.args().to_string(),
    })
}
