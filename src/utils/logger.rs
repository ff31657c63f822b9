use anyhow::{Context, Result};
use env_logger::{Builder, Env, Target};
use std::fs::File;
use std::io::Write;

pub const LOG_ENV: &str = "TMV_LOG";
pub const LOG_FILE_ENV: &str = "TMV_LOG_FILE";
const DEFAULT_LOG_FILE: &str = "debug.log";

/// Installs the file logger when `TMV_LOG` is set (an env_logger filter such
/// as `debug` or `tmv=trace`). The terminal belongs to the renderer, so
/// records never go to stdout or stderr. Returns whether a logger was
/// installed.
pub fn init() -> Result<bool> {
    if std::env::var_os(LOG_ENV).is_none() {
        return Ok(false);
    }

    let path = std::env::var(LOG_FILE_ENV).unwrap_or_else(|_| DEFAULT_LOG_FILE.to_string());
    let file = File::create(&path).with_context(|| format!("failed to create log file {}", path))?;

    Builder::from_env(Env::new().filter(LOG_ENV))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] [{}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.args()
            )
        })
        .target(Target::Pipe(Box::new(file)))
        .try_init()
        .context("logger already initialised")?;

    log::info!("logging to {}", path);
    Ok(true)
}
