//! Terminal and per-op file logging.
//!
//! Each op logs to `<op_dir>/logs/<op_name>.log`. The terminal logger is set up
//! once per process; starting a later op only moves the file target, so
//! consecutive runs with different op names land in separate files.

use std::{
    fs::{self, File, OpenOptions},
    path::{Path, PathBuf},
    sync::{Mutex, OnceLock},
};

use tracing::info;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{
    EnvFilter, Registry, fmt, layer::SubscriberExt, reload, util::SubscriberInitExt,
};

use crate::controller::ControllerCtx;

type OpFileLayer = fmt::Layer<
    Registry,
    fmt::format::DefaultFields,
    fmt::format::Format<fmt::format::Full, fmt::time::ChronoUtc>,
    NonBlocking,
>;

/// Process-wide log targets, set up by the first op to start
static TARGETS: OnceLock<LogTargets> = OnceLock::new();

/// Held while the targets are first set up, so concurrent starts don't race
static SETUP: Mutex<()> = Mutex::new(());

/// Writer thread guards of the installed subscriber.
/// Dropping a guard flushes its writer.
struct LogTargets {
    _terminal: WorkerGuard,
    op_file: Mutex<WorkerGuard>,
    op_file_reload: reload::Handle<OpFileLayer, Registry>,
}

impl LogTargets {
    /// Send file output to a new op's log file, flushing the previous one.
    fn retarget(&self, logfile: File) -> Result<(), String> {
        let (writer, guard) = tracing_appender::non_blocking(logfile);
        let layer = op_file_layer(writer);

        let mut current = self
            .op_file
            .lock()
            .map_err(|_| "Log file guard lock poisoned".to_string())?;
        self.op_file_reload
            .modify(|l| *l = layer)
            .map_err(|e| format!("Failed to move log file target: {e}"))?;
        *current = guard;
        Ok(())
    }
}

/// Plain-text file output with UTC timestamps
fn op_file_layer(writer: NonBlocking) -> OpFileLayer {
    fmt::layer::<Registry>()
        .with_timer(fmt::time::ChronoUtc::rfc_3339())
        .with_writer(writer)
        .with_ansi(false)
}

/// Location of an op's log file
pub fn log_path(op_dir: &Path, op_name: &str) -> PathBuf {
    op_dir.join("logs").join(format!("{op_name}.log"))
}

fn open_log_file(path: &Path) -> Result<File, String> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|e| format!("Failed to create log directory: {e}"))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| format!("Failed to open log file {}: {e}", path.display()))
}

/// Point logging at this op's log file and record the op's configuration there.
///
/// The level filter comes from `RUST_LOG`, defaulting to `info`.
/// Fails if the file can't be opened or another subscriber is already installed;
/// the caller decides whether that matters.
pub fn init_logging(ctx: &ControllerCtx) -> Result<PathBuf, String> {
    let path = log_path(&ctx.op_dir, &ctx.op_name);
    let logfile = open_log_file(&path)?;

    {
        let _setup = SETUP.lock().unwrap_or_else(|p| p.into_inner());
        match TARGETS.get() {
            Some(targets) => targets.retarget(logfile)?,
            None => {
                let targets = install(logfile)?;
                let _ = TARGETS.set(targets);
            }
        }
    }

    log_op_summary(ctx);
    Ok(path)
}

/// Install the global subscriber with terminal and op file outputs
fn install(logfile: File) -> Result<LogTargets, String> {
    let (terminal_writer, terminal_guard) = tracing_appender::non_blocking(std::io::stdout());
    let (file_writer, file_guard) = tracing_appender::non_blocking(logfile);

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| format!("Failed to set up log filter: {e}"))?;

    let terminal = fmt::layer()
        .with_timer(fmt::time::ChronoUtc::rfc_3339())
        .with_writer(terminal_writer)
        .with_target(false);
    let (op_file, op_file_reload) = reload::Layer::new(op_file_layer(file_writer));

    tracing_subscriber::registry()
        .with(op_file)
        .with(filter)
        .with(terminal)
        .try_init()
        .map_err(|e| format!("Failed to install logger: {e}"))?;

    Ok(LogTargets {
        _terminal: terminal_guard,
        op_file: Mutex::new(file_guard),
        op_file_reload,
    })
}

/// Head each op's log with what it was configured to do
fn log_op_summary(ctx: &ControllerCtx) {
    info!(
        "Op {}: supply {} ch{} mem{}, sensor {}, tick {:?}",
        ctx.op_name,
        ctx.serial_port,
        ctx.channel as u16 + 1,
        ctx.memory_slot as u16 + 1,
        ctx.sensor_port,
        ctx.tick_interval(),
    );
    info!(
        "Output bounds [{}, {}] A at {} V, gains {:?}, setpoint {} T, history {} samples",
        ctx.output_bounds.min,
        ctx.output_bounds.max,
        ctx.max_voltage,
        ctx.gains,
        ctx.setpoint,
        ctx.capacity,
    );
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn each_op_gets_its_own_log_file() {
        let op_dir = std::env::temp_dir().join(format!("magfield_logging_{}", std::process::id()));
        let mut ctx = ControllerCtx {
            op_dir: op_dir.clone(),
            ..Default::default()
        };

        ctx.op_name = "first".into();
        let first = init_logging(&ctx);
        ctx.op_name = "second".into();
        let second = init_logging(&ctx);

        // The file exists even if another test won the race to install the subscriber
        let first_path = log_path(&op_dir, "first");
        let second_path = log_path(&op_dir, "second");
        assert_eq!(first_path, op_dir.join("logs").join("first.log"));
        assert!(first_path.exists());
        assert!(second_path.exists());
        if let (Ok(a), Ok(b)) = (first, second) {
            assert_eq!(a, first_path);
            assert_eq!(b, second_path);
        }
    }
}
