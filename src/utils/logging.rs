use crate::event::TaskEvent;
use tokio::sync::broadcast::{error::RecvError, Receiver};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Directory receiving the rolling log files
const LOG_DIRECTORY: &str = "logs";

/// Initializes the tracing subscriber.
///
/// # Arguments
///
/// * `log_level` - An `EnvFilter` directive such as "info" or "taskpilot=debug"
/// * `with_file` - Also write to a daily rolling `logs/taskpilot.log`
pub fn init_logging(log_level: &str, with_file: bool) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| {
        eprintln!("Invalid log level '{}', defaulting to 'info'", log_level);
        EnvFilter::new("info")
    });

    let stdout_layer = fmt::layer().with_line_number(true).with_target(false);
    let file_layer = with_file.then(|| {
        let appender = RollingFileAppender::new(Rotation::DAILY, LOG_DIRECTORY, "taskpilot.log");
        fmt::layer()
            .with_line_number(true)
            .with_ansi(false)
            .with_writer(appender)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();
}

/// Logs every task event published on the bus until it closes
pub fn spawn_event_logger(mut events: Receiver<TaskEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => info!(target: "taskpilot::events", "{}", line),
                    Err(e) => warn!("Unserializable event for task {}: {}", event.task_id, e),
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Event logger skipped {} events", skipped);
                }
                Err(RecvError::Closed) => {
                    debug!("Event bus closed");
                    break;
                }
            }
        }
    })
}
