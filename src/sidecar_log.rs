//! Append-only debug log for sidecar chatter.
//!
//! The sidecar writes diagnostics to stderr and sends `window/logMessage`
//! notifications. Neither belongs on the UI path, so both land here.

use std::io::Write;

/// Appends a tagged line to `~/.zenml-bridge/sidecar-debug.log`.
///
/// The `tag` identifies the source ("stderr", "transport", "rpc_client",
/// "logMessage") to aid debugging. Failures to open the file are ignored.
pub fn sidecar_log(tag: &str, msg: &str) {
    if let Ok(log_path) = crate::paths::sidecar_log_path() {
        if let Ok(mut file) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
        {
            let now = chrono::Local::now().format("%H:%M:%S%.3f");
            let _ = writeln!(file, "[{}] [{}] {}", now, tag, msg);
        }
    }
}
