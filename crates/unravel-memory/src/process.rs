use std::sync::OnceLock;

/// Resident set size of the current process, in bytes.
pub fn current_rss_bytes() -> Option<u64> {
    read_status_kib("VmRSS")
}

#[cfg(target_os = "linux")]
fn read_status_kib(field: &str) -> Option<u64> {
    let status = match std::fs::read_to_string("/proc/self/status") {
        Ok(status) => status,
        Err(err) => {
            // Sandboxes may hide `/proc`; only unexpected failures are worth a log line.
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!(
                    target: "unravel.memory",
                    error = %err,
                    "failed to read /proc/self/status"
                );
            }
            return None;
        }
    };
    status_field_bytes(&status, field)
}

#[cfg(not(target_os = "linux"))]
fn read_status_kib(_field: &str) -> Option<u64> {
    None
}

fn status_field_bytes(status: &str, field: &str) -> Option<u64> {
    let value = status.lines().find_map(|line| {
        line.trim_start()
            .strip_prefix(field)
            .and_then(|rest| rest.strip_prefix(':'))
    })?;
    let kib = value.split_whitespace().next()?;
    match kib.parse::<u64>() {
        Ok(kib) => Some(kib.saturating_mul(1024)),
        Err(err) => {
            static REPORTED: OnceLock<()> = OnceLock::new();
            if REPORTED.set(()).is_ok() {
                tracing::debug!(
                    target: "unravel.memory",
                    field,
                    value = kib,
                    error = %err,
                    "unparseable /proc/self/status field"
                );
            }
            None
        }
    }
}
