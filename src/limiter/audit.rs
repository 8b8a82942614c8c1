use chrono::DateTime;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

/// Records denied requests.
///
/// Every denial is logged at warn level; if a path is configured the same line is appended to
/// that file as well.
#[derive(Debug, Clone, Default)]
pub(crate) struct AuditLog {
    path: Option<PathBuf>,
}

impl AuditLog {
    pub(crate) fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub(crate) fn excess(&self, now: u64, identifier: &str, key: &str, limit: u64, window: u64) {
        let line = excess_line(now, identifier, key, limit, window);
        log::warn!("{line}");
        if let Some(path) = &self.path {
            let appended = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .and_then(|mut file| writeln!(file, "{line}"));
            if let Err(e) = appended {
                log::error!("Unable to write rate limit audit log {}: {e}", path.display());
            }
        }
    }
}

pub(crate) fn excess_line(
    now: u64,
    identifier: &str,
    key: &str,
    limit: u64,
    window: u64,
) -> String {
    let timestamp = i64::try_from(now)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|time| time.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| now.to_string());
    // Keys come from clients; escape them so one denial stays one line.
    format!(
        "[{timestamp}] Rate limit exceeded (identifier: {identifier}, key: {}, limit: {limit} requests per {window} seconds)",
        key.escape_debug()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_excess_line() {
        assert_eq!(
            excess_line(1_700_000_000, "login", "1.2.3.4", 5, 300),
            "[2023-11-14 22:13:20] Rate limit exceeded (identifier: login, key: 1.2.3.4, limit: 5 requests per 300 seconds)"
        );
        // Control characters cannot forge extra lines
        let line = excess_line(0, "login", "a\nb", 1, 60);
        assert!(!line.contains('\n'));
        assert!(line.contains("key: a\\nb"));
    }

    #[test]
    fn test_appends_to_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rate_limit_excess.log");
        let audit = AuditLog::new(Some(path.clone()));
        audit.excess(1_700_000_000, "login", "k1", 5, 300);
        audit.excess(1_700_000_001, "login", "k2", 5, 300);
        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("key: k1"));
        assert!(lines[1].starts_with("[2023-11-14 22:13:21]"));
    }

    #[test]
    fn test_unwritable_file_is_not_fatal() {
        let dir = TempDir::new().unwrap();
        // A directory cannot be opened for appending
        let audit = AuditLog::new(Some(dir.path().to_path_buf()));
        audit.excess(0, "login", "k", 1, 60);
    }
}
