//! # Utilities
//!
//! Small helpers with no home of their own: a timing scope for
//! `debug!`-logging slow operations, text truncation/word-count, and
//! input validation not specific to any one module. Trimmed from the
//! donor's `utils.rs` — the UUID-based case-id validator and the US
//! legal-citation-format regex have no counterpart in this domain, and
//! the `memory_usage`/`uptime` stubs were never implemented by the
//! donor (`TODO`, `None`) and nothing here calls them.

use std::time::Instant;

pub struct Timer {
    start: Instant,
    name: String,
}

impl Timer {
    pub fn new(name: impl Into<String>) -> Self {
        Self { start: Instant::now(), name: name.into() }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    pub fn stop(self) -> u64 {
        let elapsed = self.elapsed_ms();
        tracing::debug!("timer '{}' completed in {}ms", self.name, elapsed);
        elapsed
    }
}

pub struct TextUtils;

impl TextUtils {
    pub fn truncate(text: &str, max_length: usize) -> String {
        if text.chars().count() <= max_length {
            text.to_string()
        } else {
            let truncated: String = text.chars().take(max_length.saturating_sub(3)).collect();
            format!("{}...", truncated)
        }
    }

    pub fn word_count(text: &str) -> usize {
        text.split_whitespace().count()
    }
}

pub struct SystemUtils;

impl SystemUtils {
    pub fn format_bytes(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = bytes as f64;
        let mut unit_index = 0;
        while size >= 1024.0 && unit_index < UNITS.len() - 1 {
            size /= 1024.0;
            unit_index += 1;
        }
        if unit_index == 0 {
            format!("{} {}", size as u64, UNITS[unit_index])
        } else {
            format!("{:.2} {}", size, UNITS[unit_index])
        }
    }

    pub fn format_duration(duration: std::time::Duration) -> String {
        let total_seconds = duration.as_secs();
        let hours = total_seconds / 3600;
        let minutes = (total_seconds % 3600) / 60;
        let seconds = total_seconds % 60;
        if hours > 0 {
            format!("{}h {}m {}s", hours, minutes, seconds)
        } else if minutes > 0 {
            format!("{}m {}s", minutes, seconds)
        } else {
            format!("{}s", seconds)
        }
    }
}

pub struct ValidationUtils;

impl ValidationUtils {
    pub fn is_valid_search_query(query: &str, min_length: usize, max_length: usize) -> bool {
        let trimmed = query.trim();
        !trimmed.is_empty() && trimmed.chars().count() >= min_length && trimmed.chars().count() <= max_length
    }

    pub fn sanitize_filename(filename: &str) -> String {
        filename
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_character_budget() {
        assert_eq!(TextUtils::truncate("Hello world", 20), "Hello world");
        assert_eq!(TextUtils::truncate("This is a very long text", 10), "This is...");
    }

    #[test]
    fn format_bytes_picks_the_right_unit() {
        assert_eq!(SystemUtils::format_bytes(512), "512 B");
        assert_eq!(SystemUtils::format_bytes(1024), "1.00 KB");
        assert_eq!(SystemUtils::format_bytes(1048576), "1.00 MB");
    }

    #[test]
    fn search_query_validation_enforces_length_bounds() {
        assert!(ValidationUtils::is_valid_search_query("test query", 2, 100));
        assert!(!ValidationUtils::is_valid_search_query("", 2, 100));
        assert!(!ValidationUtils::is_valid_search_query("a", 2, 100));
    }
}
