//! Rendering of change events for the terminal

use chrono::{DateTime, Local};
use famwatch::{ChangeEvent, EventKind};
use owo_colors::OwoColorize;

/// How `watch` prints events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// One human-readable line per event
    Text,
    /// One JSON object per line
    Json,
}

/// Formats events as lines of output
#[derive(Debug, Clone, Copy)]
pub struct EventPrinter {
    format: OutputFormat,
    color: bool,
}

impl EventPrinter {
    pub fn new(format: OutputFormat, color: bool) -> Self {
        Self { format, color }
    }

    pub fn line(&self, event: &ChangeEvent, at: DateTime<Local>) -> String {
        match self.format {
            OutputFormat::Text => self.text_line(event, at),
            OutputFormat::Json => json_line(event, at),
        }
    }

    fn text_line(&self, event: &ChangeEvent, at: DateTime<Local>) -> String {
        let time = at.format("%H:%M:%S%.3f").to_string();
        let kind = format!("{:<8}", event.kind.as_str());
        let mut paths = event.source.display().to_string();
        if let Some(dest) = &event.dest {
            paths.push_str(" -> ");
            paths.push_str(&dest.display().to_string());
        }

        if !self.color {
            return format!("{} {} {}", time, kind, paths);
        }

        let kind = match event.kind {
            EventKind::Created => kind.green().to_string(),
            EventKind::Modified => kind.yellow().to_string(),
            EventKind::Deleted => kind.red().to_string(),
            EventKind::Moved => kind.cyan().to_string(),
            EventKind::AttributeChanged => kind.magenta().to_string(),
        };
        format!("{} {} {}", time.dimmed(), kind, paths)
    }
}

fn json_line(event: &ChangeEvent, at: DateTime<Local>) -> String {
    let mut value = serde_json::to_value(event).unwrap_or(serde_json::Value::Null);
    if let Some(map) = value.as_object_mut() {
        map.insert("time".to_string(), serde_json::Value::String(at.to_rfc3339()));
    }
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 1, 12, 30, 15).unwrap()
    }

    #[test]
    fn test_plain_text_line() {
        let printer = EventPrinter::new(OutputFormat::Text, false);
        let line = printer.line(&ChangeEvent::created("/w/a.txt"), at());
        assert_eq!(line, "12:30:15.000 created  /w/a.txt");
    }

    #[test]
    fn test_plain_text_move_shows_both_paths() {
        let printer = EventPrinter::new(OutputFormat::Text, false);
        let line = printer.line(&ChangeEvent::moved("/w/a", "/w/b"), at());
        assert!(line.ends_with("moved    /w/a -> /w/b"), "{}", line);
    }

    #[test]
    fn test_colored_line_keeps_content() {
        let printer = EventPrinter::new(OutputFormat::Text, true);
        let line = printer.line(&ChangeEvent::deleted("/w/gone"), at());
        assert!(line.contains("deleted"));
        assert!(line.contains("/w/gone"));
        assert!(line.contains('\u{1b}'));
    }

    #[test]
    fn test_json_line() {
        let printer = EventPrinter::new(OutputFormat::Json, false);
        let line = printer.line(&ChangeEvent::moved("/w/a", "/w/b"), at());
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();

        assert_eq!(value["kind"], "moved");
        assert_eq!(value["source"], "/w/a");
        assert_eq!(value["dest"], "/w/b");
        assert!(value["time"].as_str().unwrap().starts_with("2024-05-01T12:30:15"));
    }

    #[test]
    fn test_json_line_omits_missing_dest() {
        let printer = EventPrinter::new(OutputFormat::Json, false);
        let line = printer.line(&ChangeEvent::modified("/w/a"), at());
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert!(value.get("dest").is_none());
    }
}
