//! Output formatting utilities for the CLI

use indexmap::IndexMap;
use tabled::{settings::Style, Table, Tabled};

use cm_client::bench::{CaseOutcome, CaseResult};
use cm_protocol::HealthStatus;

/// Format benchmark results as a table, in run order
pub fn format_results(results: &IndexMap<String, CaseResult>) -> String {
    if results.is_empty() {
        return "No results recorded".to_string();
    }

    #[derive(Tabled)]
    struct ResultRow {
        #[tabled(rename = "CASE")]
        id: String,
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "LLM")]
        llm: String,
        #[tabled(rename = "GROUND TRUTH")]
        ground_truth: String,
        #[tabled(rename = "NOTE")]
        note: String,
    }

    let rows: Vec<ResultRow> = results
        .iter()
        .map(|(id, result)| ResultRow {
            id: id.clone(),
            name: truncate(&result.name, 32),
            llm: format_outcome(result.llm.as_ref()),
            ground_truth: format_outcome(result.ground_truth.as_ref()),
            note: result
                .llm
                .as_ref()
                .and_then(|o| o.message.clone())
                .or_else(|| result.ground_truth.as_ref().and_then(|o| o.message.clone()))
                .map(|m| truncate(&m, 48))
                .unwrap_or_else(|| "-".to_string()),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

fn format_outcome(outcome: Option<&CaseOutcome>) -> String {
    match outcome {
        Some(o) => format!("{} ({})", o.status, format_millis(o.elapsed_ms)),
        None => "-".to_string(),
    }
}

/// Format backend health as a short report
pub fn format_health(base_url: &str, health: &HealthStatus) -> String {
    format!(
        "Server: {}\nStatus: {}\nService: {}\n",
        base_url,
        health.status,
        if health.service.is_empty() {
            "-"
        } else {
            &health.service
        }
    )
}

fn format_millis(ms: u64) -> String {
    if ms < 1000 {
        format!("{}ms", ms)
    } else {
        format!("{:.1}s", ms as f64 / 1000.0)
    }
}

/// Truncate a string with ellipsis if too long
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Green),
        Print("✓ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an error message in red to stderr
pub fn print_error(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a warning message in yellow to stderr
pub fn print_warning(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Yellow),
        Print("⚠ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

pub fn print_info(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Cyan),
        Print("ℹ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use cm_client::CaseStatus;

    #[test]
    fn test_empty_results() {
        assert_eq!(format_results(&IndexMap::new()), "No results recorded");
    }

    #[test]
    fn test_results_table_keeps_order() {
        let mut results = IndexMap::new();
        for (id, status) in [("zeta", CaseStatus::Timeout), ("alpha", CaseStatus::Success)] {
            let mut result = CaseResult::new(id.to_uppercase());
            result.llm = Some(CaseOutcome {
                status,
                message: None,
                elapsed_ms: 1500,
            });
            results.insert(id.to_string(), result);
        }

        let table = format_results(&results);
        let zeta = table.find("zeta").unwrap();
        let alpha = table.find("alpha").unwrap();
        assert!(zeta < alpha);
        assert!(table.contains("timeout (1.5s)"));
        assert!(table.contains("GROUND TRUTH"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a very long case name", 10), "a very ...");
    }
}
