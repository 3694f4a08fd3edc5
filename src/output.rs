use std::io::{self, Write};

use crossterm::style::Stylize;
use serde::Serialize;

use crate::manager::{
    BatchReport, Outcome, ProgressEvent, ProgressSink, StatusReport, UpdateReport,
};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Table,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_status(report: &StatusReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_batch(report: &BatchReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_update(report: &UpdateReport) -> io::Result<()> {
        Self::print_json(report)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Human-readable tables on stdout, progress lines on stderr.
pub struct TableOutput;

impl TableOutput {
    pub fn print_status(report: &StatusReport) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{} {}", "data dir:".cyan(), report.data_dir)?;
        writeln!(
            stdout,
            "{:<12} {:<34} {:<12} {:<12}",
            "source", "version", "compressed", "uncompressed"
        )?;
        for row in &report.sources {
            writeln!(
                stdout,
                "{:<12} {:<34} {:<12} {:<12}",
                row.name,
                row.version,
                mark(row.compressed),
                mark(row.uncompressed)
            )?;
        }
        Ok(())
    }

    pub fn print_batch(report: &BatchReport) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{}", format!("afdata {}", report.operation).cyan())?;
        for item in &report.items {
            let line = format!("{:<12} {:<34} {}", item.name, item.version, item.outcome);
            let line = match item.outcome {
                Outcome::Failed => line.red(),
                Outcome::Unsupported | Outcome::Retained => line.yellow(),
                _ => line.green(),
            };
            writeln!(stdout, "{line}")?;
            if let Some(error) = &item.error {
                writeln!(stdout, "    {}", error.as_str().dark_grey())?;
            }
        }
        let failures = report.failures().count();
        if failures > 0 {
            writeln!(stdout, "{}", format!("{failures} source(s) failed").red())?;
        }
        Ok(())
    }

    pub fn print_update(report: &UpdateReport) -> io::Result<()> {
        Self::print_batch(&report.download)?;
        Self::print_batch(&report.decompress)
    }
}

impl ProgressSink for TableOutput {
    fn event(&self, event: ProgressEvent) {
        let mut stderr = io::stderr().lock();
        let _ = match event.elapsed {
            Some(elapsed) => writeln!(
                stderr,
                "{} {} ({:.1}s)",
                "•".dark_grey(),
                event.message,
                elapsed.as_secs_f64()
            ),
            None => writeln!(stderr, "{} {}", "•".dark_grey(), event.message),
        };
    }
}

fn mark(available: bool) -> String {
    if available {
        "✅".to_string()
    } else {
        "❌".to_string()
    }
}
