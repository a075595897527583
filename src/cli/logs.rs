use crate::error::Result;
use crate::logging;
use clap::Args;
use std::fs;
use std::io::{BufRead, BufReader};

#[derive(Args)]
pub struct LogsArgs {
    /// Show logs from a specific date (YYYY-MM-DD)
    #[arg(long)]
    pub date: Option<String>,

    /// Number of lines to show
    #[arg(short, long, default_value = "100")]
    pub lines: usize,

    /// Only lines mentioning this text (e.g. a session id)
    #[arg(long)]
    pub grep: Option<String>,
}

pub async fn run(args: LogsArgs) -> Result<()> {
    let log_dir = logging::log_dir()?;

    // The daily appender suffixes every file with its date
    let date = args
        .date
        .unwrap_or_else(|| latest_log_date(&log_dir).unwrap_or_default());
    let log_file = log_dir.join(format!("{}.{}", logging::LOG_FILE, date));

    if !log_file.exists() {
        eprintln!("Log file not found: {}", log_file.display());
        return Ok(());
    }

    let file = fs::File::open(&log_file)?;
    let reader = BufReader::new(file);
    let lines: Vec<String> = reader
        .lines()
        .collect::<std::result::Result<Vec<_>, _>>()?
        .into_iter()
        .filter(|line| args.grep.as_ref().map_or(true, |needle| line.contains(needle)))
        .collect();

    let start = lines.len().saturating_sub(args.lines);

    for line in &lines[start..] {
        println!("{}", line);
    }

    Ok(())
}

fn latest_log_date(log_dir: &std::path::Path) -> Option<String> {
    let prefix = format!("{}.", logging::LOG_FILE);
    fs::read_dir(log_dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            entry
                .file_name()
                .to_str()
                .and_then(|name| name.strip_prefix(&prefix))
                .map(str::to_string)
        })
        .max()
}
