//! Presenting [`ResultRecord`]s.
//!
//! Records are plain data; a [`Reporter`] is the I/O boundary that sends them
//! somewhere (stdout, a file, a dashboard). Two reporters ship with the crate:
//! a human-readable [`TextReporter`] and a line-delimited [`JsonReporter`].
use std::{error::Error, fmt::Write as _};

use crate::record::ResultRecord;

/// Width of the label column in text reports.
const LABEL_WIDTH: usize = 42;

/// Consumes records as the suite produces them.
///
/// # Example
/// ```rust
/// use viewbench::{Reporter, ResultRecord};
///
/// struct NameOnly;
///
/// impl Reporter for NameOnly {
///     async fn report(&self, record: &ResultRecord) -> Result<(), Box<dyn std::error::Error>> {
///         println!("{}", record.backend);
///         Ok(())
///     }
/// }
/// ```
pub trait Reporter {
    fn report(&self, record: &ResultRecord) -> impl Future<Output = Result<(), Box<dyn Error>>>;
}

/// Multi-line, aligned summary per backend.
#[derive(Debug, Clone, Copy)]
pub struct TextReporter {
    /// Size of the timed bulk insert, shown in its label.
    pub static_rows: usize,
}

impl TextReporter {
    pub fn new(static_rows: usize) -> Self {
        Self { static_rows }
    }

    pub fn render(&self, record: &ResultRecord) -> String {
        let insert_label = format!("- Insert {} rows:", short_count(self.static_rows));
        let lines = [
            (insert_label.as_str(), record.insert_rows),
            ("- Retrieve last timecode:", record.retrieve_last_timecode),
            (
                "- Retrieve last timecode under load:",
                record.retrieve_last_timecode_under_load,
            ),
            (
                "- Retrieve last timecode in parallel:",
                record.retrieve_last_timecode_in_parallel,
            ),
            ("- Retrieve most viewed films:", record.retrieve_most_viewed),
            (
                "- Retrieve most viewed films under load:",
                record.retrieve_most_viewed_under_load,
            ),
            (
                "- Retrieve most viewed films in parallel:",
                record.retrieve_most_viewed_in_parallel,
            ),
        ];

        let mut out = String::new();
        let _ = writeln!(out, "{:<LABEL_WIDTH$}{}", "DBMS:", record.backend);
        for (label, elapsed) in lines {
            let _ = writeln!(out, "{:<LABEL_WIDTH$}{:.6} s", label, elapsed.as_secs_f64());
        }
        out
    }
}

impl Reporter for TextReporter {
    async fn report(&self, record: &ResultRecord) -> Result<(), Box<dyn Error>> {
        println!("{}", self.render(record));
        Ok(())
    }
}

/// One JSON object per line.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonReporter;

impl Reporter for JsonReporter {
    async fn report(&self, record: &ResultRecord) -> Result<(), Box<dyn Error>> {
        let line = serde_json::to_string(record)?;
        println!("{line}");
        Ok(())
    }
}

/// `100000` -> `100k`, `2000000` -> `2M`; anything not a round multiple is
/// left as is.
fn short_count(n: usize) -> String {
    match n {
        0 => "0".into(),
        n if n % 1_000_000 == 0 => format!("{}M", n / 1_000_000),
        n if n % 1_000 == 0 => format!("{}k", n / 1_000),
        n => n.to_string(),
    }
}
