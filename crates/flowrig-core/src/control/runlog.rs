//! Run log
//!
//! Records every set point a sequence issues and writes them as CSV. File
//! names embed the start time as `HHMMSS`, the form the offline analysis
//! scripts parse.

use chrono::{DateTime, Local, NaiveTime};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

use crate::device::{FlowRate, Pump, ValveId};

/// What a run-log row describes
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    /// Flow rate issued to a pump
    Flow {
        /// Pump the rate was sent to
        pump: Pump,
        /// Rate issued
        rate: FlowRate,
    },
    /// Valve switched
    Valve(ValveId),
    /// Free-form note (sequence start, abort reason, residence times)
    Note(String),
}

/// One run-log row
#[derive(Debug, Clone, PartialEq)]
pub struct RunLogEntry {
    /// Wall-clock time the event was recorded
    pub wall: DateTime<Local>,
    /// Sequence time (clock elapsed) at the event
    pub elapsed: Duration,
    /// What happened
    pub event: RunEvent,
}

/// In-memory record of one sequence run
#[derive(Debug, Clone)]
pub struct RunLog {
    id: Uuid,
    prefix: String,
    started: DateTime<Local>,
    entries: Vec<RunLogEntry>,
}

impl RunLog {
    /// Start a log now
    pub fn new(prefix: impl Into<String>) -> Self {
        Self::starting_at(prefix, Local::now())
    }

    /// Start a log with an explicit start time
    pub fn starting_at(prefix: impl Into<String>, started: DateTime<Local>) -> Self {
        Self {
            id: Uuid::new_v4(),
            prefix: prefix.into(),
            started,
            entries: Vec::new(),
        }
    }

    /// Unique run id, written into every row
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Wall-clock start, also used for the file name
    pub fn started(&self) -> DateTime<Local> {
        self.started
    }

    /// Record an event at the given sequence time
    pub fn record(&mut self, elapsed: Duration, event: RunEvent) {
        self.entries.push(RunLogEntry {
            wall: Local::now(),
            elapsed,
            event,
        });
    }

    /// Recorded events in order
    pub fn entries(&self) -> &[RunLogEntry] {
        &self.entries
    }

    /// Number of recorded events
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True before the first event
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `<prefix>_<HHMMSS>.csv`
    pub fn file_name(&self) -> String {
        format!("{}_{}.csv", self.prefix, self.started.format("%H%M%S"))
    }

    /// Write the log into `dir` and return the file path
    pub fn write_csv<P: AsRef<Path>>(&self, dir: P) -> io::Result<PathBuf> {
        let path = dir.as_ref().join(self.file_name());
        let file = File::create(&path)?;
        let mut writer = BufWriter::new(file);

        writeln!(
            writer,
            "run_id,wall_time,elapsed_s,event,pump,valve,rate_ul_min,note"
        )?;
        for entry in &self.entries {
            write!(
                writer,
                "{},{},{:.3},",
                self.id,
                entry.wall.format("%Y-%m-%dT%H:%M:%S%.3f"),
                entry.elapsed.as_secs_f64()
            )?;
            match &entry.event {
                RunEvent::Flow { pump, rate } => {
                    writeln!(writer, "flow,{},,{:.3},", pump, rate.ul_per_min())?
                }
                RunEvent::Valve(valve) => writeln!(writer, "valve,,{},,", valve)?,
                RunEvent::Note(text) => writeln!(writer, "note,,,,{}", csv_field(text))?,
            }
        }

        writer.flush()?;
        tracing::info!(path = %path.display(), rows = self.entries.len(), "run log written");
        Ok(path)
    }
}

/// Recover the `HHMMSS` start time from a run-log file name
pub fn parse_file_time(name: &str) -> Option<NaiveTime> {
    let stem = name.strip_suffix(".csv").unwrap_or(name);
    let (_, stamp) = stem.rsplit_once('_')?;
    if stamp.len() != 6 {
        return None;
    }
    NaiveTime::parse_from_str(stamp, "%H%M%S").ok()
}

fn csv_field(text: &str) -> String {
    if text.contains(&[',', '"', '\n'][..]) {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn fixed_start() -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2024, 3, 7, 14, 5, 9)
            .single()
            .unwrap()
    }

    #[test]
    fn test_file_name_embeds_time() {
        let log = RunLog::starting_at("ramp", fixed_start());
        assert_eq!(log.file_name(), "ramp_140509.csv");
        assert_eq!(
            parse_file_time(&log.file_name()),
            NaiveTime::from_hms_opt(14, 5, 9)
        );
    }

    #[test]
    fn test_parse_file_time_rejects_garbage() {
        assert_eq!(parse_file_time("ramp.csv"), None);
        assert_eq!(parse_file_time("ramp_1405.csv"), None);
        assert_eq!(parse_file_time("ramp_256099.csv"), None);
        assert_eq!(
            parse_file_time("my_sweep_093000"),
            NaiveTime::from_hms_opt(9, 30, 0)
        );
    }

    #[test]
    fn test_write_csv() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = RunLog::starting_at("sweep", fixed_start());
        let switched = ValveId::new(1).unwrap();
        log.record(Duration::ZERO, RunEvent::Valve(switched));
        log.record(
            Duration::from_secs(15),
            RunEvent::Flow {
                pump: Pump::B,
                rate: FlowRate::from_ml_per_min(0.25).unwrap(),
            },
        );
        log.record(Duration::from_secs(30), RunEvent::Note("done, ok".into()));

        let path = log.write_csv(dir.path()).unwrap();
        assert_eq!(path.file_name().unwrap(), "sweep_140509.csv");

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("run_id,"));
        assert!(lines[1].ends_with(",0.000,valve,,1,,"));
        assert!(lines[2].ends_with(",15.000,flow,B,,250.000,"));
        assert!(lines[3].ends_with(",note,,,,\"done, ok\""));
        assert!(lines[1..]
            .iter()
            .all(|l| l.starts_with(&log.id().to_string())));
    }
}
