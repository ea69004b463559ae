//! Calculation registry: durable `(date, type, fund) -> calculation id` mapping.
//!
//! The venue charges real time for every calculation it runs, so each accepted
//! submission is recorded here and looked up before submitting again.
//!
//! The store is an append-only CSV file:
//!
//! ```text
//! Date,ID,Type,Fundation
//! 2025-07-25 00:00:00,81234,IM,HV
//! 2025-07-25 14:02:11,81240,MV,HV
//! ```
//!
//! Every operation reads the whole file, decides, then appends. Nothing guards
//! against two processes writing at once: a concurrent writer can race the
//! duplicate check or interleave a torn row. Use one process per registry file.

use crate::error::{DataError, Result};
use chrono::{NaiveDateTime, Timelike};
use ice_risk_core::dates::{self, DateInput, TIMESTAMP_FORMAT};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Header row written when the registry file is created.
pub const REGISTRY_HEADER: [&str; 4] = ["Date", "ID", "Type", "Fundation"];

/// One recorded calculation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalculationRecord {
    /// Submission timestamp (second precision).
    #[serde(rename = "Date", with = "registry_timestamp")]
    pub date: NaiveDateTime,

    /// Venue calculation id.
    #[serde(rename = "ID")]
    pub id: i64,

    /// Calculation type, e.g. "IM", "MV", "IM-ptf".
    #[serde(rename = "Type")]
    pub calc_type: String,

    /// Fund the calculation ran against, e.g. "HV", "WR".
    #[serde(rename = "Fundation", alias = "Fund")]
    pub fund: String,
}

impl CalculationRecord {
    fn matches(&self, calc_type: &str, fund: &str) -> bool {
        self.calc_type == calc_type && self.fund == fund
    }

    fn to_row(&self) -> [String; 4] {
        [
            self.date.format(TIMESTAMP_FORMAT).to_string(),
            self.id.to_string(),
            self.calc_type.clone(),
            self.fund.clone(),
        ]
    }
}

mod registry_timestamp {
    use chrono::NaiveDateTime;
    use ice_risk_core::dates::{parse_timestamp, TIMESTAMP_FORMAT};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(date: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&date.format(TIMESTAMP_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let text = String::deserialize(deserializer)?;
        parse_timestamp(&text).map_err(serde::de::Error::custom)
    }
}

/// What counts as a duplicate on insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Reject only an identical `(date, type, fund)` tuple.
    #[default]
    Tuple,
    /// Also reject a calculation id already on file under any tuple.
    TupleOrId,
}

/// How [`CalculationRegistry::lookup_exact`] compares dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// Full timestamp must match (intraday snapshots such as MV).
    TimeSensitive,
    /// Only the calendar day must match (daily runs such as IM).
    DateOnly,
}

/// File-backed calculation registry.
#[derive(Debug, Clone)]
pub struct CalculationRegistry {
    path: PathBuf,
    policy: DuplicatePolicy,
}

impl CalculationRegistry {
    /// Creates a registry over `path`. The file is created on first insert.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            policy: DuplicatePolicy::default(),
        }
    }

    /// Sets the duplicate policy.
    #[must_use]
    pub fn with_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Returns the registry file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads every record in insertion order.
    ///
    /// A missing file is an empty registry.
    ///
    /// # Errors
    /// Returns [`DataError::MalformedRegistry`] on the first unparseable row.
    pub fn records(&self) -> Result<Vec<CalculationRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(&self.path)
            .map_err(|e| self.malformed(1, e.to_string()))?;

        let mut records = Vec::new();
        for (index, row) in reader.deserialize::<CalculationRecord>().enumerate() {
            let record = row.map_err(|e| {
                let line = e
                    .position()
                    .map_or(index as u64 + 2, csv::Position::line);
                self.malformed(line, e.to_string())
            })?;
            records.push(record);
        }

        Ok(records)
    }

    /// Reads the records for one `(type, fund)` pair in insertion order.
    ///
    /// # Errors
    /// Propagates read errors from [`Self::records`].
    pub fn records_for(&self, calc_type: &str, fund: &str) -> Result<Vec<CalculationRecord>> {
        Ok(self
            .records()?
            .into_iter()
            .filter(|r| r.matches(calc_type, fund))
            .collect())
    }

    /// Records a new calculation.
    ///
    /// The date is normalized to second precision. Nothing is written if the
    /// record collides with an existing one.
    ///
    /// # Errors
    /// Returns [`DataError::DuplicateRecord`] / [`DataError::DuplicateId`] on a
    /// collision, or a date/IO error.
    pub fn record(
        &self,
        id: i64,
        date: impl Into<DateInput>,
        calc_type: &str,
        fund: &str,
    ) -> Result<CalculationRecord> {
        let record = CalculationRecord {
            date: normalize(date)?,
            id,
            calc_type: non_empty("type", calc_type)?,
            fund: non_empty("fund", fund)?,
        };

        let existing = self.records()?;
        self.check_duplicate(&existing, &record)?;
        self.append(std::slice::from_ref(&record))?;

        info!(
            id = record.id,
            date = %record.date,
            calc_type = %record.calc_type,
            fund = %record.fund,
            "Recorded calculation id"
        );

        Ok(record)
    }

    /// Looks up the id recorded for `(date, type, fund)`.
    ///
    /// With [`MatchMode::DateOnly`] several rows can share the calendar day;
    /// the first one inserted wins.
    ///
    /// # Errors
    /// Returns a date error or a registry read error.
    pub fn lookup_exact(
        &self,
        date: impl Into<DateInput>,
        calc_type: &str,
        fund: &str,
        mode: MatchMode,
    ) -> Result<Option<i64>> {
        let target = normalize(date)?;

        let found = self.records()?.into_iter().find(|r| {
            r.matches(calc_type, fund)
                && match mode {
                    MatchMode::TimeSensitive => r.date == target,
                    MatchMode::DateOnly => r.date.date() == target.date(),
                }
        });

        debug!(
            date = %target,
            calc_type,
            fund,
            ?mode,
            id = ?found.as_ref().map(|r| r.id),
            "Registry exact lookup"
        );

        Ok(found.map(|r| r.id))
    }

    /// Returns the latest record for `(type, fund)`; on equal dates the last inserted wins.
    ///
    /// # Errors
    /// Returns a registry read error.
    pub fn lookup_most_recent(
        &self,
        calc_type: &str,
        fund: &str,
    ) -> Result<Option<(NaiveDateTime, i64)>> {
        let mut latest: Option<CalculationRecord> = None;

        for record in self.records()? {
            if !record.matches(calc_type, fund) {
                continue;
            }
            if latest.as_ref().map_or(true, |l| record.date >= l.date) {
                latest = Some(record);
            }
        }

        Ok(latest.map(|r| (r.date, r.id)))
    }

    /// Returns the record for `(type, fund)` closest in time to `date`.
    ///
    /// Equidistant candidates resolve to the earlier record date; a remaining
    /// tie keeps the first inserted.
    ///
    /// # Errors
    /// Returns a date error or a registry read error.
    pub fn lookup_closest(
        &self,
        date: impl Into<DateInput>,
        calc_type: &str,
        fund: &str,
    ) -> Result<Option<(NaiveDateTime, i64)>> {
        let target = normalize(date)?;
        let mut best: Option<(chrono::TimeDelta, CalculationRecord)> = None;

        for record in self.records()? {
            if !record.matches(calc_type, fund) {
                continue;
            }
            let distance = (record.date - target).abs();
            let better = match &best {
                None => true,
                Some((best_distance, best_record)) => {
                    distance < *best_distance
                        || (distance == *best_distance && record.date < best_record.date)
                }
            };
            if better {
                best = Some((distance, record));
            }
        }

        Ok(best.map(|(_, r)| (r.date, r.id)))
    }

    /// Imports a legacy line-oriented registry
    /// (`<date> - ID: <id> - Type: <type> - Fund: <fund>`).
    ///
    /// The whole file is parsed and checked for duplicates before anything is
    /// written, so a failed import leaves the registry untouched.
    ///
    /// # Errors
    /// Returns [`DataError::MalformedRegistry`] naming the legacy line, or a
    /// duplicate error.
    pub fn import_legacy(&self, legacy_path: impl AsRef<Path>) -> Result<usize> {
        let legacy_path = legacy_path.as_ref();
        let text =
            fs::read_to_string(legacy_path).map_err(|e| DataError::io(legacy_path, e))?;

        let mut incoming = Vec::new();
        for (index, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record = parse_legacy_line(line).map_err(|reason| DataError::MalformedRegistry {
                path: legacy_path.to_path_buf(),
                line: index as u64 + 1,
                reason,
            })?;
            incoming.push(record);
        }

        let mut known = self.records()?;
        for record in &incoming {
            self.check_duplicate(&known, record)?;
            known.push(record.clone());
        }

        self.append(&incoming)?;
        info!(
            count = incoming.len(),
            from = %legacy_path.display(),
            to = %self.path.display(),
            "Imported legacy registry"
        );

        Ok(incoming.len())
    }

    fn check_duplicate(
        &self,
        existing: &[CalculationRecord],
        candidate: &CalculationRecord,
    ) -> Result<()> {
        for record in existing {
            if record.date == candidate.date && record.matches(&candidate.calc_type, &candidate.fund)
            {
                return Err(DataError::DuplicateRecord {
                    date: candidate.date.format(TIMESTAMP_FORMAT).to_string(),
                    calc_type: candidate.calc_type.clone(),
                    fund: candidate.fund.clone(),
                });
            }
            if self.policy == DuplicatePolicy::TupleOrId && record.id == candidate.id {
                return Err(DataError::DuplicateId { id: candidate.id });
            }
        }
        Ok(())
    }

    fn append(&self, records: &[CalculationRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| DataError::io(parent, e))?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| DataError::io(&self.path, e))?;

        let needs_header = file
            .metadata()
            .map_err(|e| DataError::io(&self.path, e))?
            .len()
            == 0;
        let needs_newline = !needs_header && !ends_with_newline(&mut file, &self.path)?;

        // Rows are encoded in memory first so a failure leaves the file as it was.
        let mut buf = Vec::new();
        if needs_newline {
            buf.push(b'\n');
        }
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(buf);
        if needs_header {
            writer.write_record(REGISTRY_HEADER)?;
        }
        for record in records {
            writer.write_record(record.to_row())?;
        }
        let buf = writer
            .into_inner()
            .map_err(|e| DataError::io(&self.path, e.into_error()))?;

        file.write_all(&buf)
            .and_then(|()| file.flush())
            .map_err(|e| DataError::io(&self.path, e))?;

        Ok(())
    }

    fn malformed(&self, line: u64, reason: String) -> DataError {
        DataError::MalformedRegistry {
            path: self.path.clone(),
            line,
            reason,
        }
    }
}

fn normalize(date: impl Into<DateInput>) -> Result<NaiveDateTime> {
    let datetime = dates::to_datetime(date.into(), TIMESTAMP_FORMAT)?;
    Ok(datetime.with_nanosecond(0).unwrap_or(datetime))
}

fn non_empty(field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DataError::InvalidArgument(format!(
            "calculation {field} cannot be empty"
        )));
    }
    Ok(trimmed.to_string())
}

fn ends_with_newline(file: &mut File, path: &Path) -> Result<bool> {
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))
        .and_then(|_| file.read_exact(&mut last))
        .map_err(|e| DataError::io(path, e))?;
    Ok(last[0] == b'\n')
}

fn parse_legacy_line(line: &str) -> std::result::Result<CalculationRecord, String> {
    let parts: Vec<&str> = line.split(" - ").collect();
    let [date, id, calc_type, fund] = parts.as_slice() else {
        return Err(format!("expected 4 ' - ' separated fields, got {}", parts.len()));
    };

    let labelled = |part: &str, label: &str| -> std::result::Result<String, String> {
        match part.trim().split_once(':') {
            Some((key, value)) if key.trim() == label => Ok(value.trim().to_string()),
            _ => Err(format!("expected '{label}: <value>', got '{}'", part.trim())),
        }
    };

    let date = dates::parse_timestamp(date.trim()).map_err(|e| e.to_string())?;
    let id = labelled(id, "ID")?;
    let id = id
        .parse::<i64>()
        .map_err(|e| format!("invalid id '{id}': {e}"))?;

    Ok(CalculationRecord {
        date,
        id,
        calc_type: labelled(calc_type, "Type")?,
        fund: labelled(fund, "Fund")?,
    })
}
