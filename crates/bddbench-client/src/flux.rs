//! Query templates and CSV response handling.
//!
//! A [`QuerySpec`] stays structured until the query client renders it with
//! [`QuerySpec::to_flux`].

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use csv_core::ReadRecordResult;
use serde::{Deserialize, Serialize};

use crate::range::format_range;

/// Row limit hint applied to every template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResultSize {
    #[default]
    Small,
    Large,
}

impl ResultSize {
    #[must_use]
    pub const fn limit(self) -> u32 {
        match self {
            Self::Small => 500,
            Self::Large => 50_000,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Small => "small",
            Self::Large => "large",
        }
    }
}

impl FromStr for ResultSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "small" => Ok(Self::Small),
            "large" => Ok(Self::Large),
            other => Err(format!("unsupported result size `{other}` (small, large)")),
        }
    }
}

/// The fixed query shapes, each with only the parameters it needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryKind {
    /// Rows that carry a `value` field.
    Filter,
    /// Windowed mean.
    Aggregate {
        #[serde(with = "secs")]
        every: Duration,
    },
    GroupBy { columns: Vec<String> },
    /// Fields pivoted into columns per timestamp.
    Pivot,
    /// Self-join of the `value` stream on time and run id.
    Join,
}

impl QueryKind {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Filter => "filter",
            Self::Aggregate { .. } => "aggregate",
            Self::GroupBy { .. } => "group_by",
            Self::Pivot => "pivot",
            Self::Join => "join",
        }
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for QueryKind {
    type Err = String;

    /// Parses a kind name with the default parameters of that kind.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "filter" => Ok(Self::Filter),
            "aggregate" => Ok(Self::Aggregate {
                every: Duration::from_secs(10),
            }),
            "group_by" => Ok(Self::GroupBy {
                columns: vec!["run_id".to_string()],
            }),
            "pivot" => Ok(Self::Pivot),
            "join" => Ok(Self::Join),
            other => Err(format!(
                "unsupported query type `{other}` (filter, aggregate, group_by, pivot, join)"
            )),
        }
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// One parametrized read against a single bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySpec {
    pub bucket: String,
    pub measurement: String,
    /// Relative range: the query covers `[now - time_range, now]`.
    #[serde(with = "secs")]
    pub time_range: Duration,
    pub size: ResultSize,
    pub kind: QueryKind,
}

impl QuerySpec {
    /// Renders the Flux text for this query.
    #[must_use]
    pub fn to_flux(&self) -> String {
        let limit = self.size.limit();
        let base = format!(
            "from(bucket: \"{}\")\n  |> range(start: -{})\n  |> filter(fn: (r) => r[\"_measurement\"] == \"{}\")",
            escape(&self.bucket),
            format_range(self.time_range),
            escape(&self.measurement),
        );

        match &self.kind {
            QueryKind::Filter => format!(
                "{base}\n  |> filter(fn: (r) => exists r[\"value\"])\n  |> limit(n: {limit})\n"
            ),
            QueryKind::Aggregate { every } => format!(
                "{base}\n  |> aggregateWindow(every: {}, fn: mean, createEmpty: false)\n  |> limit(n: {limit})\n",
                format_range(*every)
            ),
            QueryKind::GroupBy { columns } => {
                let columns: Vec<String> = columns
                    .iter()
                    .map(|c| format!("\"{}\"", escape(c)))
                    .collect();
                format!(
                    "{base}\n  |> group(columns: [{}])\n  |> limit(n: {limit})\n",
                    columns.join(", ")
                )
            }
            QueryKind::Pivot => format!(
                "{base}\n  |> limit(n: {limit})\n  |> pivot(rowKey: [\"_time\"], columnKey: [\"_field\"], valueColumn: \"_value\")\n"
            ),
            QueryKind::Join => {
                let side = format!(
                    "{base}\n  |> filter(fn: (r) => r[\"_field\"] == \"value\")\n  |> limit(n: {limit})"
                );
                format!(
                    "left = {side}\n\nright = {side}\n\njoin(tables: {{left: left, right: right}}, on: [\"_time\", \"run_id\"])\n"
                )
            }
        }
    }
}

/// Flux that counts `value` points of one measurement (and run) in `bucket`.
#[must_use]
pub fn count_flux(bucket: &str, measurement: &str, run_id: Option<&str>) -> String {
    let mut predicate = format!("r[\"_measurement\"] == \"{}\"", escape(measurement));
    if let Some(run_id) = run_id {
        predicate.push_str(&format!(" and r[\"run_id\"] == \"{}\"", escape(run_id)));
    }
    predicate.push_str(" and r[\"_field\"] == \"value\"");
    format!(
        "from(bucket: \"{}\")\n  |> range(start: 1970-01-01T00:00:00Z, stop: 2100-01-01T00:00:00Z)\n  |> filter(fn: (r) => {predicate})\n  |> group()\n  |> count()\n",
        escape(bucket)
    )
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Incremental row counter for Flux CSV.
///
/// Records are split by `csv_core`, so quoted cells may hold commas and line
/// breaks and a record may span chunks. `#` lines are annotations. The first
/// record is a header, and so is every later record whose second cell is
/// `result` (the header that opens each further table).
#[derive(Debug)]
pub struct CsvRowCounter {
    reader: csv_core::Reader,
    fields: Vec<u8>,
    ends: Vec<usize>,
    field_len: usize,
    end_len: usize,
    seen_header: bool,
    rows: u64,
}

impl Default for CsvRowCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl CsvRowCounter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            reader: csv_core::ReaderBuilder::new().comment(Some(b'#')).build(),
            fields: vec![0; 1024],
            ends: vec![0; 32],
            field_len: 0,
            end_len: 0,
            seen_header: false,
            rows: 0,
        }
    }

    /// Feeds a chunk and returns how many data rows it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> u64 {
        if chunk.is_empty() {
            return 0;
        }
        self.consume(chunk)
    }

    /// Flushes a trailing record without line terminator and returns the total.
    pub fn finish(&mut self) -> u64 {
        self.consume(&[]);
        self.rows
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// An empty `input` signals end of stream to the reader.
    fn consume(&mut self, mut input: &[u8]) -> u64 {
        let before = self.rows;
        loop {
            let (result, read, written, ended) = self.reader.read_record(
                input,
                &mut self.fields[self.field_len..],
                &mut self.ends[self.end_len..],
            );
            input = &input[read..];
            self.field_len += written;
            self.end_len += ended;
            match result {
                ReadRecordResult::InputEmpty => {
                    if input.is_empty() {
                        break;
                    }
                }
                ReadRecordResult::OutputFull => {
                    let grown = self.fields.len() * 2;
                    self.fields.resize(grown, 0);
                }
                ReadRecordResult::OutputEndsFull => {
                    let grown = self.ends.len() * 2;
                    self.ends.resize(grown, 0);
                }
                ReadRecordResult::Record => {
                    self.record();
                    self.field_len = 0;
                    self.end_len = 0;
                }
                ReadRecordResult::End => break,
            }
        }
        self.rows - before
    }

    fn record(&mut self) {
        let ends = &self.ends[..self.end_len];
        if ends.last().copied().unwrap_or(0) == 0 {
            return;
        }
        let second = match ends {
            [first, second, ..] => &self.fields[*first..*second],
            _ => &b""[..],
        };
        if !self.seen_header {
            self.seen_header = true;
        } else if second != b"result" {
            self.rows += 1;
        }
    }
}

/// Sums the `_value` column of a Flux CSV result.
///
/// # Errors
///
/// Returns a message if the CSV is malformed or a data row's `_value` is not
/// an integer.
pub fn sum_value_column(csv: &str) -> Result<u64, String> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .from_reader(csv.as_bytes());

    let mut value_index: Option<usize> = None;
    let mut total = 0_u64;
    for record in reader.records() {
        let record = record.map_err(|e| format!("malformed CSV: {e}"))?;
        if record.iter().all(str::is_empty) {
            continue;
        }
        let header = value_index.is_none() || record.get(1) == Some("result");
        if header {
            value_index = record.iter().position(|c| c == "_value");
            if value_index.is_none() {
                return Err("CSV table without a `_value` column".to_string());
            }
            continue;
        }
        if let Some(index) = value_index {
            let cell = record.get(index).unwrap_or("").trim();
            total += cell
                .parse::<u64>()
                .map_err(|_| format!("non-integer count `{cell}`"))?;
        }
    }
    Ok(total)
}
