//! Question bank: the fixed table of choice tasks
//!
//! Each CSV row describes one question comparing two doors. Columns are
//! prefixed `A_` / `B_` per door. The table is read once per process and
//! shared read-only by every participant session.

use once_cell::sync::OnceCell;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Per-door attribute column suffixes, in the order the loader checks them
pub const ATTRIBUTE_SUFFIXES: [&str; 13] = [
    "D2D",
    "D2E",
    "O",
    "CD",
    "CP",
    "CTD",
    "CTL",
    "D",
    "T2DR",
    "T2DS",
    "TS",
    "TR_doorchange",
    "TR_nochange",
];

/// Question bank loading errors
#[derive(Debug, Error)]
pub enum DesignError {
    #[error("Failed to open question table {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Question table is missing required column '{0}'")]
    MissingColumn(String),

    #[error("Question table has no rows")]
    Empty,

    #[error("Row {row}, column {column}: invalid value '{value}' ({expected})")]
    InvalidValue {
        row: usize,
        column: String,
        value: String,
        expected: &'static str,
    },

    #[error("Row {row}: door {side} has both transfer-history flags set")]
    ConflictingTransferFlags { row: usize, side: Side },
}

/// Which door of a question
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    A,
    B,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::A, Side::B];

    pub fn prefix(self) -> &'static str {
        match self {
            Side::A => "A",
            Side::B => "B",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Transfer history shown for a door, derived from the two exclusive flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferHistory {
    None,
    DoorChange,
    NoChange,
}

/// Attributes of one door in one question
#[derive(Debug, Clone, PartialEq)]
pub struct DoorAttributes {
    /// D2D: walking distance to the door (m); also keys the door image
    pub walk_distance: u32,
    /// D2E: distance from the door to the station exit at destination (m)
    pub exit_distance: f64,
    /// O: physical obstacle between participant and door
    pub obstacle: bool,
    /// CD: people queueing at the door
    pub queue_length: f64,
    /// CP: platform crowding near the door (people/m²)
    pub platform_crowding: f64,
    /// CTD: crowdedness shown on the display screen
    pub screen_indicator: String,
    /// CTL: crowdedness shown by the LED ground stripe
    pub led_indicator: String,
    /// D: fare discount (%)
    pub discount_pct: f64,
    /// T2DR: minutes until this train arrives
    pub arrival_minutes: f64,
    /// T2DS: minutes until the next train
    pub next_train_minutes: f64,
    /// TS: trip shift
    pub trip_shift: f64,
    pub transfer_doorchange: bool,
    pub transfer_nochange: bool,
}

impl DoorAttributes {
    pub fn transfer_history(&self) -> TransferHistory {
        if self.transfer_doorchange {
            TransferHistory::DoorChange
        } else if self.transfer_nochange {
            TransferHistory::NoChange
        } else {
            TransferHistory::None
        }
    }

    /// Whether the next-train and trip-shift lines are shown for this door
    pub fn shows_trip_shift(&self) -> bool {
        self.trip_shift != self.next_train_minutes
    }

    /// Fare after applying this door's discount
    pub fn discounted_price(&self, ticket_price: f64) -> f64 {
        ticket_price * (1.0 - self.discount_pct / 100.0)
    }
}

/// One question: two doors plus the raw CSV cells it was parsed from
#[derive(Debug, Clone, PartialEq)]
pub struct ChoiceTask {
    /// Zero-based position in the bank
    pub index: usize,
    pub door_a: DoorAttributes,
    pub door_b: DoorAttributes,
    /// Cell text in file column order, persisted verbatim with each response
    pub raw: Vec<String>,
}

impl ChoiceTask {
    pub fn door(&self, side: Side) -> &DoorAttributes {
        match side {
            Side::A => &self.door_a,
            Side::B => &self.door_b,
        }
    }
}

/// Ordered, immutable set of choice tasks
#[derive(Debug, Clone)]
pub struct QuestionBank {
    columns: Vec<String>,
    tasks: Vec<ChoiceTask>,
}

static GLOBAL_BANK: OnceCell<Arc<QuestionBank>> = OnceCell::new();

impl QuestionBank {
    /// Load and cache the process-wide bank
    ///
    /// The first successful call reads `path`; every later call returns the
    /// cached bank without touching storage, whatever path it is given.
    pub fn global(path: &Path) -> Result<Arc<QuestionBank>, DesignError> {
        GLOBAL_BANK
            .get_or_try_init(|| QuestionBank::load(path).map(Arc::new))
            .map(Arc::clone)
    }

    /// Read a question table from a CSV file
    pub fn load(path: &Path) -> Result<Self, DesignError> {
        let file = File::open(path).map_err(|source| DesignError::Open {
            path: path.display().to_string(),
            source,
        })?;
        let bank = Self::from_reader(file)?;
        info!(
            path = %path.display(),
            questions = bank.len(),
            "Loaded question bank"
        );
        Ok(bank)
    }

    /// Parse a question table from any CSV source
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, DesignError> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let columns: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
        let layout = ColumnLayout::locate(&columns)?;

        let mut tasks = Vec::new();
        for (index, record) in rdr.records().enumerate() {
            let record = record?;
            // 1-based data row number, header excluded
            let row = index + 1;
            debug!(row, "Parsing question row");

            let door_a = layout.parse_door(Side::A, &record, row)?;
            let door_b = layout.parse_door(Side::B, &record, row)?;

            tasks.push(ChoiceTask {
                index,
                door_a,
                door_b,
                raw: record.iter().map(str::to_string).collect(),
            });
        }

        if tasks.is_empty() {
            return Err(DesignError::Empty);
        }

        Ok(Self { columns, tasks })
    }

    /// Header names in file order
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn tasks(&self) -> &[ChoiceTask] {
        &self.tasks
    }

    pub fn get(&self, index: usize) -> Option<&ChoiceTask> {
        self.tasks.get(index)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Column indexes of the attribute fields for both doors
struct ColumnLayout {
    // [side][suffix]
    indexes: [[usize; ATTRIBUTE_SUFFIXES.len()]; 2],
    names: [[String; ATTRIBUTE_SUFFIXES.len()]; 2],
}

impl ColumnLayout {
    fn locate(columns: &[String]) -> Result<Self, DesignError> {
        let mut indexes = [[0usize; ATTRIBUTE_SUFFIXES.len()]; 2];
        let mut names: [[String; ATTRIBUTE_SUFFIXES.len()]; 2] = Default::default();

        for (s, side) in Side::BOTH.iter().enumerate() {
            for (a, suffix) in ATTRIBUTE_SUFFIXES.iter().enumerate() {
                let name = format!("{}_{}", side.prefix(), suffix);
                indexes[s][a] = columns
                    .iter()
                    .position(|c| *c == name)
                    .ok_or_else(|| DesignError::MissingColumn(name.clone()))?;
                names[s][a] = name;
            }
        }

        Ok(Self { indexes, names })
    }

    fn parse_door(
        &self,
        side: Side,
        record: &csv::StringRecord,
        row: usize,
    ) -> Result<DoorAttributes, DesignError> {
        let s = match side {
            Side::A => 0,
            Side::B => 1,
        };
        let cell = |a: usize| Cell {
            value: record.get(self.indexes[s][a]).unwrap_or(""),
            column: &self.names[s][a],
            row,
        };

        let door = DoorAttributes {
            walk_distance: cell(0).whole()?,
            exit_distance: cell(1).number()?,
            obstacle: cell(2).flag()?,
            queue_length: cell(3).number()?,
            platform_crowding: cell(4).number()?,
            screen_indicator: cell(5).value.to_string(),
            led_indicator: cell(6).value.to_string(),
            discount_pct: cell(7).number()?,
            arrival_minutes: cell(8).number()?,
            next_train_minutes: cell(9).number()?,
            trip_shift: cell(10).number()?,
            transfer_doorchange: cell(11).flag()?,
            transfer_nochange: cell(12).flag()?,
        };

        if door.transfer_doorchange && door.transfer_nochange {
            return Err(DesignError::ConflictingTransferFlags { row, side });
        }

        Ok(door)
    }
}

struct Cell<'a> {
    value: &'a str,
    column: &'a str,
    row: usize,
}

impl Cell<'_> {
    fn invalid(&self, expected: &'static str) -> DesignError {
        DesignError::InvalidValue {
            row: self.row,
            column: self.column.to_string(),
            value: self.value.to_string(),
            expected,
        }
    }

    fn number(&self) -> Result<f64, DesignError> {
        self.value
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| self.invalid("number"))
    }

    /// Non-negative integer; `3.0` is accepted as 3
    fn whole(&self) -> Result<u32, DesignError> {
        if let Ok(v) = self.value.parse::<u32>() {
            return Ok(v);
        }
        match self.value.parse::<f64>() {
            Ok(v) if v.fract() == 0.0 && v >= 0.0 && v <= u32::MAX as f64 => Ok(v as u32),
            _ => Err(self.invalid("non-negative integer")),
        }
    }

    fn flag(&self) -> Result<bool, DesignError> {
        match self.value.to_ascii_lowercase().as_str() {
            "1" | "1.0" | "true" | "yes" => Ok(true),
            "0" | "0.0" | "false" | "no" | "" => Ok(false),
            _ => Err(self.invalid("0/1 flag")),
        }
    }
}
