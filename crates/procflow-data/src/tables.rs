//! CSV adapters: work schedules, worker rosters, arrival tables, sequence
//! tables, and pivot-table output.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use procflow_core::routing::SequenceTable;
use procflow_core::schedule::{DAYS_PER_WEEK, Weekday, WorkScheduleDay};
use procflow_core::source::ArrivalRow;
use procflow_core::worker::Worker;
use procflow_stats::PivotTable;

use crate::loader::DataLoadError;

/// Header row plus 1-based numbering.
fn line_of(index: usize) -> usize {
    index + 2
}

fn open(path: &Path) -> Result<csv::Reader<std::fs::File>, DataLoadError> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(DataLoadError::csv(path))
}

// ---------------------------------------------------------------------------
// Work schedules
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ScheduleRow {
    day: String,
    start_hour: u32,
    start_minute: u32,
    end_hour: u32,
    end_minute: u32,
    capacity: u32,
}

/// Read `day,start_hour,start_minute,end_hour,end_minute,capacity` rows into
/// the seven days of a week. Days without rows have no shifts.
pub fn load_schedule_csv(path: &Path) -> Result<[WorkScheduleDay; DAYS_PER_WEEK], DataLoadError> {
    let mut days: [WorkScheduleDay; DAYS_PER_WEEK] = Default::default();
    let mut reader = open(path)?;
    for (i, row) in reader.deserialize::<ScheduleRow>().enumerate() {
        let row = row.map_err(DataLoadError::csv(path))?;
        let invalid = |detail: String| DataLoadError::InvalidRow {
            file: path.to_path_buf(),
            line: line_of(i),
            detail,
        };
        let day: Weekday = row.day.parse().map_err(|e| invalid(format!("{e}")))?;
        days[day.index()]
            .set_time(
                row.start_hour,
                row.start_minute,
                row.end_hour,
                row.end_minute,
                row.capacity,
            )
            .map_err(|e| invalid(format!("{e}")))?;
    }
    debug!(file = %path.display(), "work schedule loaded");
    Ok(days)
}

// ---------------------------------------------------------------------------
// Worker rosters
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WorkerRow {
    id: String,
}

/// Read a roster with an `id` column.
pub fn load_workers_csv(path: &Path) -> Result<Vec<Worker>, DataLoadError> {
    let mut reader = open(path)?;
    let mut workers = Vec::new();
    for (i, row) in reader.deserialize::<WorkerRow>().enumerate() {
        let row = row.map_err(DataLoadError::csv(path))?;
        if row.id.is_empty() {
            return Err(DataLoadError::InvalidRow {
                file: path.to_path_buf(),
                line: line_of(i),
                detail: "empty worker id".to_string(),
            });
        }
        workers.push(Worker::new(row.id));
    }
    debug!(file = %path.display(), workers = workers.len(), "roster loaded");
    Ok(workers)
}

// ---------------------------------------------------------------------------
// Arrival tables
// ---------------------------------------------------------------------------

/// Column holding the entity type of an arrival row.
pub const ENTITY_TYPE_COLUMN: &str = "entity_type";

/// Read an arrival table. The first column is the arrival time, whatever its
/// name. An `entity_type` column sets the type; every other non-empty cell
/// becomes a numeric attribute named after its column.
pub fn load_arrival_table_csv(path: &Path) -> Result<Vec<ArrivalRow>, DataLoadError> {
    let mut reader = open(path)?;
    let headers = reader.headers().map_err(DataLoadError::csv(path))?.clone();
    if headers.is_empty() {
        return Err(DataLoadError::InvalidRow {
            file: path.to_path_buf(),
            line: 1,
            detail: "arrival table has no columns".to_string(),
        });
    }

    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record.map_err(DataLoadError::csv(path))?;
        let invalid = |detail: String| DataLoadError::InvalidRow {
            file: path.to_path_buf(),
            line: line_of(i),
            detail,
        };
        let time_cell = record.get(0).unwrap_or_default();
        let time: f64 = time_cell
            .parse()
            .map_err(|_| invalid(format!("arrival time '{time_cell}' is not a number")))?;
        if !time.is_finite() || time < 0.0 {
            return Err(invalid(format!("arrival time {time} is negative or not finite")));
        }

        let mut row = ArrivalRow::at(time);
        let mut attributes = BTreeMap::new();
        for (column, cell) in headers.iter().zip(record.iter()).skip(1) {
            if cell.is_empty() {
                continue;
            }
            if column == ENTITY_TYPE_COLUMN {
                row = row.of_type(cell);
            } else {
                let value: f64 = cell
                    .parse()
                    .map_err(|_| invalid(format!("attribute {column} = '{cell}' is not a number")))?;
                attributes.insert(column.to_string(), value);
            }
        }
        row.attributes = attributes;
        rows.push(row);
    }
    rows.sort_by(|a, b| a.time.total_cmp(&b.time));
    debug!(file = %path.display(), rows = rows.len(), "arrival table loaded");
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Sequence tables
// ---------------------------------------------------------------------------

/// Read the destinations of a sequence-routing table from `column`.
pub fn load_sequence_table_csv(path: &Path, column: &str) -> Result<SequenceTable, DataLoadError> {
    let mut reader = open(path)?;
    let headers = reader.headers().map_err(DataLoadError::csv(path))?.clone();
    let index = headers
        .iter()
        .position(|h| h == column)
        .ok_or_else(|| DataLoadError::InvalidRow {
            file: path.to_path_buf(),
            line: 1,
            detail: format!("no column named '{column}'"),
        })?;

    let mut destinations = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record.map_err(DataLoadError::csv(path))?;
        match record.get(index) {
            Some(dest) if !dest.is_empty() => destinations.push(dest.to_string()),
            _ => {
                return Err(DataLoadError::InvalidRow {
                    file: path.to_path_buf(),
                    line: line_of(i),
                    detail: format!("empty '{column}' cell"),
                });
            }
        }
    }
    Ok(SequenceTable::new(destinations))
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Write `Type,Name,Stat,Average,Minimum,Maximum` rows.
pub fn write_pivot_csv(path: &Path, table: &PivotTable) -> Result<(), DataLoadError> {
    let mut writer = csv::Writer::from_path(path).map_err(DataLoadError::csv(path))?;
    for row in table.to_rows() {
        writer.serialize(&row).map_err(DataLoadError::csv(path))?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use procflow_stats::{RowType, StatKey};
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    // -----------------------------------------------------------------------
    // Schedules
    // -----------------------------------------------------------------------

    #[test]
    fn schedule_rows_fill_their_days() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "schedule.csv",
            "day,start_hour,start_minute,end_hour,end_minute,capacity\n\
             Monday,8,0,12,0,2\n\
             Monday,13,0,17,30,1\n\
             fri, 6, 0, 14, 0, 3\n",
        );
        let days = load_schedule_csv(&path).unwrap();
        assert_eq!(days[Weekday::Monday.index()].shifts().len(), 2);
        assert_eq!(days[Weekday::Monday.index()].shifts()[1].end_minute, 17 * 60 + 30);
        assert_eq!(days[Weekday::Friday.index()].shifts()[0].capacity, 3);
        assert!(days[Weekday::Sunday.index()].shifts().is_empty());
    }

    #[test]
    fn schedule_errors_carry_the_line() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "schedule.csv",
            "day,start_hour,start_minute,end_hour,end_minute,capacity\n\
             Monday,8,0,12,0,2\n\
             Funday,8,0,12,0,2\n",
        );
        match load_schedule_csv(&path) {
            Err(DataLoadError::InvalidRow { line, detail, .. }) => {
                assert_eq!(line, 3);
                assert!(detail.contains("Funday"));
            }
            other => panic!("expected invalid row, got {other:?}"),
        }

        let path = write(
            &dir,
            "backwards.csv",
            "day,start_hour,start_minute,end_hour,end_minute,capacity\n\
             Tuesday,12,0,8,0,1\n",
        );
        assert!(matches!(
            load_schedule_csv(&path),
            Err(DataLoadError::InvalidRow { line: 2, .. })
        ));
    }

    #[test]
    fn schedule_missing_column_is_a_csv_error() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "schedule.csv", "day,start_hour\nMonday,8\n");
        assert!(matches!(load_schedule_csv(&path), Err(DataLoadError::Csv { .. })));
    }

    // -----------------------------------------------------------------------
    // Rosters
    // -----------------------------------------------------------------------

    #[test]
    fn roster_ids_in_file_order() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "workers.csv", "id\nW-07\nW-02\nW-11\n");
        let workers = load_workers_csv(&path).unwrap();
        let ids: Vec<&str> = workers.iter().map(|w| w.id.as_str()).collect();
        assert_eq!(ids, ["W-07", "W-02", "W-11"]);
        assert!(workers.iter().all(|w| w.allocations == 0));
    }

    #[test]
    fn roster_rejects_blank_id() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "workers.csv", "id\nW-1\n\"\"\n");
        assert!(matches!(
            load_workers_csv(&path),
            Err(DataLoadError::InvalidRow { line: 3, .. })
        ));
    }

    // -----------------------------------------------------------------------
    // Arrival tables
    // -----------------------------------------------------------------------

    #[test]
    fn arrival_table_types_and_attributes() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "arrivals.csv",
            "arrival,entity_type,priority\n\
             30,Rush,2\n\
             0,,\n\
             12.5,Standard,1\n",
        );
        let rows = load_arrival_table_csv(&path).unwrap();
        let times: Vec<f64> = rows.iter().map(|r| r.time).collect();
        assert_eq!(times, [0.0, 12.5, 30.0]);
        assert_eq!(rows[0].entity_type, None);
        assert!(rows[0].attributes.is_empty());
        assert_eq!(rows[2].entity_type.as_deref(), Some("Rush"));
        assert_eq!(rows[2].attributes.get("priority"), Some(&2.0));
    }

    #[test]
    fn arrival_table_rejects_bad_times() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "arrivals.csv", "time\n5\nsoon\n");
        assert!(matches!(
            load_arrival_table_csv(&path),
            Err(DataLoadError::InvalidRow { line: 3, .. })
        ));
        let path = write(&dir, "negative.csv", "time\n-1\n");
        assert!(load_arrival_table_csv(&path).is_err());
    }

    // -----------------------------------------------------------------------
    // Sequence tables
    // -----------------------------------------------------------------------

    #[test]
    fn sequence_table_from_named_column() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "routing.csv", "step,destination\n0,Lathe\n1,Mill\n2,Done\n");
        let table = load_sequence_table_csv(&path, "destination").unwrap();
        assert_eq!(table.iter().collect::<Vec<_>>(), ["Lathe", "Mill", "Done"]);

        assert!(matches!(
            load_sequence_table_csv(&path, "target"),
            Err(DataLoadError::InvalidRow { line: 1, .. })
        ));
    }

    // -----------------------------------------------------------------------
    // Pivot output
    // -----------------------------------------------------------------------

    #[test]
    fn pivot_csv_has_header_and_rows() {
        let dir = TempDir::new().unwrap();
        let mut table = PivotTable::new();
        table.record(StatKey::new(RowType::Entity, "Entity", "NumberCreated"), 10.0);
        table.record(StatKey::new(RowType::Entity, "Entity", "NumberCreated"), 14.0);
        let path = dir.path().join("pivot.csv");
        write_pivot_csv(&path, &table).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        assert_eq!(lines.next(), Some("Type,Name,Stat,Average,Minimum,Maximum"));
        assert_eq!(lines.next(), Some("Entity,Entity,NumberCreated,12.0,10.0,14.0"));
        assert_eq!(lines.next(), None);
    }
}
