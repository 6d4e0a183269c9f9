//! Columnar snapshot tables.
//!
//! A table is a header record followed by one record per row, comma
//! delimited, with standard CSV quoting, gzip compressed as a whole. Writes
//! go to a temporary file in the target directory which is then renamed over
//! the target, so a failed write never leaves a truncated table behind.

use crate::error::{CodecError, StorageError, StorageResult};
use chrono::{DateTime, SecondsFormat, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use sandbox_core::{
    BaselineRow, DeltaKind, DeltaPayload, DeltaRow, DeltaShape, PlayerKey, Position, RowContext, SnapshotId,
};
use std::borrow::Cow;
use std::fs::{self, File};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tempfile::NamedTempFile;
use tracing::debug;

/// Baseline table columns
pub const BASELINE_HEADER: [&str; 13] = [
    "version",
    "snapshot_id",
    "player_key",
    "character_name",
    "platform_id",
    "zone_id",
    "captured_utc",
    "row_type",
    "component_type",
    "assembly_qualified_type",
    "existed",
    "payload_base64",
    "payload_hash",
];

/// Delta table columns
pub const DELTA_HEADER: [&str; 21] = [
    "version",
    "snapshot_id",
    "player_key",
    "character_name",
    "platform_id",
    "zone_id",
    "captured_utc",
    "row_type",
    "operation",
    "component_type",
    "before_payload_base64",
    "after_payload_base64",
    "tech_guid",
    "tech_name",
    "entity_index",
    "entity_version",
    "prefab_guid",
    "prefab_name",
    "pos_x",
    "pos_y",
    "pos_z",
];

/// A row type with a fixed column layout
pub trait Columnar: Sized {
    /// Column names, in order
    const HEADER: &'static [&'static str];

    /// Render one record
    ///
    /// # Errors
    ///
    /// Returns error if the row cannot be represented in the table
    fn to_fields(&self, record: usize) -> Result<Vec<String>, CodecError>;

    /// Parse one record; `fields` has exactly `HEADER.len()` entries
    ///
    /// # Errors
    ///
    /// Returns error if any field is malformed
    fn from_fields(fields: &[String], record: usize) -> Result<Self, CodecError>;
}

impl Columnar for BaselineRow {
    const HEADER: &'static [&'static str] = &BASELINE_HEADER;

    fn to_fields(&self, _record: usize) -> Result<Vec<String>, CodecError> {
        let mut fields = context_fields(&self.context);
        fields.extend([
            self.row_type.clone(),
            self.component_type.clone(),
            self.qualified_type.clone(),
            self.existed.to_string(),
            self.payload_base64.clone(),
            self.payload_hash.clone(),
        ]);
        Ok(fields)
    }

    fn from_fields(fields: &[String], record: usize) -> Result<Self, CodecError> {
        Ok(Self {
            context: parse_context(fields, record)?,
            row_type: fields[7].clone(),
            component_type: fields[8].clone(),
            qualified_type: fields[9].clone(),
            existed: parse_bool(&fields[10], "existed", record)?,
            payload_base64: fields[11].clone(),
            payload_hash: fields[12].clone(),
        })
    }
}

impl Columnar for DeltaRow {
    const HEADER: &'static [&'static str] = &DELTA_HEADER;

    fn to_fields(&self, record: usize) -> Result<Vec<String>, CodecError> {
        self.validate().map_err(|e| CodecError::InvalidRow {
            record,
            reason: e.to_string(),
        })?;

        let mut fields = context_fields(&self.context);
        fields.extend([self.kind.as_str().to_string(), self.operation.clone()]);

        let mut component = [String::new(), String::new(), String::new()];
        let mut tech = [String::new(), String::new()];
        let mut entity = [String::new(), String::new(), String::new(), String::new()];
        match &self.payload {
            DeltaPayload::Component {
                component_type,
                before_payload_base64,
                after_payload_base64,
            } => {
                component = [
                    component_type.clone(),
                    before_payload_base64.clone(),
                    after_payload_base64.clone(),
                ];
            }
            DeltaPayload::Tech { tech_id, tech_name } => {
                tech = [tech_id.to_string(), tech_name.clone()];
            }
            DeltaPayload::Entity {
                entity_index,
                entity_version,
                prefab_id,
                prefab_name,
            } => {
                entity = [
                    entity_index.to_string(),
                    entity_version.to_string(),
                    prefab_id.to_string(),
                    prefab_name.clone(),
                ];
            }
        }
        fields.extend(component);
        fields.extend(tech);
        fields.extend(entity);

        match self.position {
            Some(position) => fields.extend([
                position.x.to_string(),
                position.y.to_string(),
                position.z.to_string(),
            ]),
            None => fields.extend([String::new(), String::new(), String::new()]),
        }

        Ok(fields)
    }

    fn from_fields(fields: &[String], record: usize) -> Result<Self, CodecError> {
        let context = parse_context(fields, record)?;
        let kind = DeltaKind::parse(&fields[7]);

        let shape = kind.shape().unwrap_or_else(|| {
            if !fields[12].is_empty() {
                DeltaShape::Tech
            } else if !fields[14].is_empty() {
                DeltaShape::Entity
            } else {
                DeltaShape::Component
            }
        });

        let payload = match shape {
            DeltaShape::Component => DeltaPayload::Component {
                component_type: fields[9].clone(),
                before_payload_base64: fields[10].clone(),
                after_payload_base64: fields[11].clone(),
            },
            DeltaShape::Tech => DeltaPayload::Tech {
                tech_id: parse_field(&fields[12], "tech_guid", record)?,
                tech_name: fields[13].clone(),
            },
            DeltaShape::Entity => DeltaPayload::Entity {
                entity_index: parse_field(&fields[14], "entity_index", record)?,
                entity_version: parse_field(&fields[15], "entity_version", record)?,
                prefab_id: parse_field(&fields[16], "prefab_guid", record)?,
                prefab_name: fields[17].clone(),
            },
        };

        let position = match (
            parse_optional::<f32>(&fields[18], "pos_x", record)?,
            parse_optional::<f32>(&fields[19], "pos_y", record)?,
            parse_optional::<f32>(&fields[20], "pos_z", record)?,
        ) {
            (Some(x), Some(y), Some(z)) => Some(Position::new(x, y, z)),
            (None, None, None) => None,
            _ => {
                return Err(CodecError::InvalidRow {
                    record,
                    reason: "partial position".to_string(),
                });
            }
        };

        Ok(Self {
            context,
            kind,
            operation: fields[8].clone(),
            payload,
            position,
        })
    }
}

/// Render rows as table text
///
/// # Errors
///
/// Returns error if a row cannot be represented in the table
pub fn encode_table<R: Columnar>(rows: &[R]) -> Result<String, CodecError> {
    let mut out = String::new();
    push_record(&mut out, R::HEADER.iter().copied());
    for (i, row) in rows.iter().enumerate() {
        let fields = row.to_fields(i + 2)?;
        push_record(&mut out, fields.iter().map(String::as_str));
    }
    Ok(out)
}

/// Parse table text
///
/// Blank lines are ignored. Both `\n` and `\r\n` end a record.
///
/// # Errors
///
/// Returns error if the header differs, a record has the wrong number of
/// columns, or any field is malformed
pub fn decode_table<R: Columnar>(text: &str) -> Result<Vec<R>, CodecError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut records = parse_records(text)?
        .into_iter()
        .enumerate()
        .map(|(i, fields)| (i + 1, fields))
        .filter(|(_, fields)| !(fields.len() == 1 && fields[0].is_empty()));

    let (_, header) = records.next().ok_or(CodecError::MissingHeader)?;
    if header.iter().map(String::as_str).ne(R::HEADER.iter().copied()) {
        return Err(CodecError::HeaderMismatch {
            expected: R::HEADER.join(","),
            found: header.join(","),
        });
    }

    records
        .map(|(record, fields)| {
            if fields.len() != R::HEADER.len() {
                return Err(CodecError::ColumnCount {
                    record,
                    expected: R::HEADER.len(),
                    found: fields.len(),
                });
            }
            R::from_fields(&fields, record)
        })
        .collect()
}

/// A table encoded into a temporary file beside its target
///
/// Nothing at the target path changes until [`StagedTable::commit`]. Dropping
/// an uncommitted table deletes the temporary file.
#[derive(Debug)]
pub struct StagedTable {
    temp: NamedTempFile,
    path: PathBuf,
    rows: usize,
}

impl StagedTable {
    /// Target path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rename the temporary file over the target
    ///
    /// # Errors
    ///
    /// Returns error if the rename fails
    pub fn commit(self) -> StorageResult<()> {
        let Self { temp, path, rows } = self;
        temp.persist(&path).map_err(|e| StorageError::io(&path, e.error))?;
        debug!(path = %path.display(), rows, "Table written");
        Ok(())
    }
}

/// Encode and compress a table into a temporary file next to `path`
///
/// The parent directory is created if missing.
///
/// # Errors
///
/// Returns error if a row cannot be encoded or any filesystem step fails
pub fn stage_table<R: Columnar>(path: &Path, rows: &[R], level: Compression) -> StorageResult<StagedTable> {
    let text = encode_table(rows)?;

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).map_err(|e| StorageError::io(&dir, e))?;

    let temp = NamedTempFile::new_in(&dir).map_err(|e| StorageError::io(&dir, e))?;
    let mut encoder = GzEncoder::new(temp, level);
    encoder
        .write_all(text.as_bytes())
        .map_err(|e| StorageError::io(path, e))?;
    let temp = encoder.finish().map_err(|e| StorageError::io(path, e))?;
    temp.as_file().sync_all().map_err(|e| StorageError::io(path, e))?;

    Ok(StagedTable {
        temp,
        path: path.to_path_buf(),
        rows: rows.len(),
    })
}

/// Write a compressed table atomically
///
/// The parent directory is created if missing.
///
/// # Errors
///
/// Returns error if a row cannot be encoded or any filesystem step fails
pub fn write_table<R: Columnar>(path: &Path, rows: &[R], level: Compression) -> StorageResult<()> {
    stage_table(path, rows, level)?.commit()
}

/// Read a compressed table
///
/// # Errors
///
/// Returns error if the file cannot be read or the table is malformed
pub fn read_table<R: Columnar>(path: &Path) -> StorageResult<Vec<R>> {
    let file = File::open(path).map_err(|e| StorageError::io(path, e))?;
    let mut text = String::new();
    GzDecoder::new(BufReader::new(file))
        .read_to_string(&mut text)
        .map_err(|e| StorageError::io(path, e))?;

    let rows = decode_table(&text)?;
    debug!(path = %path.display(), rows = rows.len(), "Table read");
    Ok(rows)
}

/// Write a baseline table with default compression
///
/// # Errors
///
/// Returns error if any filesystem step fails
pub fn write_baseline(path: &Path, rows: &[BaselineRow]) -> StorageResult<()> {
    write_table(path, rows, Compression::default())
}

/// Write a delta table with default compression
///
/// # Errors
///
/// Returns error if a row mixes payload shapes or any filesystem step fails
pub fn write_delta(path: &Path, rows: &[DeltaRow]) -> StorageResult<()> {
    write_table(path, rows, Compression::default())
}

/// Read a baseline table
///
/// # Errors
///
/// Returns error if the file cannot be read or the table is malformed
pub fn read_baseline(path: &Path) -> StorageResult<Vec<BaselineRow>> {
    read_table(path)
}

/// Read a delta table
///
/// # Errors
///
/// Returns error if the file cannot be read or the table is malformed
pub fn read_delta(path: &Path) -> StorageResult<Vec<DeltaRow>> {
    read_table(path)
}

fn context_fields(context: &RowContext) -> Vec<String> {
    vec![
        context.version.to_string(),
        context.snapshot_id.to_string(),
        context.player_key.to_string(),
        context.character_name.clone(),
        context.platform_id.to_string(),
        context.zone_id.clone(),
        context.captured_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
    ]
}

fn parse_context(fields: &[String], record: usize) -> Result<RowContext, CodecError> {
    Ok(RowContext {
        version: parse_field(&fields[0], "version", record)?,
        snapshot_id: SnapshotId::from_raw(fields[1].clone()),
        player_key: PlayerKey::from_raw(fields[2].clone()),
        character_name: fields[3].clone(),
        platform_id: parse_field(&fields[4], "platform_id", record)?,
        zone_id: fields[5].clone(),
        captured_at: parse_timestamp(&fields[6], "captured_utc", record)?,
    })
}

fn parse_field<T: FromStr>(value: &str, column: &'static str, record: usize) -> Result<T, CodecError> {
    value.parse().map_err(|_| CodecError::InvalidField {
        record,
        column,
        value: value.to_string(),
    })
}

fn parse_optional<T: FromStr>(value: &str, column: &'static str, record: usize) -> Result<Option<T>, CodecError> {
    if value.is_empty() {
        return Ok(None);
    }
    parse_field(value, column, record).map(Some)
}

fn parse_bool(value: &str, column: &'static str, record: usize) -> Result<bool, CodecError> {
    if value.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if value.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err(CodecError::InvalidField {
            record,
            column,
            value: value.to_string(),
        })
    }
}

fn parse_timestamp(value: &str, column: &'static str, record: usize) -> Result<DateTime<Utc>, CodecError> {
    DateTime::parse_from_rfc3339(value)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|_| CodecError::InvalidField {
            record,
            column,
            value: value.to_string(),
        })
}

fn escape_field(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\r', '\n']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

fn push_record<'a>(out: &mut String, fields: impl IntoIterator<Item = &'a str>) {
    for (i, field) in fields.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&escape_field(field));
    }
    out.push('\n');
}

fn parse_records(text: &str) -> Result<Vec<Vec<String>>, CodecError> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if quoted {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    quoted = false;
                }
            } else {
                field.push(c);
            }
            continue;
        }

        match c {
            '"' if field.is_empty() => quoted = true,
            ',' => record.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            _ => field.push(c),
        }
    }

    if quoted {
        return Err(CodecError::UnterminatedQuote {
            record: records.len() + 1,
        });
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use sandbox_core::{EntityEntry, PlayerIdentity, SnapshotHeader};

    fn context() -> RowContext {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap() + chrono::Duration::nanoseconds(123_456_789);
        SnapshotHeader::new(&PlayerIdentity::new("Alice", 42), "zone-a", at).row_context()
    }

    fn baseline_rows() -> Vec<BaselineRow> {
        vec![
            BaselineRow::component(context(), "Game.Research.TechState, Game.Core", true, b"{\"guid\":123}"),
            BaselineRow::component(context(), "Game.Buffs.Shield", false, &[]),
        ]
    }

    fn delta_rows() -> Vec<DeltaRow> {
        vec![
            DeltaRow::component(DeltaKind::ComponentChanged, "TechState", "YQ==", "Yg==").with_context(context()),
            DeltaRow::tech_opened(2002, "Iron, \"Smelting\"").with_context(context()),
            DeltaRow::entity(
                DeltaKind::EntityCreated,
                &EntityEntry::new(7, 2, -55, "Chest").at(Position::new(1.5, -0.25, 1e-7)),
            )
            .with_context(context()),
            DeltaRow::entity(DeltaKind::EntityRemoved, &EntityEntry::new(8, 1, 10, "Torch")).with_context(context()),
        ]
    }

    #[test]
    fn test_header_lines() {
        let text = encode_table::<BaselineRow>(&[]).unwrap();
        assert_eq!(
            text,
            "version,snapshot_id,player_key,character_name,platform_id,zone_id,captured_utc,row_type,\
             component_type,assembly_qualified_type,existed,payload_base64,payload_hash\n"
        );
        let text = encode_table::<DeltaRow>(&[]).unwrap();
        assert!(text.starts_with("version,snapshot_id,player_key,"));
        assert!(text.ends_with(",prefab_guid,prefab_name,pos_x,pos_y,pos_z\n"));
    }

    #[test]
    fn test_baseline_record_layout() {
        let text = encode_table(&baseline_rows()[..1]).unwrap();
        let line = text.lines().nth(1).unwrap();
        assert!(line.starts_with("1,20240501123000123_Alice_42,Alice|42,Alice,42,zone-a,2024-05-01T12:30:00.123456789Z,"));
        assert!(line.contains(",component,TechState,\"Game.Research.TechState, Game.Core\",true,eyJndWlkIjoxMjN9,"));
    }

    #[test]
    fn test_escape_field() {
        assert_eq!(escape_field("plain"), "plain");
        assert_eq!(escape_field("a,b"), "\"a,b\"");
        assert_eq!(escape_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(escape_field("two\nlines"), "\"two\nlines\"");
        assert_eq!(escape_field("cr\r"), "\"cr\r\"");
    }

    #[test]
    fn test_quoted_newline_survives() {
        let mut rows = baseline_rows();
        rows[0].context.character_name = "Line one\r\nLine, \"two\"".to_string();
        let decoded: Vec<BaselineRow> = decode_table(&encode_table(&rows).unwrap()).unwrap();
        assert_eq!(decoded, rows);
    }

    #[test]
    fn test_crlf_records() {
        let text = encode_table(&baseline_rows()).unwrap().replace('\n', "\r\n");
        let decoded: Vec<BaselineRow> = decode_table(&text).unwrap();
        assert_eq!(decoded, baseline_rows());
    }

    #[test]
    fn test_delta_rows_round_trip() {
        let decoded: Vec<DeltaRow> = decode_table(&encode_table(&delta_rows()).unwrap()).unwrap();
        assert_eq!(decoded, delta_rows());
    }

    #[test]
    fn test_absent_optional_columns_are_empty() {
        let text = encode_table(&delta_rows()[1..2]).unwrap();
        let line = text.lines().nth(1).unwrap();
        assert!(line.ends_with(",tech_opened,opened,,,,2002,\"Iron, \"\"Smelting\"\"\",,,,,,,"));
    }

    #[test]
    fn test_missing_header() {
        assert_eq!(decode_table::<BaselineRow>("").unwrap_err(), CodecError::MissingHeader);
        assert_eq!(decode_table::<BaselineRow>("\n\n").unwrap_err(), CodecError::MissingHeader);
    }

    #[test]
    fn test_header_mismatch() {
        let text = encode_table::<BaselineRow>(&[]).unwrap();
        let err = decode_table::<DeltaRow>(&text).unwrap_err();
        assert!(matches!(err, CodecError::HeaderMismatch { .. }));
    }

    #[test]
    fn test_column_count_mismatch() {
        let mut text = encode_table(&baseline_rows()).unwrap();
        text.push_str("1,only,three\n");
        let err = decode_table::<BaselineRow>(&text).unwrap_err();
        assert_eq!(
            err,
            CodecError::ColumnCount {
                record: 4,
                expected: 13,
                found: 3,
            }
        );
    }

    #[test]
    fn test_invalid_fields_are_errors() {
        let text = encode_table(&baseline_rows()[..1]).unwrap();

        let bad_bool = text.replace(",true,", ",yes,");
        assert!(matches!(
            decode_table::<BaselineRow>(&bad_bool).unwrap_err(),
            CodecError::InvalidField { record: 2, column: "existed", .. }
        ));

        let bad_time = text.replace("2024-05-01T12:30:00.123456789Z", "yesterday");
        assert!(matches!(
            decode_table::<BaselineRow>(&bad_time).unwrap_err(),
            CodecError::InvalidField { column: "captured_utc", .. }
        ));

        let bad_platform = text.replace(",Alice,42,", ",Alice,forty-two,");
        assert!(matches!(
            decode_table::<BaselineRow>(&bad_platform).unwrap_err(),
            CodecError::InvalidField { column: "platform_id", .. }
        ));
    }

    #[test]
    fn test_boolean_case_insensitive() {
        let text = encode_table(&baseline_rows()[..1]).unwrap().replace(",true,", ",True,");
        let decoded: Vec<BaselineRow> = decode_table(&text).unwrap();
        assert!(decoded[0].existed);
    }

    #[test]
    fn test_unterminated_quote() {
        let mut text = encode_table::<BaselineRow>(&[]).unwrap();
        text.push_str("1,\"open");
        assert_eq!(
            decode_table::<BaselineRow>(&text).unwrap_err(),
            CodecError::UnterminatedQuote { record: 2 }
        );
    }

    #[test]
    fn test_partial_position_rejected() {
        let text = encode_table(&delta_rows()[2..3]).unwrap();
        let broken = text.replacen(",1.5,", ",,", 1);
        assert!(matches!(
            decode_table::<DeltaRow>(&broken).unwrap_err(),
            CodecError::InvalidRow { record: 2, .. }
        ));
    }

    #[test]
    fn test_mixed_shape_rejected_on_write() {
        let row = DeltaRow::new(
            DeltaKind::EntityCreated,
            DeltaPayload::Tech {
                tech_id: 1,
                tech_name: String::new(),
            },
        );
        assert!(matches!(
            encode_table(&[row]).unwrap_err(),
            CodecError::InvalidRow { record: 2, .. }
        ));
    }

    #[test]
    fn test_detector_kind_shape_inferred() {
        let rows = vec![
            DeltaRow::new(
                DeltaKind::Other("recipe_learned".to_string()),
                DeltaPayload::Tech {
                    tech_id: 4,
                    tech_name: "Stew".to_string(),
                },
            ),
            DeltaRow::new(
                DeltaKind::Other("waypoint_found".to_string()),
                DeltaPayload::Entity {
                    entity_index: 3,
                    entity_version: 1,
                    prefab_id: 9,
                    prefab_name: "Waypoint".to_string(),
                },
            ),
        ];
        let decoded: Vec<DeltaRow> = decode_table(&encode_table(&rows).unwrap()).unwrap();
        assert_eq!(decoded, rows);
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let baseline_path = dir.path().join("nested").join("baseline.csv.gz");
        let delta_path = dir.path().join("nested").join("delta.csv.gz");

        write_baseline(&baseline_path, &baseline_rows()).unwrap();
        write_delta(&delta_path, &delta_rows()).unwrap();

        assert_eq!(read_baseline(&baseline_path).unwrap(), baseline_rows());
        assert_eq!(read_delta(&delta_path).unwrap(), delta_rows());

        let leftovers: Vec<_> = fs::read_dir(dir.path().join("nested")).unwrap().collect();
        assert_eq!(leftovers.len(), 2);
    }

    #[test]
    fn test_file_is_gzip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("baseline.csv.gz");
        write_baseline(&path, &baseline_rows()).unwrap();
        let bytes = fs::read(&path).unwrap();
        assert_eq!(&bytes[..2], &[0x1f, 0x8b]);
    }

    #[test]
    fn test_zero_rows_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.csv.gz");
        write_delta(&path, &[]).unwrap();
        assert!(read_delta(&path).unwrap().is_empty());
    }

    #[test]
    fn test_overwrite_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("baseline.csv.gz");
        write_baseline(&path, &baseline_rows()).unwrap();
        write_baseline(&path, &baseline_rows()[..1]).unwrap();
        assert_eq!(read_baseline(&path).unwrap().len(), 1);
    }

    #[test]
    fn test_failed_write_keeps_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("delta.csv.gz");
        write_delta(&path, &delta_rows()).unwrap();

        let bad = DeltaRow::new(
            DeltaKind::TechOpened,
            DeltaPayload::Component {
                component_type: String::new(),
                before_payload_base64: String::new(),
                after_payload_base64: String::new(),
            },
        );
        assert!(write_delta(&path, &[bad]).is_err());
        assert_eq!(read_delta(&path).unwrap(), delta_rows());
    }

    #[test]
    fn test_staged_table_leaves_target_until_commit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("baseline.csv.gz");
        write_baseline(&path, &baseline_rows()[..1]).unwrap();

        let staged = stage_table(&path, &baseline_rows(), Compression::default()).unwrap();
        assert_eq!(staged.path(), path.as_path());
        assert_eq!(read_baseline(&path).unwrap().len(), 1);

        staged.commit().unwrap();
        assert_eq!(read_baseline(&path).unwrap(), baseline_rows());
    }

    #[test]
    fn test_dropped_stage_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("baseline.csv.gz");
        drop(stage_table(&path, &baseline_rows(), Compression::default()).unwrap());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_baseline(&dir.path().join("absent.csv.gz")).unwrap_err();
        assert!(matches!(err, StorageError::Io { .. }));
    }

    fn text() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9 ,\"\r\n|_.:-]{0,16}"
    }

    fn arb_context() -> impl Strategy<Value = RowContext> {
        (
            any::<u32>(),
            text(),
            text(),
            text(),
            any::<u64>(),
            text(),
            0i64..4_102_444_800,
            0u32..1_000_000_000,
        )
            .prop_map(|(version, snapshot_id, player_key, character_name, platform_id, zone_id, secs, nanos)| {
                RowContext {
                    version,
                    snapshot_id: SnapshotId::from_raw(snapshot_id),
                    player_key: PlayerKey::from_raw(player_key),
                    character_name,
                    platform_id,
                    zone_id,
                    captured_at: Utc.timestamp_opt(secs, nanos).unwrap(),
                }
            })
    }

    fn arb_baseline() -> impl Strategy<Value = BaselineRow> {
        (arb_context(), text(), text(), text(), any::<bool>(), text(), text()).prop_map(
            |(context, row_type, component_type, qualified_type, existed, payload_base64, payload_hash)| BaselineRow {
                context,
                row_type,
                component_type,
                qualified_type,
                existed,
                payload_base64,
                payload_hash,
            },
        )
    }

    fn arb_position() -> impl Strategy<Value = Option<Position>> {
        proptest::option::of(
            (-1.0e6f32..1.0e6, -1.0e6f32..1.0e6, -1.0e6f32..1.0e6).prop_map(|(x, y, z)| Position::new(x, y, z)),
        )
    }

    fn arb_delta() -> impl Strategy<Value = DeltaRow> {
        let component = (
            prop_oneof![
                Just(DeltaKind::ComponentChanged),
                Just(DeltaKind::ComponentAdded),
                Just(DeltaKind::ComponentRemoved),
            ],
            text(),
            text(),
            text(),
        )
            .prop_map(|(kind, component_type, before, after)| {
                DeltaRow::component(kind, &component_type, &before, &after)
            });
        let entity = (
            prop_oneof![
                Just(DeltaKind::EntityCreated),
                Just(DeltaKind::EntityRemoved),
                Just(DeltaKind::EntityPrefabChanged),
            ],
            any::<u32>(),
            any::<u32>(),
            any::<i64>(),
            text(),
        )
            .prop_map(|(kind, index, version, prefab, name)| {
                DeltaRow::entity(kind, &EntityEntry::new(index, version, prefab, name))
            });
        let tech = (any::<i64>(), text()).prop_map(|(id, name)| DeltaRow::tech_opened(id, name));

        (prop_oneof![component, entity, tech], arb_context(), text(), arb_position()).prop_map(
            |(row, context, operation, position)| DeltaRow {
                operation,
                position,
                ..row.with_context(context)
            },
        )
    }

    proptest! {
        #[test]
        fn prop_baseline_table_round_trip(rows in proptest::collection::vec(arb_baseline(), 0..8)) {
            let decoded: Vec<BaselineRow> = decode_table(&encode_table(&rows).unwrap()).unwrap();
            prop_assert_eq!(decoded, rows);
        }

        #[test]
        fn prop_delta_table_round_trip(rows in proptest::collection::vec(arb_delta(), 0..8)) {
            let decoded: Vec<DeltaRow> = decode_table(&encode_table(&rows).unwrap()).unwrap();
            prop_assert_eq!(decoded, rows);
        }
    }
}
