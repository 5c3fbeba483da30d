//! CSV import and export of animal rosters

use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use shared::{validate_weight, AnimalStatus, Sex};

use crate::error::{AppError, AppResult};
use crate::middleware::AuthUser;
use crate::services::group::{ensure_group_access, ensure_group_admin};
use crate::services::tag::{find_or_create_tag, TagKind};

/// Serialize rows into a CSV document with a header line
pub fn write_csv<T: Serialize>(rows: &[T]) -> AppResult<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    for record in rows {
        wtr.serialize(record)
            .map_err(|e| AppError::Internal(format!("CSV serialization error: {}", e)))?;
    }
    let bytes = wtr
        .into_inner()
        .map_err(|e| AppError::Internal(format!("CSV writer error: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| AppError::Internal(format!("UTF-8 conversion error: {}", e)))
}

/// One line of the animal roster, as exported and as accepted on import
#[derive(Debug, Clone, Default, Serialize, Deserialize, FromRow)]
#[serde(default)]
pub struct AnimalCsvRow {
    pub id: Option<String>,
    pub name: Option<String>,
    pub species: Option<String>,
    pub breed: Option<String>,
    pub sex: Option<String>,
    pub birth_date: Option<String>,
    pub status: Option<String>,
    pub kennel: Option<String>,
    pub weight_lbs: Option<String>,
    /// Tag names separated by `;`
    pub tags: Option<String>,
    pub description: Option<String>,
}

/// A roster line after validation
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedAnimal {
    pub name: String,
    pub species: String,
    pub breed: Option<String>,
    pub sex: Sex,
    pub birth_date: Option<NaiveDate>,
    pub status: AnimalStatus,
    pub kennel: Option<String>,
    pub weight_lbs: Option<Decimal>,
    pub tags: Vec<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportError {
    /// Line number in the uploaded file, counting the header as line 1
    pub row: usize,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportSummary {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: Vec<ImportError>,
}

impl ImportSummary {
    fn skip(&mut self, row: usize, message: String) {
        self.skipped += 1;
        self.errors.push(ImportError { row, message });
    }
}

/// Parse an uploaded roster into valid rows, keyed by line number.
///
/// Invalid lines are already counted as skipped in the returned summary.
pub fn read_roster(bytes: &[u8]) -> AppResult<(Vec<(usize, ParsedAnimal)>, ImportSummary)> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(bytes);

    let headers = reader
        .headers()
        .map_err(|e| AppError::BadRequest(format!("Could not read CSV header: {}", e)))?;
    if !headers.iter().any(|h| h.eq_ignore_ascii_case("name")) {
        return Err(AppError::BadRequest("CSV must have a 'name' column".to_string()));
    }
    let lowered = headers.iter().map(str::to_lowercase).collect::<Vec<_>>();
    reader.set_headers(csv::StringRecord::from(lowered));

    let mut rows = Vec::new();
    let mut summary = ImportSummary::default();

    for (index, result) in reader.deserialize::<AnimalCsvRow>().enumerate() {
        let row_number = index + 2;
        match result.map_err(|e| e.to_string()).and_then(parse_row) {
            Ok(animal) => rows.push((row_number, animal)),
            Err(message) => summary.skip(row_number, message),
        }
    }

    Ok((rows, summary))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Validate one roster line
pub fn parse_row(row: AnimalCsvRow) -> Result<ParsedAnimal, String> {
    let name = non_empty(row.name).ok_or_else(|| "name is required".to_string())?;
    if name.chars().count() > 80 {
        return Err("name must be at most 80 characters".to_string());
    }

    let species = non_empty(row.species)
        .map(|s| s.to_lowercase())
        .unwrap_or_else(|| "dog".to_string());

    let sex = match non_empty(row.sex) {
        Some(sex) => Sex::from_str(&sex)?,
        None => Sex::Unknown,
    };

    let status = match non_empty(row.status) {
        Some(status) => AnimalStatus::from_str(&status)?,
        None => AnimalStatus::Available,
    };

    let birth_date = match non_empty(row.birth_date) {
        Some(date) => Some(
            NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                .map_err(|_| format!("birth_date '{}' is not YYYY-MM-DD", date))?,
        ),
        None => None,
    };

    let weight_lbs = match non_empty(row.weight_lbs) {
        Some(weight) => {
            let value = Decimal::from_str(&weight)
                .map_err(|_| format!("weight_lbs '{}' is not a number", weight))?;
            validate_weight(value).map_err(|e| format!("weight_lbs: {}", e))?;
            Some(value)
        }
        None => None,
    };

    let mut tags: Vec<String> = Vec::new();
    for tag in non_empty(row.tags).unwrap_or_default().split(';') {
        let tag = tag.trim();
        if !tag.is_empty() && !tags.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
            tags.push(tag.to_string());
        }
    }

    Ok(ParsedAnimal {
        name,
        species,
        breed: non_empty(row.breed),
        sex,
        birth_date,
        status,
        kennel: non_empty(row.kennel),
        weight_lbs,
        tags,
        description: non_empty(row.description),
    })
}

/// Roster import/export service
#[derive(Clone)]
pub struct CsvService {
    db: PgPool,
}

impl CsvService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn export_animals(&self, auth: &AuthUser, group_id: Uuid) -> AppResult<String> {
        ensure_group_access(&self.db, auth, group_id).await?;

        let rows = sqlx::query_as::<_, AnimalCsvRow>(
            r#"
            SELECT a.id::text AS id, a.name, a.species, a.breed, a.sex,
                   to_char(a.birth_date, 'YYYY-MM-DD') AS birth_date,
                   a.status, a.kennel, a.weight_lbs::text AS weight_lbs,
                   (SELECT string_agg(t.name, ';' ORDER BY t.name)
                    FROM animal_tag_assignments ata
                    JOIN animal_tags t ON t.id = ata.tag_id
                    WHERE ata.animal_id = a.id) AS tags,
                   a.description
            FROM animals a
            WHERE a.group_id = $1 AND a.deleted_at IS NULL
            ORDER BY a.name
            "#,
        )
        .bind(group_id)
        .fetch_all(&self.db)
        .await?;

        if rows.is_empty() {
            // Header only, so the file can still be used as an import template
            return write_csv(&[AnimalCsvRow::default()]).map(|csv| {
                csv.lines().next().map(|h| format!("{h}\n")).unwrap_or_default()
            });
        }
        write_csv(&rows)
    }

    /// Upsert animals by case-insensitive name within the group
    pub async fn import_animals(
        &self,
        auth: &AuthUser,
        group_id: Uuid,
        bytes: &[u8],
    ) -> AppResult<ImportSummary> {
        ensure_group_admin(&self.db, auth, group_id).await?;

        let (rows, mut summary) = read_roster(bytes)?;

        for (row_number, animal) in rows {
            match self.upsert_animal(group_id, &animal).await {
                Ok(true) => summary.created += 1,
                Ok(false) => summary.updated += 1,
                Err(e) => {
                    tracing::warn!(%group_id, row = row_number, error = %e, "Roster row not saved");
                    summary.skip(row_number, e.to_string());
                }
            }
        }
        summary.errors.sort_by_key(|e| e.row);

        tracing::info!(
            %group_id,
            created = summary.created,
            updated = summary.updated,
            skipped = summary.skipped,
            "Animal roster imported"
        );
        Ok(summary)
    }

    /// Returns true when a new animal was inserted
    async fn upsert_animal(&self, group_id: Uuid, animal: &ParsedAnimal) -> AppResult<bool> {
        let mut tx = self.db.begin().await?;

        let existing = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT id FROM animals
            WHERE group_id = $1 AND LOWER(name) = LOWER($2) AND deleted_at IS NULL
            ORDER BY created_at
            LIMIT 1
            "#,
        )
        .bind(group_id)
        .bind(&animal.name)
        .fetch_optional(&mut *tx)
        .await?;

        let (animal_id, created) = match existing {
            Some(id) => {
                sqlx::query(
                    r#"
                    UPDATE animals SET
                        name = $2, species = $3, breed = $4, sex = $5, birth_date = $6,
                        status = $7, kennel = $8, weight_lbs = $9, description = $10,
                        updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(id)
                .bind(&animal.name)
                .bind(&animal.species)
                .bind(&animal.breed)
                .bind(animal.sex.as_str())
                .bind(animal.birth_date)
                .bind(animal.status.as_str())
                .bind(&animal.kennel)
                .bind(animal.weight_lbs)
                .bind(&animal.description)
                .execute(&mut *tx)
                .await?;
                (id, false)
            }
            None => {
                let id = sqlx::query_scalar::<_, Uuid>(
                    r#"
                    INSERT INTO animals
                        (group_id, name, species, breed, sex, birth_date, status, kennel,
                         weight_lbs, description)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                    RETURNING id
                    "#,
                )
                .bind(group_id)
                .bind(&animal.name)
                .bind(&animal.species)
                .bind(&animal.breed)
                .bind(animal.sex.as_str())
                .bind(animal.birth_date)
                .bind(animal.status.as_str())
                .bind(&animal.kennel)
                .bind(animal.weight_lbs)
                .bind(&animal.description)
                .fetch_one(&mut *tx)
                .await?;
                (id, true)
            }
        };

        sqlx::query("DELETE FROM animal_tag_assignments WHERE animal_id = $1")
            .bind(animal_id)
            .execute(&mut *tx)
            .await?;

        for name in &animal.tags {
            let tag_id = find_or_create_tag(&mut *tx, TagKind::Animal, group_id, name, None).await?;
            sqlx::query(
                "INSERT INTO animal_tag_assignments (animal_id, tag_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )
            .bind(animal_id)
            .bind(tag_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(name: &str) -> AnimalCsvRow {
        AnimalCsvRow {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_row_defaults() {
        let parsed = parse_row(row("Biscuit")).unwrap();
        assert_eq!(parsed.name, "Biscuit");
        assert_eq!(parsed.species, "dog");
        assert_eq!(parsed.sex, Sex::Unknown);
        assert_eq!(parsed.status, AnimalStatus::Available);
        assert!(parsed.tags.is_empty());
    }

    #[test]
    fn test_parse_row_full() {
        let parsed = parse_row(AnimalCsvRow {
            name: Some(" Juniper ".to_string()),
            species: Some("Cat".to_string()),
            sex: Some("F".to_string()),
            birth_date: Some("2021-04-03".to_string()),
            status: Some("Behavior Hold".to_string()),
            weight_lbs: Some("9.5".to_string()),
            tags: Some("No Dogs; shy ;no dogs;".to_string()),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(parsed.name, "Juniper");
        assert_eq!(parsed.species, "cat");
        assert_eq!(parsed.sex, Sex::Female);
        assert_eq!(parsed.birth_date, NaiveDate::from_ymd_opt(2021, 4, 3));
        assert_eq!(parsed.status, AnimalStatus::BehaviorHold);
        assert_eq!(parsed.weight_lbs, Some(Decimal::new(95, 1)));
        assert_eq!(parsed.tags, vec!["No Dogs".to_string(), "shy".to_string()]);
    }

    #[test]
    fn test_parse_row_rejects_bad_values() {
        assert!(parse_row(AnimalCsvRow::default()).is_err());

        let mut bad_date = row("Rex");
        bad_date.birth_date = Some("03/04/2021".to_string());
        assert!(parse_row(bad_date).unwrap_err().contains("birth_date"));

        let mut bad_weight = row("Rex");
        bad_weight.weight_lbs = Some("heavy".to_string());
        assert!(parse_row(bad_weight).unwrap_err().contains("weight_lbs"));

        let mut bad_status = row("Rex");
        bad_status.status = Some("lost".to_string());
        assert!(parse_row(bad_status).is_err());

        let mut too_heavy = row("Rex");
        too_heavy.weight_lbs = Some("100000".to_string());
        assert!(parse_row(too_heavy).unwrap_err().contains("weight_lbs"));
    }

    #[test]
    fn test_read_roster_requires_name_column() {
        assert!(matches!(
            read_roster(b"species,breed\ndog,lab\n"),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn test_write_csv_header_order() {
        let csv = write_csv(&[row("Biscuit")]).unwrap();
        let header = csv.lines().next().unwrap();
        assert_eq!(
            header,
            "id,name,species,breed,sex,birth_date,status,kennel,weight_lbs,tags,description"
        );
    }

    #[test]
    fn test_exported_csv_parses_back() {
        let exported = write_csv(&[AnimalCsvRow {
            id: Some(Uuid::new_v4().to_string()),
            name: Some("Pepper".to_string()),
            species: Some("dog".to_string()),
            sex: Some("male".to_string()),
            status: Some("foster".to_string()),
            weight_lbs: Some("48.20".to_string()),
            tags: Some("Dog Friendly;Kid Friendly".to_string()),
            description: Some("Loves fetch, hates baths".to_string()),
            ..Default::default()
        }])
        .unwrap();

        let (rows, summary) = read_roster(exported.as_bytes()).unwrap();
        assert_eq!(summary.skipped, 0);
        let (row_number, parsed) = &rows[0];
        assert_eq!(*row_number, 2);
        assert_eq!(parsed.status, AnimalStatus::Foster);
        assert_eq!(parsed.tags.len(), 2);
        assert_eq!(parsed.description.as_deref(), Some("Loves fetch, hates baths"));
    }
}
