use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};
use serde::Serialize;
use tracing::{debug, info};

use crate::db::now_timestamp;
use crate::errors::{AppError, AppResult};
use crate::model::{Coordinates, GeocodeCandidate};

const SELECT_RECORD: &str = "SELECT id, name, address, latitude, longitude, formatted_address,
        province, city, district, township, street, street_number, adcode, citycode,
        geocoding_status, geocoding_error, geocoding_updated_at
    FROM locations";

const UPSERT_RESOLVED: &str = "INSERT INTO locations (
        id, latitude, longitude, formatted_address, province, city, district, township,
        street, street_number, adcode, citycode, geocoding_status, geocoding_error,
        geocoding_updated_at
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
    ON CONFLICT(id) DO UPDATE SET
        latitude = excluded.latitude,
        longitude = excluded.longitude,
        formatted_address = excluded.formatted_address,
        province = excluded.province,
        city = excluded.city,
        district = excluded.district,
        township = excluded.township,
        street = excluded.street,
        street_number = excluded.street_number,
        adcode = excluded.adcode,
        citycode = excluded.citycode,
        geocoding_status = excluded.geocoding_status,
        geocoding_error = excluded.geocoding_error,
        geocoding_updated_at = excluded.geocoding_updated_at";

// Failed and re-queued records keep whatever coordinates they had.
const UPSERT_STATUS: &str = "INSERT INTO locations (
        id, geocoding_status, geocoding_error, geocoding_updated_at
    ) VALUES (?1, ?2, ?3, ?4)
    ON CONFLICT(id) DO UPDATE SET
        geocoding_status = excluded.geocoding_status,
        geocoding_error = excluded.geocoding_error,
        geocoding_updated_at = excluded.geocoding_updated_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GeocodingStatus {
    Pending,
    Success,
    Failed,
    Retry,
}

impl GeocodingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeocodingStatus::Pending => "pending",
            GeocodingStatus::Success => "success",
            GeocodingStatus::Failed => "failed",
            GeocodingStatus::Retry => "retry",
        }
    }

    pub fn parse(label: &str) -> Option<Self> {
        match label.trim() {
            "pending" => Some(GeocodingStatus::Pending),
            "success" => Some(GeocodingStatus::Success),
            "failed" => Some(GeocodingStatus::Failed),
            "retry" => Some(GeocodingStatus::Retry),
            _ => None,
        }
    }

    pub fn can_transition_to(self, next: GeocodingStatus) -> bool {
        use GeocodingStatus::*;
        matches!(
            (self, next),
            (Pending, Success)
                | (Pending, Failed)
                | (Failed, Retry)
                | (Success, Retry)
                | (Retry, Success)
                | (Retry, Failed)
        )
    }

    /// Awaiting a geocoding attempt.
    pub fn is_awaiting(self) -> bool {
        matches!(self, GeocodingStatus::Pending | GeocodingStatus::Retry)
    }
}

impl ToSql for GeocodingStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for GeocodingStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let label = value.as_str()?;
        GeocodingStatus::parse(label)
            .ok_or_else(|| FromSqlError::Other(format!("unknown geocoding status {label:?}").into()))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LocationRecord {
    pub id: String,
    pub name: String,
    pub address: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub formatted_address: Option<String>,
    pub province: Option<String>,
    pub city: Option<String>,
    pub district: Option<String>,
    pub township: Option<String>,
    pub street: Option<String>,
    pub street_number: Option<String>,
    pub adcode: Option<String>,
    pub citycode: Option<String>,
    pub geocoding_status: GeocodingStatus,
    pub geocoding_error: Option<String>,
    pub geocoding_updated_at: Option<String>,
}

impl LocationRecord {
    pub fn coordinates(&self) -> Option<Coordinates> {
        let coordinates = Coordinates {
            longitude: self.longitude?,
            latitude: self.latitude?,
        };
        coordinates.is_valid().then_some(coordinates)
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            address: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            latitude: row.get(3)?,
            longitude: row.get(4)?,
            formatted_address: row.get(5)?,
            province: row.get(6)?,
            city: row.get(7)?,
            district: row.get(8)?,
            township: row.get(9)?,
            street: row.get(10)?,
            street_number: row.get(11)?,
            adcode: row.get(12)?,
            citycode: row.get(13)?,
            geocoding_status: row.get(14)?,
            geocoding_error: row.get(15)?,
            geocoding_updated_at: row.get(16)?,
        })
    }
}

/// Fields written back to a location record after an attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationUpdate {
    pub status: GeocodingStatus,
    pub coordinates: Option<Coordinates>,
    pub formatted_address: Option<String>,
    pub province: Option<String>,
    pub city: Option<String>,
    pub district: Option<String>,
    pub township: Option<String>,
    pub street: Option<String>,
    pub street_number: Option<String>,
    pub adcode: Option<String>,
    pub citycode: Option<String>,
    pub error: Option<String>,
}

impl LocationUpdate {
    fn status_only(status: GeocodingStatus, error: Option<String>) -> Self {
        Self {
            status,
            coordinates: None,
            formatted_address: None,
            province: None,
            city: None,
            district: None,
            township: None,
            street: None,
            street_number: None,
            adcode: None,
            citycode: None,
            error,
        }
    }

    pub fn success(candidate: &GeocodeCandidate, coordinates: Coordinates) -> Self {
        Self {
            status: GeocodingStatus::Success,
            coordinates: Some(coordinates),
            formatted_address: candidate.formatted_address.clone(),
            province: candidate.province.clone(),
            city: candidate.city.clone(),
            district: candidate.district.clone(),
            township: candidate.township.clone(),
            street: candidate.street.clone(),
            street_number: candidate.street_number.clone(),
            adcode: candidate.adcode.clone(),
            citycode: candidate.citycode.clone(),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self::status_only(GeocodingStatus::Failed, Some(error.into()))
    }

    pub fn retry() -> Self {
        Self::status_only(GeocodingStatus::Retry, None)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GeocodingStats {
    pub total: usize,
    pub pending: usize,
    pub success: usize,
    pub failed: usize,
    pub retry: usize,
}

/// Only writer of geocoding fields on the `locations` table.
#[derive(Clone)]
pub struct LocationGateway {
    db: Arc<Mutex<Connection>>,
}

impl LocationGateway {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    pub fn upsert(&self, location_id: &str, update: &LocationUpdate) -> AppResult<()> {
        let conn = self.db.lock();
        apply_update(&conn, location_id, update, &now_timestamp())?;
        debug!(
            target: "locations",
            location_id,
            status = update.status.as_str(),
            "location geocoding updated"
        );
        Ok(())
    }

    /// Applies every update or none of them.
    pub fn batch_upsert(&self, records: &[(String, LocationUpdate)]) -> AppResult<usize> {
        let mut conn = self.db.lock();
        let tx = conn.transaction()?;
        let stamp = now_timestamp();
        for (location_id, update) in records {
            apply_update(&tx, location_id, update, &stamp)?;
        }
        tx.commit()?;
        info!(target: "locations", count = records.len(), "batch geocoding update committed");
        Ok(records.len())
    }

    pub fn create_pending(&self, name: &str, address: &str) -> AppResult<LocationRecord> {
        let id = format!("{:032x}", rand::random::<u128>());
        {
            let conn = self.db.lock();
            conn.execute(
                "INSERT INTO locations (id, name, address, geocoding_status) VALUES (?1, ?2, ?3, ?4)",
                params![id, name.trim(), address.trim(), GeocodingStatus::Pending],
            )?;
        }
        self.load(&id)?
            .ok_or_else(|| AppError::Persistence(format!("location {id} vanished after insert")))
    }

    pub fn load(&self, location_id: &str) -> AppResult<Option<LocationRecord>> {
        let conn = self.db.lock();
        let record = conn
            .query_row(
                &format!("{SELECT_RECORD} WHERE id = ?1"),
                [location_id],
                LocationRecord::from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Explicit re-queue of a failed or previously successful record.
    pub fn mark_retry(&self, location_id: &str) -> AppResult<()> {
        self.upsert(location_id, &LocationUpdate::retry())
    }

    /// Records still awaiting an attempt, oldest first.
    pub fn pending(&self, limit: usize) -> AppResult<Vec<LocationRecord>> {
        self.select_where(
            "geocoding_status IN ('pending', 'retry')",
            limit,
        )
    }

    pub fn failed(&self, limit: usize) -> AppResult<Vec<LocationRecord>> {
        self.select_where("geocoding_status = 'failed'", limit)
    }

    pub fn stats(&self) -> AppResult<GeocodingStats> {
        let conn = self.db.lock();
        let mut stmt =
            conn.prepare("SELECT geocoding_status, COUNT(*) FROM locations GROUP BY geocoding_status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, GeocodingStatus>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut stats = GeocodingStats::default();
        for row in rows {
            let (status, count) = row?;
            let count = count.max(0) as usize;
            stats.total += count;
            match status {
                GeocodingStatus::Pending => stats.pending += count,
                GeocodingStatus::Success => stats.success += count,
                GeocodingStatus::Failed => stats.failed += count,
                GeocodingStatus::Retry => stats.retry += count,
            }
        }
        Ok(stats)
    }

    fn select_where(&self, condition: &str, limit: usize) -> AppResult<Vec<LocationRecord>> {
        let conn = self.db.lock();
        // Insertion order; externally created tables need not carry a creation timestamp.
        let sql = format!("{SELECT_RECORD} WHERE {condition} ORDER BY rowid ASC LIMIT ?1");
        let mut stmt = conn.prepare(&sql)?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map([limit], LocationRecord::from_row)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }
}

fn apply_update(
    conn: &Connection,
    location_id: &str,
    update: &LocationUpdate,
    stamp: &str,
) -> AppResult<()> {
    let current: Option<GeocodingStatus> = conn
        .query_row(
            "SELECT geocoding_status FROM locations WHERE id = ?1",
            [location_id],
            |row| row.get(0),
        )
        .optional()?;
    let from = current.unwrap_or(GeocodingStatus::Pending);
    if !from.can_transition_to(update.status) {
        return Err(AppError::Persistence(format!(
            "location {location_id} cannot move from {} to {}",
            from.as_str(),
            update.status.as_str()
        )));
    }

    if update.status == GeocodingStatus::Success {
        let coordinates = update.coordinates.ok_or_else(|| {
            AppError::Persistence(format!("success update for {location_id} has no coordinates"))
        })?;
        conn.execute(
            UPSERT_RESOLVED,
            params![
                location_id,
                coordinates.latitude,
                coordinates.longitude,
                update.formatted_address,
                update.province,
                update.city,
                update.district,
                update.township,
                update.street,
                update.street_number,
                update.adcode,
                update.citycode,
                update.status,
                update.error,
                stamp,
            ],
        )?;
    } else {
        conn.execute(
            UPSERT_STATUS,
            params![location_id, update.status, update.error, stamp],
        )?;
    }
    Ok(())
}
