use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use gridcube_core::{
    CommandType, DecodeError, Device, DeviceAddress, DeviceInfo, DeviceMapping, Event, EventId,
    GpsTime, IdError, PublicDeviceId, Reading, ReadingId, Uplink, WirelessDeviceId,
};
use jiff::Timestamp;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool, migrate::Migrator};
use ulid::Ulid;

use crate::resolver::AddressStore;
use crate::storage::{DeviceRegistry, EventStore, ReadingQuery, ReadingStore, device_key};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, thiserror::Error)]
pub enum SqliteStorageError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid id: {0}")]
    InvalidId(#[from] IdError),
    #[error("invalid ULID: {0}")]
    InvalidUlid(String),
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(i64),
    #[error("invalid {column}: {value}")]
    InvalidValue { column: &'static str, value: i64 },
    #[error("invalid command type: {0}")]
    InvalidCommandType(#[from] DecodeError),
}

/// SQLite-backed storage. Device info, uplinks and commands are kept as JSON
/// columns next to the fields queries filter on.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, SqliteStorageError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        MIGRATOR.run(&pool).await?;

        Ok(Self { pool })
    }

    pub async fn new_in_memory() -> Result<Self, SqliteStorageError> {
        // every connection to :memory: is its own database, so keep exactly one
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        MIGRATOR.run(&pool).await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl AddressStore for SqliteStorage {
    type Error = SqliteStorageError;

    async fn lookup_wireless_id(
        &self,
        public_id: &PublicDeviceId,
    ) -> Result<Option<WirelessDeviceId>, Self::Error> {
        let row = sqlx::query(r#"SELECT wireless_id FROM devices WHERE public_id = ?"#)
            .bind(public_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(WirelessDeviceId::parse(
            &row.try_get::<String, _>("wireless_id")?,
        )?))
    }

    async fn lookup_public_id(
        &self,
        wireless_id: &WirelessDeviceId,
    ) -> Result<Option<PublicDeviceId>, Self::Error> {
        let row = sqlx::query(r#"SELECT public_id FROM devices WHERE wireless_id = ?"#)
            .bind(wireless_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(PublicDeviceId::parse(&row.try_get::<String, _>("public_id")?)?))
    }
}

#[async_trait]
impl DeviceRegistry for SqliteStorage {
    type Error = SqliteStorageError;

    async fn register_device(&self, mapping: DeviceMapping) -> Result<(), Self::Error> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query(r#"SELECT info FROM devices WHERE public_id = ?"#)
            .bind(mapping.public_id.as_str())
            .fetch_optional(&mut *tx)
            .await?;
        let info = match existing {
            Some(row) => row.try_get::<String, _>("info")?,
            None => serde_json::to_string(&DeviceInfo::default())?,
        };

        sqlx::query(r#"DELETE FROM devices WHERE wireless_id = ? AND public_id != ?"#)
            .bind(mapping.wireless_id.to_string())
            .bind(mapping.public_id.as_str())
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO devices (public_id, wireless_id, wireless_arn, thing_arn, registered_at, info)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(mapping.public_id.as_str())
        .bind(mapping.wireless_id.to_string())
        .bind(mapping.wireless_arn.as_deref())
        .bind(mapping.thing_arn.as_deref())
        .bind(mapping.registered_at.as_millisecond())
        .bind(info)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_device(&self, public_id: &PublicDeviceId) -> Result<Option<Device>, Self::Error> {
        let row = sqlx::query(
            r#"
            SELECT public_id, wireless_id, wireless_arn, thing_arn, registered_at, info
            FROM devices WHERE public_id = ?
            "#,
        )
        .bind(public_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| map_row_to_device(&r)).transpose()
    }

    async fn list_devices(&self) -> Result<Vec<Device>, Self::Error> {
        let rows = sqlx::query(
            r#"
            SELECT public_id, wireless_id, wireless_arn, thing_arn, registered_at, info
            FROM devices ORDER BY public_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(map_row_to_device).collect()
    }

    async fn update_device_info(
        &self,
        wireless_id: &WirelessDeviceId,
        uplink: &Uplink,
        seen_at: Timestamp,
    ) -> Result<bool, Self::Error> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(r#"SELECT public_id, info FROM devices WHERE wireless_id = ?"#)
            .bind(wireless_id.to_string())
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return Ok(false);
        };

        let public_id: String = row.try_get("public_id")?;
        let mut info: DeviceInfo = serde_json::from_str(&row.try_get::<String, _>("info")?)?;
        info.apply(uplink, seen_at);

        sqlx::query(r#"UPDATE devices SET info = ? WHERE public_id = ?"#)
            .bind(serde_json::to_string(&info)?)
            .bind(public_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }
}

#[async_trait]
impl ReadingStore for SqliteStorage {
    type Error = SqliteStorageError;

    async fn store_reading(
        &self,
        device: &DeviceAddress,
        reading: Reading,
    ) -> Result<(), Self::Error> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO readings (id, device_key, wireless_id, packet_type, received_at, uplink)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(reading.id.0.to_string())
        .bind(device_key(device))
        .bind(reading.device.to_string())
        .bind(reading.packet_type() as i32)
        .bind(reading.received_at.as_millisecond())
        .bind(serde_json::to_string(&reading.uplink)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_readings(
        &self,
        device: &DeviceAddress,
        query: ReadingQuery,
    ) -> Result<Vec<Reading>, Self::Error> {
        let mut query_builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, wireless_id, received_at, uplink FROM readings WHERE device_key = ",
        );
        query_builder.push_bind(device_key(device));

        if let Some(packet_type) = query.packet_type {
            query_builder.push(" AND packet_type = ");
            query_builder.push_bind(packet_type as i32);
        }

        query_builder.push(" ORDER BY received_at DESC, id DESC LIMIT ");
        query_builder.push_bind(i64::try_from(query.limit).unwrap_or(i64::MAX));

        let rows = query_builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(map_row_to_reading).collect()
    }
}

#[async_trait]
impl EventStore for SqliteStorage {
    type Error = SqliteStorageError;

    async fn insert_event(&self, event: Event) -> Result<bool, Self::Error> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO events (
                id, command_type, command, device, wireless_id, gps_time, frame,
                sent, acknowledged, attempts, created_at, last_attempt_at, acknowledged_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.id.to_string())
        .bind(event.command_type as i32)
        .bind(serde_json::to_string(&event.command)?)
        .bind(&*event.device)
        .bind(event.wireless_id.map(|w| w.to_string()))
        .bind(i64::from(event.gps_time.0))
        .bind(event.frame.to_vec())
        .bind(event.sent)
        .bind(event.acknowledged)
        .bind(i64::from(event.attempts))
        .bind(event.created_at.as_millisecond())
        .bind(event.last_attempt_at.as_millisecond())
        .bind(event.acknowledged_at.map(|t| t.as_millisecond()))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_event(&self, id: EventId) -> Result<Option<Event>, Self::Error> {
        let row = sqlx::query(&format!("{EVENT_COLUMNS} WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| map_row_to_event(&r)).transpose()
    }

    async fn list_events(&self, device: &str) -> Result<Vec<Event>, Self::Error> {
        let rows = sqlx::query(&format!("{EVENT_COLUMNS} WHERE device = ? ORDER BY created_at"))
            .bind(device)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(map_row_to_event).collect()
    }

    async fn mark_sent(&self, id: EventId, at: Timestamp) -> Result<(), Self::Error> {
        sqlx::query(
            r#"
            UPDATE events SET sent = 1, attempts = attempts + 1, last_attempt_at = ?
            WHERE id = ?
            "#,
        )
        .bind(at.as_millisecond())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_attempt(&self, id: EventId, at: Timestamp) -> Result<(), Self::Error> {
        sqlx::query(
            r#"UPDATE events SET attempts = attempts + 1, last_attempt_at = ? WHERE id = ?"#,
        )
        .bind(at.as_millisecond())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_unacknowledged(&self, cutoff: Timestamp) -> Result<Vec<Event>, Self::Error> {
        let rows = sqlx::query(&format!(
            "{EVENT_COLUMNS} WHERE sent = 1 AND acknowledged = 0 AND last_attempt_at <= ? ORDER BY created_at"
        ))
        .bind(cutoff.as_millisecond())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(map_row_to_event).collect()
    }

    async fn acknowledge(
        &self,
        wireless_id: &WirelessDeviceId,
        gps_time: GpsTime,
        at: Timestamp,
    ) -> Result<Option<EventId>, Self::Error> {
        let row = sqlx::query(
            r#"
            UPDATE events SET acknowledged = 1, acknowledged_at = ?
            WHERE id = (
                SELECT id FROM events
                WHERE wireless_id = ? AND gps_time = ? AND acknowledged = 0
                ORDER BY created_at LIMIT 1
            )
            RETURNING id
            "#,
        )
        .bind(at.as_millisecond())
        .bind(wireless_id.to_string())
        .bind(i64::from(gps_time.0))
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(EventId::from_str(&row.try_get::<String, _>("id")?)?))
    }
}

const EVENT_COLUMNS: &str = "SELECT id, command_type, command, device, wireless_id, gps_time, frame, \
     sent, acknowledged, attempts, created_at, last_attempt_at, acknowledged_at FROM events";

fn timestamp(millis: i64) -> Result<Timestamp, SqliteStorageError> {
    Timestamp::from_millisecond(millis).map_err(|_| SqliteStorageError::InvalidTimestamp(millis))
}

fn map_row_to_device(row: &SqliteRow) -> Result<Device, SqliteStorageError> {
    let mapping = DeviceMapping {
        public_id: PublicDeviceId::parse(&row.try_get::<String, _>("public_id")?)?,
        wireless_id: WirelessDeviceId::parse(&row.try_get::<String, _>("wireless_id")?)?,
        wireless_arn: row
            .try_get::<Option<String>, _>("wireless_arn")?
            .map(String::into_boxed_str),
        thing_arn: row
            .try_get::<Option<String>, _>("thing_arn")?
            .map(String::into_boxed_str),
        registered_at: timestamp(row.try_get("registered_at")?)?,
    };
    let info = serde_json::from_str(&row.try_get::<String, _>("info")?)?;

    Ok(Device { mapping, info })
}

fn map_row_to_reading(row: &SqliteRow) -> Result<Reading, SqliteStorageError> {
    let id_str: String = row.try_get("id")?;
    let ulid = Ulid::from_string(&id_str).map_err(|_| SqliteStorageError::InvalidUlid(id_str))?;

    Ok(Reading {
        id: ReadingId(ulid),
        device: WirelessDeviceId::parse(&row.try_get::<String, _>("wireless_id")?)?,
        received_at: timestamp(row.try_get("received_at")?)?,
        uplink: serde_json::from_str(&row.try_get::<String, _>("uplink")?)?,
    })
}

fn map_row_to_event(row: &SqliteRow) -> Result<Event, SqliteStorageError> {
    let command_type: i64 = row.try_get("command_type")?;
    let command_type = u8::try_from(command_type)
        .map_err(|_| SqliteStorageError::InvalidValue {
            column: "command_type",
            value: command_type,
        })
        .and_then(|t| Ok(CommandType::try_from(t)?))?;

    let gps_time: i64 = row.try_get("gps_time")?;
    let gps_time = u32::try_from(gps_time).map_err(|_| SqliteStorageError::InvalidValue {
        column: "gps_time",
        value: gps_time,
    })?;

    let attempts: i64 = row.try_get("attempts")?;
    let attempts = u32::try_from(attempts).map_err(|_| SqliteStorageError::InvalidValue {
        column: "attempts",
        value: attempts,
    })?;

    Ok(Event {
        id: EventId::from_str(&row.try_get::<String, _>("id")?)?,
        command_type,
        command: serde_json::from_str(&row.try_get::<String, _>("command")?)?,
        device: row.try_get::<String, _>("device")?.into_boxed_str(),
        wireless_id: row
            .try_get::<Option<String>, _>("wireless_id")?
            .map(|w| WirelessDeviceId::parse(&w))
            .transpose()?,
        gps_time: GpsTime(gps_time),
        frame: row.try_get::<Vec<u8>, _>("frame")?.into_boxed_slice(),
        sent: row.try_get("sent")?,
        acknowledged: row.try_get("acknowledged")?,
        attempts,
        created_at: timestamp(row.try_get("created_at")?)?,
        last_attempt_at: timestamp(row.try_get("last_attempt_at")?)?,
        acknowledged_at: row
            .try_get::<Option<i64>, _>("acknowledged_at")?
            .map(timestamp)
            .transpose()?,
    })
}
