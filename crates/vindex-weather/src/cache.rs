//! SQLite-backed forecast cache.
//!
//! The table holds at most one city's forecast series at a time. Every committed
//! write bumps a generation counter that readers observe through a `watch` channel.

use parking_lot::Mutex;
use rusqlite::{params, Connection, Transaction};
use std::path::Path;
use tokio::sync::watch;

use crate::types::{ForecastEntry, WeatherError};

const SELECT_COLUMNS: &str = "id, city_name, latitude, longitude, timestamp, temp_current, \
     temp_min, temp_max, condition_text, icon_ref, humidity, wind_speed";

/// Durable holder of the current forecast series.
pub struct ForecastStore {
    conn: Mutex<Connection>,
    generation: watch::Sender<u64>,
}

/// Write access scoped to an open transaction.
///
/// Everything done through a writer commits or rolls back together.
pub struct ForecastWriter<'a> {
    tx: &'a Transaction<'a>,
}

impl ForecastWriter<'_> {
    /// Insert rows, replacing any row whose id collides.
    ///
    /// Entries without an id get a fresh one, so in practice this appends.
    pub fn upsert_all(&self, entries: &[ForecastEntry]) -> Result<usize, WeatherError> {
        let mut stmt = self.tx.prepare_cached(
            r#"
            INSERT OR REPLACE INTO weather_forecasts
            (id, city_name, latitude, longitude, timestamp, temp_current, temp_min, temp_max,
             condition_text, icon_ref, humidity, wind_speed)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )?;

        for entry in entries {
            stmt.execute(params![
                entry.id,
                entry.city_name,
                entry.latitude,
                entry.longitude,
                entry.timestamp_seconds,
                entry.temp_current_celsius,
                entry.temp_min_celsius,
                entry.temp_max_celsius,
                entry.condition_text,
                entry.icon_ref,
                entry.humidity_percent,
                entry.wind_speed_mps,
            ])?;
        }
        Ok(entries.len())
    }

    /// Delete every row.
    pub fn clear_all(&self) -> Result<usize, WeatherError> {
        Ok(self.tx.execute("DELETE FROM weather_forecasts", [])?)
    }
}

impl ForecastStore {
    /// Open (or create) the cache at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, WeatherError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::from_connection(Connection::open(path)?)
    }

    /// Create an in-memory cache (tests, ephemeral sessions).
    pub fn in_memory() -> Result<Self, WeatherError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, WeatherError> {
        Self::init_schema(&conn)?;
        let (generation, _) = watch::channel(0);
        Ok(Self {
            conn: Mutex::new(conn),
            generation,
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), WeatherError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS weather_forecasts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                city_name TEXT NOT NULL,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                timestamp INTEGER NOT NULL,
                temp_current REAL NOT NULL,
                temp_min REAL NOT NULL,
                temp_max REAL NOT NULL,
                condition_text TEXT NOT NULL,
                icon_ref TEXT NOT NULL,
                humidity INTEGER NOT NULL,
                wind_speed REAL NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_weather_forecasts_timestamp
                ON weather_forecasts(timestamp ASC);
            "#,
        )?;
        Ok(())
    }

    /// Run `work` inside a single transaction.
    ///
    /// Commits when `work` returns `Ok`; any error rolls every write back.
    /// Readers are notified only after a successful commit.
    pub fn transaction<T, F>(&self, work: F) -> Result<T, WeatherError>
    where
        F: FnOnce(&ForecastWriter<'_>) -> Result<T, WeatherError>,
    {
        let value = {
            let mut conn = self.conn.lock();
            let tx = conn.transaction()?;
            let value = work(&ForecastWriter { tx: &tx })?;
            tx.commit()?;
            value
        };
        self.generation.send_modify(|g| *g += 1);
        Ok(value)
    }

    /// Insert or update rows in their own transaction.
    pub fn upsert_all(&self, entries: &[ForecastEntry]) -> Result<usize, WeatherError> {
        self.transaction(|w| w.upsert_all(entries))
    }

    /// Delete every row.
    pub fn clear_all(&self) -> Result<usize, WeatherError> {
        self.transaction(|w| w.clear_all())
    }

    /// Clear then insert, atomically.
    pub fn replace_all(&self, entries: &[ForecastEntry]) -> Result<usize, WeatherError> {
        self.transaction(|w| {
            let removed = w.clear_all()?;
            let inserted = w.upsert_all(entries)?;
            tracing::debug!("Replaced {} cached slots with {}", removed, inserted);
            Ok(inserted)
        })
    }

    /// Number of cached slots.
    pub fn count(&self) -> Result<usize, WeatherError> {
        let conn = self.conn.lock();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM weather_forecasts", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// One chunk of the cache, ascending by forecast time.
    ///
    /// Ties on timestamp fall back to insertion order.
    pub fn page(&self, offset: usize, limit: usize) -> Result<Vec<ForecastEntry>, WeatherError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {SELECT_COLUMNS} FROM weather_forecasts \
             ORDER BY timestamp ASC, id ASC LIMIT ?1 OFFSET ?2"
        ))?;

        let rows = stmt.query_map(params![limit as i64, offset as i64], Self::row_to_entry)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// The whole cache, ascending by forecast time.
    pub fn all_ordered(&self) -> Result<Vec<ForecastEntry>, WeatherError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {SELECT_COLUMNS} FROM weather_forecasts ORDER BY timestamp ASC, id ASC"
        ))?;

        let rows = stmt.query_map([], Self::row_to_entry)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Current write generation.
    pub fn generation(&self) -> u64 {
        *self.generation.borrow()
    }

    /// Observe committed writes.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<ForecastEntry> {
        Ok(ForecastEntry {
            id: row.get(0)?,
            city_name: row.get(1)?,
            latitude: row.get(2)?,
            longitude: row.get(3)?,
            timestamp_seconds: row.get(4)?,
            temp_current_celsius: row.get(5)?,
            temp_min_celsius: row.get(6)?,
            temp_max_celsius: row.get(7)?,
            condition_text: row.get(8)?,
            icon_ref: row.get(9)?,
            humidity_percent: row.get(10)?,
            wind_speed_mps: row.get(11)?,
        })
    }
}
