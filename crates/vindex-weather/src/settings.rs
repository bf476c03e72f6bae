//! Persisted user preferences: temperature unit and selected location.

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tokio::sync::watch;

use crate::types::{Coordinates, TemperatureUnit, WeatherError};

const KEY_TEMPERATURE_UNIT: &str = "temperature_unit";
const KEY_LATITUDE: &str = "selected_latitude";
const KEY_LONGITUDE: &str = "selected_longitude";

/// Snapshot of every preference.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Settings {
    pub unit: TemperatureUnit,
    pub location: Option<Coordinates>,
}

/// Key-value preference store backed by SQLite.
pub struct SettingsStore {
    conn: Mutex<Connection>,
    current: watch::Sender<Settings>,
}

impl SettingsStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, WeatherError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::from_connection(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self, WeatherError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, WeatherError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )?;

        let initial = Self::read_settings(&conn)?;
        let (current, _) = watch::channel(initial);
        Ok(Self {
            conn: Mutex::new(conn),
            current,
        })
    }

    fn read_value(conn: &Connection, key: &str) -> Result<Option<String>, WeatherError> {
        Ok(conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn read_f64(conn: &Connection, key: &str) -> Result<Option<f64>, WeatherError> {
        Self::read_value(conn, key)?
            .map(|v| {
                v.parse::<f64>()
                    .map_err(|e| WeatherError::Parse(format!("{key}: {e}")))
            })
            .transpose()
    }

    fn read_settings(conn: &Connection) -> Result<Settings, WeatherError> {
        let unit = match Self::read_value(conn, KEY_TEMPERATURE_UNIT)? {
            Some(v) => v.parse().unwrap_or_else(|e| {
                tracing::warn!("Ignoring stored temperature unit: {}", e);
                TemperatureUnit::default()
            }),
            None => TemperatureUnit::default(),
        };

        // A location only counts when both halves are present
        let location = match (
            Self::read_f64(conn, KEY_LATITUDE)?,
            Self::read_f64(conn, KEY_LONGITUDE)?,
        ) {
            (Some(lat), Some(lon)) => Some(Coordinates::new(lat, lon)),
            _ => None,
        };

        Ok(Settings { unit, location })
    }

    fn write_values(&self, values: &[(&str, String)]) -> Result<(), WeatherError> {
        let settings = {
            let mut conn = self.conn.lock();
            let tx = conn.transaction()?;
            for (key, value) in values {
                tx.execute(
                    "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
                    params![key, value],
                )?;
            }
            tx.commit()?;
            Self::read_settings(&conn)?
        };
        self.current.send_replace(settings);
        Ok(())
    }

    pub fn temperature_unit(&self) -> TemperatureUnit {
        self.current.borrow().unit
    }

    pub fn set_temperature_unit(&self, unit: TemperatureUnit) -> Result<(), WeatherError> {
        tracing::debug!("Saving temperature unit {}", unit.as_key());
        self.write_values(&[(KEY_TEMPERATURE_UNIT, unit.as_key().to_string())])
    }

    /// The saved location, if both coordinates have been stored.
    pub fn selected_location(&self) -> Option<Coordinates> {
        self.current.borrow().location
    }

    pub fn save_location(&self, coordinates: Coordinates) -> Result<(), WeatherError> {
        tracing::debug!("Saving selected location {}", coordinates);
        self.write_values(&[
            (KEY_LATITUDE, coordinates.latitude.to_string()),
            (KEY_LONGITUDE, coordinates.longitude.to_string()),
        ])
    }

    pub fn snapshot(&self) -> Settings {
        *self.current.borrow()
    }

    /// Observe preference changes.
    pub fn subscribe(&self) -> watch::Receiver<Settings> {
        self.current.subscribe()
    }
}
