//! SQLite database store implementation.

use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use super::models::*;

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("{0}")]
    Validation(String),
    #[error("Device {0} not found")]
    NotFound(i64),
    #[error("Database connection lock poisoned")]
    LockPoisoned,
}

const DEVICE_COLUMNS: &str = "id, name, ip, status";

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::LockPoisoned)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.lock()?;

        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;

        // Tables created by older builds have no status column; fresh ones
        // already got it on a previous run.
        if let Err(e) = conn.execute_batch(include_str!("../../migrations/000002_device_status.up.sql")) {
            if !e.to_string().contains("duplicate column name") {
                return Err(DbError::Migration(format!("Migration 2 failed: {}", e)));
            }
        }

        conn.execute_batch(include_str!("../../migrations/000003_device_name_index.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 3 failed: {}", e)))?;

        Ok(())
    }

    // --- Device CRUD ---

    /// Add a new device and return its ID.
    pub fn add(&self, name: &str, address: &str, enabled: bool) -> Result<i64, DbError> {
        validate(name, address)?;

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO devices (name, ip, status) VALUES (?1, ?2, ?3)",
            params![name, address, enabled as i64],
        )?;
        let id = conn.last_insert_rowid();
        tracing::info!("New Device: name: {}, ip: {}, status: {}", name, address, enabled as i64);
        Ok(id)
    }

    /// Overwrite the name, address and enabled flag of an existing device.
    pub fn update(&self, id: i64, name: &str, address: &str, enabled: bool) -> Result<(), DbError> {
        validate(name, address)?;

        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE devices SET name=?1, ip=?2, status=?3 WHERE id=?4",
            params![name, address, enabled as i64, id],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound(id));
        }
        tracing::info!("Update device {} to name: {}, ip: {}, status: {}", id, name, address, enabled as i64);
        Ok(())
    }

    /// Delete a device.
    pub fn remove(&self, id: i64) -> Result<(), DbError> {
        let conn = self.lock()?;
        let changed = conn.execute("DELETE FROM devices WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(DbError::NotFound(id));
        }
        tracing::info!("Removed device {}", id);
        Ok(())
    }

    /// Get all devices in insertion order.
    pub fn list(&self) -> Result<Vec<Device>, DbError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("SELECT {} FROM devices ORDER BY id", DEVICE_COLUMNS))?;

        let devices = stmt
            .query_map([], device_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(devices)
    }

    /// Get a device by ID.
    pub fn get(&self, id: i64) -> Result<Device, DbError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM devices WHERE id = ?1", DEVICE_COLUMNS),
            params![id],
            device_from_row,
        )
        .optional()?
        .ok_or(DbError::NotFound(id))
    }

    /// Find the first device with the given name.
    ///
    /// `None` means no such device, which callers report to the operator
    /// rather than treat as a failure.
    pub fn find_by_name(&self, name: &str) -> Result<Option<Device>, DbError> {
        let conn = self.lock()?;
        let device = conn
            .query_row(
                &format!("SELECT {} FROM devices WHERE name = ?1 ORDER BY id LIMIT 1", DEVICE_COLUMNS),
                params![name],
                device_from_row,
            )
            .optional()?;
        Ok(device)
    }

    /// Set the enabled flag on every device. Returns the number of rows touched.
    pub fn set_all_enabled(&self, enabled: bool) -> Result<usize, DbError> {
        let conn = self.lock()?;
        let changed = conn.execute("UPDATE devices SET status = ?1", params![enabled as i64])?;
        tracing::info!("Set status {} on {} devices", enabled as i64, changed);
        Ok(changed)
    }
}

fn validate(name: &str, address: &str) -> Result<(), DbError> {
    if name.trim().is_empty() || address.trim().is_empty() {
        return Err(DbError::Validation("Both Name and IP are required".to_string()));
    }
    Ok(())
}

fn device_from_row(row: &Row<'_>) -> SqlResult<Device> {
    let status: i64 = row.get(3)?;
    Ok(Device {
        id: row.get(0)?,
        name: row.get(1)?,
        address: row.get(2)?,
        enabled: status != 0,
    })
}
