use super::schema::{create_schema, validate_schema};
use super::{AppExtrasStore, BlocklistStore, Schedule, ScheduleStore, SpecialFilter};
use crate::packages::AppExtras;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

/// SQLite-backed store for schedules, the global blocklist and app extras.
pub struct SqliteScheduleStore {
    conn: Mutex<Connection>,
}

impl SqliteScheduleStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let is_new_db = !path.exists();

        let conn = Connection::open(path).context("Failed to open scheduler database")?;
        if is_new_db {
            info!("Creating new scheduler database at {:?}", path);
            create_schema(&conn)?;
        } else {
            validate_schema(&conn).with_context(|| {
                format!("Scheduler database validation failed for {:?}", path)
            })?;
        }

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        create_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn row_to_schedule(row: &rusqlite::Row) -> rusqlite::Result<Schedule> {
        let time_placed_str: String = row.get("time_placed")?;
        let special_filter_json: String = row.get("special_filter")?;
        let block_list_json: String = row.get("block_list")?;
        let custom_list_json: String = row.get("custom_list")?;
        let tags_list_json: String = row.get("tags_list")?;

        Ok(Schedule {
            id: row.get("id")?,
            name: row.get("name")?,
            enabled: row.get::<_, i64>("enabled")? != 0,
            interval: row.get::<_, i64>("interval")? as u32,
            time_hour: row.get::<_, i64>("time_hour")? as u8,
            time_minute: row.get::<_, i64>("time_minute")? as u8,
            time_placed: DateTime::parse_from_rfc3339(&time_placed_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            mode: row.get::<_, i64>("mode")? as u32,
            main_filter: row.get::<_, i64>("main_filter")? as u32,
            special_filter: serde_json::from_str::<SpecialFilter>(&special_filter_json)
                .unwrap_or_default(),
            block_list: serde_json::from_str(&block_list_json).unwrap_or_default(),
            custom_list: serde_json::from_str(&custom_list_json).unwrap_or_default(),
            tags_list: serde_json::from_str(&tags_list_json).unwrap_or_default(),
        })
    }
}

impl ScheduleStore for SqliteScheduleStore {
    fn insert(&self, schedule: &Schedule) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO schedules
                (name, enabled, interval, time_hour, time_minute, time_placed,
                 mode, main_filter, special_filter, block_list, custom_list, tags_list)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                schedule.name,
                schedule.enabled as i64,
                schedule.interval as i64,
                schedule.time_hour as i64,
                schedule.time_minute as i64,
                schedule.time_placed.to_rfc3339(),
                schedule.mode as i64,
                schedule.main_filter as i64,
                serde_json::to_string(&schedule.special_filter)?,
                serde_json::to_string(&schedule.block_list)?,
                serde_json::to_string(&schedule.custom_list)?,
                serde_json::to_string(&schedule.tags_list)?,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn get(&self, id: i64) -> Result<Option<Schedule>> {
        let conn = self.conn.lock().unwrap();
        let schedule = conn
            .query_row(
                "SELECT * FROM schedules WHERE id = ?1",
                params![id],
                Self::row_to_schedule,
            )
            .optional()?;
        Ok(schedule)
    }

    fn update(&self, schedule: &Schedule) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE schedules SET
                name = ?2, enabled = ?3, interval = ?4, time_hour = ?5,
                time_minute = ?6, time_placed = ?7, mode = ?8, main_filter = ?9,
                special_filter = ?10, block_list = ?11, custom_list = ?12, tags_list = ?13
             WHERE id = ?1",
            params![
                schedule.id,
                schedule.name,
                schedule.enabled as i64,
                schedule.interval as i64,
                schedule.time_hour as i64,
                schedule.time_minute as i64,
                schedule.time_placed.to_rfc3339(),
                schedule.mode as i64,
                schedule.main_filter as i64,
                serde_json::to_string(&schedule.special_filter)?,
                serde_json::to_string(&schedule.block_list)?,
                serde_json::to_string(&schedule.custom_list)?,
                serde_json::to_string(&schedule.tags_list)?,
            ],
        )?;
        if changed == 0 {
            anyhow::bail!("No schedule with id {} to update", schedule.id);
        }
        Ok(())
    }

    fn get_all(&self) -> Result<Vec<Schedule>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM schedules ORDER BY id")?;
        let schedules = stmt
            .query_map([], Self::row_to_schedule)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(schedules)
    }

    fn delete(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute("DELETE FROM schedules WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }
}

impl BlocklistStore for SqliteScheduleStore {
    fn get_global_blocklist(&self) -> Result<HashSet<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT package_name FROM blocklist")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<HashSet<_>>>()?;
        Ok(names)
    }

    fn add_to_blocklist(&self, package_name: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO blocklist (package_name) VALUES (?1)",
            params![package_name],
        )?;
        Ok(())
    }

    fn remove_from_blocklist(&self, package_name: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "DELETE FROM blocklist WHERE package_name = ?1",
            params![package_name],
        )?;
        Ok(changed > 0)
    }
}

impl AppExtrasStore for SqliteScheduleStore {
    fn get_all_extras(&self) -> Result<Vec<AppExtras>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT package_name, custom_tags, note FROM app_extras")?;
        let extras = stmt
            .query_map([], |row| {
                let tags_json: String = row.get(1)?;
                Ok(AppExtras {
                    package_name: row.get(0)?,
                    custom_tags: serde_json::from_str(&tags_json).unwrap_or_default(),
                    note: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(extras)
    }

    fn set_extras(&self, extras: &AppExtras) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO app_extras (package_name, custom_tags, note) VALUES (?1, ?2, ?3)
             ON CONFLICT(package_name) DO UPDATE SET custom_tags = ?2, note = ?3",
            params![
                extras.package_name,
                serde_json::to_string(&extras.custom_tags)?,
                extras.note,
            ],
        )?;
        Ok(())
    }
}
