//! SQLite database store implementation.

use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use super::models::*;

mod embedded {
    refinery::embed_migrations!("migrations");
}

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("database connection lock poisoned")]
    LockPoisoned,
    #[error("store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

const RESERVATION_COLUMNS: &str = "id, app, component, owner, notify, alert_msg, frequency, time_units, last_checkin_timestamp, num_checkins";
const SNOOZE_COLUMNS: &str = "app, component, duration, time_units, issued_at, expires_at";

/// Thread-safe database store.
///
/// All calls share one connection behind a mutex, so store work for
/// different pairs is serialized. Async callers reach it through
/// `spawn_blocking`, which keeps the wait off the runtime threads.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Create a store backed by a private in-memory database.
    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self, DbError> {
        embedded::migrations::runner()
            .run(&mut conn)
            .map_err(|e| DbError::Migration(e.to_string()))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::LockPoisoned)
    }

    // --- Reservations ---

    /// Insert a reservation, or update the contract of an existing one.
    ///
    /// Checkin history of an existing pair is preserved. A `reserve`
    /// housekeeping row is written in the same transaction.
    pub fn upsert_reservation(&self, res: &NewReservation, now: i64) -> Result<(), DbError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO reservations (app, component, owner, notify, alert_msg, frequency, time_units, last_checkin_timestamp, num_checkins)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, 0)
             ON CONFLICT(app, component) DO UPDATE SET
             owner=excluded.owner, notify=excluded.notify, alert_msg=excluded.alert_msg,
             frequency=excluded.frequency, time_units=excluded.time_units",
            params![
                res.app,
                res.component,
                res.owner,
                res.notify,
                res.alert_message,
                res.frequency,
                res.time_units,
            ],
        )?;
        insert_housekeeping(&tx, &res.app, &res.component, "reserve", now)?;

        tx.commit()?;
        Ok(())
    }

    /// Record a checkin and return the updated reservation.
    ///
    /// A pair without a reservation gets an implicit one with no SLA.
    /// The timestamp update, counter increment and housekeeping row commit
    /// together or not at all.
    pub fn record_checkin(&self, app: &str, component: &str, now: i64) -> Result<Reservation, DbError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO reservations (app, component, owner, notify, alert_msg, frequency, time_units, last_checkin_timestamp, num_checkins)
             VALUES (?1, ?2, '', '', NULL, 0, 'seconds', ?3, 1)
             ON CONFLICT(app, component) DO UPDATE SET
             last_checkin_timestamp=MAX(last_checkin_timestamp, excluded.last_checkin_timestamp),
             num_checkins=num_checkins + 1",
            params![app, component, now],
        )?;
        insert_housekeeping(&tx, app, component, "checkin", now)?;

        let reservation = tx.query_row(
            &format!("SELECT {RESERVATION_COLUMNS} FROM reservations WHERE app = ?1 AND component = ?2"),
            params![app, component],
            reservation_from_row,
        )?;

        tx.commit()?;
        Ok(reservation)
    }

    /// Get the reservation for a pair, if any.
    pub fn get_reservation(&self, app: &str, component: &str) -> Result<Option<Reservation>, DbError> {
        let conn = self.lock()?;
        let reservation = conn
            .query_row(
                &format!("SELECT {RESERVATION_COLUMNS} FROM reservations WHERE app = ?1 AND component = ?2"),
                params![app, component],
                reservation_from_row,
            )
            .optional()?;
        Ok(reservation)
    }

    /// Get all reservations, most recent checkin first.
    pub fn list_reservations(&self) -> Result<Vec<Reservation>, DbError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations ORDER BY last_checkin_timestamp DESC, id ASC"
        ))?;

        let reservations = stmt
            .query_map([], reservation_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(reservations)
    }

    /// Delete the reservation for a pair. Returns whether a row existed.
    pub fn delete_reservation(&self, app: &str, component: &str) -> Result<bool, DbError> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM reservations WHERE app = ?1 AND component = ?2",
            params![app, component],
        )?;
        Ok(deleted > 0)
    }

    // --- Snoozes ---

    pub fn insert_snooze(&self, snooze: &Snooze) -> Result<(), DbError> {
        let conn = self.lock()?;
        conn.execute(
            &format!("INSERT INTO snoozes ({SNOOZE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"),
            params![
                snooze.app,
                snooze.component,
                snooze.duration,
                snooze.time_units,
                snooze.issued_at,
                snooze.expires_at,
            ],
        )?;
        Ok(())
    }

    /// Get every snooze still in force at `now`, latest expiry first.
    pub fn active_snoozes(&self, now: i64) -> Result<Vec<Snooze>, DbError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SNOOZE_COLUMNS} FROM snoozes WHERE expires_at > ?1 ORDER BY expires_at DESC, id DESC"
        ))?;

        let snoozes = stmt
            .query_map(params![now], snooze_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(snoozes)
    }

    /// Get the longest-lived snooze in force for a pair at `now`.
    pub fn active_snooze(&self, app: &str, component: &str, now: i64) -> Result<Option<Snooze>, DbError> {
        let conn = self.lock()?;
        let snooze = conn
            .query_row(
                &format!(
                    "SELECT {SNOOZE_COLUMNS} FROM snoozes
                     WHERE app = ?1 AND component = ?2 AND expires_at > ?3
                     ORDER BY expires_at DESC, id DESC LIMIT 1"
                ),
                params![app, component, now],
                snooze_from_row,
            )
            .optional()?;
        Ok(snooze)
    }

    /// Delete snoozes that expired at or before `now`.
    pub fn prune_expired_snoozes(&self, now: i64) -> Result<usize, DbError> {
        let conn = self.lock()?;
        Ok(conn.execute("DELETE FROM snoozes WHERE expires_at <= ?1", params![now])?)
    }

    // --- Nodes ---

    /// Make the node table match `addresses`.
    ///
    /// Node IDs follow list order starting at 1. Peers no longer listed are
    /// removed. Returns the number removed.
    pub fn sync_nodes(&self, addresses: &[String]) -> Result<usize, DbError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let existing = {
            let mut stmt = tx.prepare("SELECT ip_address FROM nodes")?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<SqlResult<Vec<_>>>()?;
            rows
        };

        let mut removed = 0;
        for addr in existing.iter().filter(|a| !addresses.contains(a)) {
            removed += tx.execute("DELETE FROM nodes WHERE ip_address = ?1", params![addr])?;
        }

        for (i, addr) in addresses.iter().enumerate() {
            tx.execute(
                "INSERT INTO nodes (ip_address, node_id) VALUES (?1, ?2)
                 ON CONFLICT(ip_address) DO UPDATE SET node_id=excluded.node_id",
                params![addr, i as i64 + 1],
            )?;
        }

        tx.commit()?;
        Ok(removed)
    }

    /// Get all peers ordered by node ID, with `is_coordinator` unset.
    pub fn list_nodes(&self) -> Result<Vec<Node>, DbError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id, ip_address, node_id FROM nodes ORDER BY node_id, id")?;

        let nodes = stmt
            .query_map([], |row| {
                Ok(Node {
                    id: row.get(0)?,
                    ip_address: row.get(1)?,
                    node_id: row.get(2)?,
                    is_coordinator: false,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(nodes)
    }

    // --- Alerts ---

    /// Record an alert for the missed checkin of `res`.
    ///
    /// Returns false if this reservation was already alerted on for its
    /// current checkin timestamp. A pair that is checked out and reserved
    /// again starts with a fresh alert history.
    pub fn record_alert(&self, res: &Reservation, now: i64) -> Result<bool, DbError> {
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO alerts (reservation_id, app, component, last_checkin_timestamp, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![res.id, res.app, res.component, res.last_checkin_timestamp, now],
        )?;
        Ok(inserted > 0)
    }

    /// Alert counts per pair, most alerted first.
    pub fn bad_guests(&self) -> Result<Vec<BadGuest>, DbError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT app, component, COUNT(*) AS cnt FROM alerts
             GROUP BY app, component
             ORDER BY cnt DESC, app ASC, component ASC",
        )?;

        let guests = stmt
            .query_map([], |row| {
                Ok(BadGuest {
                    app: row.get(0)?,
                    component: row.get(1)?,
                    num_fails: row.get(2)?,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(guests)
    }

    #[cfg(test)]
    pub(crate) fn housekeeping_count(&self, app: &str, component: &str, action: &str) -> i64 {
        let conn = self.lock().unwrap();
        conn.query_row(
            "SELECT COUNT(*) FROM housekeeping WHERE app = ?1 AND component = ?2 AND action = ?3",
            params![app, component, action],
            |row| row.get(0),
        )
        .unwrap()
    }
}

fn insert_housekeeping(conn: &Connection, app: &str, component: &str, action: &str, now: i64) -> SqlResult<()> {
    conn.execute(
        "INSERT INTO housekeeping (app, component, action, timestamp) VALUES (?1, ?2, ?3, ?4)",
        params![app, component, action, now],
    )?;
    Ok(())
}

fn reservation_from_row(row: &Row<'_>) -> SqlResult<Reservation> {
    Ok(Reservation {
        id: row.get(0)?,
        app: row.get(1)?,
        component: row.get(2)?,
        owner: row.get(3)?,
        notify: row.get(4)?,
        alert_message: row.get::<_, Option<String>>(5)?.filter(|m| !m.is_empty()),
        frequency: row.get(6)?,
        time_units: row.get(7)?,
        last_checkin_timestamp: row.get(8)?,
        num_checkins: row.get(9)?,
    })
}

fn snooze_from_row(row: &Row<'_>) -> SqlResult<Snooze> {
    Ok(Snooze {
        app: row.get(0)?,
        component: row.get(1)?,
        duration: row.get(2)?,
        time_units: row.get(3)?,
        issued_at: row.get(4)?,
        expires_at: row.get(5)?,
    })
}
