use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension, Transaction};
use thiserror::Error;

use crate::models::{EventRecord, TicketRecord};
use crate::utils;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("unable to prepare database path: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

const CREATE_SCHEMA: &str = "CREATE TABLE IF NOT EXISTS events(
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        start_time TEXT NOT NULL,
        end_time TEXT NOT NULL,
        venue_name TEXT,
        venue_city TEXT,
        venue_address TEXT,
        category TEXT,
        genre TEXT,
        is_festival INTEGER NOT NULL DEFAULT 0,
        raw_data TEXT NOT NULL,
        snapshot_timestamp TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS tickets(
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        event_id TEXT NOT NULL REFERENCES events(id),
        price REAL,
        currency TEXT NOT NULL,
        ticket_type TEXT,
        quantity INTEGER,
        raw_data TEXT NOT NULL,
        snapshot_timestamp TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS tickets_event_id ON tickets(event_id);";

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, DbError> {
        utils::ensure_parent(path)?;
        let conn = Connection::open(path)?;
        tracing::info!(path = %path.display(), "opened database");
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, DbError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> rusqlite::Result<()> {
        self.conn.execute_batch(CREATE_SCHEMA)
    }

    pub fn reset_schema(&self) -> Result<(), DbError> {
        tracing::warn!("dropping and recreating events and tickets tables");
        self.conn.execute_batch(
            "DROP TABLE IF EXISTS tickets;
             DROP TABLE IF EXISTS events;",
        )?;
        self.init_schema()?;
        Ok(())
    }

    /// Replaces the event row by id and appends its tickets, all in one
    /// transaction. On error nothing from this call is kept.
    pub fn save_event(
        &mut self,
        event: &EventRecord,
        tickets: &[TicketRecord],
    ) -> Result<(), DbError> {
        let tx = self.conn.transaction()?;
        upsert_event(&tx, event)?;
        for ticket in tickets {
            insert_ticket(&tx, ticket)?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn count_events(&self) -> Result<i64, DbError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?)
    }

    pub fn count_tickets(&self, event_id: Option<&str>) -> Result<i64, DbError> {
        let count = match event_id {
            Some(id) => self.conn.query_row(
                "SELECT COUNT(*) FROM tickets WHERE event_id = ?1",
                params![id],
                |row| row.get(0),
            )?,
            None => self
                .conn
                .query_row("SELECT COUNT(*) FROM tickets", [], |row| row.get(0))?,
        };
        Ok(count)
    }

    pub fn get_event(&self, id: &str) -> Result<Option<EventRecord>, DbError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, title, start_time, end_time, venue_name, venue_city,
                        venue_address, category, genre, is_festival, raw_data,
                        snapshot_timestamp
                 FROM events WHERE id = ?1",
                params![id],
                |row| {
                    Ok(EventRow {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        start_time: row.get(2)?,
                        end_time: row.get(3)?,
                        venue_name: row.get(4)?,
                        venue_city: row.get(5)?,
                        venue_address: row.get(6)?,
                        category: row.get(7)?,
                        genre: row.get(8)?,
                        is_festival: row.get(9)?,
                        raw_data: row.get(10)?,
                        snapshot_timestamp: row.get(11)?,
                    })
                },
            )
            .optional()?;
        row.map(EventRow::into_record).transpose()
    }

    #[cfg(test)]
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }
}

struct EventRow {
    id: String,
    title: String,
    start_time: chrono::DateTime<chrono::Utc>,
    end_time: chrono::DateTime<chrono::Utc>,
    venue_name: Option<String>,
    venue_city: Option<String>,
    venue_address: Option<String>,
    category: Option<String>,
    genre: Option<String>,
    is_festival: bool,
    raw_data: String,
    snapshot_timestamp: chrono::DateTime<chrono::Utc>,
}

impl EventRow {
    fn into_record(self) -> Result<EventRecord, DbError> {
        Ok(EventRecord {
            id: self.id,
            title: self.title,
            start_time: self.start_time,
            end_time: self.end_time,
            venue: crate::models::Venue {
                name: self.venue_name,
                city: self.venue_city,
                address: self.venue_address,
                country: None,
            },
            category: self.category,
            genre: self.genre,
            is_festival: self.is_festival,
            raw_data: serde_json::from_str(&self.raw_data)?,
            snapshot_timestamp: self.snapshot_timestamp,
        })
    }
}

fn upsert_event(tx: &Transaction<'_>, event: &EventRecord) -> Result<(), DbError> {
    let raw = serde_json::to_string(&event.raw_data)?;
    tx.execute(
        "INSERT INTO events (id, title, start_time, end_time, venue_name, venue_city,
                             venue_address, category, genre, is_festival, raw_data,
                             snapshot_timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
         ON CONFLICT(id) DO UPDATE SET
           title = excluded.title,
           start_time = excluded.start_time,
           end_time = excluded.end_time,
           venue_name = excluded.venue_name,
           venue_city = excluded.venue_city,
           venue_address = excluded.venue_address,
           category = excluded.category,
           genre = excluded.genre,
           is_festival = excluded.is_festival,
           raw_data = excluded.raw_data,
           snapshot_timestamp = excluded.snapshot_timestamp",
        params![
            event.id,
            event.title,
            event.start_time,
            event.end_time,
            event.venue.name,
            event.venue.city,
            event.venue.address,
            event.category,
            event.genre,
            event.is_festival,
            raw,
            event.snapshot_timestamp,
        ],
    )?;
    Ok(())
}

fn insert_ticket(tx: &Transaction<'_>, ticket: &TicketRecord) -> Result<(), DbError> {
    let raw = serde_json::to_string(&ticket.raw_data)?;
    tx.execute(
        "INSERT INTO tickets (event_id, price, currency, ticket_type, quantity, raw_data,
                              snapshot_timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            ticket.event_id,
            ticket.price,
            ticket.currency,
            ticket.ticket_type,
            ticket.quantity,
            raw,
            ticket.snapshot_timestamp,
        ],
    )?;
    Ok(())
}
