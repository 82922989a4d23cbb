use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};

use crate::layout::DashboardLayout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Theme {
    Dark,
    Light,
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Dark => "dark",
            Theme::Light => "light",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "dark" => Some(Theme::Dark),
            "light" => Some(Theme::Light),
            _ => None,
        }
    }
}

/// Durable client storage: saved layouts keyed by signature, plus the
/// theme preference. Reads are best-effort: a missing or corrupt record
/// falls back to the computed default instead of failing the caller.
pub struct ClientStore {
    conn: Connection,
}

impl ClientStore {
    pub fn new(path: &str) -> Result<Self> {
        Ok(Self { conn: Connection::open(path)? })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self { conn: Connection::open_in_memory()? })
    }

    pub fn init(&mut self) -> Result<()> {
        self.conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS layouts (
                signature TEXT PRIMARY KEY,
                body TEXT NOT NULL,
                saved_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS prefs (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            COMMIT;",
        )?;
        Ok(())
    }

    pub fn save_layout(&mut self, signature: &str, layout: &DashboardLayout, ts: u64) -> Result<()> {
        let body = serde_json::to_string(layout)?;
        self.conn.execute(
            "INSERT INTO layouts (signature, body, saved_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(signature) DO UPDATE SET body = ?2, saved_at = ?3",
            params![signature, body, ts as i64],
        )?;
        Ok(())
    }

    /// A saved layout for this signature, or None when nothing usable is
    /// stored. Corrupt bodies read as absent.
    pub fn load_layout(&self, signature: &str) -> Option<DashboardLayout> {
        let body: Option<String> = self
            .conn
            .query_row(
                "SELECT body FROM layouts WHERE signature = ?1",
                params![signature],
                |row| row.get(0),
            )
            .optional()
            .ok()
            .flatten();
        body.and_then(|b| serde_json::from_str(&b).ok())
    }

    /// Erases the saved record; the next load derives the default again.
    pub fn reset_layout(&mut self, signature: &str) -> Result<()> {
        self.conn.execute("DELETE FROM layouts WHERE signature = ?1", params![signature])?;
        Ok(())
    }

    pub fn set_theme(&mut self, theme: Theme) -> Result<()> {
        self.conn.execute(
            "INSERT INTO prefs (key, value) VALUES ('theme', ?1)
             ON CONFLICT(key) DO UPDATE SET value = ?1",
            params![theme.as_str()],
        )?;
        Ok(())
    }

    /// Light unless a valid preference is stored.
    pub fn theme(&self) -> Theme {
        self.conn
            .query_row("SELECT value FROM prefs WHERE key = 'theme'", [], |row| {
                row.get::<_, String>(0)
            })
            .optional()
            .ok()
            .flatten()
            .and_then(|v| Theme::parse(&v))
            .unwrap_or(Theme::Light)
    }
}
