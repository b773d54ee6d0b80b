use super::tags::delete_orphan_tags;
use super::Store;
use crate::error::{Result, TagmarkError};
use crate::models::{NewUser, ResetToken, User};
use crate::utils::now_utc;
use chrono::{DateTime, Utc};
use rand::RngCore;
use rusqlite::OptionalExtension;
use sha2::{Digest, Sha256};

const USER_COLUMNS: &str =
    "id, username, email, password_hash, active, admin, display_name, created_at";

fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        active: row.get(4)?,
        admin: row.get(5)?,
        display_name: row.get(6)?,
        created_at: row.get(7)?,
    })
}

/// 40 hex characters derived from 20 random bytes
fn random_token() -> String {
    let mut bytes = [0u8; 20];
    rand::rng().fill_bytes(&mut bytes);
    let digest = Sha256::digest(bytes);
    digest
        .iter()
        .take(20)
        .map(|b| format!("{b:02x}"))
        .collect()
}

impl Store {
    pub fn create_user(&self, new: &NewUser) -> Result<User> {
        if new.username.trim().is_empty() || new.email.trim().is_empty() {
            return Err(TagmarkError::InvalidInput(
                "username and email are required".into(),
            ));
        }
        let display_name = new
            .display_name
            .clone()
            .unwrap_or_else(|| new.username.clone());
        self.conn.execute(
            "INSERT INTO users (username, email, password_hash, active, admin, display_name, created_at)
             VALUES (?1, ?2, ?3, 1, ?4, ?5, ?6)",
            (
                &new.username,
                &new.email,
                &new.password_hash,
                new.admin,
                &display_name,
                now_utc(),
            ),
        )?;
        self.get_user(self.conn.last_insert_rowid())
    }

    pub fn get_user(&self, id: i64) -> Result<User> {
        self.conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                [id],
                user_from_row,
            )
            .optional()?
            .ok_or_else(|| TagmarkError::not_found("User", id))
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<User> {
        self.conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
                [username],
                user_from_row,
            )
            .optional()?
            .ok_or_else(|| TagmarkError::not_found("User", username))
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
                [email],
                user_from_row,
            )
            .optional()?)
    }

    /// Every user, by id
    pub fn list_users(&self) -> Result<Vec<User>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY id"))?;
        let users = stmt
            .query_map([], user_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(users)
    }

    pub fn set_user_active(&self, id: i64, active: bool) -> Result<()> {
        let updated = self
            .conn
            .execute("UPDATE users SET active = ?1 WHERE id = ?2", (active, id))?;
        if updated == 0 {
            return Err(TagmarkError::not_found("User", id));
        }
        Ok(())
    }

    /// Delete a user together with their bookmarks.
    /// Returns the ids of the deleted bookmarks so the index can follow.
    pub fn delete_user(&self, id: i64) -> Result<Vec<i64>> {
        let tx = self.conn.unchecked_transaction()?;
        let bookmark_ids: Vec<i64> = {
            let mut stmt = tx.prepare("SELECT id FROM bookmarks WHERE user_id = ?1 ORDER BY id")?;
            let rows = stmt.query_map([id], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };
        let deleted = tx.execute("DELETE FROM users WHERE id = ?1", [id])?;
        if deleted == 0 {
            return Err(TagmarkError::not_found("User", id));
        }
        delete_orphan_tags(&tx)?;
        tx.commit()?;
        Ok(bookmark_ids)
    }

    /// Follow `watched`; following twice is a no-op
    pub fn watch_user(&self, watcher: i64, watched: i64) -> Result<()> {
        if watcher == watched {
            return Err(TagmarkError::InvalidInput(
                "users cannot watch themselves".into(),
            ));
        }
        self.get_user(watched)?;
        self.conn.execute(
            "INSERT OR IGNORE INTO watched_users (user_id, other_user_id) VALUES (?1, ?2)",
            (watcher, watched),
        )?;
        Ok(())
    }

    pub fn unwatch_user(&self, watcher: i64, watched: i64) -> Result<bool> {
        let removed = self.conn.execute(
            "DELETE FROM watched_users WHERE user_id = ?1 AND other_user_id = ?2",
            (watcher, watched),
        )?;
        Ok(removed > 0)
    }

    /// Users followed by `watcher`, by username
    pub fn watched_users(&self, watcher: i64) -> Result<Vec<User>> {
        let mut stmt = self.conn.prepare(
            "SELECT u.id, u.username, u.email, u.password_hash, u.active, u.admin,
                    u.display_name, u.created_at
             FROM users u JOIN watched_users w ON w.other_user_id = u.id
             WHERE w.user_id = ?1 ORDER BY u.username",
        )?;
        let users = stmt
            .query_map([watcher], user_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(users)
    }

    /// Issue a fresh reset token, replacing any pending one
    pub fn create_reset_token(&self, user_id: i64) -> Result<ResetToken> {
        self.get_user(user_id)?;
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM reset_tokens WHERE user_id = ?1", [user_id])?;
        let token = random_token();
        let created_at = now_utc();
        tx.execute(
            "INSERT INTO reset_tokens (user_id, token, created_at) VALUES (?1, ?2, ?3)",
            (user_id, &token, created_at),
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(ResetToken {
            id,
            user_id,
            token,
            created_at,
        })
    }

    pub fn find_reset_token(&self, user_id: i64) -> Result<Option<ResetToken>> {
        let token = self
            .conn
            .query_row(
                "SELECT id, user_id, token, created_at FROM reset_tokens WHERE user_id = ?1",
                [user_id],
                |row| {
                    Ok(ResetToken {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        token: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(token)
    }

    /// Check and delete a user's reset token. Wrong or expired tokens are
    /// rejected; an expired token is deleted as well.
    pub fn consume_reset_token(
        &self,
        user_id: i64,
        token: &str,
        now: DateTime<Utc>,
        validity_hours: i64,
    ) -> Result<()> {
        let pending = self
            .find_reset_token(user_id)?
            .ok_or_else(|| TagmarkError::not_found("ResetToken", user_id))?;
        if pending.token != token {
            return Err(TagmarkError::InvalidInput("reset token mismatch".into()));
        }
        self.conn
            .execute("DELETE FROM reset_tokens WHERE id = ?1", [pending.id])?;
        if pending.is_expired(now, validity_hours) {
            return Err(TagmarkError::InvalidInput("reset token expired".into()));
        }
        Ok(())
    }
}
