//! Direct-message handshake.
//!
//! Per unordered pair of users the request moves
//! `NoRequest -> Pending -> {Accepted, Rejected}`. Both outcomes are final:
//! asking again returns the existing row, and answering twice is refused.

use std::collections::HashMap;

use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use huddle_shared::DmRequestStatus;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{DmRequest, DmRequestView, User};
use crate::row::{now, not_found, parsed_col, ts_col, ts_param, uuid_col};
use crate::users::row_to_user;

const REQUEST_COLUMNS: &str = "id, from_user_id, to_user_id, status, timestamp";

impl Database {
    /// Ask `to` for a private conversation.
    ///
    /// If any request already links the two users, in either direction and
    /// in any state, it is returned untouched and the flag is `false`.
    pub fn request_dm(&self, from: Uuid, to: Uuid) -> Result<(DmRequest, bool)> {
        if let Some(existing) = self.find_dm_request(from, to)? {
            tracing::debug!(
                request_id = %existing.id,
                status = %existing.status,
                "DM request already exists for pair"
            );
            return Ok((existing, false));
        }

        let request = DmRequest {
            id: Uuid::new_v4(),
            from_user_id: from,
            to_user_id: to,
            status: DmRequestStatus::Pending,
            timestamp: now(),
        };

        self.conn().execute(
            "INSERT INTO dm_requests (id, from_user_id, to_user_id, status, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                request.id.to_string(),
                from.to_string(),
                to.to_string(),
                request.status.as_str(),
                ts_param(&request.timestamp),
            ],
        )?;

        tracing::info!(request_id = %request.id, from = %from, to = %to, "DM requested");
        Ok((request, true))
    }

    pub fn get_dm_request(&self, id: Uuid) -> Result<DmRequest> {
        self.conn()
            .query_row(
                &format!("SELECT {REQUEST_COLUMNS} FROM dm_requests WHERE id = ?1"),
                params![id.to_string()],
                row_to_request,
            )
            .map_err(not_found)
    }

    /// The request between two users, whichever of them sent it.
    pub fn find_dm_request(&self, a: Uuid, b: Uuid) -> Result<Option<DmRequest>> {
        let request = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {REQUEST_COLUMNS} FROM dm_requests
                     WHERE (from_user_id = ?1 AND to_user_id = ?2)
                        OR (from_user_id = ?2 AND to_user_id = ?1)"
                ),
                params![a.to_string(), b.to_string()],
                row_to_request,
            )
            .optional()?;
        Ok(request)
    }

    /// Resolve a pending request.
    ///
    /// Only `Accepted` and `Rejected` are valid answers, and only a pending
    /// request can be answered; a second answer fails with
    /// [`StoreError::AlreadyResolved`].
    pub fn respond_dm_request(&self, id: Uuid, status: DmRequestStatus) -> Result<DmRequest> {
        if !status.is_terminal() {
            return Err(StoreError::Conflict(
                "a DM request can only be accepted or rejected".into(),
            ));
        }

        let affected = self.conn().execute(
            "UPDATE dm_requests SET status = ?1 WHERE id = ?2 AND status = 'pending'",
            params![status.as_str(), id.to_string()],
        )?;
        if affected == 0 {
            // Either missing (NotFound propagates) or already resolved.
            self.get_dm_request(id)?;
            return Err(StoreError::AlreadyResolved);
        }

        tracing::info!(request_id = %id, status = %status, "DM request resolved");
        self.get_dm_request(id)
    }

    /// Every request involving `user_id`, oldest first, with both parties.
    pub fn dm_requests_for_user(&self, user_id: Uuid) -> Result<Vec<DmRequestView>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {REQUEST_COLUMNS} FROM dm_requests
             WHERE from_user_id = ?1 OR to_user_id = ?1
             ORDER BY timestamp ASC, rowid ASC"
        ))?;
        let requests = stmt
            .query_map(params![user_id.to_string()], row_to_request)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let users: HashMap<Uuid, User> = self
            .list_users()?
            .into_iter()
            .map(|u| (u.id, u))
            .collect();

        Ok(requests
            .into_iter()
            .map(|request| DmRequestView {
                from_user: users.get(&request.from_user_id).cloned(),
                to_user: users.get(&request.to_user_id).cloned(),
                request,
            })
            .collect())
    }

    /// Users with an accepted request involving `user_id`.
    pub fn dm_partners(&self, user_id: Uuid) -> Result<Vec<User>> {
        let mut stmt = self.conn().prepare(
            "SELECT u.id, u.username, u.color, u.bio, u.status, u.created_at
             FROM dm_requests r
             JOIN users u
               ON u.id = CASE WHEN r.from_user_id = ?1 THEN r.to_user_id ELSE r.from_user_id END
             WHERE (r.from_user_id = ?1 OR r.to_user_id = ?1)
               AND r.status = 'accepted'
             ORDER BY r.timestamp ASC, r.rowid ASC",
        )?;
        let rows = stmt.query_map(params![user_id.to_string()], row_to_user)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    pub fn are_dm_partners(&self, a: Uuid, b: Uuid) -> Result<bool> {
        Ok(self
            .find_dm_request(a, b)?
            .is_some_and(|r| r.status == DmRequestStatus::Accepted))
    }
}

fn row_to_request(row: &rusqlite::Row<'_>) -> rusqlite::Result<DmRequest> {
    Ok(DmRequest {
        id: uuid_col(row, 0)?,
        from_user_id: uuid_col(row, 1)?,
        to_user_id: uuid_col(row, 2)?,
        status: parsed_col(row, 3)?,
        timestamp: ts_col(row, 4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Database, User, User) {
        let db = Database::open_in_memory().unwrap();
        let alice = db.create_user("alice", "#ff0000").unwrap();
        let bob = db.create_user("bob", "#0000ff").unwrap();
        (db, alice, bob)
    }

    fn request_count(db: &Database) -> i64 {
        db.conn()
            .query_row("SELECT COUNT(*) FROM dm_requests", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn one_request_per_pair() {
        let (db, alice, bob) = setup();

        let (first, created) = db.request_dm(alice.id, bob.id).unwrap();
        assert!(created);
        assert_eq!(first.status, DmRequestStatus::Pending);

        let (again, created) = db.request_dm(alice.id, bob.id).unwrap();
        assert!(!created);
        assert_eq!(again.id, first.id);

        let (reverse, created) = db.request_dm(bob.id, alice.id).unwrap();
        assert!(!created);
        assert_eq!(reverse.id, first.id);
        assert_eq!(reverse.from_user_id, alice.id);

        assert_eq!(request_count(&db), 1);
    }

    #[test]
    fn pair_index_rejects_raw_duplicates() {
        let (db, alice, bob) = setup();
        db.request_dm(alice.id, bob.id).unwrap();

        let dup = db.conn().execute(
            "INSERT INTO dm_requests (id, from_user_id, to_user_id, status, timestamp)
             VALUES (?1, ?2, ?3, 'pending', ?4)",
            params![
                Uuid::new_v4().to_string(),
                bob.id.to_string(),
                alice.id.to_string(),
                ts_param(&now()),
            ],
        );
        assert!(dup.is_err());
    }

    #[test]
    fn accept_makes_partners() {
        let (db, alice, bob) = setup();
        let (request, _) = db.request_dm(alice.id, bob.id).unwrap();
        assert!(db.dm_partners(alice.id).unwrap().is_empty());

        let accepted = db
            .respond_dm_request(request.id, DmRequestStatus::Accepted)
            .unwrap();
        assert_eq!(accepted.status, DmRequestStatus::Accepted);

        let alice_partners: Vec<Uuid> = db.dm_partners(alice.id).unwrap().iter().map(|u| u.id).collect();
        let bob_partners: Vec<Uuid> = db.dm_partners(bob.id).unwrap().iter().map(|u| u.id).collect();
        assert_eq!(alice_partners, vec![bob.id]);
        assert_eq!(bob_partners, vec![alice.id]);
        assert!(db.are_dm_partners(bob.id, alice.id).unwrap());

        // Asking again still yields the single accepted record.
        let (again, created) = db.request_dm(alice.id, bob.id).unwrap();
        assert!(!created);
        assert_eq!(again.id, request.id);
        assert_eq!(again.status, DmRequestStatus::Accepted);
    }

    #[test]
    fn resolved_requests_are_final() {
        let (db, alice, bob) = setup();
        let (request, _) = db.request_dm(alice.id, bob.id).unwrap();

        db.respond_dm_request(request.id, DmRequestStatus::Rejected)
            .unwrap();
        assert!(matches!(
            db.respond_dm_request(request.id, DmRequestStatus::Accepted),
            Err(StoreError::AlreadyResolved)
        ));
        assert_eq!(
            db.get_dm_request(request.id).unwrap().status,
            DmRequestStatus::Rejected
        );
        assert!(!db.are_dm_partners(alice.id, bob.id).unwrap());

        // A rejected pair stays blocked.
        let (again, created) = db.request_dm(bob.id, alice.id).unwrap();
        assert!(!created);
        assert_eq!(again.status, DmRequestStatus::Rejected);
    }

    #[test]
    fn respond_validation() {
        let (db, alice, bob) = setup();
        let (request, _) = db.request_dm(alice.id, bob.id).unwrap();

        assert!(matches!(
            db.respond_dm_request(request.id, DmRequestStatus::Pending),
            Err(StoreError::Conflict(_))
        ));
        assert!(matches!(
            db.respond_dm_request(Uuid::new_v4(), DmRequestStatus::Accepted),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn requests_for_user_carry_parties() {
        let (db, alice, bob) = setup();
        let carol = db.create_user("carol", "#00ff00").unwrap();
        db.request_dm(alice.id, bob.id).unwrap();
        db.request_dm(carol.id, alice.id).unwrap();
        db.request_dm(bob.id, carol.id).unwrap();

        let views = db.dm_requests_for_user(alice.id).unwrap();
        assert_eq!(views.len(), 2);
        assert!(views.iter().all(|v| v.request.involves(alice.id)));
        assert_eq!(views[0].to_user.as_ref().unwrap().id, bob.id);
        assert_eq!(views[1].from_user.as_ref().unwrap().id, carol.id);
        assert_eq!(views[1].request.other_party(alice.id), carol.id);
    }
}
