//! Poll engine: one poll per room message, one vote per user.
//!
//! Votes are the only stored state. Counts, percentages and winners are
//! derived from the vote map every time they are read.

use std::collections::BTreeMap;

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Poll, PollResults};
use crate::row::{now, not_found, ts_col, ts_param, uuid_col};

impl Database {
    /// Attach a poll to `message_id`. Option lists are stored as given.
    pub fn create_poll(&self, message_id: Uuid, question: &str, options: &[String]) -> Result<Poll> {
        if self.poll_for_message(message_id)?.is_some() {
            return Err(StoreError::Conflict(format!(
                "message {message_id} already has a poll"
            )));
        }

        let poll = Poll {
            id: Uuid::new_v4(),
            message_id,
            question: question.to_string(),
            options: options.to_vec(),
            votes: BTreeMap::new(),
            timestamp: now(),
        };

        self.conn().execute(
            "INSERT INTO polls (id, message_id, question, options, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                poll.id.to_string(),
                message_id.to_string(),
                poll.question,
                serde_json::to_string(&poll.options)?,
                ts_param(&poll.timestamp),
            ],
        )?;

        tracing::info!(poll_id = %poll.id, message_id = %message_id, options = poll.options.len(), "created poll");
        Ok(poll)
    }

    pub fn get_poll(&self, id: Uuid) -> Result<Poll> {
        let row = self
            .conn()
            .query_row(
                "SELECT id, message_id, question, options, timestamp FROM polls WHERE id = ?1",
                params![id.to_string()],
                row_to_poll_parts,
            )
            .map_err(not_found)?;
        self.hydrate_poll(row)
    }

    pub fn poll_for_message(&self, message_id: Uuid) -> Result<Option<Poll>> {
        let row = self
            .conn()
            .query_row(
                "SELECT id, message_id, question, options, timestamp
                 FROM polls WHERE message_id = ?1",
                params![message_id.to_string()],
                row_to_poll_parts,
            )
            .optional()?;
        row.map(|parts| self.hydrate_poll(parts)).transpose()
    }

    /// Record `user_id`'s choice, replacing any earlier one.
    ///
    /// Neither re-voting nor the index range is checked here.
    pub fn vote(&self, poll_id: Uuid, option_index: usize, user_id: Uuid) -> Result<Poll> {
        let exists: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM polls WHERE id = ?1",
                params![poll_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(StoreError::NotFound);
        }

        self.conn().execute(
            "INSERT INTO poll_votes (poll_id, user_id, option_index, voted_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(poll_id, user_id)
             DO UPDATE SET option_index = excluded.option_index, voted_at = excluded.voted_at",
            params![
                poll_id.to_string(),
                user_id.to_string(),
                option_index as i64,
                ts_param(&now()),
            ],
        )?;

        tracing::debug!(poll_id = %poll_id, user_id = %user_id, option_index, "recorded vote");
        self.get_poll(poll_id)
    }

    fn hydrate_poll(&self, parts: PollParts) -> Result<Poll> {
        let PollParts {
            id,
            message_id,
            question,
            options_json,
            timestamp,
        } = parts;

        let mut stmt = self
            .conn()
            .prepare("SELECT user_id, option_index FROM poll_votes WHERE poll_id = ?1")?;
        let rows = stmt.query_map(params![id.to_string()], |row| {
            let user_id = uuid_col(row, 0)?;
            let index: i64 = row.get(1)?;
            Ok((user_id, index))
        })?;

        let mut votes = BTreeMap::new();
        for row in rows {
            let (user_id, index) = row?;
            votes.insert(user_id, usize::try_from(index).unwrap_or(usize::MAX));
        }

        Ok(Poll {
            id,
            message_id,
            question,
            options: serde_json::from_str(&options_json)?,
            votes,
            timestamp,
        })
    }
}

impl Poll {
    /// Number of distinct voters.
    pub fn total_voters(&self) -> usize {
        self.votes.len()
    }

    /// Option index -> vote count, for every index that received a vote.
    pub fn tally(&self) -> BTreeMap<usize, usize> {
        let mut counts = BTreeMap::new();
        for index in self.votes.values() {
            *counts.entry(*index).or_insert(0) += 1;
        }
        counts
    }

    /// Option index -> share of voters, rounded to the nearest percent.
    pub fn percentages(&self) -> BTreeMap<usize, u32> {
        let total = self.total_voters();
        self.tally()
            .into_iter()
            .map(|(index, count)| (index, percent(count, total)))
            .collect()
    }

    /// Indices sharing the highest count. Empty until someone votes.
    pub fn winners(&self) -> Vec<usize> {
        let tally = self.tally();
        let Some(max) = tally.values().copied().max() else {
            return Vec::new();
        };
        tally
            .into_iter()
            .filter(|(_, count)| *count == max)
            .map(|(index, _)| index)
            .collect()
    }

    /// Breakdown over every declared option, zeros included.
    pub fn results(&self) -> PollResults {
        let total = self.total_voters();
        let tally = self.tally();
        let counts: Vec<usize> = (0..self.options.len())
            .map(|i| tally.get(&i).copied().unwrap_or(0))
            .collect();
        let percentages = counts.iter().map(|c| percent(*c, total)).collect();

        PollResults {
            total_voters: total,
            counts,
            percentages,
            winners: self.winners(),
        }
    }
}

fn percent(count: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    (count as f64 / total as f64 * 100.0).round() as u32
}

struct PollParts {
    id: Uuid,
    message_id: Uuid,
    question: String,
    options_json: String,
    timestamp: chrono::DateTime<Utc>,
}

fn row_to_poll_parts(row: &rusqlite::Row<'_>) -> rusqlite::Result<PollParts> {
    Ok(PollParts {
        id: uuid_col(row, 0)?,
        message_id: uuid_col(row, 1)?,
        question: row.get(2)?,
        options_json: row.get(3)?,
        timestamp: ts_col(row, 4)?,
    })
}
