use dashmap::DashMap;

use crate::error::StoreError;
use crate::model::{
    Challenge, ChallengeRecord, ChallengeStatus, ConsumeOutcome, Consumption, PaymentProof,
};

/// Trait for challenge storage backends.
///
/// Implementations must be thread-safe (`Send + Sync`) and must make
/// [`compare_and_consume`](ChallengeStore::compare_and_consume) a single
/// atomic step: two concurrent callers for the same challenge can never both
/// observe `Consumed`.
pub trait ChallengeStore: Send + Sync {
    /// Persist a freshly issued challenge.
    fn put(&self, challenge: &Challenge) -> Result<(), StoreError>;

    /// Fetch a challenge and whatever was recorded when it was consumed.
    /// The returned status is the stored one; callers apply expiry.
    fn get(&self, id: &str) -> Result<Option<ChallengeRecord>, StoreError>;

    /// Atomically move a challenge from Issued to Consumed, recording the
    /// proof and the id of the token minted for it.
    ///
    /// Fails (without side effects) when the challenge is unknown, already
    /// consumed, expired at `now`, or when the proof's transaction reference
    /// already satisfied another challenge.
    fn compare_and_consume(
        &self,
        consumption: &Consumption,
        now: u64,
    ) -> Result<ConsumeOutcome, StoreError>;

    /// All accepted proofs, newest first.
    fn proofs(&self) -> Result<Vec<PaymentProof>, StoreError>;

    /// Delete issued challenges that expired before `now`. Returns number purged.
    /// Consumed challenges are kept: their proofs back payment history and
    /// outstanding tokens.
    fn purge_expired(&self, now: u64) -> Result<usize, StoreError>;
}

/// Transaction references are compared case-insensitively (hex hashes).
fn reference_key(tx_reference: &str) -> String {
    tx_reference.trim().to_ascii_lowercase()
}

/// In-memory store backed by DashMap. Fast but lost on restart.
pub struct InMemoryChallengeStore {
    records: DashMap<String, ChallengeRecord>,
    /// Spent transaction reference -> challenge it satisfied.
    references: DashMap<String, String>,
}

impl InMemoryChallengeStore {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            references: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for InMemoryChallengeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChallengeStore for InMemoryChallengeStore {
    fn put(&self, challenge: &Challenge) -> Result<(), StoreError> {
        use dashmap::mapref::entry::Entry;
        match self.records.entry(challenge.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(challenge.id.clone())),
            Entry::Vacant(v) => {
                v.insert(ChallengeRecord {
                    challenge: challenge.clone(),
                    proof: None,
                    token_id: None,
                });
                Ok(())
            }
        }
    }

    fn get(&self, id: &str) -> Result<Option<ChallengeRecord>, StoreError> {
        Ok(self.records.get(id).map(|r| r.value().clone()))
    }

    fn compare_and_consume(
        &self,
        consumption: &Consumption,
        now: u64,
    ) -> Result<ConsumeOutcome, StoreError> {
        use dashmap::mapref::entry::Entry;

        let proof = &consumption.proof;

        // The record's shard lock is held for the whole transition. Lock order
        // is always records -> references, so the nested entry cannot deadlock.
        let Some(mut record) = self.records.get_mut(&proof.challenge_id) else {
            return Ok(ConsumeOutcome::NotFound);
        };

        match record.challenge.status_at(now) {
            ChallengeStatus::Expired => return Ok(ConsumeOutcome::Expired),
            ChallengeStatus::Consumed => return Ok(ConsumeOutcome::AlreadyConsumed),
            ChallengeStatus::Issued => {}
        }

        match self.references.entry(reference_key(&proof.tx_reference)) {
            Entry::Occupied(_) => return Ok(ConsumeOutcome::ReferenceReused),
            Entry::Vacant(v) => {
                v.insert(proof.challenge_id.clone());
            }
        }

        record.challenge.status = ChallengeStatus::Consumed;
        record.proof = Some(proof.clone());
        record.token_id = Some(consumption.token_id.clone());
        Ok(ConsumeOutcome::Consumed)
    }

    fn proofs(&self) -> Result<Vec<PaymentProof>, StoreError> {
        let mut proofs: Vec<PaymentProof> = self
            .records
            .iter()
            .filter_map(|r| r.value().proof.clone())
            .collect();
        proofs.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        Ok(proofs)
    }

    fn purge_expired(&self, now: u64) -> Result<usize, StoreError> {
        let before = self.records.len();
        self.records.retain(|_, r| {
            r.challenge.status != ChallengeStatus::Issued || now <= r.challenge.expires_at
        });
        Ok(before - self.records.len())
    }
}

#[cfg(feature = "full")]
pub use sqlite::SqliteChallengeStore;

#[cfg(feature = "full")]
mod sqlite {
    use std::str::FromStr;
    use std::sync::{Mutex, MutexGuard};

    use alloy::primitives::Address;
    use rusqlite::{params, OptionalExtension};

    use super::{reference_key, ChallengeStore};
    use crate::error::StoreError;
    use crate::model::{
        Challenge, ChallengeRecord, ChallengeStatus, ConsumeOutcome, Consumption, PaymentProof,
    };

    /// Persistent store backed by SQLite. Survives restarts.
    pub struct SqliteChallengeStore {
        conn: Mutex<rusqlite::Connection>,
    }

    impl SqliteChallengeStore {
        /// Open (or create) a SQLite challenge database at the given path.
        ///
        /// On Unix the file permissions are restricted to 0600.
        pub fn open(path: &str) -> Result<Self, StoreError> {
            let conn = rusqlite::Connection::open(path)?;
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS challenges (
                    id TEXT PRIMARY KEY,
                    required_amount TEXT NOT NULL,
                    amount TEXT NOT NULL,
                    token TEXT NOT NULL,
                    recipient TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    expires_at INTEGER NOT NULL,
                    status TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS payment_proofs (
                    challenge_id TEXT PRIMARY KEY REFERENCES challenges(id),
                    tx_reference TEXT NOT NULL,
                    reference_key TEXT NOT NULL UNIQUE,
                    payer TEXT NOT NULL,
                    submitted_at INTEGER NOT NULL,
                    token_id TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_challenges_status_expiry
                    ON challenges(status, expires_at);
                CREATE INDEX IF NOT EXISTS idx_proofs_submitted_at
                    ON payment_proofs(submitted_at);
                PRAGMA journal_mode=WAL;",
            )?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Err(e) =
                    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                {
                    tracing::warn!(
                        path = %path,
                        error = %e,
                        "failed to set challenge database file permissions to 0600"
                    );
                }
            }

            Ok(Self {
                conn: Mutex::new(conn),
            })
        }

        fn lock(&self) -> MutexGuard<'_, rusqlite::Connection> {
            match self.conn.lock() {
                Ok(c) => c,
                Err(poisoned) => {
                    tracing::error!("challenge store mutex poisoned, recovering");
                    poisoned.into_inner()
                }
            }
        }
    }

    /// SQLite stores INTEGER as i64; unix seconds always fit, anything beyond
    /// saturates so expiry checks stay monotonic.
    fn to_sql_time(t: u64) -> i64 {
        i64::try_from(t).unwrap_or(i64::MAX)
    }

    fn from_sql_time(t: i64) -> u64 {
        u64::try_from(t).unwrap_or(0)
    }

    fn parse_address(id: &str, raw: &str) -> Result<Address, StoreError> {
        Address::from_str(raw).map_err(|e| StoreError::Corrupt {
            id: id.to_string(),
            reason: format!("bad address '{raw}': {e}"),
        })
    }

    struct JoinedRow {
        id: String,
        required_amount: String,
        amount: String,
        token: String,
        recipient: String,
        created_at: i64,
        expires_at: i64,
        status: String,
        tx_reference: Option<String>,
        payer: Option<String>,
        submitted_at: Option<i64>,
        token_id: Option<String>,
    }

    impl JoinedRow {
        fn into_record(self) -> Result<ChallengeRecord, StoreError> {
            let status = ChallengeStatus::parse(&self.status).ok_or_else(|| StoreError::Corrupt {
                id: self.id.clone(),
                reason: format!("unknown status '{}'", self.status),
            })?;
            let recipient_address = parse_address(&self.id, &self.recipient)?;

            let proof = match (self.tx_reference, self.payer, self.submitted_at) {
                (Some(tx_reference), Some(payer), Some(submitted_at)) => Some(PaymentProof {
                    challenge_id: self.id.clone(),
                    tx_reference,
                    payer_address: parse_address(&self.id, &payer)?,
                    submitted_at: from_sql_time(submitted_at),
                }),
                _ => None,
            };

            Ok(ChallengeRecord {
                challenge: Challenge {
                    id: self.id,
                    required_amount: self.required_amount,
                    amount: self.amount,
                    token: self.token,
                    recipient_address,
                    created_at: from_sql_time(self.created_at),
                    expires_at: from_sql_time(self.expires_at),
                    status,
                },
                proof,
                token_id: self.token_id,
            })
        }
    }

    impl ChallengeStore for SqliteChallengeStore {
        fn put(&self, challenge: &Challenge) -> Result<(), StoreError> {
            let conn = self.lock();
            let result = conn.execute(
                "INSERT INTO challenges
                    (id, required_amount, amount, token, recipient, created_at, expires_at, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    challenge.id,
                    challenge.required_amount,
                    challenge.amount,
                    challenge.token,
                    format!("{}", challenge.recipient_address),
                    to_sql_time(challenge.created_at),
                    to_sql_time(challenge.expires_at),
                    challenge.status.as_str(),
                ],
            );
            match result {
                Ok(_) => Ok(()),
                Err(rusqlite::Error::SqliteFailure(ref err, _))
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    Err(StoreError::Duplicate(challenge.id.clone()))
                }
                Err(e) => Err(e.into()),
            }
        }

        fn get(&self, id: &str) -> Result<Option<ChallengeRecord>, StoreError> {
            let conn = self.lock();
            let row = conn
                .query_row(
                    "SELECT c.id, c.required_amount, c.amount, c.token, c.recipient,
                            c.created_at, c.expires_at, c.status,
                            p.tx_reference, p.payer, p.submitted_at, p.token_id
                     FROM challenges c
                     LEFT JOIN payment_proofs p ON p.challenge_id = c.id
                     WHERE c.id = ?1",
                    [id],
                    |r| {
                        Ok(JoinedRow {
                            id: r.get(0)?,
                            required_amount: r.get(1)?,
                            amount: r.get(2)?,
                            token: r.get(3)?,
                            recipient: r.get(4)?,
                            created_at: r.get(5)?,
                            expires_at: r.get(6)?,
                            status: r.get(7)?,
                            tx_reference: r.get(8)?,
                            payer: r.get(9)?,
                            submitted_at: r.get(10)?,
                            token_id: r.get(11)?,
                        })
                    },
                )
                .optional()?;
            row.map(JoinedRow::into_record).transpose()
        }

        fn compare_and_consume(
            &self,
            consumption: &Consumption,
            now: u64,
        ) -> Result<ConsumeOutcome, StoreError> {
            let proof = &consumption.proof;
            let mut conn = self.lock();
            // Dropping `tx` without commit rolls back every early return below.
            let tx = conn.transaction()?;

            let updated = tx.execute(
                "UPDATE challenges SET status = 'consumed'
                 WHERE id = ?1 AND status = 'issued' AND expires_at >= ?2",
                params![proof.challenge_id, to_sql_time(now)],
            )?;

            if updated == 0 {
                let row: Option<(String, i64)> = tx
                    .query_row(
                        "SELECT status, expires_at FROM challenges WHERE id = ?1",
                        [&proof.challenge_id],
                        |r| Ok((r.get(0)?, r.get(1)?)),
                    )
                    .optional()?;
                return Ok(match row {
                    None => ConsumeOutcome::NotFound,
                    Some((_, expires_at)) if expires_at < to_sql_time(now) => {
                        ConsumeOutcome::Expired
                    }
                    Some((status, _)) if status == "consumed" => ConsumeOutcome::AlreadyConsumed,
                    Some(_) => ConsumeOutcome::Expired,
                });
            }

            let inserted = tx.execute(
                "INSERT INTO payment_proofs
                    (challenge_id, tx_reference, reference_key, payer, submitted_at, token_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    proof.challenge_id,
                    proof.tx_reference,
                    reference_key(&proof.tx_reference),
                    format!("{}", proof.payer_address),
                    to_sql_time(proof.submitted_at),
                    consumption.token_id,
                ],
            );
            match inserted {
                Ok(_) => {}
                Err(rusqlite::Error::SqliteFailure(ref err, _))
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    return Ok(ConsumeOutcome::ReferenceReused);
                }
                Err(e) => return Err(e.into()),
            }

            tx.commit()?;
            Ok(ConsumeOutcome::Consumed)
        }

        fn proofs(&self) -> Result<Vec<PaymentProof>, StoreError> {
            let conn = self.lock();
            let mut stmt = conn.prepare(
                "SELECT challenge_id, tx_reference, payer, submitted_at
                 FROM payment_proofs
                 ORDER BY submitted_at DESC",
            )?;
            let rows = stmt
                .query_map([], |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, i64>(3)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|(challenge_id, tx_reference, payer, submitted_at)| {
                    Ok(PaymentProof {
                        payer_address: parse_address(&challenge_id, &payer)?,
                        challenge_id,
                        tx_reference,
                        submitted_at: from_sql_time(submitted_at),
                    })
                })
                .collect()
        }

        fn purge_expired(&self, now: u64) -> Result<usize, StoreError> {
            let conn = self.lock();
            let purged = conn.execute(
                "DELETE FROM challenges WHERE status = 'issued' AND expires_at < ?1",
                params![to_sql_time(now)],
            )?;
            Ok(purged)
        }
    }
}
