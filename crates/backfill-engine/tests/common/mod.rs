//! In-memory stores and oracle for job-level tests
//!
//! The fakes implement the same traits as the PostgreSQL stores and record
//! every call so tests can assert on ordering as well as on final state.

#![allow(dead_code)]

use async_trait::async_trait;
use backfill_engine::db::{DbError, DbResult};
use backfill_engine::migrate::{MigrationStore, RawCodeRow, WindowSession};
use backfill_engine::oracle::{Oracle, OracleError, OracleQuery};
use backfill_engine::reconcile::{BalanceRow, BalanceStore, BalanceUpdate};
use backfill_engine::window::BatchWindow;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub fn dec(raw: &str) -> BigDecimal {
    BigDecimal::from_str(raw).unwrap()
}

// ============================================================================
// TransactionDetails
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailRow {
    pub code: Option<String>,
    pub codetext: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Fetch(BatchWindow),
    Convert(BatchWindow),
    Commit,
    Rollback,
}

#[derive(Clone, Default)]
pub struct FakeMigrationStore {
    rows: Arc<Mutex<BTreeMap<i64, DetailRow>>>,
    events: Arc<Mutex<Vec<SessionEvent>>>,
}

impl FakeMigrationStore {
    /// Rows `1..=count`, each holding a JSON string in `code`.
    pub fn with_string_codes(count: i64) -> Self {
        let store = Self::default();
        for id in 1..=count {
            store.insert(id, Some(&format!("\"(coin.transfer \\\"a\\\" \\\"b\\\" {}.0)\"", id)));
        }
        store
    }

    pub fn insert(&self, id: i64, code: Option<&str>) {
        self.rows.lock().unwrap().insert(
            id,
            DetailRow {
                code: code.map(str::to_string),
                codetext: None,
            },
        );
    }

    pub fn row(&self, id: i64) -> Option<DetailRow> {
        self.rows.lock().unwrap().get(&id).cloned()
    }

    pub fn converted_count(&self) -> usize {
        self.rows
            .lock()
            .unwrap()
            .values()
            .filter(|row| row.codetext.is_some())
            .count()
    }

    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear_events(&self) {
        self.events.lock().unwrap().clear();
    }
}

#[async_trait]
impl MigrationStore for FakeMigrationStore {
    async fn resume_boundary(&self) -> DbResult<Option<i64>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, row)| {
                matches!(row.code.as_deref(), Some(code) if code != "{}") && row.codetext.is_none()
            })
            .map(|(id, _)| *id)
            .max())
    }

    async fn begin_window(&self) -> DbResult<Box<dyn WindowSession>> {
        Ok(Box::new(FakeSession {
            rows: Arc::clone(&self.rows),
            events: Arc::clone(&self.events),
            staged: Vec::new(),
        }))
    }
}

struct FakeSession {
    rows: Arc<Mutex<BTreeMap<i64, DetailRow>>>,
    events: Arc<Mutex<Vec<SessionEvent>>>,
    staged: Vec<(i64, Option<String>)>,
}

impl FakeSession {
    fn log(&self, event: SessionEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl WindowSession for FakeSession {
    async fn fetch_window(&mut self, window: BatchWindow) -> DbResult<Vec<RawCodeRow>> {
        self.log(SessionEvent::Fetch(window));
        Ok(self
            .rows
            .lock()
            .unwrap()
            .range(window.low..=window.high)
            .rev()
            .map(|(id, row)| RawCodeRow {
                id: *id,
                code: row.code.clone(),
            })
            .collect())
    }

    async fn convert_window(&mut self, window: BatchWindow) -> DbResult<u64> {
        self.log(SessionEvent::Convert(window));
        let rows = self.rows.lock().unwrap();
        for (id, row) in rows.range(window.low..=window.high) {
            let text = match row.code.as_deref() {
                None | Some("{}") => None,
                Some(raw) => Some(serde_json::from_str::<String>(raw).unwrap_or_else(|_| raw.to_string())),
            };
            self.staged.push((*id, text));
        }
        Ok(self.staged.len() as u64)
    }

    async fn commit(self: Box<Self>) -> DbResult<()> {
        self.log(SessionEvent::Commit);
        let mut rows = self.rows.lock().unwrap();
        for (id, text) in &self.staged {
            if let Some(row) = rows.get_mut(id) {
                row.codetext = text.clone();
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> DbResult<()> {
        self.log(SessionEvent::Rollback);
        Ok(())
    }
}

// ============================================================================
// Balances
// ============================================================================

#[derive(Clone, Default)]
pub struct FakeBalanceStore {
    rows: Arc<Mutex<BTreeMap<i64, (BalanceRow, DateTime<Utc>)>>>,
    applied: Arc<Mutex<Vec<BatchWindow>>>,
    fail_window_containing: Arc<Mutex<Option<i64>>>,
}

impl FakeBalanceStore {
    pub fn insert(&self, id: i64, account: &str, chain_id: &str, balance: &str, token: bool) {
        self.insert_at(id, account, chain_id, balance, token, Utc::now());
    }

    pub fn insert_at(
        &self,
        id: i64,
        account: &str,
        chain_id: &str,
        balance: &str,
        token: bool,
        updated_at: DateTime<Utc>,
    ) {
        let row = BalanceRow {
            id,
            account: account.to_string(),
            chain_id: chain_id.to_string(),
            module: "coin".to_string(),
            has_token_id: token,
            balance: dec(balance),
        };
        self.rows.lock().unwrap().insert(id, (row, updated_at));
    }

    pub fn set_module(&self, id: i64, module: &str) {
        if let Some((row, _)) = self.rows.lock().unwrap().get_mut(&id) {
            row.module = module.to_string();
        }
    }

    pub fn balance(&self, id: i64) -> Option<BigDecimal> {
        self.rows
            .lock()
            .unwrap()
            .get(&id)
            .map(|(row, _)| row.balance.clone())
    }

    pub fn snapshot(&self) -> BTreeMap<i64, BigDecimal> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .map(|(id, (row, _))| (*id, row.balance.clone()))
            .collect()
    }

    pub fn applied_windows(&self) -> Vec<BatchWindow> {
        self.applied.lock().unwrap().clone()
    }

    /// Make the commit of whichever window contains `id` fail.
    pub fn fail_commit_at(&self, id: i64) {
        *self.fail_window_containing.lock().unwrap() = Some(id);
    }
}

#[async_trait]
impl BalanceStore for FakeBalanceStore {
    async fn max_key(&self) -> DbResult<Option<i64>> {
        Ok(self.rows.lock().unwrap().keys().next_back().copied())
    }

    async fn fetch_page(
        &self,
        after: i64,
        limit: i64,
        updated_since: Option<DateTime<Utc>>,
    ) -> DbResult<Vec<BalanceRow>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .range(after + 1..)
            .filter(|(_, (_, updated_at))| updated_since.map_or(true, |since| *updated_at >= since))
            .take(limit as usize)
            .map(|(_, (row, _))| row.clone())
            .collect())
    }

    async fn apply_window(
        &self,
        window: BatchWindow,
        updates: &[BalanceUpdate],
        dry_run: bool,
    ) -> DbResult<u64> {
        if let Some(id) = *self.fail_window_containing.lock().unwrap() {
            if window.contains(id) {
                return Err(DbError::Sqlx(sqlx::Error::PoolClosed));
            }
        }

        let mut rows = self.rows.lock().unwrap();
        let mut touched = 0;
        for update in updates.iter().filter(|update| window.contains(update.id)) {
            if let Some((row, updated_at)) = rows.get_mut(&update.id) {
                touched += 1;
                if !dry_run {
                    row.balance = update.balance.clone();
                    *updated_at = Utc::now();
                }
            }
        }
        self.applied.lock().unwrap().push(window);
        Ok(touched)
    }
}

// ============================================================================
// Oracle
// ============================================================================

fn answer_key(account: &str, chain_id: &str) -> (String, String) {
    let query = OracleQuery::balance("coin", account, chain_id).unwrap();
    (query.chain, query.code)
}

/// Answers balance queries per `(chain, code)`; unknown queries fail.
#[derive(Default)]
pub struct FakeOracle {
    answers: Mutex<HashMap<(String, String), Result<BigDecimal, String>>>,
    calls: AtomicUsize,
}

impl FakeOracle {
    pub fn with_balance(self, account: &str, chain_id: &str, balance: &str) -> Self {
        self.answers
            .lock()
            .unwrap()
            .insert(answer_key(account, chain_id), Ok(dec(balance)));
        self
    }

    pub fn with_failure(self, account: &str, chain_id: &str, message: &str) -> Self {
        self.answers
            .lock()
            .unwrap()
            .insert(answer_key(account, chain_id), Err(message.to_string()));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Oracle for FakeOracle {
    async fn query(&self, query: &OracleQuery) -> Result<BigDecimal, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;

        let key = (query.chain.clone(), query.code.clone());
        match self.answers.lock().unwrap().get(&key) {
            Some(Ok(value)) => Ok(value.clone()),
            Some(Err(message)) => Err(OracleError::Malformed(message.clone())),
            None => Err(OracleError::Status {
                status: "failure".to_string(),
                detail: format!("no row for {}", query.code),
            }),
        }
    }
}
