#![allow(dead_code)]

use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use formgate_core::db::Database;
use formgate_core::email::{EmailError, MailTransport, OutgoingEmail};
use formgate_core::schema::{FormDefinition, FormSchema};
use formgate_core::store::SqliteStore;
use formgate_core::tester::{TesterClient, TesterError};
use formgate_core::Submission;
use serde_json::{Map, Value};
use tempfile::TempDir;

pub async fn sqlite(dir: &TempDir) -> Result<Database> {
    sqlite_with_pool(dir, 2).await
}

pub async fn sqlite_with_pool(dir: &TempDir, max_connections: u32) -> Result<Database> {
    let store = SqliteStore::connect(&dir.path().join("forms.db"), max_connections).await?;
    store.run_migrations().await?;
    Ok(Database::from_sqlite(store))
}

pub fn schema(id: &str, definition: Value) -> Result<FormSchema> {
    let definition: FormDefinition = serde_json::from_value(definition)?;
    Ok(FormSchema::resolve(id, &definition)?)
}

pub fn data(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

pub fn submission(form_id: &str, value: Value) -> Submission {
    Submission::new(form_id, data(value), "127.0.0.1", "tests")
}

/// Records every message; fails every send when `fail` is set.
#[derive(Default)]
pub struct RecordingTransport {
    pub sent: Mutex<Vec<OutgoingEmail>>,
    pub fail: bool,
}

impl RecordingTransport {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailTransport for RecordingTransport {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), EmailError> {
        if self.fail {
            return Err(EmailError::NotImplemented("Recording"));
        }
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailAt {
    Nothing,
    Insert,
    Update,
    Commit,
}

/// In-memory tester list that logs each call it receives.
pub struct FakeTesters {
    pub testers: Mutex<Vec<String>>,
    pub calls: Mutex<Vec<String>>,
    pub fail_at: FailAt,
}

impl FakeTesters {
    pub fn new(existing: &[&str], fail_at: FailAt) -> Self {
        Self {
            testers: Mutex::new(existing.iter().map(|s| s.to_string()).collect()),
            calls: Mutex::new(Vec::new()),
            fail_at,
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn testers(&self) -> Vec<String> {
        self.testers.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn failure(operation: &'static str) -> TesterError {
        TesterError::Api {
            operation,
            status: 500,
            body: "boom".into(),
        }
    }
}

#[async_trait]
impl TesterClient for FakeTesters {
    async fn insert_edit(&self) -> Result<String, TesterError> {
        self.record("insert".into());
        if self.fail_at == FailAt::Insert {
            return Err(Self::failure("insert edit"));
        }
        Ok("edit-1".into())
    }

    async fn get_testers(&self, edit_id: &str, track: &str) -> Result<Vec<String>, TesterError> {
        self.record(format!("get {edit_id} {track}"));
        Ok(self.testers())
    }

    async fn update_testers(
        &self,
        edit_id: &str,
        track: &str,
        testers: &[String],
    ) -> Result<(), TesterError> {
        self.record(format!("update {edit_id} {track}"));
        if self.fail_at == FailAt::Update {
            return Err(Self::failure("update testers"));
        }
        *self.testers.lock().unwrap() = testers.to_vec();
        Ok(())
    }

    async fn commit_edit(&self, edit_id: &str) -> Result<(), TesterError> {
        self.record(format!("commit {edit_id}"));
        if self.fail_at == FailAt::Commit {
            return Err(Self::failure("commit edit"));
        }
        Ok(())
    }

    async fn delete_edit(&self, edit_id: &str) -> Result<(), TesterError> {
        self.record(format!("delete {edit_id}"));
        Ok(())
    }
}
