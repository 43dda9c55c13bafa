//! Intent Journal
//!
//! Write-ahead record of gateway calls that create money-movement intents.
//! An entry is written before the gateway is called and advanced as the call
//! completes, so a payment that the gateway accepted but the store never saw
//! can be rebuilt on the next reconciliation pass.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};

use crate::error::{PaymentError, Result};
use crate::model::{FundingRef, NewPayment, PaymentId, PaymentStatus, ReferenceId, UserId};

/// Progress of one gateway call
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum IntentState {
    /// Written before the gateway call; outcome unknown
    Recorded,
    /// Gateway accepted; local record may not exist yet
    Accepted {
        funding: FundingRef,
        checkout_url: String,
        status: PaymentStatus,
    },
    /// Local record stored
    Persisted,
    /// Gateway call failed; nothing exists remotely
    Failed { reason: String },
}

/// Journal entry, keyed by reference id
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntentEntry {
    pub reference_id: ReferenceId,
    pub payment_id: PaymentId,
    pub payer_id: UserId,
    pub payee_id: UserId,
    /// Decimal string on disk
    pub amount: Decimal,
    pub title: String,
    pub description: String,
    pub state: IntentState,
    pub recorded_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IntentEntry {
    pub fn is_open(&self) -> bool {
        matches!(
            self.state,
            IntentState::Recorded | IntentState::Accepted { .. }
        )
    }

    /// Same entry moved to `state`
    pub fn advance(&self, state: IntentState) -> Self {
        Self {
            state,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }

    /// Fields to rebuild the payment from an `Accepted` entry
    pub fn to_new_payment(&self) -> Option<NewPayment> {
        match &self.state {
            IntentState::Accepted {
                funding,
                checkout_url,
                status,
            } => Some(NewPayment {
                id: self.payment_id,
                reference_id: self.reference_id.clone(),
                payer_id: self.payer_id,
                payee_id: self.payee_id,
                amount: self.amount,
                title: self.title.clone(),
                description: self.description.clone(),
                status: *status,
                funding: funding.clone(),
                checkout_url: Some(checkout_url.clone()).filter(|u| !u.is_empty()),
            }),
            _ => None,
        }
    }
}

/// Intent journal trait
#[async_trait]
pub trait IntentJournal: Send + Sync {
    /// Record the latest state of an entry (replaces earlier states)
    async fn append(&self, entry: &IntentEntry) -> Result<()>;

    /// Entries still `Recorded` or `Accepted`, oldest first
    async fn open_entries(&self) -> Result<Vec<IntentEntry>>;

    /// Discard closed entries from durable storage
    async fn compact(&self) -> Result<()> {
        Ok(())
    }
}

fn open_sorted(entries: &HashMap<String, IntentEntry>) -> Vec<IntentEntry> {
    let mut open: Vec<IntentEntry> = entries
        .values()
        .filter(|e| e.is_open())
        .cloned()
        .collect();
    open.sort_by_key(|e| e.recorded_at);
    open
}

/// In-memory journal (for development and tests); keeps closed entries
#[derive(Default)]
pub struct MemoryIntentJournal {
    entries: RwLock<HashMap<String, IntentEntry>>,
}

impl MemoryIntentJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, reference_id: &str) -> Option<IntentEntry> {
        self.entries.read().await.get(reference_id).cloned()
    }
}

#[async_trait]
impl IntentJournal for MemoryIntentJournal {
    async fn append(&self, entry: &IntentEntry) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(entry.reference_id.to_string(), entry.clone());
        Ok(())
    }

    async fn open_entries(&self) -> Result<Vec<IntentEntry>> {
        Ok(open_sorted(&*self.entries.read().await))
    }
}

/// Append-only JSON-lines journal on local disk
///
/// Every state change is one line; replay keeps the last line per reference
/// id. Each append is flushed and synced before returning. Only open entries
/// are held in memory, and [`IntentJournal::compact`] rewrites the file with
/// just those.
pub struct FileIntentJournal {
    path: PathBuf,
    writer: Mutex<Writer>,
    open: RwLock<HashMap<String, IntentEntry>>,
}

struct Writer {
    file: tokio::fs::File,
    /// Lines on disk that no longer describe an open entry
    stale: usize,
}

impl FileIntentJournal {
    /// Open (or create) the journal at `path`, replay it and compact it
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut entries = HashMap::new();
        let mut lines = 0_usize;

        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                for (line_no, line) in contents.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    lines += 1;
                    match serde_json::from_str::<IntentEntry>(line) {
                        Ok(entry) => {
                            entries.insert(entry.reference_id.to_string(), entry);
                        }
                        // A torn final write is expected after a crash
                        Err(e) => tracing::warn!(
                            path = %path.display(),
                            line = line_no + 1,
                            error = %e,
                            "Skipping unreadable journal line"
                        ),
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(PaymentError::Journal(format!("read {}: {e}", path.display()))),
        }

        entries.retain(|_, e| e.is_open());
        let file = if lines > entries.len() {
            rewrite(&path, &open_sorted(&entries)).await?
        } else {
            append_handle(&path).await?
        };

        tracing::info!(
            path = %path.display(),
            open = entries.len(),
            discarded = lines.saturating_sub(entries.len()),
            "Intent journal loaded"
        );

        Ok(Self {
            path,
            writer: Mutex::new(Writer { file, stale: 0 }),
            open: RwLock::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

async fn append_handle(path: &Path) -> Result<tokio::fs::File> {
    tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| PaymentError::Journal(format!("open {}: {e}", path.display())))
}

/// Replace the file at `path` with `entries`, returning a fresh append handle
async fn rewrite(path: &Path, entries: &[IntentEntry]) -> Result<tokio::fs::File> {
    let mut contents = Vec::new();
    for entry in entries {
        serde_json::to_writer(&mut contents, entry)?;
        contents.push(b'\n');
    }

    let io = |e: std::io::Error| PaymentError::Journal(format!("compact {}: {e}", path.display()));
    let tmp = path.with_extension("compacting");
    let mut file = tokio::fs::File::create(&tmp).await.map_err(io)?;
    file.write_all(&contents).await.map_err(io)?;
    file.sync_all().await.map_err(io)?;
    drop(file);
    tokio::fs::rename(&tmp, path).await.map_err(io)?;

    append_handle(path).await
}

#[async_trait]
impl IntentJournal for FileIntentJournal {
    async fn append(&self, entry: &IntentEntry) -> Result<()> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        let io = |e: std::io::Error| PaymentError::Journal(format!("write: {e}"));
        writer.file.write_all(&line).await.map_err(io)?;
        writer.file.flush().await.map_err(io)?;
        writer.file.sync_data().await.map_err(io)?;

        let key = entry.reference_id.to_string();
        let mut open = self.open.write().await;
        let previous = if entry.is_open() {
            open.insert(key, entry.clone())
        } else {
            writer.stale += 1;
            open.remove(&key)
        };
        if previous.is_some() {
            writer.stale += 1;
        }
        Ok(())
    }

    async fn open_entries(&self) -> Result<Vec<IntentEntry>> {
        Ok(open_sorted(&*self.open.read().await))
    }

    async fn compact(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        if writer.stale == 0 {
            return Ok(());
        }
        let open = open_sorted(&*self.open.read().await);
        writer.file = rewrite(&self.path, &open).await?;
        tracing::debug!(
            path = %self.path.display(),
            open = open.len(),
            discarded = writer.stale,
            "Intent journal compacted"
        );
        writer.stale = 0;
        Ok(())
    }
}
