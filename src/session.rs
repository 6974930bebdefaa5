//! Import session controller.
//!
//! One session covers one lane (purchase orders or bank slips) end to end:
//! bootstrap under a watchdog, today-first folder scan with an all-dates
//! fallback, the bounded-concurrency batch over new files, and the
//! confirmation-queue draining that follows. Counters are tallied here, by a
//! single writer, from the outcomes the per-file tasks return.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::batch::{run_in_groups, Progress};
use crate::contract::{
    DecisionProvider, DomainStore, DriveStore, FolderType, LedgerStore, MatchDecision, PrMode,
    PoResolution, RemoteFile, SlipResolution, StoreError, SupplierCandidate,
};
use crate::drive::format_folder_date;
use crate::engine::{PoOutcome, ReconcileEngine, SlipOutcome};
use crate::queue::{ConfirmationQueues, Phase};

/// Files processed concurrently within one batch group.
pub const PARALLEL_LIMIT: usize = 3;

/// Bootstrap budget: config checks plus domain preloads must finish in time
/// or the session fails closed.
pub const INIT_TIMEOUT: Duration = Duration::from_secs(25);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportStats {
    /// Records created: purchase orders and reconstructed payment requests.
    pub created: u32,
    /// Slips settled against an existing payment request.
    pub matched: u32,
    /// Files that errored and stayed unledgered for a later retry.
    pub failed: u32,
    /// Files explicitly skipped by the user.
    pub skipped: u32,
}

/// Cooperative cancellation. Flipping the flag stops the session from
/// starting new phases; in-flight work finishes normally.
#[derive(Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

pub struct SessionOptions {
    pub folder_type: FolderType,
    pub folder_url: Option<String>,
    pub init_timeout: Duration,
}

impl SessionOptions {
    pub fn new(folder_type: FolderType, folder_url: Option<String>) -> Self {
        Self {
            folder_type,
            folder_url,
            init_timeout: INIT_TIMEOUT,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("initialization did not finish within {0:?}")]
    InitTimeout(Duration),
    #[error("date-folder discovery failed: {0}")]
    Discovery(String),
    #[error("store operation failed: {0}")]
    Store(#[source] StoreError),
}

impl From<StoreError> for SessionError {
    fn from(e: StoreError) -> Self {
        SessionError::Store(e)
    }
}

/// Outcome of one per-file task, returned to the single-writer tally.
enum FileOutcome {
    Matched { auto_confirmed: bool },
    Created(crate::contract::PendingPoForPr),
    PendingMatch(crate::contract::PendingSupplierMatch),
    UnmatchedSlip(crate::contract::UnmatchedSlip),
    UnmatchedPo(crate::contract::UnmatchedPoFile),
    Failed { file: String, message: String },
}

pub struct ImportSession {
    drive: Arc<dyn DriveStore>,
    domain: Arc<dyn DomainStore>,
    ledger: Arc<dyn LedgerStore>,
    engine: Arc<ReconcileEngine>,
    decisions: Arc<dyn DecisionProvider>,
    cancel: CancelHandle,
}

impl ImportSession {
    pub fn new(
        drive: Arc<dyn DriveStore>,
        domain: Arc<dyn DomainStore>,
        ledger: Arc<dyn LedgerStore>,
        engine: Arc<ReconcileEngine>,
        decisions: Arc<dyn DecisionProvider>,
        cancel: CancelHandle,
    ) -> Self {
        Self {
            drive,
            domain,
            ledger,
            engine,
            decisions,
            cancel,
        }
    }

    pub async fn run(&self, options: SessionOptions) -> Result<ImportStats, SessionError> {
        let lane = options.folder_type;
        let folder_url = options
            .folder_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| {
                SessionError::Config(format!("no drive folder configured for the {lane} lane"))
            })?;
        let mut stats = ImportStats::default();

        // --- Step 1: bootstrap under the watchdog ---
        let mut suppliers =
            tokio::time::timeout(options.init_timeout, self.domain.list_suppliers())
                .await
                .map_err(|_| SessionError::InitTimeout(options.init_timeout))??;
        info!(%lane, suppliers = suppliers.len(), "session bootstrapped");
        if self.cancel.is_cancelled() {
            info!(%lane, "session cancelled during bootstrap");
            return Ok(stats);
        }

        // --- Step 2: today-first scan, all-dates fallback ---
        let today = Local::now().format("%d%m%y").to_string();
        let files = self.discover_new_files(lane, folder_url, &today).await?;
        let Some(files) = files else {
            return Ok(stats);
        };
        if files.is_empty() {
            info!(%lane, "no new files to process");
            return Ok(stats);
        }
        if self.cancel.is_cancelled() {
            return Ok(stats);
        }

        // --- Step 3: concurrent batch over the new files ---
        let mut queues = ConfirmationQueues::default();
        let progress = Progress::new(files.len());
        let outcomes = run_in_groups(files, PARALLEL_LIMIT, |file| {
            self.process_one(lane, file, &suppliers, &progress)
        })
        .await;
        for outcome in outcomes {
            match outcome {
                FileOutcome::Matched { auto_confirmed } => {
                    stats.matched += 1;
                    if auto_confirmed {
                        info!("match applied automatically");
                    }
                }
                FileOutcome::Created(pending) => {
                    stats.created += 1;
                    queues.push_pending_po(pending);
                }
                FileOutcome::PendingMatch(pending) => queues.push_pending_match(pending),
                FileOutcome::UnmatchedSlip(unmatched) => queues.push_unmatched_slip(unmatched),
                FileOutcome::UnmatchedPo(unmatched) => queues.push_unmatched_po(unmatched),
                FileOutcome::Failed { file, message } => {
                    error!(%file, %message, "file failed");
                    stats.failed += 1;
                }
            }
        }

        // --- Step 4: drain the confirmation queues in priority order ---
        while let Some(phase) = queues.next_phase() {
            if self.cancel.is_cancelled() {
                info!(%lane, "session cancelled while confirmations were pending");
                break;
            }
            self.run_phase(phase, &mut queues, &mut suppliers, &mut stats)
                .await;
        }

        info!(
            %lane,
            created = stats.created,
            matched = stats.matched,
            failed = stats.failed,
            skipped = stats.skipped,
            "import session finished"
        );
        Ok(stats)
    }

    /// Scan today's folder first; when it yields nothing new, offer the
    /// all-dates fallback. `Ok(None)` means the user declined the fallback.
    async fn discover_new_files(
        &self,
        lane: FolderType,
        folder_url: &str,
        today: &str,
    ) -> Result<Option<Vec<RemoteFile>>, SessionError> {
        let today_files = match self.drive.list_files(folder_url, today).await {
            Ok(files) => files,
            Err(e) => {
                warn!(%lane, error = %e, "today's folder scan failed, treating as empty");
                Vec::new()
            }
        };
        let new_today = self.keep_unprocessed(lane, today_files).await?;
        if !new_today.is_empty() {
            info!(%lane, files = new_today.len(), date = today, "processing today's folder");
            return Ok(Some(new_today));
        }

        if !self
            .decisions
            .confirm_scan_all_dates(&format_folder_date(today))
            .await
        {
            info!(%lane, "no new files today, full scan declined");
            return Ok(None);
        }

        let folders = self
            .drive
            .list_date_folders(folder_url)
            .await
            .map_err(|e| SessionError::Discovery(e.to_string()))?;
        info!(%lane, folders = folders.len(), "scanning all date folders");
        let listings = run_in_groups(folders, PARALLEL_LIMIT, |folder| async move {
            match self.drive.list_files(folder_url, &folder.date).await {
                Ok(files) => files,
                Err(e) => {
                    warn!(date = %folder.date, error = %e, "date folder scan failed, skipping");
                    Vec::new()
                }
            }
        })
        .await;
        let all_files: Vec<RemoteFile> = listings.into_iter().flatten().collect();
        let new_files = self.keep_unprocessed(lane, all_files).await?;
        Ok(Some(new_files))
    }

    /// Single batched ledger query over the whole candidate set.
    async fn keep_unprocessed(
        &self,
        lane: FolderType,
        files: Vec<RemoteFile>,
    ) -> Result<Vec<RemoteFile>, SessionError> {
        if files.is_empty() {
            return Ok(files);
        }
        let ids: Vec<String> = files.iter().map(|f| f.id.clone()).collect();
        let unprocessed = self.ledger.filter_unprocessed(lane, &ids).await?;
        Ok(files
            .into_iter()
            .filter(|f| unprocessed.contains(&f.id))
            .collect())
    }

    async fn process_one(
        &self,
        lane: FolderType,
        file: RemoteFile,
        suppliers: &[SupplierCandidate],
        progress: &Progress,
    ) -> FileOutcome {
        let name = file.name.clone();
        let outcome = match lane {
            FolderType::BankSlips => {
                match self.engine.process_bank_slip(&file, suppliers).await {
                    Ok(SlipOutcome::Matched {
                        auto_confirmed, ..
                    }) => FileOutcome::Matched { auto_confirmed },
                    Ok(SlipOutcome::Pending(pending)) => FileOutcome::PendingMatch(pending),
                    Ok(SlipOutcome::Unmatched(unmatched)) => FileOutcome::UnmatchedSlip(unmatched),
                    Err(e) => FileOutcome::Failed {
                        file: name.clone(),
                        message: e.to_string(),
                    },
                }
            }
            FolderType::PurchaseOrders => {
                match self.engine.process_purchase_order(&file, suppliers).await {
                    Ok(PoOutcome::Created(pending)) => FileOutcome::Created(pending),
                    Ok(PoOutcome::NeedsSupplier(unmatched)) => FileOutcome::UnmatchedPo(unmatched),
                    Err(e) => FileOutcome::Failed {
                        file: name.clone(),
                        message: e.to_string(),
                    },
                }
            }
        };
        progress.record(&name);
        outcome
    }

    async fn run_phase(
        &self,
        phase: Phase,
        queues: &mut ConfirmationQueues,
        suppliers: &mut Vec<SupplierCandidate>,
        stats: &mut ImportStats,
    ) {
        match phase {
            Phase::AskPrMode => {
                let Some(pending) = queues.pop_pending_po() else { return };
                match self.decisions.resolve_pr_mode(&pending).await {
                    PrMode::Auto => {
                        if let Err(e) = self.engine.create_payment_request_from_po(&pending).await {
                            error!(po = %pending.po_number, error = %e, "payment request creation failed");
                            stats.failed += 1;
                        }
                    }
                    PrMode::Manual => {
                        info!(po = %pending.po_number, "payment request left to manual entry");
                    }
                }
            }
            Phase::ConfirmSupplierMatch => {
                let Some(pending) = queues.pop_pending_match() else { return };
                match self.decisions.resolve_pending_match(&pending).await {
                    MatchDecision::Accept => {
                        match self.engine.accept_pending_match(&pending).await {
                            Ok(_) => stats.matched += 1,
                            Err(e) => {
                                error!(file = %pending.file.name, error = %e, "match confirmation failed");
                                stats.failed += 1;
                            }
                        }
                    }
                    MatchDecision::Reject => {
                        match self
                            .engine
                            .skip_file(FolderType::BankSlips, &pending.file.id)
                            .await
                        {
                            Ok(()) => stats.skipped += 1,
                            Err(e) => {
                                error!(file = %pending.file.name, error = %e, "skip failed");
                                stats.failed += 1;
                            }
                        }
                    }
                }
            }
            Phase::ConfirmPoSupplier => {
                let Some(unmatched) = queues.pop_unmatched_po() else { return };
                let resolution = self
                    .decisions
                    .resolve_unmatched_po(&unmatched, suppliers)
                    .await;
                match resolution {
                    PoResolution::SelectSupplier {
                        supplier_id,
                        learn_alias,
                        vat_included_in_price,
                    } => {
                        let Some(mut supplier) =
                            suppliers.iter().find(|s| s.id == supplier_id).cloned()
                        else {
                            error!(%supplier_id, "selected supplier is not in the directory");
                            stats.failed += 1;
                            return;
                        };
                        if learn_alias {
                            if let Some(name) = unmatched.supplier_name.as_deref() {
                                if let Err(e) =
                                    self.domain.learn_supplier_alias(&supplier.id, name).await
                                {
                                    warn!(error = %e, "alias learning failed, continuing");
                                }
                            }
                        }
                        if let Some(included) = vat_included_in_price {
                            if let Err(e) = self
                                .domain
                                .set_supplier_vat_included(&supplier.id, included)
                                .await
                            {
                                warn!(error = %e, "vat flag update failed, continuing");
                            }
                            supplier.vat_included_in_price = included;
                            if let Some(existing) =
                                suppliers.iter_mut().find(|s| s.id == supplier.id)
                            {
                                existing.vat_included_in_price = included;
                            }
                        }
                        self.finish_po_resolution(&unmatched, &supplier, queues, stats)
                            .await;
                    }
                    PoResolution::CreateSupplier(new) => {
                        match self.domain.create_supplier(new).await {
                            Ok(supplier) => {
                                suppliers.push(supplier.clone());
                                self.finish_po_resolution(&unmatched, &supplier, queues, stats)
                                    .await;
                            }
                            Err(e) => {
                                error!(file = %unmatched.file.name, error = %e, "supplier creation failed");
                                stats.failed += 1;
                            }
                        }
                    }
                    PoResolution::Skip => {
                        match self
                            .engine
                            .skip_file(FolderType::PurchaseOrders, &unmatched.file.id)
                            .await
                        {
                            Ok(()) => stats.skipped += 1,
                            Err(e) => {
                                error!(file = %unmatched.file.name, error = %e, "skip failed");
                                stats.failed += 1;
                            }
                        }
                    }
                }
            }
            Phase::ResolveUnmatchedSlip => {
                let Some(unmatched) = queues.pop_unmatched_slip() else { return };
                let resolution = self
                    .decisions
                    .resolve_unmatched_slip(&unmatched, suppliers)
                    .await;
                match resolution {
                    SlipResolution::SelectSupplier {
                        supplier_id,
                        learn_alias,
                    } => {
                        let Some(supplier) =
                            suppliers.iter().find(|s| s.id == supplier_id).cloned()
                        else {
                            error!(%supplier_id, "selected supplier is not in the directory");
                            stats.failed += 1;
                            return;
                        };
                        match self
                            .engine
                            .create_payment_request_from_slip(&unmatched, &supplier, learn_alias)
                            .await
                        {
                            Ok(_) => stats.created += 1,
                            Err(e) => {
                                error!(file = %unmatched.file.name, error = %e, "payment request creation failed");
                                stats.failed += 1;
                            }
                        }
                    }
                    SlipResolution::CreateSupplier(new) => {
                        match self.domain.create_supplier(new).await {
                            Ok(supplier) => {
                                suppliers.push(supplier.clone());
                                match self
                                    .engine
                                    .create_payment_request_from_slip(&unmatched, &supplier, true)
                                    .await
                                {
                                    Ok(_) => stats.created += 1,
                                    Err(e) => {
                                        error!(file = %unmatched.file.name, error = %e, "payment request creation failed");
                                        stats.failed += 1;
                                    }
                                }
                            }
                            Err(e) => {
                                error!(file = %unmatched.file.name, error = %e, "supplier creation failed");
                                stats.failed += 1;
                            }
                        }
                    }
                    SlipResolution::Skip => {
                        match self
                            .engine
                            .skip_file(FolderType::BankSlips, &unmatched.file.id)
                            .await
                        {
                            Ok(()) => stats.skipped += 1,
                            Err(e) => {
                                error!(file = %unmatched.file.name, error = %e, "skip failed");
                                stats.failed += 1;
                            }
                        }
                    }
                }
            }
        }
    }

    async fn finish_po_resolution(
        &self,
        unmatched: &crate::contract::UnmatchedPoFile,
        supplier: &SupplierCandidate,
        queues: &mut ConfirmationQueues,
        stats: &mut ImportStats,
    ) {
        match self
            .engine
            .create_po_draft(&unmatched.file, unmatched.document.clone(), Some(supplier))
            .await
        {
            Ok(pending) => {
                stats.created += 1;
                queues.push_pending_po(pending);
            }
            Err(e) => {
                error!(file = %unmatched.file.name, error = %e, "purchase order creation failed");
                stats.failed += 1;
            }
        }
    }
}
