//! # contract: collaborator interfaces for the import pipeline
//!
//! This module defines one trait per external collaborator plus the concrete
//! data types exchanged with them:
//!
//! - [`DriveStore`]: dated-folder discovery and file listing on the remote
//!   document store.
//! - [`DocumentExtractor`]: the document-understanding service turning a
//!   scanned image into a typed purchase order or bank transfer slip.
//! - [`DomainStore`]: procurement persistence (suppliers, purchase orders,
//!   payment requests, invoices).
//! - [`LedgerStore`]: the idempotency ledger keyed by `(folder type, file id)`.
//! - [`ObjectStore`]: raw image storage; the returned path (never a signed
//!   URL) is what gets persisted on domain records.
//! - [`DecisionProvider`]: the human-in-the-loop surface answering the
//!   confirmation queues between batch phases.
//!
//! ## Interface & Extensibility
//! - All methods are async, returning results and using boxed error types
//!   ([`StoreError`]) except extraction, which has its own taxonomy
//!   ([`ExtractError`]) because a missing amount is a semantic failure, not a
//!   transport one.
//! - Each trait is annotated for `mockall` so consumers can generate
//!   deterministic mocks for unit/integration tests (exported via the
//!   `test-export-mocks` feature).
//!
//! ## Adding New Backends
//! - Implement the trait for your backend and convert all meaningful upstream
//!   errors to a boxed error; the pipeline never inspects transport details.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::NaiveDate;
use mockall::automock;
use serde::{Deserialize, Serialize};

use crate::matching::SupplierMatch;

/// Boxed error type used at every collaborator seam.
pub type StoreError = Box<dyn std::error::Error + Send + Sync>;

/// The two import lanes. Each lane has its own ledger partition and its own
/// remote root folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FolderType {
    PurchaseOrders,
    BankSlips,
}

impl FolderType {
    /// Ledger partition key, matching the persisted `folder_type` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            FolderType::PurchaseOrders => "po",
            FolderType::BankSlips => "bank_slip",
        }
    }
}

impl std::fmt::Display for FolderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable snapshot of one scanned document, content fetched eagerly at
/// listing time because extraction needs the raw bytes immediately.
#[derive(Debug, Clone)]
pub struct RemoteFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub content: Vec<u8>,
    /// Six-digit `ddMMyy` token of the folder the file was found in.
    pub folder_date: String,
}

/// One dated subfolder as discovered on the remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderDateGroup {
    /// Six-digit `ddMMyy` token.
    pub date: String,
    pub file_count: usize,
    pub folder_id: Option<String>,
}

/// A line item as extracted from a scanned purchase order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedPoItem {
    pub product_name: String,
    pub unit: Option<String>,
    pub quantity: f64,
    pub unit_price: Option<f64>,
    pub line_total: Option<f64>,
}

/// Structured result of running extraction on a purchase-order scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedPoDocument {
    pub po_number: Option<String>,
    /// `dd/MM/yyyy` as printed on the document, parsed later.
    pub order_date: Option<String>,
    pub expected_date: Option<String>,
    pub supplier_name: Option<String>,
    pub vat_amount: Option<f64>,
    pub total_amount: Option<f64>,
    #[serde(default)]
    pub items: Vec<ExtractedPoItem>,
}

/// Structured result of running extraction on a bank transfer slip. A slip
/// with no recoverable amount never reaches this type; the extractor fails
/// instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedBankSlip {
    pub amount: f64,
    pub recipient_name: String,
    pub transaction_date: Option<String>,
    pub transaction_id: Option<String>,
}

/// Read projection of a supplier used for matching. `bank_account_name` is a
/// learned alias: the pipeline updates it on confirmation, the matcher only
/// reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplierCandidate {
    pub id: String,
    pub name: String,
    pub bank_account_name: Option<String>,
    #[serde(default)]
    pub vat_included_in_price: bool,
}

/// Data needed to create a supplier inline during queue resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSupplier {
    pub name: String,
    pub vat_included_in_price: Option<bool>,
}

/// An unpaid, approved payment request with its supplier projection.
#[derive(Debug, Clone, PartialEq)]
pub struct UnpaidPaymentRequest {
    pub id: String,
    pub request_number: String,
    pub supplier_id: Option<String>,
    pub total_amount: f64,
    pub vat_amount: f64,
    pub invoice_created: bool,
    pub supplier: Option<SupplierCandidate>,
}

/// Entity links recorded on a ledger entry once a file reaches a terminal
/// outcome. All-`None` links represent an explicit user skip.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerLinks {
    pub purchase_order_id: Option<String>,
    pub payment_request_id: Option<String>,
    pub invoice_id: Option<String>,
}

/// One line item for a purchase order or payment request write.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLineItem {
    pub product_name: String,
    pub unit: Option<String>,
    pub quantity: f64,
    pub unit_price: Option<f64>,
    pub line_total: f64,
}

/// Purchase-order write, created in `draft` status by the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPurchaseOrder {
    pub po_number: String,
    pub order_date: NaiveDate,
    pub expected_date: Option<String>,
    pub supplier_id: Option<String>,
    pub total_amount: f64,
    pub vat_amount: f64,
    pub image_path: Option<String>,
    pub notes: String,
    pub items: Vec<NewLineItem>,
}

/// Payment-request write. Status fields are set by the caller because the
/// two creation paths differ: a request mirroring a fresh purchase order is
/// `pending`/`unpaid`, one reconstructed from a paid slip is
/// `approved`/`paid`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPaymentRequest {
    pub request_number: String,
    pub title: String,
    pub description: String,
    pub supplier_id: Option<String>,
    pub purchase_order_id: Option<String>,
    pub total_amount: f64,
    pub vat_amount: f64,
    pub status: String,
    pub payment_status: String,
    pub payment_method: String,
    pub payment_type: String,
    pub image_path: Option<String>,
    pub approved: bool,
    pub items: Vec<NewLineItem>,
}

/// Invoice write, always linked to a payment request.
#[derive(Debug, Clone, PartialEq)]
pub struct NewInvoice {
    pub invoice_number: String,
    pub invoice_date: NaiveDate,
    pub supplier_id: Option<String>,
    pub payment_request_id: String,
    pub total_amount: f64,
    pub vat_amount: f64,
    pub payment_slip_path: Option<String>,
    pub notes: String,
}

/// Error taxonomy for the document-understanding service.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("extraction request failed: {0}")]
    Http(String),
    #[error("extraction service returned status {status}")]
    Service { status: u16 },
    #[error("could not decode extraction response: {0}")]
    Decode(String),
    #[error("no amount recovered from bank slip")]
    MissingAmount,
}

/// Remote document store: dated-folder discovery and eager file listing.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait DriveStore: Send + Sync {
    /// List all dated subfolders of the lane's root folder, newest first.
    /// Folders whose names do not parse as `ddMMyy` are not returned.
    async fn list_date_folders(
        &self,
        root_folder_url: &str,
    ) -> Result<Vec<FolderDateGroup>, StoreError>;

    /// List the files of one dated subfolder with their content fetched
    /// eagerly. A missing subfolder is an empty listing, not an error.
    async fn list_files(
        &self,
        root_folder_url: &str,
        date: &str,
    ) -> Result<Vec<RemoteFile>, StoreError>;
}

/// Document-understanding service, one call per file.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    async fn extract_purchase_order(
        &self,
        file: &RemoteFile,
    ) -> Result<ExtractedPoDocument, ExtractError>;

    /// Fails with [`ExtractError::MissingAmount`] when the service cannot
    /// recover a positive amount from the slip.
    async fn extract_bank_slip(&self, file: &RemoteFile)
        -> Result<ExtractedBankSlip, ExtractError>;
}

/// Procurement persistence. The pipeline only uses the operations below;
/// all other CRUD stays with the owning application.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait DomainStore: Send + Sync {
    async fn list_suppliers(&self) -> Result<Vec<SupplierCandidate>, StoreError>;

    /// Case-insensitive partial name lookup, first hit only.
    async fn find_supplier_by_name(
        &self,
        name: &str,
    ) -> Result<Option<SupplierCandidate>, StoreError>;

    async fn create_supplier(&self, new: NewSupplier) -> Result<SupplierCandidate, StoreError>;

    /// Persist a confirmed payment-slip recipient name as the supplier's
    /// learned alias.
    async fn learn_supplier_alias(
        &self,
        supplier_id: &str,
        bank_account_name: &str,
    ) -> Result<(), StoreError>;

    async fn set_supplier_vat_included(
        &self,
        supplier_id: &str,
        included: bool,
    ) -> Result<(), StoreError>;

    async fn list_unpaid_payment_requests(
        &self,
    ) -> Result<Vec<UnpaidPaymentRequest>, StoreError>;

    async fn mark_payment_request_paid(&self, id: &str) -> Result<(), StoreError>;

    /// Record that an invoice now exists for the payment request.
    async fn attach_invoice(
        &self,
        payment_request_id: &str,
        invoice_id: &str,
    ) -> Result<(), StoreError>;

    /// Returns the id of the created purchase order.
    async fn create_purchase_order(&self, new: NewPurchaseOrder) -> Result<String, StoreError>;

    /// Returns the id of the created payment request.
    async fn create_payment_request(&self, new: NewPaymentRequest) -> Result<String, StoreError>;

    /// Returns the id of the created invoice.
    async fn create_invoice(&self, new: NewInvoice) -> Result<String, StoreError>;

    async fn next_po_number(&self) -> Result<String, StoreError>;

    async fn next_request_number(&self) -> Result<String, StoreError>;
}

/// Idempotency ledger keyed by `(folder type, file id)`.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Single batched existence query: returns the subset of `file_ids` that
    /// has no `processed = true` entry for the folder type. Never issue one
    /// query per file; broad scans depend on this staying one round trip.
    async fn filter_unprocessed(
        &self,
        folder_type: FolderType,
        file_ids: &[String],
    ) -> Result<HashSet<String>, StoreError>;

    /// Upsert the ledger entry as processed with the given links. Idempotent:
    /// calling twice with the same arguments is safe, and a later call may
    /// extend the links (e.g. attach the payment request created after the
    /// purchase order).
    async fn mark_processed(
        &self,
        folder_type: FolderType,
        file_id: &str,
        links: LedgerLinks,
    ) -> Result<(), StoreError>;
}

/// Raw object storage for scanned images.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload bytes and return the stored path (not a signed URL).
    async fn upload(
        &self,
        path: &str,
        bytes: &[u8],
        mime_type: &str,
    ) -> Result<String, StoreError>;
}

/// A slip whose amount matched exactly one payment request but whose
/// recipient name did not; waits for explicit confirmation.
#[derive(Debug, Clone)]
pub struct PendingSupplierMatch {
    pub file: RemoteFile,
    pub slip: ExtractedBankSlip,
    pub candidate: UnpaidPaymentRequest,
}

/// A slip with no matching payment request at all; waits for a supplier
/// choice (or skip) before a payment request is reconstructed from it.
#[derive(Debug, Clone)]
pub struct UnmatchedSlip {
    pub file: RemoteFile,
    pub slip: ExtractedBankSlip,
    pub suggested: Option<SupplierMatch>,
}

/// A purchase-order scan whose supplier could not be resolved confidently.
#[derive(Debug, Clone)]
pub struct UnmatchedPoFile {
    pub file: RemoteFile,
    pub document: ExtractedPoDocument,
    pub supplier_name: Option<String>,
    pub suggested: Option<SupplierMatch>,
}

/// A purchase order that was just created and has no payment request yet;
/// waits for the auto-vs-manual decision. Carries everything a prefilled
/// manual form needs.
#[derive(Debug, Clone)]
pub struct PendingPoForPr {
    pub purchase_order_id: String,
    pub po_number: String,
    pub supplier_id: Option<String>,
    pub supplier_name: String,
    pub document: ExtractedPoDocument,
    pub image_path: Option<String>,
    pub file_id: String,
}

/// Answer to a [`PendingSupplierMatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchDecision {
    /// Learn the recipient name as the supplier's alias and settle the match.
    Accept,
    /// Decline; the file is recorded as skipped.
    Reject,
}

/// Answer to an [`UnmatchedSlip`].
#[derive(Debug, Clone, PartialEq)]
pub enum SlipResolution {
    SelectSupplier { supplier_id: String, learn_alias: bool },
    CreateSupplier(NewSupplier),
    Skip,
}

/// Answer to an [`UnmatchedPoFile`]. `vat_included_in_price`, when set, is
/// persisted on the supplier and forces the extracted VAT to zero.
#[derive(Debug, Clone, PartialEq)]
pub enum PoResolution {
    SelectSupplier {
        supplier_id: String,
        learn_alias: bool,
        vat_included_in_price: Option<bool>,
    },
    CreateSupplier(NewSupplier),
    Skip,
}

/// Answer to a [`PendingPoForPr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrMode {
    /// Create a payment request mirroring the purchase order's items/totals.
    Auto,
    /// Leave creation to the caller's form; the pending item is the prefill.
    Manual,
}

/// Human-in-the-loop surface. The controller presents exactly one item at a
/// time, strictly FIFO per queue, and never while a batch is still running.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait DecisionProvider: Send + Sync {
    /// Fallback prompt when today's folder yields no new files.
    async fn confirm_scan_all_dates(&self, today: &str) -> bool;

    async fn resolve_pending_match(&self, pending: &PendingSupplierMatch) -> MatchDecision;

    async fn resolve_unmatched_slip(
        &self,
        unmatched: &UnmatchedSlip,
        suppliers: &[SupplierCandidate],
    ) -> SlipResolution;

    async fn resolve_unmatched_po(
        &self,
        unmatched: &UnmatchedPoFile,
        suppliers: &[SupplierCandidate],
    ) -> PoResolution;

    async fn resolve_pr_mode(&self, pending: &PendingPoForPr) -> PrMode;
}
