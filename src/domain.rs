//! Procurement persistence adapters over the PostgREST backend: the domain
//! store (suppliers, payment requests, purchase orders, invoices), the
//! idempotency ledger and raw image storage.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::contract::{
    DomainStore, FolderType, LedgerLinks, LedgerStore, NewInvoice, NewPaymentRequest,
    NewPurchaseOrder, NewSupplier, ObjectStore, StoreError, SupplierCandidate,
    UnpaidPaymentRequest,
};
use crate::rest::RestClient;

const SUPPLIER_COLUMNS: &str = "id,name,bank_account_name,vat_included_in_price";

#[derive(Debug, Deserialize)]
struct SupplierRow {
    id: String,
    name: String,
    bank_account_name: Option<String>,
    #[serde(default)]
    vat_included_in_price: bool,
}

impl From<SupplierRow> for SupplierCandidate {
    fn from(row: SupplierRow) -> Self {
        SupplierCandidate {
            id: row.id,
            name: row.name,
            bank_account_name: row.bank_account_name,
            vat_included_in_price: row.vat_included_in_price,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PaymentRequestRow {
    id: String,
    request_number: String,
    supplier_id: Option<String>,
    total_amount: f64,
    #[serde(default)]
    vat_amount: f64,
    #[serde(default)]
    invoice_created: bool,
    suppliers: Option<SupplierRow>,
}

#[derive(Debug, Deserialize)]
struct IdRow {
    id: String,
}

#[derive(Debug, Deserialize)]
struct NumberRow {
    number: String,
}

#[derive(Debug, Deserialize)]
struct FileIdRow {
    file_id: String,
}

/// Next number in a `PREFIX-%06d` sequence given the current maximum.
fn next_in_sequence(prefix: &str, last: Option<&str>) -> String {
    let next = last
        .and_then(|n| n.strip_prefix(prefix))
        .and_then(|suffix| suffix.parse::<u64>().ok())
        .map(|n| n + 1)
        .unwrap_or(1);
    format!("{prefix}{next:06}")
}

/// Uppercase initials of the supplier name, used as its short code.
fn short_code(name: &str) -> String {
    name.split_whitespace()
        .filter_map(|w| w.chars().next())
        .map(|c| c.to_ascii_uppercase())
        .take(4)
        .collect()
}

pub struct DomainClient {
    rest: Arc<RestClient>,
}

impl DomainClient {
    pub fn new(rest: Arc<RestClient>) -> Self {
        Self { rest }
    }
}

#[async_trait]
impl DomainStore for DomainClient {
    async fn list_suppliers(&self) -> Result<Vec<SupplierCandidate>, StoreError> {
        let rows: Vec<SupplierRow> = self
            .rest
            .select(
                "suppliers",
                &[
                    ("select", SUPPLIER_COLUMNS.to_string()),
                    ("order", "name.asc".to_string()),
                ],
            )
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn find_supplier_by_name(
        &self,
        name: &str,
    ) -> Result<Option<SupplierCandidate>, StoreError> {
        let rows: Vec<SupplierRow> = self
            .rest
            .select(
                "suppliers",
                &[
                    ("select", SUPPLIER_COLUMNS.to_string()),
                    ("name", format!("ilike.*{name}*")),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        Ok(rows.into_iter().next().map(Into::into))
    }

    async fn create_supplier(&self, new: NewSupplier) -> Result<SupplierCandidate, StoreError> {
        let row: SupplierRow = self
            .rest
            .insert(
                "suppliers",
                &json!({
                    "name": new.name,
                    "short_code": short_code(&new.name),
                    "vat_included_in_price": new.vat_included_in_price.unwrap_or(false),
                    "default_payment_method": "bank_transfer",
                }),
            )
            .await?;
        info!(supplier = %row.name, id = %row.id, "supplier created");
        Ok(row.into())
    }

    async fn learn_supplier_alias(
        &self,
        supplier_id: &str,
        bank_account_name: &str,
    ) -> Result<(), StoreError> {
        self.rest
            .update(
                "suppliers",
                &[("id", format!("eq.{supplier_id}"))],
                &json!({ "bank_account_name": bank_account_name }),
            )
            .await?;
        info!(supplier_id, alias = bank_account_name, "supplier alias learned");
        Ok(())
    }

    async fn set_supplier_vat_included(
        &self,
        supplier_id: &str,
        included: bool,
    ) -> Result<(), StoreError> {
        self.rest
            .update(
                "suppliers",
                &[("id", format!("eq.{supplier_id}"))],
                &json!({ "vat_included_in_price": included }),
            )
            .await
    }

    async fn list_unpaid_payment_requests(
        &self,
    ) -> Result<Vec<UnpaidPaymentRequest>, StoreError> {
        let select = format!(
            "id,request_number,supplier_id,total_amount,vat_amount,invoice_created,suppliers({SUPPLIER_COLUMNS})"
        );
        let rows: Vec<PaymentRequestRow> = self
            .rest
            .select(
                "payment_requests",
                &[
                    ("select", select),
                    ("status", "eq.approved".to_string()),
                    ("payment_status", "eq.unpaid".to_string()),
                ],
            )
            .await?;
        debug!(unpaid = rows.len(), "unpaid payment requests loaded");
        Ok(rows
            .into_iter()
            .map(|r| UnpaidPaymentRequest {
                id: r.id,
                request_number: r.request_number,
                supplier_id: r.supplier_id,
                total_amount: r.total_amount,
                vat_amount: r.vat_amount,
                invoice_created: r.invoice_created,
                supplier: r.suppliers.map(Into::into),
            })
            .collect())
    }

    async fn mark_payment_request_paid(&self, id: &str) -> Result<(), StoreError> {
        self.rest
            .update(
                "payment_requests",
                &[("id", format!("eq.{id}"))],
                &json!({
                    "payment_status": "paid",
                    "paid_at": Utc::now().to_rfc3339(),
                }),
            )
            .await
    }

    async fn attach_invoice(
        &self,
        payment_request_id: &str,
        invoice_id: &str,
    ) -> Result<(), StoreError> {
        self.rest
            .update(
                "payment_requests",
                &[("id", format!("eq.{payment_request_id}"))],
                &json!({
                    "invoice_created": true,
                    "invoice_id": invoice_id,
                }),
            )
            .await
    }

    async fn create_purchase_order(&self, new: NewPurchaseOrder) -> Result<String, StoreError> {
        let row: IdRow = self
            .rest
            .insert(
                "purchase_orders",
                &json!({
                    "po_number": new.po_number,
                    "order_date": new.order_date.format("%Y-%m-%d").to_string(),
                    "expected_date": new.expected_date,
                    "supplier_id": new.supplier_id,
                    "status": "draft",
                    "total_amount": new.total_amount,
                    "vat_amount": new.vat_amount,
                    "image_path": new.image_path,
                    "notes": new.notes,
                }),
            )
            .await?;
        if !new.items.is_empty() {
            let items: Vec<_> = new
                .items
                .iter()
                .map(|i| {
                    json!({
                        "purchase_order_id": row.id,
                        "product_name": i.product_name,
                        "unit": i.unit,
                        "quantity": i.quantity,
                        "unit_price": i.unit_price,
                        "line_total": i.line_total,
                    })
                })
                .collect();
            self.rest
                .insert_many("purchase_order_items", &items)
                .await?;
        }
        info!(po_number = %new.po_number, id = %row.id, "purchase order created");
        Ok(row.id)
    }

    async fn create_payment_request(&self, new: NewPaymentRequest) -> Result<String, StoreError> {
        let approved_at = new.approved.then(|| Utc::now().to_rfc3339());
        let row: IdRow = self
            .rest
            .insert(
                "payment_requests",
                &json!({
                    "request_number": new.request_number,
                    "title": new.title,
                    "description": new.description,
                    "supplier_id": new.supplier_id,
                    "purchase_order_id": new.purchase_order_id,
                    "total_amount": new.total_amount,
                    "vat_amount": new.vat_amount,
                    "status": new.status,
                    "payment_status": new.payment_status,
                    "payment_method": new.payment_method,
                    "payment_type": new.payment_type,
                    "image_path": new.image_path,
                    "approved_at": approved_at,
                }),
            )
            .await?;
        if !new.items.is_empty() {
            let items: Vec<_> = new
                .items
                .iter()
                .map(|i| {
                    json!({
                        "payment_request_id": row.id,
                        "product_name": i.product_name,
                        "unit": i.unit,
                        "quantity": i.quantity,
                        "unit_price": i.unit_price,
                        "line_total": i.line_total,
                    })
                })
                .collect();
            self.rest
                .insert_many("payment_request_items", &items)
                .await?;
        }
        info!(request_number = %new.request_number, id = %row.id, "payment request created");
        Ok(row.id)
    }

    async fn create_invoice(&self, new: NewInvoice) -> Result<String, StoreError> {
        let row: IdRow = self
            .rest
            .insert(
                "invoices",
                &json!({
                    "invoice_number": new.invoice_number,
                    "invoice_date": new.invoice_date.format("%Y-%m-%d").to_string(),
                    "supplier_id": new.supplier_id,
                    "payment_request_id": new.payment_request_id,
                    "total_amount": new.total_amount,
                    "vat_amount": new.vat_amount,
                    "payment_slip_path": new.payment_slip_path,
                    "notes": new.notes,
                }),
            )
            .await?;
        info!(invoice_number = %new.invoice_number, id = %row.id, "invoice created");
        Ok(row.id)
    }

    async fn next_po_number(&self) -> Result<String, StoreError> {
        let rows: Vec<NumberRow> = self
            .rest
            .select(
                "purchase_orders",
                &[
                    ("select", "number:po_number".to_string()),
                    ("order", "po_number.desc".to_string()),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        Ok(next_in_sequence("PO-", rows.first().map(|r| r.number.as_str())))
    }

    async fn next_request_number(&self) -> Result<String, StoreError> {
        let rows: Vec<NumberRow> = self
            .rest
            .select(
                "payment_requests",
                &[
                    ("select", "number:request_number".to_string()),
                    ("order", "request_number.desc".to_string()),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        Ok(next_in_sequence(
            "PR-",
            rows.first().map(|r| r.number.as_str()),
        ))
    }
}

/// Idempotency ledger over the `drive_file_index` table.
pub struct LedgerClient {
    rest: Arc<RestClient>,
}

impl LedgerClient {
    pub fn new(rest: Arc<RestClient>) -> Self {
        Self { rest }
    }
}

#[async_trait]
impl LedgerStore for LedgerClient {
    async fn filter_unprocessed(
        &self,
        folder_type: FolderType,
        file_ids: &[String],
    ) -> Result<HashSet<String>, StoreError> {
        if file_ids.is_empty() {
            return Ok(HashSet::new());
        }
        // One batched existence query for the whole scan.
        let rows: Vec<FileIdRow> = self
            .rest
            .select(
                "drive_file_index",
                &[
                    ("select", "file_id".to_string()),
                    ("folder_type", format!("eq.{folder_type}")),
                    ("processed", "eq.true".to_string()),
                    ("file_id", format!("in.({})", file_ids.join(","))),
                ],
            )
            .await?;
        let processed: HashSet<String> = rows.into_iter().map(|r| r.file_id).collect();
        Ok(file_ids
            .iter()
            .filter(|id| !processed.contains(*id))
            .cloned()
            .collect())
    }

    async fn mark_processed(
        &self,
        folder_type: FolderType,
        file_id: &str,
        links: LedgerLinks,
    ) -> Result<(), StoreError> {
        self.rest
            .upsert(
                "drive_file_index",
                "folder_type,file_id",
                &json!({
                    "folder_type": folder_type.as_str(),
                    "file_id": file_id,
                    "processed": true,
                    "processed_at": Utc::now().to_rfc3339(),
                    "purchase_order_id": links.purchase_order_id,
                    "payment_request_id": links.payment_request_id,
                    "invoice_id": links.invoice_id,
                }),
            )
            .await?;
        debug!(file_id, folder_type = %folder_type, "ledger entry written");
        Ok(())
    }
}

/// Raw image storage in a fixed bucket.
pub struct StorageClient {
    rest: Arc<RestClient>,
    bucket: String,
}

impl StorageClient {
    pub fn new(rest: Arc<RestClient>, bucket: String) -> Self {
        Self { rest, bucket }
    }
}

#[async_trait]
impl ObjectStore for StorageClient {
    async fn upload(
        &self,
        path: &str,
        bytes: &[u8],
        mime_type: &str,
    ) -> Result<String, StoreError> {
        self.rest
            .upload_object(&self.bucket, path, bytes, mime_type)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_numbers_continue_from_last() {
        assert_eq!(next_in_sequence("PO-", Some("PO-000041")), "PO-000042");
        assert_eq!(next_in_sequence("PR-", None), "PR-000001");
        assert_eq!(next_in_sequence("PR-", Some("garbage")), "PR-000001");
    }

    #[test]
    fn short_code_takes_initials() {
        assert_eq!(short_code("Fresh Produce Ltd"), "FPL");
        assert_eq!(short_code("acme"), "A");
    }
}
