//! Per-file reconciliation.
//!
//! The engine owns the two extraction-and-match lanes plus every domain
//! write the confirmation phases need. It never loops over files and never
//! talks to the user: the session controller feeds it one file at a time and
//! routes the returned outcome into the confirmation queues.

use std::sync::Arc;

use chrono::{Local, NaiveDate, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::contract::{
    DocumentExtractor, DomainStore, ExtractError, ExtractedBankSlip, ExtractedPoDocument,
    FolderType, LedgerLinks, LedgerStore, NewInvoice, NewLineItem, NewPaymentRequest,
    NewPurchaseOrder, ObjectStore, PendingPoForPr, PendingSupplierMatch, RemoteFile, StoreError,
    SupplierCandidate, UnmatchedPoFile, UnmatchedSlip, UnpaidPaymentRequest,
};
use crate::drive::format_folder_date;
use crate::matching::{
    amounts_match, best_matching_supplier, names_overlap, AUTO_CONFIRM_THRESHOLD,
};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Extraction(#[from] ExtractError),
    /// More than one equally plausible payment request; the file is left
    /// unledgered so the next run retries it after manual cleanup.
    #[error("{candidates} payment requests match this slip equally well")]
    AmbiguousMatch { candidates: usize },
    #[error("store operation failed: {0}")]
    Store(#[source] StoreError),
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        EngineError::Store(e)
    }
}

/// Terminal or queued outcome of one bank-slip file.
#[derive(Debug)]
pub enum SlipOutcome {
    Matched {
        payment_request_id: String,
        auto_confirmed: bool,
    },
    Pending(PendingSupplierMatch),
    Unmatched(UnmatchedSlip),
}

/// Terminal or queued outcome of one purchase-order file.
#[derive(Debug)]
pub enum PoOutcome {
    Created(PendingPoForPr),
    NeedsSupplier(UnmatchedPoFile),
}

pub struct ReconcileEngine {
    domain: Arc<dyn DomainStore>,
    ledger: Arc<dyn LedgerStore>,
    objects: Arc<dyn ObjectStore>,
    extractor: Arc<dyn DocumentExtractor>,
}

impl ReconcileEngine {
    pub fn new(
        domain: Arc<dyn DomainStore>,
        ledger: Arc<dyn LedgerStore>,
        objects: Arc<dyn ObjectStore>,
        extractor: Arc<dyn DocumentExtractor>,
    ) -> Self {
        Self {
            domain,
            ledger,
            objects,
            extractor,
        }
    }

    /// Extract one bank slip and match it against the unpaid payment
    /// requests. Matching is two-tier: amount within tolerance plus a
    /// recipient/supplier name overlap settles immediately; an amount-only
    /// match settles when the fuzzy score clears the auto-confirm threshold
    /// and is queued for confirmation otherwise.
    ///
    /// The unpaid set is fetched fresh for every slip so a request settled
    /// earlier in the run has already dropped out of the candidate pool.
    pub async fn process_bank_slip(
        &self,
        file: &RemoteFile,
        suppliers: &[SupplierCandidate],
    ) -> Result<SlipOutcome, EngineError> {
        let slip = self.extractor.extract_bank_slip(file).await?;
        info!(
            file = %file.name,
            amount = slip.amount,
            recipient = %slip.recipient_name,
            "bank slip extracted"
        );
        let unpaid = self.domain.list_unpaid_payment_requests().await?;

        if unpaid.is_empty() {
            let suggested = best_matching_supplier(&slip.recipient_name, suppliers);
            return Ok(SlipOutcome::Unmatched(UnmatchedSlip {
                file: file.clone(),
                suggested,
                slip,
            }));
        }

        let supplier_name_matches = |pr: &UnpaidPaymentRequest| {
            pr.supplier.as_ref().is_some_and(|s| {
                names_overlap(&slip.recipient_name, &s.name)
                    || s.bank_account_name
                        .as_deref()
                        .is_some_and(|alias| names_overlap(&slip.recipient_name, alias))
            })
        };

        let exact: Vec<&UnpaidPaymentRequest> = unpaid
            .iter()
            .filter(|pr| amounts_match(slip.amount, pr.total_amount) && supplier_name_matches(pr))
            .collect();
        match exact.len() {
            1 => {
                let payment_request_id = self.settle_matched_slip(file, &slip, exact[0]).await?;
                return Ok(SlipOutcome::Matched {
                    payment_request_id,
                    auto_confirmed: false,
                });
            }
            n if n > 1 => return Err(EngineError::AmbiguousMatch { candidates: n }),
            _ => {}
        }

        let by_amount: Vec<&UnpaidPaymentRequest> = unpaid
            .iter()
            .filter(|pr| amounts_match(slip.amount, pr.total_amount))
            .collect();
        match by_amount.len() {
            1 => {
                let candidate = by_amount[0];
                let best = best_matching_supplier(&slip.recipient_name, suppliers);
                if best.as_ref().is_some_and(|b| b.score >= AUTO_CONFIRM_THRESHOLD) {
                    if let Some(supplier_id) = candidate.supplier_id.as_deref() {
                        if !slip.recipient_name.is_empty() {
                            self.domain
                                .learn_supplier_alias(supplier_id, &slip.recipient_name)
                                .await?;
                        }
                    }
                    let payment_request_id =
                        self.settle_matched_slip(file, &slip, candidate).await?;
                    info!(
                        file = %file.name,
                        request = %candidate.request_number,
                        "amount-only match auto-confirmed"
                    );
                    Ok(SlipOutcome::Matched {
                        payment_request_id,
                        auto_confirmed: true,
                    })
                } else {
                    Ok(SlipOutcome::Pending(PendingSupplierMatch {
                        file: file.clone(),
                        slip,
                        candidate: candidate.clone(),
                    }))
                }
            }
            0 => {
                let suggested = best_matching_supplier(&slip.recipient_name, suppliers);
                Ok(SlipOutcome::Unmatched(UnmatchedSlip {
                    file: file.clone(),
                    suggested,
                    slip,
                }))
            }
            n => Err(EngineError::AmbiguousMatch { candidates: n }),
        }
    }

    /// Mark the matched payment request paid, create its invoice if none
    /// exists yet, and write the ledger entry. Image upload failures are
    /// tolerated: the match still settles, just without an attachment.
    pub async fn settle_matched_slip(
        &self,
        file: &RemoteFile,
        slip: &ExtractedBankSlip,
        matched: &UnpaidPaymentRequest,
    ) -> Result<String, EngineError> {
        let image_path = self.upload_image(file).await;
        self.domain.mark_payment_request_paid(&matched.id).await?;

        let mut invoice_id = None;
        if !matched.invoice_created {
            let id = self
                .domain
                .create_invoice(NewInvoice {
                    invoice_number: invoice_number(),
                    invoice_date: Local::now().date_naive(),
                    supplier_id: matched.supplier_id.clone(),
                    payment_request_id: matched.id.clone(),
                    total_amount: slip.amount,
                    vat_amount: matched.vat_amount,
                    payment_slip_path: image_path,
                    notes: provenance_note(file),
                })
                .await?;
            self.domain.attach_invoice(&matched.id, &id).await?;
            invoice_id = Some(id);
        }

        self.ledger
            .mark_processed(
                FolderType::BankSlips,
                &file.id,
                LedgerLinks {
                    payment_request_id: Some(matched.id.clone()),
                    invoice_id,
                    ..Default::default()
                },
            )
            .await?;
        info!(file = %file.name, request = %matched.request_number, "bank slip settled");
        Ok(matched.id.clone())
    }

    /// Extract one purchase order and resolve its supplier: direct partial
    /// name lookup first, then the fuzzy matcher at the auto-confirm
    /// threshold, otherwise queue the file for a manual supplier choice.
    pub async fn process_purchase_order(
        &self,
        file: &RemoteFile,
        suppliers: &[SupplierCandidate],
    ) -> Result<PoOutcome, EngineError> {
        let document = self.extractor.extract_purchase_order(file).await?;
        let supplier_name = document
            .supplier_name
            .clone()
            .filter(|n| !n.trim().is_empty());
        let Some(name) = supplier_name else {
            return Ok(PoOutcome::NeedsSupplier(UnmatchedPoFile {
                file: file.clone(),
                document,
                supplier_name: None,
                suggested: None,
            }));
        };

        if let Some(supplier) = self.domain.find_supplier_by_name(&name).await? {
            let pending = self.create_po_draft(file, document, Some(&supplier)).await?;
            return Ok(PoOutcome::Created(pending));
        }

        let best = best_matching_supplier(&name, suppliers);
        if let Some(best) = &best {
            if best.score >= AUTO_CONFIRM_THRESHOLD {
                let supplier = suppliers
                    .iter()
                    .find(|s| s.id == best.id)
                    .cloned()
                    .unwrap_or(SupplierCandidate {
                        id: best.id.clone(),
                        name: best.name.clone(),
                        bank_account_name: None,
                        vat_included_in_price: false,
                    });
                info!(
                    file = %file.name,
                    supplier = %supplier.name,
                    score = best.score,
                    "supplier resolved by fuzzy match"
                );
                let pending = self.create_po_draft(file, document, Some(&supplier)).await?;
                return Ok(PoOutcome::Created(pending));
            }
        }

        Ok(PoOutcome::NeedsSupplier(UnmatchedPoFile {
            file: file.clone(),
            document,
            supplier_name: Some(name),
            suggested: best,
        }))
    }

    /// Create the draft purchase order with its line items and write the
    /// ledger entry. A supplier whose prices include VAT forces the extracted
    /// VAT to zero.
    pub async fn create_po_draft(
        &self,
        file: &RemoteFile,
        mut document: ExtractedPoDocument,
        supplier: Option<&SupplierCandidate>,
    ) -> Result<PendingPoForPr, EngineError> {
        if supplier.is_some_and(|s| s.vat_included_in_price) {
            document.vat_amount = Some(0.0);
        }
        let image_path = self.upload_image(file).await;

        let po_number = match document.po_number.clone().filter(|n| !n.trim().is_empty()) {
            Some(n) => n,
            None => self.domain.next_po_number().await?,
        };
        let order_date = document
            .order_date
            .as_deref()
            .and_then(parse_order_date)
            .unwrap_or_else(|| Local::now().date_naive());

        let items: Vec<NewLineItem> = document
            .items
            .iter()
            .map(|i| NewLineItem {
                product_name: i.product_name.clone(),
                unit: i.unit.clone(),
                quantity: i.quantity,
                unit_price: i.unit_price,
                line_total: i
                    .line_total
                    .unwrap_or(i.quantity * i.unit_price.unwrap_or(0.0)),
            })
            .collect();
        let total_amount = document
            .total_amount
            .unwrap_or_else(|| items.iter().map(|i| i.line_total).sum());

        let purchase_order_id = self
            .domain
            .create_purchase_order(NewPurchaseOrder {
                po_number: po_number.clone(),
                order_date,
                expected_date: document.expected_date.clone(),
                supplier_id: supplier.map(|s| s.id.clone()),
                total_amount,
                vat_amount: document.vat_amount.unwrap_or(0.0),
                image_path: image_path.clone(),
                notes: provenance_note(file),
                items,
            })
            .await?;

        self.ledger
            .mark_processed(
                FolderType::PurchaseOrders,
                &file.id,
                LedgerLinks {
                    purchase_order_id: Some(purchase_order_id.clone()),
                    ..Default::default()
                },
            )
            .await?;

        let supplier_name = supplier
            .map(|s| s.name.clone())
            .or(document.supplier_name.clone())
            .unwrap_or_else(|| "unknown supplier".to_string());
        Ok(PendingPoForPr {
            purchase_order_id,
            po_number,
            supplier_id: supplier.map(|s| s.id.clone()),
            supplier_name,
            document,
            image_path,
            file_id: file.id.clone(),
        })
    }

    /// Create the payment request mirroring a fresh purchase order. Its
    /// number reuses the order's numeric suffix, and the ledger entry is
    /// re-marked with the new link.
    pub async fn create_payment_request_from_po(
        &self,
        pending: &PendingPoForPr,
    ) -> Result<String, EngineError> {
        let request_number = format!("PR-{}", pending.po_number.trim_start_matches("PO-"));
        let items: Vec<NewLineItem> = pending
            .document
            .items
            .iter()
            .map(|i| NewLineItem {
                product_name: i.product_name.clone(),
                unit: i.unit.clone(),
                quantity: i.quantity,
                unit_price: i.unit_price,
                line_total: i
                    .line_total
                    .unwrap_or(i.quantity * i.unit_price.unwrap_or(0.0)),
            })
            .collect();
        let total_amount = pending
            .document
            .total_amount
            .unwrap_or_else(|| items.iter().map(|i| i.line_total).sum());

        let payment_request_id = self
            .domain
            .create_payment_request(NewPaymentRequest {
                request_number: request_number.clone(),
                title: format!("Payment for {}", pending.po_number),
                description: format!(
                    "Created from purchase order {} ({})",
                    pending.po_number, pending.supplier_name
                ),
                supplier_id: pending.supplier_id.clone(),
                purchase_order_id: Some(pending.purchase_order_id.clone()),
                total_amount,
                vat_amount: pending.document.vat_amount.unwrap_or(0.0),
                status: "pending".to_string(),
                payment_status: "unpaid".to_string(),
                payment_method: "bank_transfer".to_string(),
                payment_type: "new_order".to_string(),
                image_path: pending.image_path.clone(),
                approved: false,
                items,
            })
            .await?;

        self.ledger
            .mark_processed(
                FolderType::PurchaseOrders,
                &pending.file_id,
                LedgerLinks {
                    purchase_order_id: Some(pending.purchase_order_id.clone()),
                    payment_request_id: Some(payment_request_id.clone()),
                    ..Default::default()
                },
            )
            .await?;
        info!(request = %request_number, po = %pending.po_number, "payment request created from purchase order");
        Ok(payment_request_id)
    }

    /// Reconstruct an already-paid payment request from an unmatched slip
    /// after the user picked (or created) its supplier. The request is born
    /// approved and paid, with its invoice attached immediately.
    pub async fn create_payment_request_from_slip(
        &self,
        unmatched: &UnmatchedSlip,
        supplier: &SupplierCandidate,
        learn_alias: bool,
    ) -> Result<String, EngineError> {
        let image_path = self.upload_image(&unmatched.file).await;
        if learn_alias && !unmatched.slip.recipient_name.is_empty() {
            self.domain
                .learn_supplier_alias(&supplier.id, &unmatched.slip.recipient_name)
                .await?;
        }

        let request_number = self.domain.next_request_number().await?;
        let payment_request_id = self
            .domain
            .create_payment_request(NewPaymentRequest {
                request_number: request_number.clone(),
                title: format!("Payment to {}", supplier.name),
                description: provenance_note(&unmatched.file),
                supplier_id: Some(supplier.id.clone()),
                purchase_order_id: None,
                total_amount: unmatched.slip.amount,
                vat_amount: 0.0,
                status: "approved".to_string(),
                payment_status: "paid".to_string(),
                payment_method: "bank_transfer".to_string(),
                payment_type: "old_order".to_string(),
                image_path: image_path.clone(),
                approved: true,
                items: Vec::new(),
            })
            .await?;

        let invoice_id = self
            .domain
            .create_invoice(NewInvoice {
                invoice_number: invoice_number(),
                invoice_date: Local::now().date_naive(),
                supplier_id: Some(supplier.id.clone()),
                payment_request_id: payment_request_id.clone(),
                total_amount: unmatched.slip.amount,
                vat_amount: 0.0,
                payment_slip_path: image_path,
                notes: provenance_note(&unmatched.file),
            })
            .await?;
        self.domain
            .attach_invoice(&payment_request_id, &invoice_id)
            .await?;

        self.ledger
            .mark_processed(
                FolderType::BankSlips,
                &unmatched.file.id,
                LedgerLinks {
                    payment_request_id: Some(payment_request_id.clone()),
                    invoice_id: Some(invoice_id),
                    ..Default::default()
                },
            )
            .await?;
        info!(request = %request_number, supplier = %supplier.name, "payment request reconstructed from slip");
        Ok(payment_request_id)
    }

    /// Apply a confirmed amount-only match: learn the recipient as the
    /// supplier's alias, then settle as usual.
    pub async fn accept_pending_match(
        &self,
        pending: &PendingSupplierMatch,
    ) -> Result<String, EngineError> {
        if let Some(supplier_id) = pending.candidate.supplier_id.as_deref() {
            if !pending.slip.recipient_name.is_empty() {
                self.domain
                    .learn_supplier_alias(supplier_id, &pending.slip.recipient_name)
                    .await?;
            }
        }
        self.settle_matched_slip(&pending.file, &pending.slip, &pending.candidate)
            .await
    }

    /// Record an explicit user skip: a linkless ledger entry so the file is
    /// never offered again.
    pub async fn skip_file(
        &self,
        folder_type: FolderType,
        file_id: &str,
    ) -> Result<(), EngineError> {
        self.ledger
            .mark_processed(folder_type, file_id, LedgerLinks::default())
            .await?;
        Ok(())
    }

    async fn upload_image(&self, file: &RemoteFile) -> Option<String> {
        let path = storage_path(&file.mime_type);
        match self.objects.upload(&path, &file.content, &file.mime_type).await {
            Ok(stored) => Some(stored),
            Err(e) => {
                warn!(file = %file.name, error = %e, "image upload failed, continuing without attachment");
                None
            }
        }
    }
}

fn provenance_note(file: &RemoteFile) -> String {
    format!(
        "Imported from drive - {} ({})",
        file.name,
        format_folder_date(&file.folder_date)
    )
}

/// `INV-<yymmdd>-<4-char suffix>`.
fn invoice_number() -> String {
    let suffix: String = Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(4)
        .collect::<String>()
        .to_uppercase();
    format!("INV-{}-{}", Utc::now().format("%y%m%d"), suffix)
}

fn storage_path(mime_type: &str) -> String {
    let ext = match mime_type {
        "image/png" => "png",
        "image/webp" => "webp",
        "image/heic" => "heic",
        _ => "jpg",
    };
    let short: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();
    format!("{}-{}.{}", Utc::now().timestamp_millis(), short, ext)
}

/// Order dates come off the document as `dd/MM/yyyy`, occasionally `dd/MM/yy`.
fn parse_order_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%d/%m/%Y")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%d/%m/%y"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_dates_parse_both_widths() {
        assert_eq!(
            parse_order_date("15/08/2026"),
            NaiveDate::from_ymd_opt(2026, 8, 15)
        );
        assert_eq!(
            parse_order_date("15/08/26"),
            NaiveDate::from_ymd_opt(2026, 8, 15)
        );
        assert_eq!(parse_order_date("2026-08-15"), None);
    }

    #[test]
    fn invoice_numbers_carry_date_and_suffix() {
        let number = invoice_number();
        assert!(number.starts_with("INV-"));
        assert_eq!(number.len(), "INV-".len() + 6 + 1 + 4);
    }

    #[test]
    fn storage_paths_map_mime_to_extension() {
        assert!(storage_path("image/png").ends_with(".png"));
        assert!(storage_path("image/jpeg").ends_with(".jpg"));
    }
}
