//! Purchase-order lane behaviour of the reconciliation engine: direct
//! supplier lookup with VAT inheritance, the fuzzy auto-confirm boundary, and
//! queueing when no supplier can be resolved.

use std::sync::Arc;

use drive_reconcile::contract::{
    ExtractedPoDocument, ExtractedPoItem, FolderType, MockDocumentExtractor, MockDomainStore,
    MockLedgerStore, MockObjectStore, RemoteFile, SupplierCandidate,
};
use drive_reconcile::engine::{PoOutcome, ReconcileEngine};
use drive_reconcile::matching::AUTO_CONFIRM_THRESHOLD;

fn po_file(id: &str) -> RemoteFile {
    RemoteFile {
        id: id.to_string(),
        name: format!("{id}.jpg"),
        mime_type: "image/jpeg".to_string(),
        content: vec![9, 9],
        folder_date: "150826".to_string(),
    }
}

fn supplier(id: &str, name: &str, vat_included: bool) -> SupplierCandidate {
    SupplierCandidate {
        id: id.to_string(),
        name: name.to_string(),
        bank_account_name: None,
        vat_included_in_price: vat_included,
    }
}

fn document(supplier_name: &str) -> ExtractedPoDocument {
    ExtractedPoDocument {
        po_number: Some("PO-000777".to_string()),
        order_date: Some("15/08/2026".to_string()),
        expected_date: None,
        supplier_name: Some(supplier_name.to_string()),
        vat_amount: Some(700.0),
        total_amount: Some(10_700.0),
        items: vec![ExtractedPoItem {
            product_name: "Crates".to_string(),
            unit: Some("pcs".to_string()),
            quantity: 10.0,
            unit_price: Some(1_000.0),
            line_total: None,
        }],
    }
}

fn extractor_returning(document: ExtractedPoDocument) -> MockDocumentExtractor {
    let mut extractor = MockDocumentExtractor::new();
    extractor
        .expect_extract_purchase_order()
        .returning(move |_| Ok(document.clone()));
    extractor
}

/// `count` distinct tokens that never substring-match each other.
fn words(prefix: &str, count: usize) -> Vec<String> {
    (0..count).map(|i| format!("{prefix}{i:02}x")).collect()
}

fn engine(
    domain: MockDomainStore,
    ledger: MockLedgerStore,
    objects: MockObjectStore,
    extractor: MockDocumentExtractor,
) -> ReconcileEngine {
    ReconcileEngine::new(
        Arc::new(domain),
        Arc::new(ledger),
        Arc::new(objects),
        Arc::new(extractor),
    )
}

#[tokio::test]
async fn direct_lookup_inherits_vat_inclusion() {
    let extractor = extractor_returning(document("ACME Trading"));

    let mut objects = MockObjectStore::new();
    objects
        .expect_upload()
        .times(1)
        .returning(|path, _, _| Ok(path.to_string()));

    let mut domain = MockDomainStore::new();
    domain
        .expect_find_supplier_by_name()
        .withf(|name| name == "ACME Trading")
        .times(1)
        .returning(|_| Ok(Some(supplier("s1", "ACME Trading Co", true))));
    domain
        .expect_create_purchase_order()
        .withf(|new| {
            // VAT-inclusive supplier forces the extracted VAT to zero.
            new.vat_amount == 0.0
                && new.po_number == "PO-000777"
                && new.supplier_id.as_deref() == Some("s1")
                && new.items.len() == 1
                && new.items[0].line_total == 10_000.0
        })
        .times(1)
        .returning(|_| Ok("po-id-1".to_string()));

    let mut ledger = MockLedgerStore::new();
    ledger
        .expect_mark_processed()
        .withf(|folder_type, file_id, links| {
            *folder_type == FolderType::PurchaseOrders
                && file_id == "f1"
                && links.purchase_order_id.as_deref() == Some("po-id-1")
                && links.payment_request_id.is_none()
        })
        .times(1)
        .returning(|_, _, _| Ok(()));

    let engine = engine(domain, ledger, objects, extractor);
    let outcome = engine
        .process_purchase_order(&po_file("f1"), &[])
        .await
        .unwrap();
    match outcome {
        PoOutcome::Created(pending) => {
            assert_eq!(pending.po_number, "PO-000777");
            assert_eq!(pending.supplier_id.as_deref(), Some("s1"));
            assert_eq!(pending.supplier_name, "ACME Trading Co");
        }
        other => panic!("expected a created purchase order, got {other:?}"),
    }
}

#[tokio::test]
async fn fuzzy_score_at_threshold_auto_resolves() {
    // 17 of 20 extracted tokens appear in the supplier name: 17/20 = 0.85,
    // exactly at the threshold, which is inclusive.
    let shared = words("word", 17);
    let supplier_name = shared.join(" ");
    let mut extracted_tokens = shared.clone();
    extracted_tokens.extend(words("extra", 3));
    let mut doc = document(&extracted_tokens.join(" "));
    doc.po_number = None;

    let extractor = extractor_returning(doc);

    let mut objects = MockObjectStore::new();
    objects
        .expect_upload()
        .returning(|path, _, _| Ok(path.to_string()));

    let mut domain = MockDomainStore::new();
    domain
        .expect_find_supplier_by_name()
        .times(1)
        .returning(|_| Ok(None));
    domain
        .expect_next_po_number()
        .times(1)
        .returning(|| Ok("PO-000042".to_string()));
    domain
        .expect_create_purchase_order()
        .withf(|new| new.po_number == "PO-000042" && new.supplier_id.as_deref() == Some("s1"))
        .times(1)
        .returning(|_| Ok("po-id-2".to_string()));

    let mut ledger = MockLedgerStore::new();
    ledger
        .expect_mark_processed()
        .times(1)
        .returning(|_, _, _| Ok(()));

    let engine = engine(domain, ledger, objects, extractor);
    let directory = vec![supplier("s1", &supplier_name, false)];
    let outcome = engine
        .process_purchase_order(&po_file("f2"), &directory)
        .await
        .unwrap();
    assert!(matches!(outcome, PoOutcome::Created(_)));
}

#[tokio::test]
async fn fuzzy_score_below_threshold_queues_the_file() {
    // 21 of 25 tokens: 0.84, just under the threshold.
    let shared = words("word", 21);
    let supplier_name = shared.join(" ");
    let mut extracted_tokens = shared.clone();
    extracted_tokens.extend(words("extra", 4));
    let mut doc = document(&extracted_tokens.join(" "));
    doc.po_number = None;

    let extractor = extractor_returning(doc);

    let mut domain = MockDomainStore::new();
    domain
        .expect_find_supplier_by_name()
        .times(1)
        .returning(|_| Ok(None));

    let engine = engine(
        domain,
        MockLedgerStore::new(),
        MockObjectStore::new(),
        extractor,
    );
    let directory = vec![supplier("s1", &supplier_name, false)];
    let outcome = engine
        .process_purchase_order(&po_file("f3"), &directory)
        .await
        .unwrap();
    match outcome {
        PoOutcome::NeedsSupplier(unmatched) => {
            let suggested = unmatched.suggested.expect("a suggestion was expected");
            assert_eq!(suggested.id, "s1");
            assert!(suggested.score < AUTO_CONFIRM_THRESHOLD);
        }
        other => panic!("expected a queued file, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_supplier_name_queues_without_suggestion() {
    let mut doc = document("ignored");
    doc.supplier_name = None;
    let extractor = extractor_returning(doc);

    let engine = engine(
        MockDomainStore::new(),
        MockLedgerStore::new(),
        MockObjectStore::new(),
        extractor,
    );
    let outcome = engine
        .process_purchase_order(&po_file("f4"), &[supplier("s1", "ACME", false)])
        .await
        .unwrap();
    match outcome {
        PoOutcome::NeedsSupplier(unmatched) => {
            assert!(unmatched.supplier_name.is_none());
            assert!(unmatched.suggested.is_none());
        }
        other => panic!("expected a queued file, got {other:?}"),
    }
}
