//! Bank-slip lane behaviour of the reconciliation engine, on mocked
//! collaborators: exact matches settle, ambiguity fails the file, amount-only
//! matches auto-confirm or pend, and unmatched slips carry a suggestion.

use std::sync::Arc;

use drive_reconcile::contract::{
    ExtractedBankSlip, FolderType, MockDocumentExtractor, MockDomainStore, MockLedgerStore,
    MockObjectStore, RemoteFile, SupplierCandidate, UnpaidPaymentRequest,
};
use drive_reconcile::engine::{EngineError, ReconcileEngine, SlipOutcome};

fn slip_file(id: &str) -> RemoteFile {
    RemoteFile {
        id: id.to_string(),
        name: format!("{id}.jpg"),
        mime_type: "image/jpeg".to_string(),
        content: vec![1, 2, 3],
        folder_date: "150826".to_string(),
    }
}

fn supplier(id: &str, name: &str, alias: Option<&str>) -> SupplierCandidate {
    SupplierCandidate {
        id: id.to_string(),
        name: name.to_string(),
        bank_account_name: alias.map(str::to_string),
        vat_included_in_price: false,
    }
}

fn unpaid(id: &str, amount: f64, supplier: Option<SupplierCandidate>) -> UnpaidPaymentRequest {
    UnpaidPaymentRequest {
        id: id.to_string(),
        request_number: format!("PR-{id}"),
        supplier_id: supplier.as_ref().map(|s| s.id.clone()),
        total_amount: amount,
        vat_amount: 0.0,
        invoice_created: false,
        supplier,
    }
}

fn extractor_returning(slip: ExtractedBankSlip) -> MockDocumentExtractor {
    let mut extractor = MockDocumentExtractor::new();
    extractor
        .expect_extract_bank_slip()
        .returning(move |_| Ok(slip.clone()));
    extractor
}

fn domain_with_unpaid(candidates: Vec<UnpaidPaymentRequest>) -> MockDomainStore {
    let mut domain = MockDomainStore::new();
    domain
        .expect_list_unpaid_payment_requests()
        .returning(move || Ok(candidates.clone()));
    domain
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
async fn exact_match_settles_and_creates_invoice() {
    let extractor = extractor_returning(ExtractedBankSlip {
        amount: 100_000.0,
        recipient_name: "ACME Trading".to_string(),
        transaction_date: None,
        transaction_id: None,
    });

    let mut objects = MockObjectStore::new();
    objects
        .expect_upload()
        .times(1)
        .returning(|path, _, _| Ok(path.to_string()));

    let acme = supplier("s1", "ACME Trading Co", None);
    let mut domain = domain_with_unpaid(vec![unpaid("pr1", 100_500.0, Some(acme.clone()))]);
    domain
        .expect_mark_payment_request_paid()
        .withf(|id| id == "pr1")
        .times(1)
        .returning(|_| Ok(()));
    domain
        .expect_create_invoice()
        .withf(|new| {
            new.payment_request_id == "pr1"
                && new.total_amount == 100_000.0
                && new.payment_slip_path.is_some()
                && new.invoice_number.starts_with("INV-")
        })
        .times(1)
        .returning(|_| Ok("inv1".to_string()));
    domain
        .expect_attach_invoice()
        .withf(|pr, inv| pr == "pr1" && inv == "inv1")
        .times(1)
        .returning(|_, _| Ok(()));

    let mut ledger = MockLedgerStore::new();
    ledger
        .expect_mark_processed()
        .withf(|folder_type, file_id, links| {
            *folder_type == FolderType::BankSlips
                && file_id == "f1"
                && links.payment_request_id.as_deref() == Some("pr1")
                && links.invoice_id.as_deref() == Some("inv1")
        })
        .times(1)
        .returning(|_, _, _| Ok(()));

    let engine = engine(domain, ledger, objects, extractor);
    let outcome = engine
        .process_bank_slip(&slip_file("f1"), &[acme])
        .await
        .unwrap();
    match outcome {
        SlipOutcome::Matched {
            payment_request_id,
            auto_confirmed,
        } => {
            assert_eq!(payment_request_id, "pr1");
            assert!(!auto_confirmed);
        }
        other => panic!("expected a settled match, got {other:?}"),
    }
}

#[tokio::test]
async fn tolerance_is_relative_to_the_slip_amount() {
    // The gap is 1 005: more than 1% of the slip amount, so no match even
    // though it is within 1% of the request total.
    let extractor = extractor_returning(ExtractedBankSlip {
        amount: 100_000.0,
        recipient_name: "ACME Trading".to_string(),
        transaction_date: None,
        transaction_id: None,
    });

    let acme = supplier("s1", "ACME Trading Co", None);
    let domain = domain_with_unpaid(vec![unpaid("pr1", 101_005.0, Some(acme.clone()))]);
    let engine = engine(
        domain,
        MockLedgerStore::new(),
        MockObjectStore::new(),
        extractor,
    );

    let outcome = engine
        .process_bank_slip(&slip_file("f1"), &[acme])
        .await
        .unwrap();
    assert!(matches!(outcome, SlipOutcome::Unmatched(_)));
}

#[tokio::test]
async fn two_exact_candidates_fail_as_ambiguous() {
    let extractor = extractor_returning(ExtractedBankSlip {
        amount: 50_000.0,
        recipient_name: "Fresh Produce".to_string(),
        transaction_date: None,
        transaction_id: None,
    });

    let fresh = supplier("s1", "Fresh Produce Ltd", None);
    // No write expectations: any settlement would panic the mock.
    let domain = domain_with_unpaid(vec![
        unpaid("pr1", 50_000.0, Some(fresh.clone())),
        unpaid("pr2", 50_100.0, Some(fresh.clone())),
    ]);
    let engine = engine(
        domain,
        MockLedgerStore::new(),
        MockObjectStore::new(),
        extractor,
    );

    let err = engine
        .process_bank_slip(&slip_file("f1"), &[fresh])
        .await
        .unwrap_err();
    match err {
        EngineError::AmbiguousMatch { candidates } => assert_eq!(candidates, 2),
        other => panic!("expected ambiguity, got {other}"),
    }
}

#[tokio::test]
async fn amount_only_match_with_low_similarity_pends() {
    let extractor = extractor_returning(ExtractedBankSlip {
        amount: 30_000.0,
        recipient_name: "completely different recipient".to_string(),
        transaction_date: None,
        transaction_id: None,
    });

    let steel = supplier("s1", "Steelworks", None);
    let domain = domain_with_unpaid(vec![unpaid("pr1", 30_000.0, Some(steel.clone()))]);
    let engine = engine(
        domain,
        MockLedgerStore::new(),
        MockObjectStore::new(),
        extractor,
    );

    let outcome = engine
        .process_bank_slip(&slip_file("f1"), &[steel])
        .await
        .unwrap();
    match outcome {
        SlipOutcome::Pending(pending) => assert_eq!(pending.candidate.id, "pr1"),
        other => panic!("expected a pending match, got {other:?}"),
    }
}

#[tokio::test]
async fn amount_only_match_auto_confirms_on_alias_hit() {
    let extractor = extractor_returning(ExtractedBankSlip {
        amount: 30_000.0,
        recipient_name: "global foods account".to_string(),
        transaction_date: None,
        transaction_id: None,
    });

    let mut objects = MockObjectStore::new();
    objects
        .expect_upload()
        .returning(|path, _, _| Ok(path.to_string()));

    // The candidate's supplier shares nothing with the recipient, so the
    // match is amount-only. Another directory entry carries the recipient as
    // its learned alias, which pushes the fuzzy score past the threshold.
    let unrelated = supplier("s1", "Unrelated Company Name", None);
    let aliased = supplier("s2", "Another Business", Some("global foods account"));
    let mut candidate = unpaid("pr1", 30_000.0, Some(unrelated.clone()));
    candidate.invoice_created = true; // no new invoice needed

    let mut domain = domain_with_unpaid(vec![candidate]);
    domain
        .expect_learn_supplier_alias()
        .withf(|id, alias| id == "s1" && alias == "global foods account")
        .times(1)
        .returning(|_, _| Ok(()));
    domain
        .expect_mark_payment_request_paid()
        .times(1)
        .returning(|_| Ok(()));

    let mut ledger = MockLedgerStore::new();
    ledger
        .expect_mark_processed()
        .withf(|_, file_id, links| {
            file_id == "f1"
                && links.payment_request_id.as_deref() == Some("pr1")
                && links.invoice_id.is_none()
        })
        .times(1)
        .returning(|_, _, _| Ok(()));

    let engine = engine(domain, ledger, objects, extractor);
    let outcome = engine
        .process_bank_slip(&slip_file("f1"), &[unrelated, aliased])
        .await
        .unwrap();
    match outcome {
        SlipOutcome::Matched { auto_confirmed, .. } => assert!(auto_confirmed),
        other => panic!("expected an auto-confirmed match, got {other:?}"),
    }
}

#[tokio::test]
async fn no_candidates_yields_unmatched_with_suggestion() {
    let extractor = extractor_returning(ExtractedBankSlip {
        amount: 10_000.0,
        recipient_name: "fresh produce".to_string(),
        transaction_date: None,
        transaction_id: None,
    });

    let domain = domain_with_unpaid(vec![]);
    let engine = engine(
        domain,
        MockLedgerStore::new(),
        MockObjectStore::new(),
        extractor,
    );
    let directory = vec![supplier("s1", "Fresh Produce Ltd", None)];

    let outcome = engine
        .process_bank_slip(&slip_file("f1"), &directory)
        .await
        .unwrap();
    match outcome {
        SlipOutcome::Unmatched(unmatched) => {
            let suggested = unmatched.suggested.expect("a suggestion was expected");
            assert_eq!(suggested.id, "s1");
            assert!(suggested.score >= 0.85);
        }
        other => panic!("expected an unmatched slip, got {other:?}"),
    }
}
