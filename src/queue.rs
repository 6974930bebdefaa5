//! Confirmation queues drained between batch phases.
//!
//! Four FIFO queues, one per confirmation kind, with a fixed priority order.
//! The controller asks [`ConfirmationQueues::next_phase`] what to present
//! next; `None` means the session is complete.

use std::collections::VecDeque;

use crate::contract::{PendingPoForPr, PendingSupplierMatch, UnmatchedPoFile, UnmatchedSlip};

/// The confirmation phase the controller should run next. Ordering is fixed:
/// purchase orders awaiting a payment-request decision drain first, then
/// amount-matched slips, then supplier-less purchase orders, then fully
/// unmatched slips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AskPrMode,
    ConfirmSupplierMatch,
    ConfirmPoSupplier,
    ResolveUnmatchedSlip,
}

#[derive(Default)]
pub struct ConfirmationQueues {
    pending_po_for_pr: VecDeque<PendingPoForPr>,
    pending_matches: VecDeque<PendingSupplierMatch>,
    unmatched_po_files: VecDeque<UnmatchedPoFile>,
    unmatched_slips: VecDeque<UnmatchedSlip>,
}

impl ConfirmationQueues {
    /// Highest-priority non-empty queue, or `None` when all are drained.
    pub fn next_phase(&self) -> Option<Phase> {
        if !self.pending_po_for_pr.is_empty() {
            Some(Phase::AskPrMode)
        } else if !self.pending_matches.is_empty() {
            Some(Phase::ConfirmSupplierMatch)
        } else if !self.unmatched_po_files.is_empty() {
            Some(Phase::ConfirmPoSupplier)
        } else if !self.unmatched_slips.is_empty() {
            Some(Phase::ResolveUnmatchedSlip)
        } else {
            None
        }
    }

    pub fn is_empty(&self) -> bool {
        self.next_phase().is_none()
    }

    pub fn push_pending_po(&mut self, item: PendingPoForPr) {
        self.pending_po_for_pr.push_back(item);
    }

    pub fn pop_pending_po(&mut self) -> Option<PendingPoForPr> {
        self.pending_po_for_pr.pop_front()
    }

    pub fn push_pending_match(&mut self, item: PendingSupplierMatch) {
        self.pending_matches.push_back(item);
    }

    pub fn pop_pending_match(&mut self) -> Option<PendingSupplierMatch> {
        self.pending_matches.pop_front()
    }

    pub fn push_unmatched_po(&mut self, item: UnmatchedPoFile) {
        self.unmatched_po_files.push_back(item);
    }

    pub fn pop_unmatched_po(&mut self) -> Option<UnmatchedPoFile> {
        self.unmatched_po_files.pop_front()
    }

    pub fn push_unmatched_slip(&mut self, item: UnmatchedSlip) {
        self.unmatched_slips.push_back(item);
    }

    pub fn pop_unmatched_slip(&mut self) -> Option<UnmatchedSlip> {
        self.unmatched_slips.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{ExtractedBankSlip, ExtractedPoDocument, RemoteFile};

    fn file(id: &str) -> RemoteFile {
        RemoteFile {
            id: id.to_string(),
            name: format!("{id}.jpg"),
            mime_type: "image/jpeg".to_string(),
            content: vec![],
            folder_date: "150826".to_string(),
        }
    }

    fn slip() -> ExtractedBankSlip {
        ExtractedBankSlip {
            amount: 100.0,
            recipient_name: "someone".to_string(),
            transaction_date: None,
            transaction_id: None,
        }
    }

    fn pending_po(id: &str) -> PendingPoForPr {
        PendingPoForPr {
            purchase_order_id: id.to_string(),
            po_number: "PO-000001".to_string(),
            supplier_id: None,
            supplier_name: "acme".to_string(),
            document: ExtractedPoDocument::default(),
            image_path: None,
            file_id: id.to_string(),
        }
    }

    #[test]
    fn empty_queues_report_complete() {
        let queues = ConfirmationQueues::default();
        assert_eq!(queues.next_phase(), None);
        assert!(queues.is_empty());
    }

    #[test]
    fn pending_po_drains_before_everything_else() {
        let mut queues = ConfirmationQueues::default();
        queues.push_unmatched_slip(UnmatchedSlip {
            file: file("s1"),
            slip: slip(),
            suggested: None,
        });
        queues.push_unmatched_po(UnmatchedPoFile {
            file: file("p1"),
            document: ExtractedPoDocument::default(),
            supplier_name: None,
            suggested: None,
        });
        queues.push_pending_po(pending_po("po1"));

        assert_eq!(queues.next_phase(), Some(Phase::AskPrMode));
        queues.pop_pending_po();
        assert_eq!(queues.next_phase(), Some(Phase::ConfirmPoSupplier));
        queues.pop_unmatched_po();
        assert_eq!(queues.next_phase(), Some(Phase::ResolveUnmatchedSlip));
        queues.pop_unmatched_slip();
        assert_eq!(queues.next_phase(), None);
    }

    #[test]
    fn queues_are_fifo() {
        let mut queues = ConfirmationQueues::default();
        queues.push_pending_po(pending_po("first"));
        queues.push_pending_po(pending_po("second"));

        assert_eq!(queues.pop_pending_po().unwrap().purchase_order_id, "first");
        assert_eq!(queues.pop_pending_po().unwrap().purchase_order_id, "second");
    }
}
