use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use crate::contract::{
    DecisionProvider, FolderType, MatchDecision, PendingPoForPr, PendingSupplierMatch,
    PoResolution, SlipResolution, SupplierCandidate, UnmatchedPoFile, UnmatchedSlip, PrMode,
};
use crate::domain::{DomainClient, LedgerClient, StorageClient};
use crate::drive::DriveClient;
use crate::engine::ReconcileEngine;
use crate::extract::ExtractionClient;
use crate::load_config::load_config;
use crate::rest::RestClient;
use crate::session::{CancelHandle, ImportSession, SessionOptions};

#[derive(Parser)]
#[command(name = "drive-reconcile")]
#[command(about = "Import scanned procurement documents from a drive folder and reconcile them", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one import session for the chosen lane.
    Run {
        /// Path to the static YAML config file.
        #[arg(long, short)]
        config: PathBuf,
        /// Which document lane to import.
        #[arg(long, value_enum)]
        folder_type: Lane,
        /// Scan all date folders when today's folder has nothing new.
        #[arg(long)]
        scan_all_dates: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum Lane {
    Po,
    BankSlip,
}

impl From<Lane> for FolderType {
    fn from(lane: Lane) -> Self {
        match lane {
            Lane::Po => FolderType::PurchaseOrders,
            Lane::BankSlip => FolderType::BankSlips,
        }
    }
}

/// Headless decision provider: never confirms anything that needs a human,
/// so ambiguous files stay pending for an interactive frontend. Fresh
/// purchase orders still get their payment request automatically.
struct NonInteractiveDecisions {
    scan_all_dates: bool,
}

#[async_trait]
impl DecisionProvider for NonInteractiveDecisions {
    async fn confirm_scan_all_dates(&self, today: &str) -> bool {
        info!(today, scan_all_dates = self.scan_all_dates, "no new files in today's folder");
        self.scan_all_dates
    }

    async fn resolve_pending_match(&self, pending: &PendingSupplierMatch) -> MatchDecision {
        info!(file = %pending.file.name, "pending match left unconfirmed in headless mode");
        MatchDecision::Reject
    }

    async fn resolve_unmatched_slip(
        &self,
        unmatched: &UnmatchedSlip,
        _suppliers: &[SupplierCandidate],
    ) -> SlipResolution {
        info!(file = %unmatched.file.name, "unmatched slip skipped in headless mode");
        SlipResolution::Skip
    }

    async fn resolve_unmatched_po(
        &self,
        unmatched: &UnmatchedPoFile,
        _suppliers: &[SupplierCandidate],
    ) -> PoResolution {
        info!(file = %unmatched.file.name, "unmatched purchase order skipped in headless mode");
        PoResolution::Skip
    }

    async fn resolve_pr_mode(&self, _pending: &PendingPoForPr) -> PrMode {
        PrMode::Auto
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run {
            config,
            folder_type,
            scan_all_dates,
        } => {
            let (config, secrets) = load_config(&config)?;
            let folder_type: FolderType = folder_type.into();

            let rest = Arc::new(RestClient::new(
                config.backend.base_url.clone(),
                secrets.backend_api_key,
            ));
            let domain = Arc::new(DomainClient::new(rest.clone()));
            let ledger = Arc::new(LedgerClient::new(rest.clone()));
            let objects = Arc::new(StorageClient::new(
                rest,
                config.backend.image_bucket.clone(),
            ));
            let extractor = Arc::new(ExtractionClient::new(
                config.extraction.endpoint.clone(),
                secrets.extraction_api_key,
            ));
            let drive = Arc::new(DriveClient::new(secrets.drive_access_token));

            let engine = Arc::new(ReconcileEngine::new(
                domain.clone(),
                ledger.clone(),
                objects,
                extractor,
            ));
            let session = ImportSession::new(
                drive,
                domain,
                ledger,
                engine,
                Arc::new(NonInteractiveDecisions { scan_all_dates }),
                CancelHandle::new(),
            );

            let options = SessionOptions::new(
                folder_type,
                config.folder_url(folder_type).map(str::to_string),
            );
            let stats = session.run(options).await?;
            info!(
                created = stats.created,
                matched = stats.matched,
                failed = stats.failed,
                skipped = stats.skipped,
                "import finished"
            );
            Ok(())
        }
    }
}
