//! Runtime configuration for the import pipeline.

use serde::Deserialize;
use tracing::info;

use crate::contract::FolderType;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub drive: DriveSection,
    pub extraction: ExtractionSection,
    pub backend: BackendSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DriveSection {
    /// Share URL of the purchase-order root folder.
    pub po_folder_url: Option<String>,
    /// Share URL of the bank-slip root folder.
    pub bank_slip_folder_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionSection {
    pub endpoint: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendSection {
    pub base_url: String,
    /// Storage bucket for uploaded document images.
    #[serde(default = "default_bucket")]
    pub image_bucket: String,
}

fn default_bucket() -> String {
    "documents".to_string()
}

impl Config {
    pub fn folder_url(&self, folder_type: FolderType) -> Option<&str> {
        match folder_type {
            FolderType::PurchaseOrders => self.drive.po_folder_url.as_deref(),
            FolderType::BankSlips => self.drive.bank_slip_folder_url.as_deref(),
        }
    }

    /// Emit a structured snapshot of the loaded config (no secrets).
    pub fn trace_loaded(&self) {
        info!(
            po_folder = self.drive.po_folder_url.as_deref().unwrap_or("<unset>"),
            bank_slip_folder = self
                .drive
                .bank_slip_folder_url
                .as_deref()
                .unwrap_or("<unset>"),
            extraction_endpoint = %self.extraction.endpoint,
            backend = %self.backend.base_url,
            bucket = %self.backend.image_bucket,
            "Config loaded"
        );
    }
}
