//! `DriveStore` implementation over a Google-Drive-style files API.
//!
//! The lane's root folder is configured as a share URL; the folder id is
//! extracted from it. Dated subfolders are named `ddMMyy`. File content is
//! downloaded eagerly at listing time, in bounded groups, because extraction
//! needs the raw bytes immediately.

use async_trait::async_trait;
use chrono::NaiveDate;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::batch::run_in_groups;
use crate::contract::{DriveStore, FolderDateGroup, RemoteFile, StoreError};

const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
const DOWNLOAD_GROUP_SIZE: usize = 5;

#[derive(Debug, Deserialize)]
struct DriveFileMeta {
    id: String,
    name: String,
    #[serde(rename = "mimeType")]
    mime_type: String,
}

#[derive(Debug, Deserialize)]
struct DriveListResponse {
    #[serde(default)]
    files: Vec<DriveFileMeta>,
}

pub struct DriveClient {
    http: reqwest::Client,
    access_token: String,
    api_base: String,
}

impl DriveClient {
    pub fn new(access_token: String) -> Self {
        Self::with_api_base(access_token, "https://www.googleapis.com/drive/v3".to_string())
    }

    pub fn with_api_base(access_token: String, api_base: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            access_token,
            api_base,
        }
    }

    async fn list_children(
        &self,
        parent_id: &str,
        mime_filter: &str,
    ) -> Result<Vec<DriveFileMeta>, StoreError> {
        let query = format!("'{parent_id}' in parents and trashed = false and {mime_filter}");
        let response = self
            .http
            .get(format!("{}/files", self.api_base))
            .bearer_auth(&self.access_token)
            .query(&[
                ("q", query.as_str()),
                ("fields", "files(id,name,mimeType)"),
                ("pageSize", "1000"),
                ("supportsAllDrives", "true"),
                ("includeItemsFromAllDrives", "true"),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            error!(%status, parent_id, "drive listing failed");
            return Err(format!("drive listing failed with status {status}").into());
        }
        let listing: DriveListResponse = response.json().await?;
        Ok(listing.files)
    }

    async fn download(&self, meta: &DriveFileMeta, folder_date: &str) -> Option<RemoteFile> {
        let result = self
            .http
            .get(format!("{}/files/{}", self.api_base, meta.id))
            .bearer_auth(&self.access_token)
            .query(&[("alt", "media"), ("supportsAllDrives", "true")])
            .send()
            .await;
        let response = match result {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                error!(file = %meta.name, status = %r.status(), "file download failed");
                return None;
            }
            Err(e) => {
                error!(file = %meta.name, error = %e, "file download failed");
                return None;
            }
        };
        match response.bytes().await {
            Ok(bytes) => Some(RemoteFile {
                id: meta.id.clone(),
                name: meta.name.clone(),
                mime_type: meta.mime_type.clone(),
                content: bytes.to_vec(),
                folder_date: folder_date.to_string(),
            }),
            Err(e) => {
                error!(file = %meta.name, error = %e, "file body read failed");
                None
            }
        }
    }
}

/// Folder id from a share URL such as
/// `https://drive.google.com/drive/folders/<id>?usp=sharing`. A bare id is
/// accepted as-is.
pub fn folder_id_from_url(url: &str) -> Result<String, StoreError> {
    let re = Regex::new(r"/folders/([A-Za-z0-9_-]+)").expect("folder-id pattern is valid");
    if let Some(caps) = re.captures(url) {
        return Ok(caps[1].to_string());
    }
    let trimmed = url.trim();
    if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Ok(trimmed.to_string());
    }
    Err(format!("could not extract a folder id from {url:?}").into())
}

/// True when the folder name is a valid `ddMMyy` calendar date.
pub fn is_date_folder(name: &str) -> bool {
    if name.len() != 6 || !name.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    let day: u32 = name[0..2].parse().unwrap_or(0);
    let month: u32 = name[2..4].parse().unwrap_or(0);
    let year: i32 = name[4..6].parse().unwrap_or(-1);
    NaiveDate::from_ymd_opt(2000 + year, month, day).is_some()
}

/// Render a `ddMMyy` token as `dd/MM/20yy` for notes and prompts.
pub fn format_folder_date(token: &str) -> String {
    if token.len() == 6 && token.chars().all(|c| c.is_ascii_digit()) {
        format!("{}/{}/20{}", &token[0..2], &token[2..4], &token[4..6])
    } else {
        token.to_string()
    }
}

#[async_trait]
impl DriveStore for DriveClient {
    async fn list_date_folders(
        &self,
        root_folder_url: &str,
    ) -> Result<Vec<FolderDateGroup>, StoreError> {
        let root_id = folder_id_from_url(root_folder_url)?;
        let subfolders = self
            .list_children(&root_id, &format!("mimeType = '{FOLDER_MIME}'"))
            .await?;

        let mut groups = Vec::new();
        for folder in subfolders {
            if !is_date_folder(&folder.name) {
                debug!(folder = %folder.name, "ignoring non-date folder");
                continue;
            }
            let files = self
                .list_children(&folder.id, &format!("mimeType != '{FOLDER_MIME}'"))
                .await?;
            let image_count = files
                .iter()
                .filter(|f| f.mime_type.starts_with("image/"))
                .count();
            groups.push(FolderDateGroup {
                date: folder.name,
                file_count: image_count,
                folder_id: Some(folder.id),
            });
        }
        // Newest first: compare by yyMMdd.
        groups.sort_by(|a, b| {
            let key = |d: &str| format!("{}{}{}", &d[4..6], &d[2..4], &d[0..2]);
            key(&b.date).cmp(&key(&a.date))
        });
        info!(folders = groups.len(), "date folders discovered");
        Ok(groups)
    }

    async fn list_files(
        &self,
        root_folder_url: &str,
        date: &str,
    ) -> Result<Vec<RemoteFile>, StoreError> {
        let root_id = folder_id_from_url(root_folder_url)?;
        let subfolders = self
            .list_children(&root_id, &format!("mimeType = '{FOLDER_MIME}'"))
            .await?;
        let Some(folder) = subfolders.into_iter().find(|f| f.name == date) else {
            debug!(date, "no folder for date");
            return Ok(Vec::new());
        };

        let metas: Vec<DriveFileMeta> = self
            .list_children(&folder.id, &format!("mimeType != '{FOLDER_MIME}'"))
            .await?
            .into_iter()
            .filter(|f| f.mime_type.starts_with("image/"))
            .collect();
        let expected = metas.len();

        let downloads = run_in_groups(metas, DOWNLOAD_GROUP_SIZE, |meta| async move {
            self.download(&meta, date).await
        })
        .await;
        let files: Vec<RemoteFile> = downloads.into_iter().flatten().collect();
        if files.len() < expected {
            warn!(
                date,
                downloaded = files.len(),
                expected,
                "some files failed to download and were skipped"
            );
        }
        info!(date, files = files.len(), "folder listed");
        Ok(files)
    }
}
