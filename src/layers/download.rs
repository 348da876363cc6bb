use anyhow::{Context, Result, anyhow, bail};
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{create_dir_all, File};
use tokio::io::AsyncWriteExt;
use url::Url;
use crate::layers::PaperRecord;

pub struct Downloader {
    client: Client,
    base_dir: PathBuf,
}

impl Downloader {
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_dir: base_dir.into(),
        })
    }

    /// Saves the paper's PDF as `<base_dir>/<identifier>.pdf`, never
    /// overwriting an earlier download.
    pub async fn download_paper(&self, paper: &PaperRecord) -> Result<PathBuf> {
        let pdf_url = paper.pdf_url.as_ref()
            .ok_or_else(|| anyhow!("No PDF URL found for paper {}", paper.id))?;
        let pdf_url = Url::parse(pdf_url).with_context(|| format!("Invalid PDF URL: {}", pdf_url))?;
        if !matches!(pdf_url.scheme(), "http" | "https") {
            bail!("Unsupported PDF URL scheme: {}", pdf_url);
        }

        create_dir_all(&self.base_dir).await
            .with_context(|| format!("Failed to create {}", self.base_dir.display()))?;

        tracing::info!("Downloading PDF from: {}", pdf_url);
        let mut response = self.client.get(pdf_url).send().await?;

        if !response.status().is_success() {
            let err = format!("Failed to download PDF: {}", response.status());
            tracing::error!("{}", err);
            return Err(anyhow!(err));
        }

        let pdf_path = unique_path(&self.base_dir, &sanitize_id(&paper.id)).await;
        let written: Result<()> = async {
            let mut file = File::create(&pdf_path).await?;
            while let Some(chunk) = response.chunk().await? {
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            Ok(())
        }
        .await;

        if let Err(e) = written {
            // A partial file would later block the clean name
            let _ = tokio::fs::remove_file(&pdf_path).await;
            return Err(e.context(format!("Failed to save {}", pdf_path.display())));
        }

        Ok(pdf_path)
    }
}

/// Turns an entry id such as `http://arxiv.org/abs/2501.00001v1` into a
/// file stem (`2501.00001v1`).
pub fn sanitize_id(raw_id: &str) -> String {
    let id = raw_id.replace("http://", "").replace("https://", "");
    let id = id.strip_prefix("arxiv.org/abs/").unwrap_or(&id);
    let safe = id.replace(|c: char| !c.is_alphanumeric() && c != '.' && c != '-', "_");
    if safe.is_empty() {
        "paper".to_string()
    } else {
        safe
    }
}

async fn unique_path(dir: &Path, stem: &str) -> PathBuf {
    let mut path = dir.join(format!("{}.pdf", stem));
    let mut idx = 1;
    while tokio::fs::try_exists(&path).await.unwrap_or(false) {
        path = dir.join(format!("{}_{}.pdf", stem, idx));
        idx += 1;
    }
    path
}
