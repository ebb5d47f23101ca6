//! Image proxy worker: turns a pending/failed image asset's source file
//! into a proxy + thumbnail pair and advances it to `proxied`.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use msearch_db::{AssetRepository, ClaimRequest, ClaimScope};
use msearch_media::{generate_proxy_and_thumbnail, Derivative, MediaStore};
use msearch_models::{file_extensions, AssetStatus};
use tracing::{info, warn};

use crate::logging::AssetLogger;
use crate::worker_base::WorkerRunner;

pub struct ImageProxyWorker {
    worker_id: String,
    asset_repo: Arc<AssetRepository>,
    store: Arc<MediaStore>,
    library_slug: Option<String>,
    lease_seconds: i64,
}

impl ImageProxyWorker {
    pub fn new(
        worker_id: String,
        asset_repo: Arc<AssetRepository>,
        store: Arc<MediaStore>,
        library_slug: Option<String>,
        lease_seconds: i64,
    ) -> Self {
        Self { worker_id, asset_repo, store, library_slug, lease_seconds }
    }

    fn scope(&self) -> ClaimScope {
        match &self.library_slug {
            Some(slug) => ClaimScope::Library(slug.clone()),
            None => ClaimScope::Global,
        }
    }

    async fn claim_one(&self) -> Option<msearch_db::ClaimedAsset> {
        let extensions: Vec<String> = file_extensions::image_extensions().into_iter().map(str::to_string).collect();

        let mut request = ClaimRequest::new(&self.worker_id, AssetStatus::Pending, self.scope());
        request.allowed_extensions = extensions.clone();
        request.lease_seconds = self.lease_seconds;
        if let Ok(mut claimed) = self.asset_repo.claim_asset_by_status(request).await {
            if let Some(asset) = claimed.pop() {
                return Some(asset);
            }
        }

        // Nothing pending: retry a previously-failed image (bounded by the
        // repository's own poison threshold on repeated failure).
        let mut retry_request = ClaimRequest::new(&self.worker_id, AssetStatus::Failed, self.scope());
        retry_request.allowed_extensions = extensions;
        retry_request.lease_seconds = self.lease_seconds;
        self.asset_repo.claim_asset_by_status(retry_request).await.ok().and_then(|mut v| v.pop())
    }

    async fn process_one(&self, claimed: msearch_db::ClaimedAsset) {
        let asset_id = claimed.asset.id;
        let logger = AssetLogger::new(asset_id, "image-proxy");
        let source_path = Path::new(&claimed.library_absolute_path).join(&claimed.asset.rel_path);

        let decode_path = source_path.clone();
        let decoded = tokio::task::spawn_blocking(move || generate_proxy_and_thumbnail(&decode_path)).await;
        let bytes = match decoded {
            Ok(Ok(b)) => b,
            Ok(Err(err)) => {
                logger.log_error(&format!("proxy generation failed: {err}"));
                let _ = self
                    .asset_repo
                    .update_asset_status(asset_id, AssetStatus::Failed, Some(&err.to_string()), Some(&self.worker_id))
                    .await;
                return;
            }
            Err(err) => {
                logger.log_error(&format!("proxy generation failed: {err}"));
                let _ = self
                    .asset_repo
                    .update_asset_status(asset_id, AssetStatus::Failed, Some(&err.to_string()), Some(&self.worker_id))
                    .await;
                return;
            }
        };

        let thumbnail_rel = self.store.derivative_rel_path(&claimed.asset.library_id, asset_id, Derivative::Thumbnail);
        let proxy_rel = self.store.derivative_rel_path(&claimed.asset.library_id, asset_id, Derivative::Proxy);

        if let Err(err) = self.store.write_atomic(&thumbnail_rel, &bytes.thumbnail_bytes).await {
            logger.log_error(&format!("thumbnail write failed: {err}"));
            let _ = self
                .asset_repo
                .update_asset_status(asset_id, AssetStatus::Failed, Some(&err.to_string()), Some(&self.worker_id))
                .await;
            return;
        }
        if let Err(err) = self.store.write_atomic(&proxy_rel, &bytes.proxy_bytes).await {
            logger.log_error(&format!("proxy write failed: {err}"));
            let _ = self
                .asset_repo
                .update_asset_status(asset_id, AssetStatus::Failed, Some(&err.to_string()), Some(&self.worker_id))
                .await;
            return;
        }

        if let Err(err) = self.asset_repo.set_derivative_paths(asset_id, Some(&proxy_rel), None, None).await {
            logger.log_error(&format!("derivative path write failed: {err}"));
            let _ = self
                .asset_repo
                .update_asset_status(asset_id, AssetStatus::Failed, Some(&err.to_string()), Some(&self.worker_id))
                .await;
            return;
        }

        match self
            .asset_repo
            .update_asset_status(asset_id, AssetStatus::Proxied, None, Some(&self.worker_id))
            .await
        {
            Ok(true) => logger.log_completion("proxy+thumbnail written"),
            Ok(false) => warn!(asset_id, "lease reclaimed mid-proxy; asset handled elsewhere"),
            Err(err) => logger.log_error(&format!("status update failed: {err}")),
        }
    }
}

#[async_trait]
impl WorkerRunner for ImageProxyWorker {
    async fn process_task(&self) -> bool {
        match self.claim_one().await {
            Some(claimed) => {
                self.process_one(claimed).await;
                true
            }
            None => false,
        }
    }
}

/// Reset an asset missing its proxy/thumbnail files back to `pending`
/// without waiting for a lease to expire — used by the AI/proxy repair pass.
pub async fn proxy_and_thumbnail_exist(store: &MediaStore, library_slug: &str, asset_id: i64) -> bool {
    let thumb = store.derivative_rel_path(library_slug, asset_id, Derivative::Thumbnail);
    let proxy = store.derivative_rel_path(library_slug, asset_id, Derivative::Proxy);
    store.resolve(&thumb).map(|p| p.exists()).unwrap_or(false)
        && store.resolve(&proxy).map(|p| p.exists()).unwrap_or(false)
}

/// Paginated repair pass: reset any image asset expected to have a proxy
/// but missing one on disk back to `pending`.
pub async fn run_repair_pass(
    asset_repo: &AssetRepository,
    store: &MediaStore,
    library_slug: Option<&str>,
) -> msearch_db::DbResult<u64> {
    const PAGE_SIZE: i64 = 500;
    let mut offset = 0i64;
    let mut reset_count = 0u64;
    loop {
        let page = asset_repo.get_asset_ids_expecting_proxy(library_slug, PAGE_SIZE, offset).await?;
        if page.is_empty() {
            break;
        }
        for (asset_id, lib_slug) in &page {
            if !proxy_and_thumbnail_exist(store, lib_slug, *asset_id).await {
                if let Some(asset) = asset_repo.get_by_id(*asset_id).await? {
                    if asset.status() != AssetStatus::Pending {
                        asset_repo.update_asset_status(*asset_id, AssetStatus::Pending, None, None).await?;
                        reset_count += 1;
                    }
                }
            }
        }
        offset += PAGE_SIZE;
    }
    if reset_count > 0 {
        info!(reset_count, "image proxy repair pass reset missing derivatives to pending");
    }
    Ok(reset_count)
}
