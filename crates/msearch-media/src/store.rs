//! Sharded on-disk layout for derivative media, with atomic stage-then-rename
//! writes so a partially-written file is never observable under its final
//! name. Shard modulus bounds directory fanout under a single data root.

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::error::{MediaError, MediaResult};

const SHARD_MODULUS: i64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Derivative {
    Thumbnail,
    Proxy,
}

impl Derivative {
    fn category(self) -> &'static str {
        match self {
            Derivative::Thumbnail => "thumbnails",
            Derivative::Proxy => "proxies",
        }
    }

    fn extension(self) -> &'static str {
        match self {
            Derivative::Thumbnail => "jpg",
            Derivative::Proxy => "webp",
        }
    }
}

/// Root-anchored accessor for a library's derivative storage. All paths
/// returned are relative to `data_dir`, matching what's persisted in the DB;
/// `resolve` turns a relative path back into an absolute one and rejects
/// traversal outside the data root.
#[derive(Debug, Clone)]
pub struct MediaStore {
    data_dir: PathBuf,
}

impl MediaStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// `<slug>/{thumbnails,proxies}/<id%1000>/<id>.<ext>`, relative to
    /// `data_dir`.
    pub fn derivative_rel_path(&self, library_slug: &str, asset_id: i64, kind: Derivative) -> String {
        format!(
            "{}/{}/{}/{}.{}",
            library_slug,
            kind.category(),
            asset_id.rem_euclid(SHARD_MODULUS),
            asset_id,
            kind.extension()
        )
    }

    /// Named by the scene's own boundaries rather than its DB id, since the
    /// frame is written before `save_scene_and_update_state` assigns one.
    pub fn scene_rep_frame_rel_path(&self, library_slug: &str, asset_id: i64, start_ts: f64, end_ts: f64) -> String {
        format!("video_scenes/{library_slug}/{asset_id}/{start_ts:.3}_{end_ts:.3}.jpg")
    }

    pub fn scene_preview_rel_path(&self, library_slug: &str, asset_id: i64) -> String {
        format!("video_scenes/{library_slug}/{asset_id}/preview.webp")
    }

    pub fn video_clip_rel_path(&self, library_slug: &str, asset_id: i64, clip_name: &str) -> String {
        format!("video_clips/{library_slug}/{asset_id}/{clip_name}")
    }

    pub fn tmp_dir(&self, library_slug: Option<&str>) -> PathBuf {
        match library_slug {
            Some(slug) => self.data_dir.join("tmp").join(slug),
            None => self.data_dir.join("tmp"),
        }
    }

    /// Resolve a relative derivative path to an absolute one, rejecting any
    /// path that escapes `data_dir` after normalization.
    pub fn resolve(&self, rel_path: &str) -> MediaResult<PathBuf> {
        let candidate = self.data_dir.join(rel_path);
        let normalized = normalize(&candidate);
        if !normalized.starts_with(normalize(&self.data_dir)) {
            return Err(MediaError::internal(format!(
                "path traversal outside data_dir: {rel_path}"
            )));
        }
        Ok(normalized)
    }

    /// Write `bytes` to `rel_path` by staging to a temp sibling and renaming
    /// into place on success; the temp file is unlinked on any failure so a
    /// reader never observes a partial write under the final name.
    pub async fn write_atomic(&self, rel_path: &str, bytes: &[u8]) -> MediaResult<PathBuf> {
        let dest = self.resolve(rel_path)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = dest.with_extension(format!(
            "{}.tmp",
            dest.extension().and_then(|e| e.to_str()).unwrap_or("bin")
        ));
        let write_result = fs::write(&tmp, bytes).await;
        if let Err(e) = write_result {
            let _ = fs::remove_file(&tmp).await;
            return Err(MediaError::Io(e));
        }
        if let Err(e) = fs::rename(&tmp, &dest).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(MediaError::Io(e));
        }
        Ok(dest)
    }

    /// Move an already-written file (typically produced by an external
    /// process like ffmpeg, which needs a real path to write to rather than
    /// a byte buffer) into its final derivative location. Same
    /// never-observe-a-partial-write guarantee as `write_atomic`, via
    /// rename instead of a second copy — `tmp_path` is expected to live
    /// under this store's own `tmp_dir` and thus share its filesystem.
    pub async fn move_in(&self, tmp_path: &Path, rel_path: &str) -> MediaResult<PathBuf> {
        let dest = self.resolve(rel_path)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        match fs::rename(tmp_path, &dest).await {
            Ok(()) => Ok(dest),
            Err(_) => {
                // Cross-device fallback: copy then remove the source.
                fs::copy(tmp_path, &dest).await?;
                let _ = fs::remove_file(tmp_path).await;
                Ok(dest)
            }
        }
    }

    pub async fn delete(&self, rel_path: &str) -> MediaResult<()> {
        let path = self.resolve(rel_path)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MediaError::Io(e)),
        }
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                out.pop();
            }
            std::path::Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scene_rep_frame_rel_path_keyed_by_timestamps() {
        let store = MediaStore::new("/data");
        assert_eq!(
            store.scene_rep_frame_rel_path("lib", 9, 4.0, 9.5),
            "video_scenes/lib/9/4.000_9.500.jpg"
        );
    }

    #[test]
    fn derivative_rel_path_shards_by_modulus() {
        let store = MediaStore::new("/data");
        assert_eq!(
            store.derivative_rel_path("lib", 1234, Derivative::Thumbnail),
            "lib/thumbnails/234/1234.jpg"
        );
        assert_eq!(
            store.derivative_rel_path("lib", 1234, Derivative::Proxy),
            "lib/proxies/234/1234.webp"
        );
    }

    #[test]
    fn resolve_rejects_traversal() {
        let store = MediaStore::new("/data");
        let err = store.resolve("../../etc/passwd");
        assert!(err.is_err());
    }

    #[test]
    fn resolve_accepts_plain_relative_path() {
        let store = MediaStore::new("/data");
        let resolved = store.resolve("lib/proxies/1/1.webp").unwrap();
        assert_eq!(resolved, PathBuf::from("/data/lib/proxies/1/1.webp"));
    }
}
