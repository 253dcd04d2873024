//! # mediastore — local-filesystem blob store for mediagraph
//!
//! Persists per-node artifacts under
//! `{storage}/media/{node_id}/{generation_id}/` and serves them back by
//! `/media/...` url. Images get a 200×200 JPEG thumbnail next to the
//! original; video and audio reuse the original as their thumbnail url;
//! text results inline their content into the url fields so clients never
//! re-fetch them.

use std::io::Cursor;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use image::ImageOutputFormat;
use tracing::warn;
use uuid::Uuid;

use mediagraph_core::error::{EngineError, Result};
use mediagraph_core::media::MediaUrls;
use mediagraph_core::traits::MediaStore;

const THUMBNAIL_SIZE: u32 = 200;
const THUMBNAIL_JPEG_QUALITY: u8 = 85;

/// Local filesystem implementation of the [`MediaStore`] contract.
pub struct LocalMediaStore {
    base_path: PathBuf,
}

impl LocalMediaStore {
    /// Create the store rooted at `{storage_path}/media`, creating the
    /// directory if needed.
    pub fn new(storage_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = storage_path.as_ref().join("media");
        std::fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }

    fn generation_id() -> String {
        Uuid::new_v4().simple().to_string()[..12].to_string()
    }

    async fn generation_dir(&self, node_id: &str) -> Result<(PathBuf, String)> {
        let generation = Self::generation_id();
        let dir = self.base_path.join(node_id).join(&generation);
        tokio::fs::create_dir_all(&dir).await?;
        let url_base = format!("/media/{node_id}/{generation}");
        Ok((dir, url_base))
    }

    /// Map a `/media/...` url back to a path inside the store. Rejects
    /// anything that would escape the base directory.
    fn path_for_url(&self, url: &str) -> Option<PathBuf> {
        let relative = url.split("/media/").nth(1)?;
        let relative = Path::new(relative);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return None;
        }
        Some(self.base_path.join(relative))
    }
}

/// Downscale to a 200×200-bounded JPEG. Returns `None` when the bytes do
/// not decode as an image.
fn make_thumbnail(bytes: &[u8]) -> Option<Vec<u8>> {
    let img = image::load_from_memory(bytes).ok()?;
    let thumb = img.thumbnail(THUMBNAIL_SIZE, THUMBNAIL_SIZE);
    // JPEG has no alpha channel.
    let thumb = image::DynamicImage::ImageRgb8(thumb.to_rgb8());
    let mut buf = Vec::new();
    thumb
        .write_to(
            &mut Cursor::new(&mut buf),
            ImageOutputFormat::Jpeg(THUMBNAIL_JPEG_QUALITY),
        )
        .ok()?;
    Some(buf)
}

#[async_trait]
impl MediaStore for LocalMediaStore {
    async fn upload_image(&self, node_id: &str, bytes: &[u8], fmt: &str) -> Result<MediaUrls> {
        let (dir, url_base) = self.generation_dir(node_id).await?;
        tokio::fs::write(dir.join(format!("original.{fmt}")), bytes).await?;

        // Encoding happens off the async workers.
        let owned = bytes.to_vec();
        let thumbnail = tokio::task::spawn_blocking(move || make_thumbnail(&owned))
            .await
            .map_err(EngineError::store)?;

        let thumbnail_url = match thumbnail {
            Some(jpeg) => {
                tokio::fs::write(dir.join("thumbnail.jpg"), jpeg).await?;
                format!("{url_base}/thumbnail.jpg")
            }
            None => {
                warn!(node_id, "image did not decode, serving original as thumbnail");
                format!("{url_base}/original.{fmt}")
            }
        };

        Ok(MediaUrls::new(
            format!("{url_base}/original.{fmt}"),
            thumbnail_url,
        ))
    }

    async fn upload_text(&self, node_id: &str, text: &str) -> Result<MediaUrls> {
        let (dir, _) = self.generation_dir(node_id).await?;
        tokio::fs::write(dir.join("output.txt"), text).await?;
        // The content itself is the url, sparing clients a second fetch.
        Ok(MediaUrls::single(text))
    }

    async fn upload_video(&self, node_id: &str, bytes: &[u8], fmt: &str) -> Result<MediaUrls> {
        let (dir, url_base) = self.generation_dir(node_id).await?;
        tokio::fs::write(dir.join(format!("original.{fmt}")), bytes).await?;
        Ok(MediaUrls::single(format!("{url_base}/original.{fmt}")))
    }

    async fn upload_audio(&self, node_id: &str, bytes: &[u8], fmt: &str) -> Result<MediaUrls> {
        let (dir, url_base) = self.generation_dir(node_id).await?;
        tokio::fs::write(dir.join(format!("original.{fmt}")), bytes).await?;
        Ok(MediaUrls::single(format!("{url_base}/original.{fmt}")))
    }

    async fn read_media_bytes(&self, url: &str) -> Result<Option<Vec<u8>>> {
        let Some(path) = self.path_for_url(url) else {
            return Ok(None);
        };
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn delete_node_media(&self, node_id: &str) -> Result<()> {
        let dir = self.base_path.join(node_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn duplicate_node_media(
        &self,
        source_node_id: &str,
        target_node_id: &str,
    ) -> Result<()> {
        let source = self.base_path.join(source_node_id);
        let target = self.base_path.join(target_node_id);
        if !tokio::fs::try_exists(&source).await? {
            return Ok(());
        }
        tokio::task::spawn_blocking(move || copy_tree(&source, &target))
            .await
            .map_err(EngineError::store)??;
        Ok(())
    }
}

fn copy_tree(source: &Path, target: &Path) -> Result<()> {
    std::fs::create_dir_all(target)?;
    for entry in std::fs::read_dir(source)? {
        let entry = entry?;
        let destination = target.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &destination)?;
        } else {
            std::fs::copy(entry.path(), &destination)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, LocalMediaStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalMediaStore::new(dir.path()).unwrap();
        (dir, store)
    }

    fn tiny_png() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(8, 8, image::Rgb([200, 40, 40]));
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)
            .unwrap();
        buf
    }

    #[tokio::test]
    async fn image_upload_produces_original_and_thumbnail() {
        let (_dir, store) = store();
        let urls = store.upload_image("n1", &tiny_png(), "png").await.unwrap();
        assert!(urls.original.starts_with("/media/n1/"));
        assert!(urls.original.ends_with("/original.png"));
        assert!(urls.thumbnail.ends_with("/thumbnail.jpg"));

        let original = store.read_media_bytes(&urls.original).await.unwrap();
        assert_eq!(original.unwrap(), tiny_png());
        let thumb = store.read_media_bytes(&urls.thumbnail).await.unwrap();
        assert!(thumb.is_some());
    }

    #[tokio::test]
    async fn undecodable_image_falls_back_to_original_thumbnail() {
        let (_dir, store) = store();
        let urls = store
            .upload_image("n1", b"not an image", "png")
            .await
            .unwrap();
        assert_eq!(urls.original, urls.thumbnail);
    }

    #[tokio::test]
    async fn text_upload_inlines_content() {
        let (_dir, store) = store();
        let urls = store.upload_text("n1", "hello world").await.unwrap();
        assert_eq!(urls.original, "hello world");
        assert_eq!(urls.thumbnail, "hello world");
    }

    #[tokio::test]
    async fn audio_roundtrip_and_delete() {
        let (_dir, store) = store();
        let urls = store.upload_audio("n1", b"wav-bytes", "wav").await.unwrap();
        assert!(urls.original.ends_with("/original.wav"));
        assert_eq!(
            store.read_media_bytes(&urls.original).await.unwrap().unwrap(),
            b"wav-bytes"
        );

        store.delete_node_media("n1").await.unwrap();
        assert!(store.read_media_bytes(&urls.original).await.unwrap().is_none());
        // Deleting again is a no-op.
        store.delete_node_media("n1").await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_copies_every_generation() {
        let (_dir, store) = store();
        let first = store.upload_audio("src", b"a", "wav").await.unwrap();
        let second = store.upload_audio("src", b"b", "wav").await.unwrap();

        store.duplicate_node_media("src", "dst").await.unwrap();
        for url in [&first.original, &second.original] {
            let copied = url.replacen("src", "dst", 1);
            assert!(store.read_media_bytes(&copied).await.unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn traversal_urls_resolve_to_nothing() {
        let (_dir, store) = store();
        assert!(store
            .read_media_bytes("/media/../../etc/passwd")
            .await
            .unwrap()
            .is_none());
        assert!(store.read_media_bytes("no-media-prefix").await.unwrap().is_none());
    }
}
