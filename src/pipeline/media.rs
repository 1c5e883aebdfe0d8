//! Image materialisation: archive media → object storage → public URLs.
//!
//! Media bytes are pulled out of the archive synchronously (together with the
//! other archive work), then uploaded in fixed-size batches. Uploads inside a
//! batch run concurrently; batches run one after another so a 2 000-slide
//! deck never has more than `upload_batch_size` requests in flight.
//!
//! An upload failure costs only that slide's image: the slide gets an empty
//! URL and the rest of the batch is unaffected.

use crate::error::{PptxError, SlideError};
use crate::output::{SlideImageRef, UploadedImage};
use crate::pipeline::archive::PptxArchive;
use crate::progress::ProgressCallback;
use crate::storage::ObjectStore;
use futures::future::join_all;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Raw bytes of one slide's image, ready for upload.
#[derive(Debug, Clone)]
pub struct MediaPayload {
    pub slide_number: u32,
    pub media_filename: String,
    pub bytes: Vec<u8>,
}

/// Read the media entry behind every image reference.
///
/// A reference whose entry is missing yields a [`SlideError::MissingMedia`]
/// instead of a payload.
pub fn collect_media(
    archive: &mut PptxArchive,
    refs: &[SlideImageRef],
) -> Result<(Vec<MediaPayload>, Vec<SlideError>), PptxError> {
    let mut payloads = Vec::with_capacity(refs.len());
    let mut errors = Vec::new();

    for r in refs {
        let entry = format!("ppt/media/{}", r.media_filename);
        match archive.read_entry(&entry)? {
            Some(bytes) => payloads.push(MediaPayload {
                slide_number: r.slide_number,
                media_filename: r.media_filename.clone(),
                bytes,
            }),
            None => {
                warn!("Slide {}: media entry '{}' missing", r.slide_number, entry);
                errors.push(SlideError::MissingMedia {
                    slide: r.slide_number,
                    name: r.media_filename.clone(),
                });
            }
        }
    }

    Ok((payloads, errors))
}

/// Upload payloads in sequential batches of concurrent uploads.
///
/// Returns one [`UploadedImage`] per payload, in input order; failed uploads
/// carry an empty URL and a matching [`SlideError::UploadFailed`].
pub async fn upload_images(
    store: &Arc<dyn ObjectStore>,
    payloads: Vec<MediaPayload>,
    batch_size: usize,
    progress: Option<&ProgressCallback>,
) -> (Vec<UploadedImage>, Vec<SlideError>) {
    let total = payloads.len();
    let batch_size = batch_size.max(1);
    let mut uploaded = Vec::with_capacity(total);
    let mut errors = Vec::new();

    let mut remaining = payloads.into_iter();
    loop {
        let batch: Vec<MediaPayload> = remaining.by_ref().take(batch_size).collect();
        if batch.is_empty() {
            break;
        }

        let results = join_all(batch.into_iter().map(|p| upload_one(store, p))).await;
        for (image, err) in results {
            if let Some(e) = err {
                if let Some(cb) = progress {
                    cb.on_slide_error(e.slide(), &e.to_string());
                }
                errors.push(e);
            }
            uploaded.push(image);
        }

        debug!("Uploaded batch: {}/{} images done", uploaded.len(), total);
        if let Some(cb) = progress {
            cb.on_upload_batch_complete(uploaded.len(), total);
        }
    }

    info!(
        "Image upload finished: {}/{} succeeded via {}",
        uploaded.iter().filter(|u| u.is_uploaded()).count(),
        total,
        store.name()
    );
    (uploaded, errors)
}

async fn upload_one(
    store: &Arc<dyn ObjectStore>,
    payload: MediaPayload,
) -> (UploadedImage, Option<SlideError>) {
    let slide = payload.slide_number;
    let key = unique_object_name(slide, &payload.media_filename);
    let content_type = content_type_for(&payload.media_filename, &payload.bytes);

    match store.put(&key, payload.bytes, content_type).await {
        Ok(()) => (
            UploadedImage {
                slide_number: slide,
                public_url: store.public_url(&key),
            },
            None,
        ),
        Err(e) => {
            warn!("Slide {}: upload of '{}' failed: {}", slide, key, e);
            (
                UploadedImage {
                    slide_number: slide,
                    public_url: String::new(),
                },
                Some(SlideError::UploadFailed {
                    slide,
                    detail: e.to_string(),
                }),
            )
        }
    }
}

/// Storage key for a slide image: `slides/{unix_ms}-slide{N}-{random}.{ext}`.
///
/// Unique across concurrent jobs sharing one bucket.
pub fn unique_object_name(slide_number: u32, media_filename: &str) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let random = Uuid::new_v4().simple().to_string();
    let ext = extension(media_filename).unwrap_or_else(|| "bin".to_string());
    format!("slides/{millis}-slide{slide_number}-{}.{ext}", &random[..8])
}

/// MIME type from magic bytes, falling back to the file extension.
pub fn content_type_for(media_filename: &str, bytes: &[u8]) -> &'static str {
    if let Ok(format) = image::guess_format(bytes) {
        return format.to_mime_type();
    }
    match extension(media_filename).as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}

fn extension(filename: &str) -> Option<String> {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryObjectStore;
    use async_trait::async_trait;
    use std::collections::HashSet;

    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    /// Fails every upload whose key belongs to `fail_slide`.
    struct FlakyStore {
        inner: MemoryObjectStore,
        fail_slide: u32,
    }

    #[async_trait]
    impl ObjectStore for FlakyStore {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn get(&self, path: &str) -> Result<Vec<u8>, PptxError> {
            self.inner.get(path).await
        }

        async fn put(&self, key: &str, data: Vec<u8>, ct: &str) -> Result<(), PptxError> {
            if key.contains(&format!("-slide{}-", self.fail_slide)) {
                return Err(PptxError::Storage("HTTP 503".into()));
            }
            self.inner.put(key, data, ct).await
        }

        fn public_url(&self, key: &str) -> String {
            self.inner.public_url(key)
        }
    }

    fn payload(slide: u32) -> MediaPayload {
        MediaPayload {
            slide_number: slide,
            media_filename: format!("image{slide}.png"),
            bytes: PNG_MAGIC.to_vec(),
        }
    }

    #[test]
    fn object_names_are_unique_and_keep_extension() {
        let names: HashSet<String> = (0..200).map(|_| unique_object_name(3, "Foto.JPEG")).collect();
        assert_eq!(names.len(), 200);
        let one = names.iter().next().unwrap();
        assert!(one.starts_with("slides/"));
        assert!(one.contains("-slide3-"));
        assert!(one.ends_with(".jpeg"));
    }

    #[test]
    fn content_type_sniffed_then_extension() {
        assert_eq!(content_type_for("image1.jpg", PNG_MAGIC), "image/png");
        assert_eq!(content_type_for("image1.jpg", b"????"), "image/jpeg");
        assert_eq!(content_type_for("image1", b"????"), "application/octet-stream");
    }

    #[tokio::test]
    async fn one_failed_upload_leaves_one_empty_url() {
        let store: Arc<dyn ObjectStore> = Arc::new(FlakyStore {
            inner: MemoryObjectStore::new(),
            fail_slide: 2,
        });
        let payloads = (1..=4).map(payload).collect();

        let (images, errors) = upload_images(&store, payloads, 4, None).await;

        assert_eq!(images.len(), 4);
        assert_eq!(images.iter().filter(|i| i.is_uploaded()).count(), 3);
        let failed: Vec<u32> = images
            .iter()
            .filter(|i| !i.is_uploaded())
            .map(|i| i.slide_number)
            .collect();
        assert_eq!(failed, vec![2]);
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], SlideError::UploadFailed { slide: 2, .. }));
    }

    #[tokio::test]
    async fn batches_cover_every_payload_in_order() {
        let mem = Arc::new(MemoryObjectStore::new());
        let store: Arc<dyn ObjectStore> = mem.clone();
        let payloads = (1..=7).map(payload).collect();

        let (images, errors) = upload_images(&store, payloads, 3, None).await;

        assert!(errors.is_empty());
        let order: Vec<u32> = images.iter().map(|i| i.slide_number).collect();
        assert_eq!(order, (1..=7).collect::<Vec<_>>());
        assert_eq!(mem.len().await, 7);
        assert!(images.iter().all(|i| i.public_url.starts_with("memory://slides/")));
    }
}
