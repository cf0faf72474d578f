//! Multimodal image injection.
//!
//! Pending images queued on a conversation are materialised into a user
//! message before the next provider call: each file is re-encoded to JPEG at
//! a per-detail size/quality, then carried as a canonical image part that the
//! adapters translate into their own wire format. After materialisation the
//! queue's view counters are decremented and exhausted entries evicted.

use std::io::Cursor;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::{debug, warn};

use atelier_store::{ContentPart, ImageDetail, MessageContent, PendingImage};

/// `(max_edge_px, jpeg_quality)` per detail level.
pub fn detail_settings(detail: ImageDetail) -> (u32, u8) {
    match detail {
        ImageDetail::Low => (512, 75),
        ImageDetail::Auto => (1024, 85),
        ImageDetail::High => (2048, 95),
    }
}

/// Load, shrink and re-encode one image file as base64 JPEG.
pub fn encode_image_file(path: &Path, detail: ImageDetail) -> Option<ContentPart> {
    let (max_edge, quality) = detail_settings(detail);

    let img = match image::open(path) {
        Ok(img) => img,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to open image for injection");
            return None;
        }
    };

    // thumbnail() keeps aspect ratio and never upscales.
    let resized = img.thumbnail(max_edge, max_edge);
    let rgb = image::DynamicImage::ImageRgb8(resized.to_rgb8());

    let mut buf: Vec<u8> = Vec::new();
    let encoder =
        image::codecs::jpeg::JpegEncoder::new_with_quality(Cursor::new(&mut buf), quality);
    if let Err(e) = rgb.write_with_encoder(encoder) {
        warn!(path = %path.display(), error = %e, "jpeg encode failed");
        return None;
    }

    debug!(
        path = %path.display(),
        bytes = buf.len(),
        detail = detail.as_str(),
        "image encoded for injection"
    );

    Some(ContentPart::Image {
        media_type: "image/jpeg".to_string(),
        data: BASE64.encode(&buf),
        detail,
    })
}

/// Build the injected user-message content for the queued images. Files that
/// no longer exist are skipped. Returns `None` when nothing usable remains.
pub fn build_injection_content(
    pending: &[PendingImage],
    workspace_dir: &Path,
) -> Option<MessageContent> {
    if pending.is_empty() {
        return None;
    }

    let mut image_parts: Vec<ContentPart> = Vec::new();
    for entry in pending {
        let full_path = workspace_dir.join(&entry.path);
        if !full_path.is_file() {
            warn!(path = %full_path.display(), "queued image missing, skipping");
            continue;
        }
        if let Some(part) = encode_image_file(&full_path, entry.detail) {
            image_parts.push(part);
        }
    }

    if image_parts.is_empty() {
        return None;
    }

    let mut parts = vec![ContentPart::Text {
        text: format!("以下是待查看的{}张图片，请查看并分析：", image_parts.len()),
    }];
    parts.extend(image_parts);
    Some(MessageContent::Parts(parts))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_test_png(path: &Path, width: u32, height: u32) {
        let img = image::RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        img.save(path).unwrap();
    }

    #[test]
    fn detail_settings_table() {
        assert_eq!(detail_settings(ImageDetail::Low), (512, 75));
        assert_eq!(detail_settings(ImageDetail::Auto), (1024, 85));
        assert_eq!(detail_settings(ImageDetail::High), (2048, 95));
    }

    #[test]
    fn encode_produces_jpeg_part() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("pic.png");
        write_test_png(&path, 64, 48);

        let part = encode_image_file(&path, ImageDetail::Auto).unwrap();
        match part {
            ContentPart::Image {
                media_type, data, ..
            } => {
                assert_eq!(media_type, "image/jpeg");
                let bytes = BASE64.decode(data).unwrap();
                // JPEG magic
                assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
            }
            _ => panic!("expected image part"),
        }
    }

    #[test]
    fn injection_message_counts_images() {
        let tmp = tempfile::tempdir().unwrap();
        write_test_png(&tmp.path().join("a.png"), 32, 32);
        write_test_png(&tmp.path().join("b.png"), 32, 32);

        let pending = vec![
            PendingImage {
                path: "a.png".into(),
                detail: ImageDetail::Auto,
                remaining_views: 1,
            },
            PendingImage {
                path: "b.png".into(),
                detail: ImageDetail::Low,
                remaining_views: 1,
            },
            PendingImage {
                path: "missing.png".into(),
                detail: ImageDetail::Auto,
                remaining_views: 1,
            },
        ];

        let content = build_injection_content(&pending, tmp.path()).unwrap();
        match content {
            MessageContent::Parts(parts) => {
                assert_eq!(parts.len(), 3); // 1 text + 2 images
                match &parts[0] {
                    ContentPart::Text { text } => assert!(text.contains("2张图片")),
                    _ => panic!("first part must be text"),
                }
            }
            _ => panic!("expected parts"),
        }
    }

    #[test]
    fn empty_or_missing_queue_yields_none() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(build_injection_content(&[], tmp.path()).is_none());
        let pending = vec![PendingImage {
            path: "nope.png".into(),
            detail: ImageDetail::Auto,
            remaining_views: 1,
        }];
        assert!(build_injection_content(&pending, tmp.path()).is_none());
    }
}
