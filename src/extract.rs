//! Embedded-image extraction: PDF container → numbered files in the store.
//!
//! The extractor walks pages in document order and, within each page, the
//! `XObject` resource entries in dictionary order, writing every image
//! object it encounters as `img_<N><ext>` with a 1-based, gapless sequence
//! number. Stream bytes are persisted verbatim with no re-encoding, and
//! byte-identical images that recur in the document are written again under
//! their own number.
//!
//! Extraction is a full-replace operation: the prior extracted set (images
//! *and* derived text artifacts) is cleared before the first write. A
//! malformed document fails the whole operation; callers must treat store
//! state after a failure as best effort.
//!
//! lopdf is synchronous and CPU-bound; async callers should wrap these
//! functions in `tokio::task::spawn_blocking`.

use crate::error::GleanError;
use crate::store::{WorkingSetStore, SOURCE_NAME};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Extract all embedded images from the PDF at `pdf_path` into the store.
///
/// Returns the number of images written. A PDF with no embedded images
/// yields `Ok(0)`.
pub fn extract_images(store: &WorkingSetStore, pdf_path: &Path) -> Result<usize, GleanError> {
    let doc = Document::load(pdf_path).map_err(|e| GleanError::MalformedPdf {
        path: pdf_path.to_path_buf(),
        detail: e.to_string(),
    })?;
    extract_from_document(store, &doc)
}

/// Extract all embedded images from an in-memory PDF byte stream.
///
/// Equivalent to [`extract_images`] for callers that hold the uploaded
/// document as bytes rather than a file.
pub fn extract_images_from_bytes(
    store: &WorkingSetStore,
    bytes: &[u8],
) -> Result<usize, GleanError> {
    let doc = Document::load_mem(bytes).map_err(|e| GleanError::MalformedPdf {
        path: PathBuf::from(SOURCE_NAME),
        detail: e.to_string(),
    })?;
    extract_from_document(store, &doc)
}

fn extract_from_document(store: &WorkingSetStore, doc: &Document) -> Result<usize, GleanError> {
    store.ensure_layout()?;
    // Full-replace semantics: the previous set (and its derived text) goes
    // away before the first new image lands.
    store.clear_extracted()?;

    let mut count = 0usize;
    for (page_num, page_id) in doc.get_pages() {
        for (name, stream) in page_image_streams(doc, page_id) {
            count += 1;
            let filename = format!("img_{count}{}", extension_for(&name));
            store.write_image(&filename, &stream.content)?;
            debug!(
                "page {page_num}: wrote {filename} ({} bytes)",
                stream.content.len()
            );
        }
    }

    info!("Extracted {count} images");
    Ok(count)
}

/// Collect the image XObjects of one page, in resource-dictionary order.
///
/// Resources may live inline on the page dictionary or behind references;
/// both are walked. Non-stream and non-image XObjects (e.g. `Form`) are
/// skipped.
fn page_image_streams<'a>(doc: &'a Document, page_id: ObjectId) -> Vec<(String, &'a Stream)> {
    let mut images = Vec::new();

    let (direct, referenced) = doc
        .get_page_resources(page_id)
        .unwrap_or((None, Vec::new()));
    let mut resource_dicts: Vec<&Dictionary> = Vec::new();
    if let Some(dict) = direct {
        resource_dicts.push(dict);
    }
    for id in referenced {
        if let Ok(dict) = doc.get_object(id).and_then(Object::as_dict) {
            resource_dicts.push(dict);
        }
    }

    for resources in resource_dicts {
        let Ok(xobjects) = resources.get(b"XObject") else {
            continue;
        };
        let Some(xobjects) = as_dict(doc, xobjects) else {
            continue;
        };
        for (name, value) in xobjects.iter() {
            let Some(stream) = as_stream(doc, value) else {
                continue;
            };
            let is_image = stream
                .dict
                .get(b"Subtype")
                .and_then(Object::as_name_str)
                .map(|s| s == "Image")
                .unwrap_or(false);
            if is_image {
                images.push((String::from_utf8_lossy(name).into_owned(), stream));
            }
        }
    }

    images
}

/// Follow one level of indirection to a dictionary, if the object is one.
fn as_dict<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Dictionary> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).ok()?.as_dict().ok(),
        other => other.as_dict().ok(),
    }
}

/// Follow one level of indirection to a stream, if the object is one.
fn as_stream<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Stream> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).ok()?.as_stream().ok(),
        other => other.as_stream().ok(),
    }
}

/// Output extension derived from the declared XObject name; `.png` when the
/// name carries none (the common case, since PDF resource names are usually bare
/// identifiers like `Im1`).
fn extension_for(name: &str) -> String {
    match Path::new(name).extension().and_then(|e| e.to_str()) {
        Some(ext) if !ext.is_empty() => format!(".{ext}"),
        _ => ".png".to_string(),
    }
}
