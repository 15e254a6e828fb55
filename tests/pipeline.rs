//! Integration tests for the full extract → batch → download pipeline.
//!
//! PDF fixtures are synthesised in-memory with lopdf, so the suite needs no
//! sample files and no network: the external model call is a scripted
//! [`TextExtractor`] implementation.

use async_trait::async_trait;
use futures::StreamExt;
use lopdf::{dictionary, Document, Object, Stream};
use pdfglean::{
    extract_images_from_bytes, run_batch, BatchRequest, GleanError, ImagePayload, ItemError,
    ProgressEvent, TextExtractor, TextExtractorFactory, WorkingSetStore,
};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

// ── Fixture builders ─────────────────────────────────────────────────────────

/// Build a one-page PDF whose page carries the given image XObjects, with
/// the resources dictionary inlined on the page.
fn pdf_one_page(images: &[(&str, &[u8])]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let mut xobjects = lopdf::Dictionary::new();
    for (name, bytes) in images {
        let image_id = doc.add_object(image_stream(bytes));
        xobjects.set(name.as_bytes().to_vec(), Object::Reference(image_id));
    }

    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => Object::Reference(pages_id),
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        "Resources" => dictionary! { "XObject" => Object::Dictionary(xobjects) },
    });

    finish_document(doc, pages_id, vec![page_id])
}

/// Build a two-page PDF with one image per page, resources held behind
/// references rather than inline.
fn pdf_two_pages(first: &[u8], second: &[u8]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let mut page_ids = Vec::new();
    for bytes in [first, second] {
        let image_id = doc.add_object(image_stream(bytes));
        let resources_id = doc.add_object(dictionary! {
            "XObject" => dictionary! { "Im1" => Object::Reference(image_id) },
        });
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => Object::Reference(pages_id),
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Resources" => Object::Reference(resources_id),
        });
        page_ids.push(page_id);
    }

    finish_document(doc, pages_id, page_ids)
}

/// A PDF with pages but no image objects at all.
fn pdf_without_images() -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => Object::Reference(pages_id),
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
    });
    finish_document(doc, pages_id, vec![page_id])
}

fn image_stream(bytes: &[u8]) -> Stream {
    Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => 1,
            "Height" => 1,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
        },
        bytes.to_vec(),
    )
}

fn finish_document(mut doc: Document, pages_id: lopdf::ObjectId, kids: Vec<lopdf::ObjectId>) -> Vec<u8> {
    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids.into_iter().map(Object::Reference).collect::<Vec<_>>(),
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => Object::Reference(pages_id),
    });
    doc.trailer.set("Root", catalog_id);

    let mut buf = Vec::new();
    doc.save_to(&mut buf).expect("fixture PDF should serialise");
    buf
}

fn fresh_store() -> (TempDir, WorkingSetStore) {
    let dir = TempDir::new().unwrap();
    let store = WorkingSetStore::under_root(dir.path());
    store.ensure_layout().unwrap();
    (dir, store)
}

// ── Scripted external capability ─────────────────────────────────────────────

/// Echoes the image bytes back as text; fails when they contain "FAIL".
struct EchoExtractor {
    calls: Mutex<Vec<String>>,
}

impl EchoExtractor {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl TextExtractor for EchoExtractor {
    async fn extract_text(&self, _prompt: &str, image: &ImagePayload) -> Result<String, ItemError> {
        let marker = String::from_utf8_lossy(&image.bytes).into_owned();
        self.calls.lock().unwrap().push(marker.clone());
        if marker.contains("FAIL") {
            return Err(ItemError::Api("bad image".into()));
        }
        Ok(format!("<{marker}>"))
    }
}

struct EchoFactory(Arc<EchoExtractor>);

impl TextExtractorFactory for EchoFactory {
    fn create(&self, _credential: &str, _model: &str) -> Result<Arc<dyn TextExtractor>, GleanError> {
        Ok(self.0.clone() as Arc<dyn TextExtractor>)
    }
}

// ── Extraction ───────────────────────────────────────────────────────────────

#[test]
fn extraction_numbers_images_gaplessly_in_encounter_order() {
    let (_dir, store) = fresh_store();
    let pdf = pdf_one_page(&[("Im1", b"alpha"), ("Im2", b"beta"), ("Im3", b"gamma")]);

    let count = extract_images_from_bytes(&store, &pdf).unwrap();
    assert_eq!(count, 3);
    assert_eq!(
        store.list_images().unwrap(),
        vec!["img_1.png", "img_2.png", "img_3.png"]
    );
    // Raw bytes are persisted verbatim.
    assert_eq!(std::fs::read(store.image_path("img_1.png")).unwrap(), b"alpha");
    assert_eq!(std::fs::read(store.image_path("img_3.png")).unwrap(), b"gamma");
}

#[test]
fn extraction_walks_pages_in_document_order() {
    let (_dir, store) = fresh_store();
    let pdf = pdf_two_pages(b"page-one-image", b"page-two-image");

    let count = extract_images_from_bytes(&store, &pdf).unwrap();
    assert_eq!(count, 2);
    assert_eq!(
        std::fs::read(store.image_path("img_1.png")).unwrap(),
        b"page-one-image"
    );
    assert_eq!(
        std::fs::read(store.image_path("img_2.png")).unwrap(),
        b"page-two-image"
    );
}

#[test]
fn declared_name_extension_is_honoured() {
    let (_dir, store) = fresh_store();
    let pdf = pdf_one_page(&[("photo.jpg", b"jpeg-bytes"), ("Im2", b"png-bytes")]);

    extract_images_from_bytes(&store, &pdf).unwrap();
    assert_eq!(
        store.list_images().unwrap(),
        vec!["img_1.jpg", "img_2.png"]
    );
}

#[test]
fn byte_identical_images_are_not_deduplicated() {
    let (_dir, store) = fresh_store();
    let pdf = pdf_one_page(&[("Im1", b"same"), ("Im2", b"same")]);

    let count = extract_images_from_bytes(&store, &pdf).unwrap();
    assert_eq!(count, 2);
    assert_eq!(store.list_images().unwrap().len(), 2);
}

#[test]
fn pdf_without_images_yields_zero_not_error() {
    let (_dir, store) = fresh_store();
    let count = extract_images_from_bytes(&store, &pdf_without_images()).unwrap();
    assert_eq!(count, 0);
    assert!(store.list_images().unwrap().is_empty());
}

#[test]
fn re_extraction_replaces_the_prior_set_and_purges_derived_text() {
    let (_dir, store) = fresh_store();

    let first = pdf_one_page(&[("Im1", b"one"), ("Im2", b"two")]);
    extract_images_from_bytes(&store, &first).unwrap();
    // Simulate a completed batch over the first set.
    store.write_text("img_2.png", "stale text").unwrap();
    store.reset_merged().unwrap();
    store.append_merged("stale text").unwrap();

    let second = pdf_one_page(&[("Im1", b"replacement")]);
    let count = extract_images_from_bytes(&store, &second).unwrap();
    assert_eq!(count, 1);
    assert_eq!(store.list_images().unwrap(), vec!["img_1.png"]);
    // No artifact from the first set survives, neither the extra image nor
    // text keyed to colliding sequence numbers.
    assert!(!store.text_path("img_2.png").exists());
    assert!(!store.merged_exists());
}

#[test]
fn re_extraction_of_the_same_pdf_is_idempotent() {
    let (_dir, store) = fresh_store();
    let pdf = pdf_one_page(&[("Im1", b"alpha"), ("Im2", b"beta")]);

    extract_images_from_bytes(&store, &pdf).unwrap();
    let first_listing = store.list_images().unwrap();
    extract_images_from_bytes(&store, &pdf).unwrap();

    assert_eq!(store.list_images().unwrap(), first_listing);
    assert_eq!(std::fs::read(store.image_path("img_1.png")).unwrap(), b"alpha");
}

#[test]
fn malformed_pdf_fails_extraction() {
    let (_dir, store) = fresh_store();
    let err = extract_images_from_bytes(&store, b"%PDF-garbage").unwrap_err();
    assert!(matches!(err, GleanError::MalformedPdf { .. }));
}

// ── Deletion safety ──────────────────────────────────────────────────────────

#[test]
fn delete_never_reaches_outside_the_store() {
    let dir = TempDir::new().unwrap();
    let outside = dir.path().join("outside.png");
    std::fs::write(&outside, b"keep me").unwrap();

    let store = WorkingSetStore::under_root(dir.path().join("workset"));
    store.ensure_layout().unwrap();

    let removed = store.delete(&["../outside.png".into(), "..\\outside.png".into()]);
    assert_eq!(removed, 0);
    assert!(outside.exists());
}

// ── End to end ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn extract_then_batch_then_download() {
    let (_dir, store) = fresh_store();
    let pdf = pdf_one_page(&[("Im1", b"A"), ("Im2", b"FAIL"), ("Im3", b"C")]);
    extract_images_from_bytes(&store, &pdf).unwrap();

    let extractor = EchoExtractor::new();
    let request = BatchRequest::new(store.list_images().unwrap(), "transcribe", "key");
    let stream = run_batch(store.clone(), Arc::new(EchoFactory(extractor.clone())), request).unwrap();
    let events: Vec<ProgressEvent> = stream.collect().await;

    // Strict linearisation: img_2's started+error land between img_1's and
    // img_3's events, and the terminal record closes the run.
    assert_eq!(events.len(), 5);
    assert_eq!(events[0], ProgressEvent::started(0, 3, "img_1.png"));
    assert_eq!(events[1], ProgressEvent::started(1, 3, "img_2.png"));
    assert_eq!(
        events[2],
        ProgressEvent::item_failed("img_2.png", "API error: bad image")
    );
    assert_eq!(events[3], ProgressEvent::started(2, 3, "img_3.png"));
    assert_eq!(events[4], ProgressEvent::completed(3));

    // Every selected image reached the model, in order.
    assert_eq!(*extractor.calls.lock().unwrap(), vec!["A", "FAIL", "C"]);

    // Per-image artifacts for the successes only.
    assert!(store.text_path("img_1.png").exists());
    assert!(!store.text_path("img_2.png").exists());
    assert!(store.text_path("img_3.png").exists());

    // The merged download carries A and C in processing order.
    let merged = store.read_merged().unwrap().expect("merged should exist");
    assert_eq!(merged, b"<A>\n\n<C>\n\n");
}

#[tokio::test]
async fn batch_events_round_trip_as_ndjson() {
    let (_dir, store) = fresh_store();
    let pdf = pdf_one_page(&[("Im1", b"A")]);
    extract_images_from_bytes(&store, &pdf).unwrap();

    let request = BatchRequest::new(store.list_images().unwrap(), "transcribe", "key");
    let stream = run_batch(
        store.clone(),
        Arc::new(EchoFactory(EchoExtractor::new())),
        request,
    )
    .unwrap();
    let events: Vec<ProgressEvent> = stream.collect().await;

    // Each record survives the wire format consumers parse record-by-record.
    for event in &events {
        let line = event.to_ndjson().unwrap();
        let parsed: ProgressEvent = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(&parsed, event);
    }
    assert!(events.last().unwrap().is_terminal());
}

#[tokio::test]
async fn download_before_any_batch_is_not_found() {
    let (_dir, store) = fresh_store();
    let pdf = pdf_one_page(&[("Im1", b"A")]);
    extract_images_from_bytes(&store, &pdf).unwrap();

    assert!(!store.merged_exists());
    assert!(store.read_merged().unwrap().is_none());
}
