//! PDF page operations on top of lopdf.

use super::{BackendError, BackendResult};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// JPEG quality for images embedded into generated PDFs.
const EMBED_QUALITY: u8 = 92;

/// Page attributes a page may inherit from its ancestors in the page tree.
const INHERITABLE: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// Number of pages in a PDF file.
pub fn page_count(path: &Path) -> BackendResult<usize> {
    Ok(Document::load(path)?.get_pages().len())
}

/// Writes single pages of a loaded document, one file per call.
pub struct PageSplitter {
    doc: Document,
    page_count: u32,
}

impl PageSplitter {
    pub fn open(path: &Path) -> BackendResult<Self> {
        let doc = Document::load(path)?;
        let page_count = doc.get_pages().len() as u32;
        Ok(Self { doc, page_count })
    }

    pub fn page_count(&self) -> usize {
        self.page_count as usize
    }

    /// Write 1-based `page` as a standalone PDF.
    pub fn write_page(&self, page: u32, dest: &Path) -> BackendResult<()> {
        if page == 0 || page > self.page_count {
            return Err(BackendError::Unsupported(format!(
                "page {page} out of range 1..={}",
                self.page_count
            )));
        }

        let mut doc = self.doc.clone();
        let others: Vec<u32> = (1..=self.page_count).filter(|p| *p != page).collect();
        doc.delete_pages(&others);
        doc.prune_objects();
        doc.save(dest)?;
        Ok(())
    }
}

fn object_type(object: &Object) -> Option<&[u8]> {
    object.as_dict().ok()?.get(b"Type").ok()?.as_name().ok()
}

/// Copy inherited attributes onto each page so pages survive being
/// reparented.
fn inline_inherited_attributes(doc: &mut Document) -> BackendResult<()> {
    for page_id in doc.get_pages().into_values() {
        let mut inherited: Vec<(Vec<u8>, Object)> = Vec::new();
        {
            let page = doc.get_dictionary(page_id)?;
            let mut missing: Vec<&[u8]> =
                INHERITABLE.iter().copied().filter(|key| !page.has(key)).collect();
            let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
            let mut depth = 0;

            while let Some(parent_id) = parent {
                if missing.is_empty() || depth > 64 {
                    break;
                }
                let node = doc.get_dictionary(parent_id)?;
                missing.retain(|key| match node.get(key) {
                    Ok(value) => {
                        inherited.push((key.to_vec(), value.clone()));
                        false
                    }
                    Err(_) => true,
                });
                parent = node.get(b"Parent").and_then(Object::as_reference).ok();
                depth += 1;
            }
        }

        if !inherited.is_empty() {
            let page = doc.get_object_mut(page_id)?.as_dict_mut()?;
            for (key, value) in inherited {
                page.set(key, value);
            }
        }
    }
    Ok(())
}

/// Concatenate PDFs in order. Returns the page count of the result.
pub fn merge(inputs: &[PathBuf], dest: &Path) -> BackendResult<usize> {
    if inputs.is_empty() {
        return Err(BackendError::Unsupported("nothing to merge".into()));
    }

    let mut max_id = 1;
    let mut pages: Vec<(ObjectId, Object)> = Vec::new();
    let mut objects: BTreeMap<ObjectId, Object> = BTreeMap::new();

    for path in inputs {
        let mut doc = Document::load(path)?;
        inline_inherited_attributes(&mut doc)?;
        doc.renumber_objects_with(max_id);
        max_id = doc.max_id + 1;

        for page_id in doc.get_pages().into_values() {
            pages.push((page_id, doc.get_object(page_id)?.to_owned()));
        }
        objects.extend(doc.objects);
    }

    let mut merged = Document::with_version("1.5");
    let mut catalog: Option<(ObjectId, Object)> = None;
    let mut pages_root: Option<(ObjectId, Object)> = None;

    for (id, object) in objects {
        match object_type(&object) {
            Some(b"Catalog") => {
                catalog.get_or_insert((id, object));
            }
            Some(b"Pages") => {
                pages_root.get_or_insert((id, object));
            }
            Some(b"Page") | Some(b"Outlines") | Some(b"Outline") => {}
            _ => {
                merged.objects.insert(id, object);
            }
        }
    }

    let (Some((catalog_id, catalog)), Some((pages_id, pages_root))) = (catalog, pages_root) else {
        return Err(BackendError::Unsupported("input has no page tree".into()));
    };

    let page_count = pages.len();
    let mut kids: Vec<Object> = Vec::with_capacity(page_count);
    for (page_id, mut page) in pages {
        if let Ok(dict) = page.as_dict_mut() {
            dict.set("Parent", pages_id);
        }
        merged.objects.insert(page_id, page);
        kids.push(Object::Reference(page_id));
    }

    let mut pages_dict = pages_root.as_dict()?.clone();
    pages_dict.remove(b"Parent");
    pages_dict.set("Count", page_count as i64);
    pages_dict.set("Kids", kids);
    merged.objects.insert(pages_id, Object::Dictionary(pages_dict));

    let mut catalog_dict = catalog.as_dict()?.clone();
    catalog_dict.set("Pages", pages_id);
    catalog_dict.remove(b"Outlines");
    merged.objects.insert(catalog_id, Object::Dictionary(catalog_dict));

    merged.trailer.set("Root", catalog_id);
    merged.max_id = merged.objects.keys().map(|(id, _)| *id).max().unwrap_or(0);
    merged.renumber_objects();
    merged.compress();
    merged.save(dest)?;

    Ok(page_count)
}

/// Build one PDF with one page per image, in order. Each page has the
/// pixel size of its image.
pub fn images_to_pdf(images: &[PathBuf], dest: &Path) -> BackendResult<usize> {
    if images.is_empty() {
        return Err(BackendError::Unsupported("no images".into()));
    }

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::with_capacity(images.len());

    for path in images {
        let img = super::image::open(path)?;
        let (width, height) = (i64::from(img.width()), i64::from(img.height()));
        let jpeg = super::image::encode_jpeg(&img, EMBED_QUALITY)?;

        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width,
                "Height" => height,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8i64,
                "Filter" => "DCTDecode",
            },
            jpeg,
        ));

        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        width.into(),
                        0i64.into(),
                        0i64.into(),
                        height.into(),
                        0i64.into(),
                        0i64.into(),
                    ],
                ),
                Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
                Operation::new("Q", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content.encode()?));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Im0" => image_id },
            },
            "MediaBox" => vec![0i64.into(), 0i64.into(), width.into(), height.into()],
        });
        kids.push(page_id.into());
    }

    let count = kids.len();
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count as i64,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(dest)?;

    Ok(count)
}
