use std::io::Write;

use flate2::Compression;
use flate2::write::ZlibEncoder;
use image::RgbaImage;
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, dictionary};
use tracing::debug;

use crate::error::{CodecError, ServiceResult};
use crate::imaging::BlackMaskLayer;

/// Page attributes a page may inherit from its ancestors in the page tree.
const INHERITABLE: [&[u8]; 4] = [b"MediaBox", b"Resources", b"CropBox", b"Rotate"];

/// Guard against cyclic `Parent` chains in malformed input.
const MAX_TREE_DEPTH: usize = 64;

/// Where an image page's layers land, in PDF points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImagePlacement {
    pub width_pts: f32,
    pub height_pts: f32,
    /// Blank margin on every side of the image
    pub padding_pts: f32,
}

impl ImagePlacement {
    /// Placement for an image of `width`×`height` pixels printed at `dpi`.
    pub fn at_dpi(width: u32, height: u32, dpi: f32, padding_pts: f32) -> Self {
        Self {
            width_pts: width as f32 / dpi * 72.0,
            height_pts: height as f32 / dpi * 72.0,
            padding_pts,
        }
    }

    pub fn page_size(&self) -> (f32, f32) {
        (
            self.width_pts + self.padding_pts * 2.0,
            self.height_pts + self.padding_pts * 2.0,
        )
    }
}

/// Incrementally builds a flat single-level PDF page tree.
pub struct PdfComposer {
    document: Document,
    pages_id: ObjectId,
    kids: Vec<ObjectId>,
}

impl Default for PdfComposer {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfComposer {
    pub fn new() -> Self {
        let mut document = Document::with_version("1.5");
        let pages_id = document.new_object_id();
        Self {
            document,
            pages_id,
            kids: Vec::new(),
        }
    }

    pub fn page_count(&self) -> usize {
        self.kids.len()
    }

    /// Copy every page of an existing PDF, unchanged, onto the end of the
    /// output. Returns the number of pages added.
    pub fn append_document(&mut self, bytes: &[u8]) -> ServiceResult<usize> {
        let mut source = Document::load_mem(bytes).map_err(CodecError::PdfRead)?;
        source.renumber_objects_with(self.document.max_id + 1);

        let page_ids: Vec<ObjectId> = source.get_pages().into_values().collect();
        for &page_id in &page_ids {
            let inherited = inherited_attributes(&source, page_id);
            let page = source
                .get_object_mut(page_id)
                .and_then(Object::as_dict_mut)
                .map_err(CodecError::PdfRead)?;
            for (key, value) in inherited {
                if !page.has(key) {
                    page.set(key.to_vec(), value);
                }
            }
            page.set("Parent", self.pages_id);
        }

        for (id, object) in source.objects {
            if is_tree_node(&object) {
                continue;
            }
            self.document.objects.insert(id, object);
        }
        self.document.max_id = self.document.max_id.max(source.max_id);
        self.kids.extend_from_slice(&page_ids);

        Ok(page_ids.len())
    }

    /// Add a page holding a JPEG base layer and, when the layer carries one,
    /// a lossless ink overlay drawn at the same position and size.
    pub fn add_image_page(
        &mut self,
        base_jpeg: Vec<u8>,
        layer: &BlackMaskLayer,
        placement: ImagePlacement,
    ) -> ServiceResult<()> {
        let (width, height) = layer.base.dimensions();
        let base_id = self.document.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => i64::from(width),
                "Height" => i64::from(height),
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            base_jpeg,
        ));

        let mut xobjects = dictionary! { "Base" => base_id };
        let mut operations = draw_operations("Base", placement);

        if let Some(mask) = &layer.mask {
            let ink_id = self.add_ink_image(mask)?;
            xobjects.set("Ink", ink_id);
            operations.extend(draw_operations("Ink", placement));
        }

        let content = Content { operations }
            .encode()
            .map_err(|e| CodecError::PdfStructure {
                message: format!("Failed to encode page content: {}", e),
            })?;
        let content_id = self
            .document
            .add_object(Stream::new(Dictionary::new(), content));

        let (page_width, page_height) = placement.page_size();
        let media_box: Vec<Object> = vec![
            0.0_f32.into(),
            0.0_f32.into(),
            page_width.into(),
            page_height.into(),
        ];
        let page_id = self.document.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "MediaBox" => media_box,
            "Contents" => content_id,
            "Resources" => dictionary! { "XObject" => xobjects },
        });
        self.kids.push(page_id);

        Ok(())
    }

    /// Ink overlay as a black image whose soft mask is the overlay alpha.
    fn add_ink_image(&mut self, mask: &RgbaImage) -> ServiceResult<ObjectId> {
        let (width, height) = mask.dimensions();
        let alpha: Vec<u8> = mask.pixels().map(|p| p[3]).collect();
        let black = vec![0u8; alpha.len()];

        let smask_id = self.document.add_object(Stream::new(
            gray_image_dict(width, height),
            deflate(&alpha)?,
        ));

        let mut dict = gray_image_dict(width, height);
        dict.set("SMask", smask_id);
        Ok(self.document.add_object(Stream::new(dict, deflate(&black)?)))
    }

    /// Write the page tree and catalog, then serialise.
    pub fn finish(mut self) -> ServiceResult<Vec<u8>> {
        let kids: Vec<Object> = self.kids.iter().copied().map(Object::Reference).collect();
        let count = kids.len() as i64;
        self.document.objects.insert(
            self.pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );

        let catalog_id = self.document.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        self.document.trailer.set("Root", catalog_id);

        // Objects only reachable from a copied document's own catalog or
        // trailer (outlines, forms, info) are dropped here.
        let pruned = self.document.prune_objects();
        if !pruned.is_empty() {
            debug!(count = pruned.len(), "Pruned unreachable objects");
        }

        let mut out = Vec::new();
        self.document
            .save_to(&mut out)
            .map_err(CodecError::PdfWrite)?;
        Ok(out)
    }
}

/// `q w 0 0 h x y cm /Name Do Q`
fn draw_operations(name: &str, placement: ImagePlacement) -> Vec<Operation> {
    vec![
        Operation::new("q", vec![]),
        Operation::new(
            "cm",
            vec![
                placement.width_pts.into(),
                0.0_f32.into(),
                0.0_f32.into(),
                placement.height_pts.into(),
                placement.padding_pts.into(),
                placement.padding_pts.into(),
            ],
        ),
        Operation::new("Do", vec![Object::Name(name.as_bytes().to_vec())]),
        Operation::new("Q", vec![]),
    ]
}

fn gray_image_dict(width: u32, height: u32) -> Dictionary {
    dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => i64::from(width),
        "Height" => i64::from(height),
        "ColorSpace" => "DeviceGray",
        "BitsPerComponent" => 8,
        "Filter" => "FlateDecode",
    }
}

fn deflate(data: &[u8]) -> ServiceResult<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).map_err(CodecError::PdfWrite)?;
    let compressed = encoder.finish().map_err(CodecError::PdfWrite)?;
    Ok(compressed)
}

fn inherited_attributes(document: &Document, page_id: ObjectId) -> Vec<(&'static [u8], Object)> {
    let mut found: Vec<(&'static [u8], Object)> = Vec::new();
    let mut current = parent_of(document, page_id);

    for _ in 0..MAX_TREE_DEPTH {
        let Some(node_id) = current else {
            break;
        };
        let Ok(node) = document.get_dictionary(node_id) else {
            break;
        };
        for key in INHERITABLE {
            if found.iter().any(|(k, _)| *k == key) {
                continue;
            }
            if let Ok(value) = node.get(key) {
                found.push((key, value.clone()));
            }
        }
        current = parent_of(document, node_id);
    }

    found
}

fn parent_of(document: &Document, id: ObjectId) -> Option<ObjectId> {
    document
        .get_dictionary(id)
        .and_then(|dict| dict.get(b"Parent"))
        .and_then(Object::as_reference)
        .ok()
}

fn is_tree_node(object: &Object) -> bool {
    let Ok(dict) = object.as_dict() else {
        return false;
    };
    matches!(
        dict.get(b"Type").and_then(Object::as_name),
        Ok(b"Catalog") | Ok(b"Pages")
    )
}
