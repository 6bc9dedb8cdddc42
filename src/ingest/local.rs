//! Local feature containers.
//!
//! Format detection is by content: the zip magic selects the archive reader,
//! otherwise the bytes must be a JSON feature document. File names inside an
//! archive only pick which entries to try.

use std::io::{Cursor, Read};

use log::{info, warn};
use serde_json::Value;

use super::{Classification, SegmentImport, SegmentNormalizer, SourceContext};
use crate::error::ParseError;

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];

/// Archive entries with these extensions are read as feature documents.
const FEATURE_EXTENSIONS: [&str; 3] = [".geojson", ".json", ".esrijson"];

/// Largest buffer reserved up front for an archive entry. The size in the
/// entry header is untrusted; `read_to_end` grows past this if needed.
const MAX_ENTRY_PREALLOC: usize = 8 * 1024 * 1024;

/// Parse a single feature document or a zip archive of them.
///
/// Accepts GeoJSON (`FeatureCollection`, `Feature`, bare line geometry) and
/// Esri JSON (`features[].geometry.paths`). Non-line features are skipped
/// and counted; the call fails only when nothing usable remains.
///
/// # Example
/// ```
/// use route_stitcher::{parse_local_feature_collection, Classification, ClassifiedActivity, SourceContext};
///
/// let doc = br#"{"type":"FeatureCollection","features":[
///   {"type":"Feature","properties":{},"geometry":{"type":"LineString","coordinates":[[151.0,-33.0],[151.001,-33.0]]}}
/// ]}"#;
/// let import = parse_local_feature_collection(
///     doc,
///     Classification::new(ClassifiedActivity::Cycling),
///     &SourceContext::new("council", "bike-lanes"),
/// ).unwrap();
/// assert_eq!(import.segments.len(), 1);
/// ```
pub fn parse_local_feature_collection(
    raw: &[u8],
    classification: Classification,
    context: &SourceContext,
) -> Result<SegmentImport, ParseError> {
    let mut normalizer = SegmentNormalizer::new(classification, context);

    if raw.starts_with(ZIP_MAGIC) {
        read_archive(raw, &mut normalizer)?;
    } else if raw.starts_with(GZIP_MAGIC) {
        return Err(ParseError::UnsupportedFormat {
            reason: "gzip streams are not supported, use a zip archive".to_string(),
        });
    } else {
        let document = parse_json(raw)?;
        read_document(&document, &mut normalizer)?;
    }

    let import = normalizer.finish();
    if import.only_rejects() {
        return Err(ParseError::MalformedGeometry {
            reason: format!(
                "no usable line geometry ({} features skipped, {} degenerate parts)",
                import.skipped_features, import.degenerate_geometries
            ),
        });
    }

    info!(
        "[Ingest] {}: {} segments from {} features ({} skipped, {} degenerate)",
        context.source_name,
        import.segments.len(),
        import.features_read,
        import.skipped_features,
        import.degenerate_geometries
    );
    Ok(import)
}

fn parse_json(raw: &[u8]) -> Result<Value, ParseError> {
    let text = std::str::from_utf8(strip_bom(raw)).map_err(|_| ParseError::UnsupportedFormat {
        reason: "input is neither a zip archive nor UTF-8 text".to_string(),
    })?;
    if !text.trim_start().starts_with('{') {
        return Err(ParseError::UnsupportedFormat {
            reason: "input is not a JSON object".to_string(),
        });
    }
    serde_json::from_str(text).map_err(|e| ParseError::UnsupportedFormat {
        reason: format!("invalid JSON: {}", e),
    })
}

fn strip_bom(raw: &[u8]) -> &[u8] {
    raw.strip_prefix(b"\xEF\xBB\xBF".as_slice()).unwrap_or(raw)
}

/// Dispatch on the document's shape.
fn read_document(document: &Value, normalizer: &mut SegmentNormalizer) -> Result<(), ParseError> {
    if let Some(features) = document.get("features") {
        let features = features
            .as_array()
            .ok_or_else(|| ParseError::UnsupportedFormat {
                reason: "'features' is not an array".to_string(),
            })?;
        for feature in features {
            normalizer.push_feature(feature);
        }
        return Ok(());
    }

    match document.get("type").and_then(Value::as_str) {
        Some("Feature") => {
            normalizer.push_feature(document);
            Ok(())
        }
        Some("LineString" | "MultiLineString") => {
            let wrapped = serde_json::json!({ "type": "Feature", "geometry": document });
            normalizer.push_feature(&wrapped);
            Ok(())
        }
        Some(other) => Err(ParseError::UnsupportedFormat {
            reason: format!("'{}' is not a line-feature container", other),
        }),
        None => Err(ParseError::UnsupportedFormat {
            reason: "JSON document has no 'features' or 'type'".to_string(),
        }),
    }
}

fn read_archive(raw: &[u8], normalizer: &mut SegmentNormalizer) -> Result<(), ParseError> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(raw)).map_err(|e| ParseError::Archive {
            message: e.to_string(),
        })?;

    // Sorted entry names keep segment numbering stable across archive tools
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|name| is_feature_entry(name))
        .map(str::to_string)
        .collect();
    names.sort();

    if names.is_empty() {
        return Err(ParseError::UnsupportedFormat {
            reason: "archive contains no GeoJSON or Esri JSON files".to_string(),
        });
    }

    let mut documents_read = 0;
    for name in &names {
        let mut entry = archive.by_name(name).map_err(|e| ParseError::Archive {
            message: format!("{}: {}", name, e),
        })?;
        let mut bytes = entry_buffer(entry.size());
        entry
            .read_to_end(&mut bytes)
            .map_err(|e| ParseError::Archive {
                message: format!("{}: {}", name, e),
            })?;

        // One unreadable entry does not spoil the rest of the archive
        match parse_json(&bytes).and_then(|doc| read_document(&doc, normalizer)) {
            Ok(()) => documents_read += 1,
            Err(e) => warn!("[Ingest] Skipping archive entry {}: {}", name, e),
        }
    }

    if documents_read == 0 {
        return Err(ParseError::UnsupportedFormat {
            reason: "no archive entry was a readable feature document".to_string(),
        });
    }
    Ok(())
}

fn is_feature_entry(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    !lower.ends_with('/')
        && !lower.starts_with("__macosx/")
        && FEATURE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

fn entry_buffer(declared_size: u64) -> Vec<u8> {
    let reserve = usize::try_from(declared_size)
        .unwrap_or(usize::MAX)
        .min(MAX_ENTRY_PREALLOC);
    Vec::with_capacity(reserve)
}
