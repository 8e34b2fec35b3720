//! S3 XML documents used by the multipart upload protocol and error replies.
//!
//! Only flat documents are needed: a root element whose leaf children carry
//! text (`UploadId`, `Code`, `Message`, `ETag`). Nested children are skipped.

use std::io;

use quick_xml::events::{BytesDecl, BytesText, Event};
use quick_xml::{Reader, Writer};

/// The S3 XML namespace.
pub const S3_NAMESPACE: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

#[derive(Debug, thiserror::Error)]
pub enum XmlError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("XML processing error: {0}")]
    QuickXml(#[from] quick_xml::Error),
    #[error("missing required XML element: {0}")]
    MissingElement(String),
    #[error("unexpected XML element: {0}")]
    UnexpectedElement(String),
    #[error("failed to parse value: {0}")]
    ParseError(String),
}

/// One uploaded part as listed in the complete-multipart-upload request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

/// `<Error>` reply body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct S3ErrorBody {
    pub code: Option<String>,
    pub message: Option<String>,
}

/// `<CompleteMultipartUploadResult>` reply body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompleteUploadResult {
    pub location: Option<String>,
    pub bucket: Option<String>,
    pub key: Option<String>,
    pub etag: Option<String>,
}

struct FlatDocument {
    root: String,
    fields: Vec<(String, String)>,
}

impl FlatDocument {
    fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

fn read_flat_document(xml: &[u8]) -> Result<FlatDocument, XmlError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let root = loop {
        match reader.read_event()? {
            Event::Start(e) => break String::from_utf8_lossy(e.local_name().as_ref()).into_owned(),
            Event::Empty(e) => {
                return Ok(FlatDocument {
                    root: String::from_utf8_lossy(e.local_name().as_ref()).into_owned(),
                    fields: Vec::new(),
                })
            }
            Event::Eof => return Err(XmlError::MissingElement("root element".to_string())),
            _ => {}
        }
    };

    let mut fields = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                let text = read_text_content(&mut reader)?;
                fields.push((name, text));
            }
            Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                fields.push((name, String::new()));
            }
            Event::End(_) | Event::Eof => break,
            _ => {}
        }
    }
    Ok(FlatDocument { root, fields })
}

/// Text of the current element, consuming through its end tag. Text inside
/// nested children is ignored.
fn read_text_content(reader: &mut Reader<&[u8]>) -> Result<String, XmlError> {
    let mut text = String::new();
    let mut depth: u32 = 1;
    loop {
        match reader.read_event()? {
            Event::Text(e) if depth == 1 => {
                let decoded = e
                    .decode()
                    .map_err(|err| XmlError::ParseError(err.to_string()))?;
                let unescaped = quick_xml::escape::unescape(&decoded)
                    .map_err(|err| XmlError::ParseError(err.to_string()))?;
                text.push_str(&unescaped);
            }
            Event::GeneralRef(e) if depth == 1 => {
                let name = e
                    .decode()
                    .map_err(|err| XmlError::ParseError(err.to_string()))?;
                let entity = format!("&{name};");
                let resolved = quick_xml::escape::unescape(&entity)
                    .map_err(|err| XmlError::ParseError(err.to_string()))?;
                text.push_str(&resolved);
            }
            Event::Start(_) => depth += 1,
            Event::End(_) => {
                depth -= 1;
                if depth == 0 {
                    return Ok(text);
                }
            }
            Event::Eof => {
                return Err(XmlError::UnexpectedElement(
                    "unexpected EOF while reading text content".to_string(),
                ));
            }
            _ => {}
        }
    }
}

/// Upload id from an `<InitiateMultipartUploadResult>` reply.
pub fn parse_initiate_upload(xml: &[u8]) -> Result<String, XmlError> {
    let doc = read_flat_document(xml)?;
    if doc.root != "InitiateMultipartUploadResult" {
        return Err(XmlError::UnexpectedElement(doc.root));
    }
    match doc.field("UploadId") {
        Some(id) if !id.is_empty() => Ok(id.to_string()),
        _ => Err(XmlError::MissingElement("UploadId".to_string())),
    }
}

/// Parse a `<CompleteMultipartUploadResult>` reply.
pub fn parse_complete_upload(xml: &[u8]) -> Result<CompleteUploadResult, XmlError> {
    let doc = read_flat_document(xml)?;
    if doc.root != "CompleteMultipartUploadResult" {
        return Err(XmlError::UnexpectedElement(doc.root));
    }
    let owned = |name: &str| doc.field(name).map(str::to_string);
    Ok(CompleteUploadResult {
        location: owned("Location"),
        bucket: owned("Bucket"),
        key: owned("Key"),
        etag: owned("ETag"),
    })
}

/// Code and message of an `<Error>` document; None if `xml` is not one.
pub fn parse_error_body(xml: &[u8]) -> Option<S3ErrorBody> {
    let doc = read_flat_document(xml).ok()?;
    if doc.root != "Error" {
        return None;
    }
    Some(S3ErrorBody {
        code: doc.field("Code").map(str::to_string),
        message: doc.field("Message").map(str::to_string),
    })
}

/// Body of the complete-multipart-upload request, parts in ascending
/// part-number order regardless of input order.
pub fn complete_upload_body(parts: &[CompletedPart]) -> Result<Vec<u8>, XmlError> {
    let mut sorted: Vec<&CompletedPart> = parts.iter().collect();
    sorted.sort_by_key(|p| p.part_number);

    let mut buf = Vec::with_capacity(64 + parts.len() * 96);
    let mut writer = Writer::new(&mut buf);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    writer
        .create_element("CompleteMultipartUpload")
        .with_attribute(("xmlns", S3_NAMESPACE))
        .write_inner_content(|w| {
            for part in &sorted {
                w.create_element("Part").write_inner_content(|w| {
                    w.create_element("PartNumber")
                        .write_text_content(BytesText::new(&part.part_number.to_string()))?;
                    w.create_element("ETag")
                        .write_text_content(BytesText::new(&part.etag))?;
                    Ok(())
                })?;
            }
            Ok(())
        })?;
    Ok(buf)
}
