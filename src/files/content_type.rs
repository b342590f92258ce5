pub const PPTX: &str = "application/vnd.openxmlformats-officedocument.presentationml.presentation";
pub const DOCX: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Lowercases and strips parameters such as `; charset=binary`.
pub fn normalize(ct: &str) -> String {
    ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase()
}

pub fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        PPTX => Some("pptx"),
        DOCX => Some("docx"),
        XLSX => Some("xlsx"),
        _ => None,
    }
}

/// Best guess from a file name, used when an upload carries no content type.
pub fn mime_from_name(name: &str) -> Option<&'static str> {
    let (_, ext) = name.rsplit_once('.')?;
    match ext.to_ascii_lowercase().as_str() {
        "pptx" => Some(PPTX),
        "docx" => Some(DOCX),
        "xlsx" => Some(XLSX),
        "pdf" => Some("application/pdf"),
        "txt" => Some("text/plain"),
        _ => None,
    }
}
