use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'.')
    .remove(b'-')
    .remove(b'_')
    .remove(b'~');

/// Route under which finished uploads are served.
pub const FILES_ROUTE: &str = "/files";

/// Why an upload id cannot be used as a file name.
pub fn invalid_upload_id(uid: &str) -> Option<&'static str> {
    if uid.is_empty() {
        Some("Missing upload id")
    } else if uid == "." || uid == ".." {
        Some("Upload id may not be a relative directory")
    } else if uid.contains(['/', '\\', '\0']) {
        Some("Upload id may not contain path separators")
    } else {
        None
    }
}

/// Trailing `.ext` of a client file name, where ext is ASCII word characters.
pub fn extension_of(name: &str) -> &str {
    match name.rfind('.') {
        Some(idx)
            if idx + 1 < name.len()
                && name[idx + 1..]
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_') =>
        {
            &name[idx..]
        }
        _ => "",
    }
}

pub fn stored_file_name(uid: &str, original_name: Option<&str>) -> String {
    format!("{}{}", uid, original_name.map(extension_of).unwrap_or(""))
}

pub fn available_path(file_name: &str) -> String {
    format!("{}/{}", FILES_ROUTE, encode_path(file_name))
}

pub fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| utf8_percent_encode(segment, PATH_SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/")
}
