use crate::bundle::ContentClass;

/// Web source extensions whose registered MIME types are missing or wrong
/// for the platform's bundler.
fn source_type(extension: &str) -> Option<&'static str> {
    match extension {
        "ts" | "tsx" | "mts" | "cts" => Some("text/typescript"),
        "js" | "jsx" | "mjs" | "cjs" => Some("text/javascript"),
        "json" | "map" => Some("application/json"),
        "md" => Some("text/markdown"),
        "wasm" => Some("application/wasm"),
        _ => None,
    }
}

/// `Content-Type` header value for an upload.
pub fn content_type_for(path: &str, class: ContentClass) -> String {
    let extension = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    let essence = match source_type(&extension) {
        Some(known) => known.to_string(),
        None => match mime_guess::from_path(path).first() {
            Some(guess) => guess.essence_str().to_string(),
            None => match class {
                ContentClass::Text => "text/plain".to_string(),
                ContentClass::Binary => "application/octet-stream".to_string(),
            },
        },
    };

    if class == ContentClass::Text && is_textual(&essence) {
        format!("{essence}; charset=utf-8")
    } else {
        essence
    }
}

fn is_textual(essence: &str) -> bool {
    essence.starts_with("text/")
        || matches!(
            essence,
            "application/json" | "application/javascript" | "image/svg+xml" | "application/xml"
        )
}
