//! Image URL helpers.
//!
//! The API serves generated images from a static mount and hands out paths
//! relative to the server root (`/generated-images/20250101/x.webp`).

/// Static mount the backend serves generated images from.
pub const IMAGE_PREFIX: &str = "/generated-images/";

/// Make an image URL absolute against `endpoint`.
///
/// Absolute `http(s)` URLs, e.g. presigned object-store links, pass through.
pub fn resolve_image_url(endpoint: &str, url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        return url.to_string();
    }
    let endpoint = endpoint.trim_end_matches('/');
    if url.starts_with('/') {
        format!("{}{}", endpoint, url)
    } else {
        format!("{}/{}", endpoint, url)
    }
}

/// Build the public URL for a result's `relative_path`.
pub fn image_url_for_path(relative_path: &str) -> String {
    format!("{}{}", IMAGE_PREFIX, relative_path.trim_start_matches('/'))
}

/// Derive the full-quality download URL from a preview URL.
///
/// Previews are lightweight `.webp` files next to a lossless `.png`. The
/// extension is swapped on the path only, so query strings survive.
pub fn download_url(url: &str) -> String {
    let (path, query) = match url.find(['?', '#']) {
        Some(pos) => url.split_at(pos),
        None => (url, ""),
    };
    match path.strip_suffix(".webp") {
        Some(stem) => format!("{}.png{}", stem, query),
        None => url.to_string(),
    }
}

/// File name component of an image URL, without query string.
pub fn file_name(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/').next().unwrap_or(path)
}
