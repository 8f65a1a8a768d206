//! Virtual path resolution.
//!
//! Node paths are either plain (`/Scratch/TestRest`, `TestRest/REST`) or
//! owned by a user (`admin@sparkl.com/Scratch/TestRest`). A user-owned path
//! is always absolute below that user.

use url::Url;

use crate::error::SessionError;

/// Split a path into its user and path portions.
///
/// A first segment containing `@` is the user. The remaining path is made
/// absolute, and is `/` when nothing follows the user.
#[must_use]
pub fn split_path(path: &str) -> (Option<&str>, String) {
    match path.split_once('/') {
        Some((first, rest)) if first.contains('@') => (Some(first), format!("/{rest}")),
        None if path.contains('@') => (Some(path), "/".to_owned()),
        _ => (None, path.to_owned()),
    }
}

/// Resolve `href` against `base`.
///
/// The user of `href` wins over the user of `base`. An absolute `href`
/// replaces the base path; the joined path is normalised. A path at a
/// user's root keeps its trailing slash (`me@x.com/`).
///
/// ```
/// use sparkl_duplex::path::resolve;
///
/// assert_eq!(resolve("/Scratch", "TestRest/REST"), "/Scratch/TestRest/REST");
/// assert_eq!(resolve("/Scratch", "../Other"), "/Other");
/// assert_eq!(
///     resolve("/Scratch", "admin@sparkl.com/Scratch/TestPublicRest/REST"),
///     "admin@sparkl.com/Scratch/TestPublicRest/REST"
/// );
/// ```
#[must_use]
pub fn resolve(base: &str, href: &str) -> String {
    let (base_user, base_path) = split_path(base);
    let (href_user, href_path) = split_path(href);

    let path = normalize(&join(&base_path, &href_path));

    match href_user.or(base_user) {
        Some(user) => {
            let path = path.trim_matches('/');
            if path.is_empty() {
                format!("{user}/")
            } else {
                format!("{user}/{path}")
            }
        }
        None => path,
    }
}

/// Build the websocket URL for a service path.
///
/// The scheme follows the node's HTTP URL (`http` gives `ws`, anything else
/// including `ws` gives `wss`); host and port are kept and the path becomes `/prefix` + `path`.
///
/// # Errors
///
/// Returns [`SessionError::InvalidUrl`] if `http_url` does not parse or has
/// no host.
pub fn websocket_url(http_url: &str, prefix: &str, path: &str) -> Result<String, SessionError> {
    let mut url = Url::parse(http_url)
        .map_err(|e| SessionError::InvalidUrl(format!("{http_url}: {e}")))?;

    if url.host_str().is_none() {
        return Err(SessionError::InvalidUrl(format!("{http_url}: no host")));
    }

    let scheme = match url.scheme() {
        "http" => "ws",
        _ => "wss",
    };
    url.set_scheme(scheme)
        .map_err(|()| SessionError::InvalidUrl(format!("{http_url}: cannot use {scheme}")))?;

    url.set_path(&format!("/{prefix}{path}"));
    url.set_query(None);
    url.set_fragment(None);
    Ok(url.into())
}

fn join(base: &str, href: &str) -> String {
    if href.starts_with('/') || base.is_empty() {
        href.to_owned()
    } else if base.ends_with('/') {
        format!("{base}{href}")
    } else {
        format!("{base}/{href}")
    }
}

fn normalize(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|last| *last != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push(part);
                }
            }
            _ => parts.push(part),
        }
    }

    let joined = parts.join("/");
    match (absolute, joined.is_empty()) {
        (true, _) => format!("/{joined}"),
        (false, true) => ".".to_owned(),
        (false, false) => joined,
    }
}
