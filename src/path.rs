//! Path parsing and normalisation (spec.md §4.4).
//!
//! Paths are `/`-separated, absolute, forward-slash normalised. `\` is
//! accepted on input only to ease development on Windows-like hosts —
//! it is translated to `/` before anything else happens.

use std::fmt;

use crate::error::{FsError, Result};

/// A normalised absolute path, stored as the canonical string form
/// (`/`, no trailing slash except for the root, `.`/`..` resolved).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NormalizedPath(String);

impl NormalizedPath {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Component-wise `starts_with`: `other`'s components must be a
    /// prefix of `self`'s components. Resolves the Open Question in
    /// spec.md §9 in favor of component-wise matching rather than raw
    /// string prefixes.
    pub fn starts_with(&self, other: &NormalizedPath) -> bool {
        let mine = self.components();
        let theirs = other.components();
        theirs.len() <= mine.len() && mine[..theirs.len()] == theirs[..]
    }

    pub fn ends_with(&self, other: &NormalizedPath) -> bool {
        let mine = self.components();
        let theirs = other.components();
        theirs.len() <= mine.len() && mine[mine.len() - theirs.len()..] == theirs[..]
    }

    pub fn components(&self) -> Vec<&str> {
        if self.is_root() {
            Vec::new()
        } else {
            self.0[1..].split('/').collect()
        }
    }
}

impl fmt::Display for NormalizedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The root path, always present.
pub fn root() -> NormalizedPath {
    NormalizedPath("/".to_string())
}

/// Parses and normalises a raw path string.
///
/// Collapses `\` to `/`, collapses repeated separators, resolves `.`
/// and `..` components, and requires the result be absolute (spec.md
/// §4.4: "a path is absolute iff it begins with `/`").
pub fn parse(raw: &str) -> Result<NormalizedPath> {
    if raw.is_empty() {
        return Err(FsError::InvalidPath("empty path".to_string()));
    }
    let slashified: String = raw.chars().map(|c| if c == '\\' { '/' } else { c }).collect();
    if !slashified.starts_with('/') {
        return Err(FsError::InvalidPath(format!(
            "path is not absolute: {raw}"
        )));
    }

    let mut stack: Vec<&str> = Vec::new();
    for component in slashified.split('/') {
        match component {
            "" | "." => continue,
            ".." => {
                if stack.pop().is_none() {
                    return Err(FsError::InvalidPath(format!(
                        "path escapes root: {raw}"
                    )));
                }
            }
            c => stack.push(c),
        }
    }

    if stack.is_empty() {
        Ok(root())
    } else {
        Ok(NormalizedPath(format!("/{}", stack.join("/"))))
    }
}

/// The parent of `path`, or `None` for the root.
pub fn parent(path: &NormalizedPath) -> Option<NormalizedPath> {
    let components = path.components();
    if components.is_empty() {
        None
    } else if components.len() == 1 {
        Some(root())
    } else {
        Some(NormalizedPath(format!(
            "/{}",
            components[..components.len() - 1].join("/")
        )))
    }
}

/// The final path component, or `None` for the root.
pub fn base_name(path: &NormalizedPath) -> Option<&str> {
    path.components().last().copied()
}

/// Resolves `other` against `base`: if `other` is absolute, returns it
/// (normalised); otherwise concatenates `base` and `other`.
pub fn resolve(base: &NormalizedPath, other: &str) -> Result<NormalizedPath> {
    let slashified: String = other.chars().map(|c| if c == '\\' { '/' } else { c }).collect();
    if slashified.starts_with('/') {
        parse(&slashified)
    } else if base.is_root() {
        parse(&format!("/{slashified}"))
    } else {
        parse(&format!("{}/{}", base.as_str(), slashified))
    }
}

/// Expresses `to` relative to `from`: the component-wise suffix of
/// `to` once the shared `from` prefix is removed. Returns `to`
/// unchanged (as a relative-looking path sans leading components)
/// only when `from` is a component-wise prefix of `to`; otherwise
/// falls back to `to` itself, since the spec does not require `..`-
/// walking relativisation for this engine's internal use (the
/// language-standard path object exposed by the adapter owns that).
pub fn relativize(from: &NormalizedPath, to: &NormalizedPath) -> String {
    let to_components = to.components();
    if to.starts_with(from) {
        to_components[from.components().len()..].join("/")
    } else {
        to.as_str().trim_start_matches('/').to_string()
    }
}
