/*
 * resolver.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Include source resolution.
//!
//! `{% include %}` and `{% extends %}` load other templates through a
//! [`SourceResolver`]. Names are resolved relative to the including
//! source's directory before they reach the resolver, so a resolver
//! only maps a name to source text.

use std::path::{Path, PathBuf};

/// Trait for loading template sources by name.
pub trait SourceResolver {
    /// Load the source for `name`, or `None` if there is no such
    /// template.
    fn load(&self, name: &str) -> Option<String>;
}

/// Resolver that loads templates from the filesystem under a root
/// directory.
#[derive(Debug, Clone)]
pub struct FileSystemResolver {
    root: PathBuf,
}

impl FileSystemResolver {
    /// Create a resolver rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl SourceResolver for FileSystemResolver {
    fn load(&self, name: &str) -> Option<String> {
        std::fs::read_to_string(self.root.join(name)).ok()
    }
}

/// Resolver that returns nothing.
///
/// Use this when compiling templates that never include, or in tests
/// where an include should fail.
#[derive(Debug, Clone, Default)]
pub struct NullResolver;

impl SourceResolver for NullResolver {
    fn load(&self, _name: &str) -> Option<String> {
        None
    }
}

/// Resolver backed by an in-memory map.
///
/// Useful for tests and for templates bundled into the application.
#[derive(Debug, Clone, Default)]
pub struct MemoryResolver {
    sources: std::collections::HashMap<String, String>,
}

impl MemoryResolver {
    /// Create a new empty memory resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a template source under `name`.
    pub fn add(&mut self, name: impl Into<String>, source: impl Into<String>) -> &mut Self {
        self.sources.insert(name.into(), source.into());
        self
    }

    /// Create a resolver with the given sources.
    pub fn with_sources(
        sources: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Self {
        let mut resolver = Self::new();
        for (name, source) in sources {
            resolver.add(name, source);
        }
        resolver
    }
}

impl SourceResolver for MemoryResolver {
    fn load(&self, name: &str) -> Option<String> {
        self.sources.get(name).cloned()
    }
}

/// Resolve an include name against the directory of the including
/// source.
///
/// # Examples
///
/// ```ignore
/// // Base: "pages/index.html", include "footer.html" → "pages/footer.html"
/// // Base: "index.html", include "inc/footer.html" → "inc/footer.html"
/// // No base name → the include name unchanged
/// ```
pub fn resolve_relative(base: Option<&str>, name: &str) -> String {
    let base_dir = base
        .map(Path::new)
        .and_then(|p| p.parent())
        .unwrap_or(Path::new(""));
    base_dir.join(name).to_string_lossy().into_owned()
}
