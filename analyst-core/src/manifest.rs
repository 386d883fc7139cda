//! Allowed-library manifest
//!
//! The list is injected verbatim into generation prompts. It is a constraint
//! on the oracle, not something the engine enforces.

use analyst_error::{Error, Result};
use std::path::Path;

/// Ordered list of package names generated code may import
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LibraryManifest {
    packages: Vec<String>,
}

impl LibraryManifest {
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            packages: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse a pip requirements file.
    pub fn from_requirements(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::file_not_found(path.display().to_string())
                    .with_operation("manifest::from_requirements")
            } else {
                Error::from(e)
                    .with_operation("manifest::from_requirements")
                    .with_context("path", path.display().to_string())
            }
        })?;
        Ok(Self::parse(&text))
    }

    /// One package per line; comments, blank lines, version specifiers,
    /// extras and environment markers are dropped.
    pub fn parse(text: &str) -> Self {
        let packages = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('-'))
            .filter_map(package_name)
            .collect();
        Self { packages }
    }

    pub fn packages(&self) -> &[String] {
        &self.packages
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// `- name` per line, in manifest order
    pub fn render(&self) -> String {
        self.packages
            .iter()
            .map(|pkg| format!("- {}", pkg))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn package_name(line: &str) -> Option<String> {
    let line = line.split(" #").next().unwrap_or(line);
    let end = line
        .find(|c: char| matches!(c, '=' | '<' | '>' | '~' | '!' | '[' | ';' | ' ' | '@'))
        .unwrap_or(line.len());
    let name = line[..end].trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}
