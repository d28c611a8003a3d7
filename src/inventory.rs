// src/inventory.rs

//! Source tree inventory
//!
//! A snapshot of everything the restore pass needs to know about the tree:
//! solutions, projects, nuget.config files, packages.config files and the
//! declared package references.

use crate::error::{Error, Result};
use crate::model::{PackageReference, PackageSource};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

/// Directories never descended into while scanning
const SKIPPED_DIRS: &[&str] = &[".git", "bin", "obj", "node_modules"];

const PROJECT_EXTENSIONS: &[&str] = &["csproj", "vbproj", "fsproj"];
const SOLUTION_EXTENSIONS: &[&str] = &["sln", "slnx"];

/// What the restore pass knows about the analyzed source tree
#[derive(Debug, Clone, Default)]
pub struct SourceInventory {
    pub source_dir: PathBuf,
    pub solutions: Vec<PathBuf>,
    pub projects: Vec<PathBuf>,
    pub nuget_configs: Vec<PathBuf>,
    /// nuget.config located directly in the source root, if any
    pub root_nuget_config: Option<PathBuf>,
    pub packages_configs: Vec<PathBuf>,
    pub packages: BTreeSet<PackageReference>,
    pub uses_windows_forms: bool,
    pub uses_wpf: bool,
}

impl SourceInventory {
    /// An empty inventory rooted at `source_dir`
    pub fn new(source_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
            ..Self::default()
        }
    }

    /// Restores must allow Windows-only target frameworks
    pub fn targets_windows(&self) -> bool {
        self.uses_windows_forms || self.uses_wpf
    }

    /// Walk `source_dir` and collect the inventory
    ///
    /// Files that cannot be read or parsed are logged and skipped.
    pub fn scan(source_dir: &Path) -> Result<Self> {
        if !source_dir.is_dir() {
            return Err(Error::NotFoundError(format!(
                "Source directory {} does not exist",
                source_dir.display()
            )));
        }

        let mut inventory = Self::new(source_dir);
        let walker = WalkDir::new(source_dir)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| !is_skipped_dir(e));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            inventory.classify(entry.path());
        }

        inventory.solutions.sort();
        inventory.projects.sort();
        inventory.nuget_configs.sort();
        inventory.packages_configs.sort();

        info!(
            "Found {} solution(s), {} project(s), {} nuget.config file(s), {} packages.config file(s) and {} package reference(s)",
            inventory.solutions.len(),
            inventory.projects.len(),
            inventory.nuget_configs.len(),
            inventory.packages_configs.len(),
            inventory.packages.len()
        );
        Ok(inventory)
    }

    fn classify(&mut self, path: &Path) {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        if file_name == "nuget.config" {
            if path.parent() == Some(self.source_dir.as_path()) {
                self.root_nuget_config = Some(path.to_path_buf());
            }
            self.nuget_configs.push(path.to_path_buf());
        } else if file_name == "packages.config" {
            self.packages_configs.push(path.to_path_buf());
            self.read_file(path, |inventory, content| {
                inventory.add_legacy_packages(content)
            });
        } else if SOLUTION_EXTENSIONS.contains(&extension.as_str()) {
            self.solutions.push(path.to_path_buf());
        } else if PROJECT_EXTENSIONS.contains(&extension.as_str()) {
            self.projects.push(path.to_path_buf());
            self.read_file(path, |inventory, content| inventory.add_project(content));
        }
    }

    fn read_file<F>(&mut self, path: &Path, parse: F)
    where
        F: FnOnce(&mut Self, &str) -> Result<()>,
    {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                warn!("Failed to read {}: {}", path.display(), e);
                return;
            }
        };
        if let Err(e) = parse(self, &content) {
            warn!("Failed to parse {}: {}", path.display(), e);
        }
    }

    /// Collect `<PackageReference>` items and Windows UI flags from a project file
    pub fn add_project(&mut self, content: &str) -> Result<()> {
        let mut reader = Reader::from_str(content);
        let mut current: Option<String> = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    let name = local_name(&e);
                    if name.eq_ignore_ascii_case("PackageReference") {
                        self.add_package_reference(&e, PackageSource::SdkStyle)?;
                    }
                    current = Some(name);
                }
                Ok(Event::Empty(e)) => {
                    if local_name(&e).eq_ignore_ascii_case("PackageReference") {
                        self.add_package_reference(&e, PackageSource::SdkStyle)?;
                    }
                }
                Ok(Event::Text(t)) => {
                    let Some(element) = &current else { continue };
                    let text = t
                        .unescape()
                        .map_err(|e| Error::ParseError(format!("Invalid project text: {e}")))?;
                    let enabled = text.trim().eq_ignore_ascii_case("true");
                    if element.eq_ignore_ascii_case("UseWindowsForms") && enabled {
                        self.uses_windows_forms = true;
                    } else if element.eq_ignore_ascii_case("UseWPF") && enabled {
                        self.uses_wpf = true;
                    }
                }
                Ok(Event::End(_)) => current = None,
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    return Err(Error::ParseError(format!(
                        "Invalid project XML at position {}: {}",
                        reader.buffer_position(),
                        e
                    )));
                }
            }
        }
        Ok(())
    }

    /// Collect `<package id=...>` entries from a packages.config file
    pub fn add_legacy_packages(&mut self, content: &str) -> Result<()> {
        let mut reader = Reader::from_str(content);

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                    if local_name(&e).eq_ignore_ascii_case("package") {
                        match attribute(&e, "id")? {
                            Some(id) => {
                                self.packages
                                    .insert(PackageReference::new(id, PackageSource::LegacyConfig));
                            }
                            None => debug!("Skipping <package> without an id"),
                        }
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    return Err(Error::ParseError(format!(
                        "Invalid packages.config XML at position {}: {}",
                        reader.buffer_position(),
                        e
                    )));
                }
            }
        }
        Ok(())
    }

    fn add_package_reference(&mut self, element: &BytesStart<'_>, source: PackageSource) -> Result<()> {
        // `Update` items modify an existing reference rather than adding one
        match attribute(element, "Include")? {
            Some(name) if !name.trim().is_empty() => {
                self.packages.insert(PackageReference::new(name.trim(), source));
            }
            _ => {}
        }
        Ok(())
    }
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|name| SKIPPED_DIRS.iter().any(|s| name.eq_ignore_ascii_case(s)))
            .unwrap_or(false)
}

fn local_name(element: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(element.local_name().as_ref()).to_string()
}

/// Case-insensitive attribute lookup
fn attribute(element: &BytesStart<'_>, name: &str) -> Result<Option<String>> {
    for attr in element.attributes() {
        let attr = attr.map_err(|e| Error::ParseError(format!("Invalid attribute: {e}")))?;
        if String::from_utf8_lossy(attr.key.local_name().as_ref()).eq_ignore_ascii_case(name) {
            let value = attr
                .unescape_value()
                .map_err(|e| Error::ParseError(format!("Invalid attribute value: {e}")))?;
            return Ok(Some(value.to_string()));
        }
    }
    Ok(None)
}
