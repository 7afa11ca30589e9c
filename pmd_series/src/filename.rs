//! Series path templates: `%T` iteration expansion and `%E` extension
//! auto-detection.

use crate::{invalid_operation, wrong_api, Error, Result};
use pmd_types::Format;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;

/// How the filename extension was specified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ExtensionSpec {
    /// Spelled out, e.g. `data_%T.json`.
    Fixed(String),
    /// `%E`: resolve from config when creating, by globbing when reading.
    Auto,
    /// No extension given.
    None,
}

/// A parsed series path.
#[derive(Debug, Clone)]
pub(crate) struct ParsedPath {
    pub directory: String,
    pub prefix: String,
    /// `Some(padding)` when the name carries a `%T` placeholder;
    /// `Some(Some(n))` for zero-padded `%0nT`.
    pub expansion: Option<Option<usize>>,
    pub suffix: String,
    pub extension: ExtensionSpec,
}

impl ParsedPath {
    pub fn parse(path: &str) -> Result<Self> {
        let (directory, filename) = match path.rsplit_once('/') {
            Some((dir, file)) => (dir.to_owned(), file.to_owned()),
            None => (".".to_owned(), path.to_owned()),
        };
        if filename.is_empty() {
            return Err(wrong_api(format!("\"{path}\" does not name a file")));
        }

        let (stem, extension) = if let Some(stem) = filename.strip_suffix(".%E") {
            (stem.to_owned(), ExtensionSpec::Auto)
        } else {
            match filename.rsplit_once('.') {
                Some((stem, ext)) if !ext.contains('%') && !ext.is_empty() => {
                    (stem.to_owned(), ExtensionSpec::Fixed(ext.to_owned()))
                }
                _ => (filename.clone(), ExtensionSpec::None),
            }
        };

        let expansion_re = Regex::new(r"%(0(\d+))?T").expect("static regex");
        let mut matches = expansion_re.find_iter(&stem);
        let (prefix, expansion, suffix) = match matches.next() {
            None => (stem.clone(), None, String::new()),
            Some(found) => {
                if matches.next().is_some() {
                    return Err(wrong_api(format!(
                        "\"{path}\" contains more than one %T placeholder"
                    )));
                }
                let captures = expansion_re
                    .captures(&stem)
                    .expect("a match was just found");
                let padding = captures
                    .get(2)
                    .map(|m| m.as_str().parse::<usize>())
                    .transpose()
                    .map_err(|_| invalid_operation("unreadable %T padding width"))?;
                (
                    stem[..found.start()].to_owned(),
                    Some(padding),
                    stem[found.end()..].to_owned(),
                )
            }
        };

        Ok(Self {
            directory,
            prefix,
            expansion,
            suffix,
            extension,
        })
    }

    pub fn is_file_based(&self) -> bool {
        self.expansion.is_some()
    }

    /// The format derived from a fixed extension, if any.
    pub fn format_from_extension(&self) -> Option<Format> {
        match &self.extension {
            ExtensionSpec::Fixed(ext) => Format::from_extension(ext),
            _ => None,
        }
    }

    /// File name (without directory) for one iteration, with the resolved
    /// extension attached.
    pub fn filename_for(&self, iteration: u64, extension: &str) -> String {
        let mut name = self.filename_stem_for(iteration);
        name.push('.');
        name.push_str(extension);
        name
    }

    pub fn filename_stem_for(&self, iteration: u64) -> String {
        match self.expansion {
            None => format!("{}{}", self.prefix, self.suffix),
            Some(padding) => {
                let digits = match padding {
                    Some(width) => format!("{iteration:0width$}"),
                    None => iteration.to_string(),
                };
                format!("{}{digits}{}", self.prefix, self.suffix)
            }
        }
    }

    /// The `iterationFormat` attribute value: the name pattern without
    /// directory and extension.
    pub fn iteration_format(&self) -> String {
        match self.expansion {
            None => format!("{}{}", self.prefix, self.suffix),
            Some(None) => format!("{}%T{}", self.prefix, self.suffix),
            Some(Some(width)) => format!("{}%0{width}T{}", self.prefix, self.suffix),
        }
    }

    /// Scan the directory for files matching this template and the given
    /// extension, returning `iteration -> filename`.
    pub fn scan_file_based(&self, extension: &str) -> Result<BTreeMap<u64, String>> {
        let pattern = format!(
            "^{}(\\d+){}\\.{}$",
            regex::escape(&self.prefix),
            regex::escape(&self.suffix),
            regex::escape(extension)
        );
        let matcher = Regex::new(&pattern).map_err(|e| wrong_api(e.to_string()))?;

        let mut found = BTreeMap::new();
        let entries = std::fs::read_dir(&self.directory).map_err(|_| Error::NoSuchFile {
            path: self.directory.clone(),
        })?;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(captures) = matcher.captures(name) {
                if let Ok(index) = captures[1].parse::<u64>() {
                    found.insert(index, name.to_owned());
                }
            }
        }
        Ok(found)
    }

    /// Resolve a `%E` extension by globbing: exactly one known format may
    /// match the existing files.
    pub fn detect_extension(&self) -> Result<String> {
        let mut matching = Vec::new();
        for extension in ["h5", "bp", "bp4", "bp5", "sst", "ssc", "json", "toml"] {
            let candidates = if self.is_file_based() {
                !self
                    .scan_file_based(extension)
                    .map(|files| files.is_empty())
                    .unwrap_or(true)
            } else {
                Path::new(&self.directory)
                    .join(self.filename_for(0, extension))
                    .is_file()
            };
            if candidates {
                matching.push(extension.to_owned());
            }
        }
        match matching.len() {
            0 => Err(Error::NoSuchFile {
                path: format!("{}/{}", self.directory, self.iteration_format()),
            }),
            1 => Ok(matching.remove(0)),
            _ => Err(wrong_api(format!(
                "ambiguous %E extension, candidates: {}",
                matching.join(", ")
            ))),
        }
    }
}
