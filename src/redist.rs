//! # Framework Membership Policy
//!
//! Loads redist lists (XML framework-membership files) and optional subset
//! lists, and classifies identities as in-framework, excluded by the
//! targeted profile, or unknown.
//!
//! A redist list looks like:
//!
//! ```xml
//! <FileList Redist="Microsoft-Windows-CLRCoreComp.4.8">
//!   <File AssemblyName="System" Version="4.0.0.0" Culture="neutral"
//!         PublicKeyToken="b77a5c561934e089" InGAC="true" Retargetable="Yes"/>
//! </FileList>
//! ```
//!
//! When both full-framework and subset lists are configured, the exclusion
//! list is the set difference (full minus subset); the graph builder later
//! prunes excluded references. A subset list whose name appears in the
//! configured full-subset synonym set means "the whole framework" and
//! disables exclusion entirely.
//!
//! Invalid list files are skipped with an advisory; policy loading never
//! fails an invocation.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::identity::{normalize_culture, AssemblyIdentity, ProcessorArchitecture, SimpleKey};

/// Default synonym set: a subset list with one of these names stands for
/// the entire framework.
pub const DEFAULT_FULL_SUBSET_NAMES: &[&str] = &["Full"];

/// One `<File>` entry from a redist list.
#[derive(Debug, Clone)]
pub struct RedistEntry {
    pub identity: AssemblyIdentity,
    pub in_gac: bool,
    pub retargetable: bool,
    pub redist_name: String,
    /// Directory of the list file the entry came from.
    pub framework_dir: Option<PathBuf>,
}

/// Result of classifying one identity against the policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    InFramework {
        redist_name: String,
        in_gac: bool,
        retargetable: bool,
    },
    /// Member of the full framework but not of the targeted subset.
    Excluded,
    Unknown,
}

/// Loaded membership policy plus the derived exclusion list.
#[derive(Debug, Default)]
pub struct RedistPolicy {
    entries: HashMap<SimpleKey, RedistEntry>,
    exclusions: HashSet<SimpleKey>,
    subset_names: Vec<String>,
}

/// Policy plus the advisories produced while loading it.
#[derive(Debug, Default)]
pub struct PolicyLoadOutcome {
    pub policy: RedistPolicy,
    pub advisories: Vec<String>,
}

impl RedistPolicy {
    /// Load full-framework tables and optional subset tables.
    ///
    /// `full_synonyms` lists subset names that stand for the whole
    /// framework (see [`DEFAULT_FULL_SUBSET_NAMES`]).
    pub fn load(
        full_tables: &[PathBuf],
        subset_tables: &[PathBuf],
        full_synonyms: &[String],
    ) -> PolicyLoadOutcome {
        let mut outcome = PolicyLoadOutcome::default();

        let mut full_entries: Vec<RedistEntry> = Vec::new();
        for table in full_tables {
            match parse_redist_list(table) {
                Ok(parsed) => full_entries.extend(parsed.entries),
                Err(message) => outcome
                    .advisories
                    .push(format!("skipping redist list {}: {message}", table.display())),
            }
        }

        let mut subset_keys: HashSet<SimpleKey> = HashSet::new();
        let mut subset_disabled = subset_tables.is_empty();
        for table in subset_tables {
            match parse_redist_list(table) {
                Ok(parsed) => {
                    if full_synonyms
                        .iter()
                        .any(|synonym| synonym.eq_ignore_ascii_case(&parsed.redist_name))
                    {
                        subset_disabled = true;
                    }
                    outcome.policy.subset_names.push(parsed.redist_name);
                    subset_keys.extend(parsed.entries.iter().map(|e| e.identity.simple_key()));
                }
                Err(message) => outcome
                    .advisories
                    .push(format!("skipping subset list {}: {message}", table.display())),
            }
        }

        for entry in full_entries {
            let key = entry.identity.simple_key();
            if !subset_disabled && !subset_keys.contains(&key) {
                outcome.policy.exclusions.insert(key.clone());
            }
            outcome.policy.entries.entry(key).or_insert(entry);
        }

        outcome
    }

    pub fn classify(&self, identity: &AssemblyIdentity) -> Classification {
        let key = identity.simple_key();
        if self.exclusions.contains(&key) {
            return Classification::Excluded;
        }
        match self.entries.get(&key) {
            Some(entry) => Classification::InFramework {
                redist_name: entry.redist_name.clone(),
                in_gac: entry.in_gac,
                retargetable: entry.retargetable,
            },
            None => Classification::Unknown,
        }
    }

    /// Names of the loaded subset lists, for exclusion diagnostics.
    pub fn subset_names(&self) -> &[String] {
        &self.subset_names
    }

    /// Entries marked retargetable, the input for framework-retarget
    /// redirect synthesis.
    pub fn retargetable_entries(&self) -> impl Iterator<Item = &RedistEntry> {
        self.entries.values().filter(|entry| entry.retargetable)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Default table discovery: `RedistList/*.xml` and `SubsetList/*.xml` under
/// each framework directory, in sorted order.
pub fn default_tables(framework_dirs: &[PathBuf]) -> (Vec<PathBuf>, Vec<PathBuf>) {
    let mut full = Vec::new();
    let mut subset = Vec::new();
    for dir in framework_dirs {
        full.extend(xml_files_in(&dir.join("RedistList")));
        subset.extend(xml_files_in(&dir.join("SubsetList")));
    }
    (full, subset)
}

fn xml_files_in(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.extension()
                .map(|ext| ext.eq_ignore_ascii_case("xml"))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    files
}

struct ParsedList {
    redist_name: String,
    entries: Vec<RedistEntry>,
}

fn parse_redist_list(path: &Path) -> Result<ParsedList, String> {
    let text = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    let mut reader = Reader::from_str(&text);
    reader.config_mut().trim_text(true);

    let framework_dir = path.parent().map(Path::to_path_buf);
    let mut redist_name = String::new();
    let mut entries = Vec::new();
    let mut saw_file_list = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(tag)) | Ok(Event::Empty(tag)) => {
                let name = tag.name();
                let name = String::from_utf8_lossy(name.as_ref()).to_string();
                if name.eq_ignore_ascii_case("FileList") {
                    saw_file_list = true;
                    for attr in tag.attributes().flatten() {
                        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
                        if key.eq_ignore_ascii_case("Redist") || key.eq_ignore_ascii_case("Name") {
                            if redist_name.is_empty() {
                                redist_name =
                                    attr.unescape_value().map_err(|e| e.to_string())?.to_string();
                            }
                        }
                    }
                } else if name.eq_ignore_ascii_case("File") {
                    if let Some(entry) =
                        parse_file_entry(&tag, &redist_name, framework_dir.as_deref())?
                    {
                        entries.push(entry);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(format!("XML error at byte {}: {e}", reader.buffer_position())),
        }
    }

    if !saw_file_list {
        return Err("missing FileList element".to_string());
    }
    Ok(ParsedList {
        redist_name,
        entries,
    })
}

fn parse_file_entry(
    tag: &quick_xml::events::BytesStart<'_>,
    redist_name: &str,
    framework_dir: Option<&Path>,
) -> Result<Option<RedistEntry>, String> {
    let mut name = String::new();
    let mut version = None;
    let mut culture = normalize_culture("");
    let mut token = None;
    let mut in_gac = false;
    let mut retargetable = false;

    for attr in tag.attributes().flatten() {
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let value = attr.unescape_value().map_err(|e| e.to_string())?.to_string();
        match key.to_ascii_lowercase().as_str() {
            "assemblyname" => name = value,
            "version" => version = value.parse().ok(),
            "culture" => culture = normalize_culture(&value),
            "publickeytoken" => {
                if !value.eq_ignore_ascii_case("null") {
                    token = value.to_ascii_lowercase().parse().ok();
                }
            }
            "ingac" => in_gac = truthy(&value),
            "retargetable" => retargetable = truthy(&value),
            _ => {}
        }
    }

    if name.is_empty() {
        // Tolerate stray entries; the rest of the list is still useful.
        return Ok(None);
    }

    Ok(Some(RedistEntry {
        identity: AssemblyIdentity {
            simple_name: name,
            version,
            culture,
            public_key_token: token,
            processor_architecture: ProcessorArchitecture::None,
        },
        in_gac,
        retargetable,
        redist_name: redist_name.to_string(),
        framework_dir: framework_dir.map(Path::to_path_buf),
    }))
}

fn truthy(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("yes")
}
