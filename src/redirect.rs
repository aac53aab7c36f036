//! # Redirect Engine
//!
//! Version remapping: explicit binding redirects from the configuration
//! file, framework-retarget redirects derived from retargetable redist
//! entries, and auto-unify redirects synthesized by the conflict resolver.
//!
//! One redirect maps a partial identity (name, culture, public key token)
//! and an inclusive old-version range to a new version. `apply` honors the
//! source priority (config first, then framework retargets, then
//! auto-unify) and within one source picks the highest new version whose
//! range contains the identity's version.
//!
//! The configuration file uses the `assemblyBinding/dependentAssembly`
//! schema. Unknown elements and attributes are ignored; a malformed file
//! fails the invocation with a file/line-qualified error.

use std::fmt;
use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::identity::{
    normalize_culture, AssemblyIdentity, AssemblyVersion, ProcessorArchitecture,
};
use crate::redist::RedistPolicy;

/// Inclusive version range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VersionRange {
    pub low: AssemblyVersion,
    pub high: AssemblyVersion,
}

impl VersionRange {
    pub const FULL: VersionRange = VersionRange {
        low: AssemblyVersion::ZERO,
        high: AssemblyVersion {
            major: u16::MAX,
            minor: u16::MAX,
            build: u16::MAX,
            revision: u16::MAX,
        },
    };

    pub fn contains(&self, version: AssemblyVersion) -> bool {
        self.low <= version && version <= self.high
    }

    /// Parse `lo-hi` or a single version (a one-point range).
    pub fn parse(text: &str) -> Result<Self> {
        match text.split_once('-') {
            Some((low, high)) => Ok(VersionRange {
                low: low.trim().parse()?,
                high: high.trim().parse()?,
            }),
            None => {
                let version: AssemblyVersion = text.trim().parse()?;
                Ok(VersionRange {
                    low: version,
                    high: version,
                })
            }
        }
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.low == self.high {
            write!(f, "{}", self.low)
        } else {
            write!(f, "{}-{}", self.low, self.high)
        }
    }
}

/// Where a redirect came from, in application priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum RedirectSource {
    Config,
    FrameworkRetarget,
    AutoUnify,
}

/// `partial_identity × version_range → new_version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindingRedirect {
    /// Name, culture and public key token; version and architecture unset.
    pub identity: AssemblyIdentity,
    pub old_versions: VersionRange,
    pub new_version: AssemblyVersion,
    pub source: RedirectSource,
}

/// Ordered collection of redirects from all three sources.
#[derive(Debug, Default)]
pub struct RedirectSet {
    redirects: Vec<BindingRedirect>,
}

impl RedirectSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse explicit redirects from an `assemblyBinding` configuration
    /// file. Fails with [`Error::InvalidConfigFile`] on malformed content.
    pub fn from_config_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::InvalidConfigFile {
            path: path.to_path_buf(),
            line: 0,
            message: e.to_string(),
        })?;
        parse_config(&text).map_err(|(position, message)| Error::InvalidConfigFile {
            path: path.to_path_buf(),
            line: line_of(&text, position),
            message,
        })
    }

    /// Synthesize redirects for retargetable framework assemblies: any
    /// requested version unifies to the version the redist list carries.
    pub fn add_framework_retargets(&mut self, policy: &RedistPolicy) {
        let mut retargets: Vec<BindingRedirect> = policy
            .retargetable_entries()
            .filter_map(|entry| {
                let new_version = entry.identity.version?;
                Some(BindingRedirect {
                    identity: entry.identity.partial(),
                    old_versions: VersionRange::FULL,
                    new_version,
                    source: RedirectSource::FrameworkRetarget,
                })
            })
            .collect();
        retargets.sort_by(|a, b| a.identity.cmp(&b.identity));
        self.redirects.extend(retargets);
    }

    /// Install auto-unify redirects produced by conflict resolution.
    pub fn install_auto_unify(&mut self, redirects: Vec<BindingRedirect>) {
        self.redirects.extend(
            redirects
                .into_iter()
                .map(|mut redirect| {
                    redirect.source = RedirectSource::AutoUnify;
                    redirect
                }),
        );
    }

    /// The remapped version for `identity`, if any redirect applies.
    ///
    /// Sources are tried in priority order; within one source the highest
    /// new version whose range contains the identity's version wins. A
    /// redirect that would not change the version is not a remap.
    pub fn apply(&self, identity: &AssemblyIdentity) -> Option<(AssemblyVersion, RedirectSource)> {
        let key = identity.partial().simple_key();
        let current = identity.version_or_zero();
        for source in [
            RedirectSource::Config,
            RedirectSource::FrameworkRetarget,
            RedirectSource::AutoUnify,
        ] {
            let best = self
                .redirects
                .iter()
                .filter(|r| r.source == source)
                .filter(|r| r.identity.simple_key() == key)
                .filter(|r| r.old_versions.contains(current))
                .map(|r| r.new_version)
                .max();
            match best {
                Some(new_version) if new_version != current => {
                    return Some((new_version, source))
                }
                Some(_) => return None,
                None => {}
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.redirects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.redirects.is_empty()
    }
}

fn line_of(text: &str, byte_position: usize) -> usize {
    let upto = byte_position.min(text.len());
    text[..upto].bytes().filter(|&b| b == b'\n').count() + 1
}

type ConfigError = (usize, String);

fn parse_config(text: &str) -> std::result::Result<RedirectSet, ConfigError> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut set = RedirectSet::new();
    // Identity of the enclosing dependentAssembly, once seen.
    let mut current_identity: Option<AssemblyIdentity> = None;
    let mut in_dependent_assembly = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(tag)) | Ok(Event::Empty(tag)) => {
                // Position just past the element, for line-qualified errors.
                let position = reader.buffer_position() as usize;
                let name = local_name(&tag);
                if name.eq_ignore_ascii_case("dependentAssembly") {
                    in_dependent_assembly = true;
                    current_identity = None;
                } else if name.eq_ignore_ascii_case("assemblyIdentity") && in_dependent_assembly {
                    current_identity =
                        Some(parse_assembly_identity(&tag).map_err(|m| (position, m))?);
                } else if name.eq_ignore_ascii_case("bindingRedirect") && in_dependent_assembly {
                    let identity = current_identity.clone().ok_or((
                        position,
                        "bindingRedirect before assemblyIdentity".to_string(),
                    ))?;
                    let (old_versions, new_version) =
                        parse_binding_redirect(&tag).map_err(|m| (position, m))?;
                    set.redirects.push(BindingRedirect {
                        identity,
                        old_versions,
                        new_version,
                        source: RedirectSource::Config,
                    });
                }
            }
            Ok(Event::End(tag)) => {
                let name = tag.name();
                let name = String::from_utf8_lossy(name.as_ref()).to_string();
                if strip_prefix(&name).eq_ignore_ascii_case("dependentAssembly") {
                    in_dependent_assembly = false;
                    current_identity = None;
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err((reader.buffer_position() as usize, e.to_string())),
        }
    }
    Ok(set)
}

fn local_name(tag: &BytesStart<'_>) -> String {
    let name = tag.name();
    strip_prefix(&String::from_utf8_lossy(name.as_ref())).to_string()
}

fn strip_prefix(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

fn parse_assembly_identity(tag: &BytesStart<'_>) -> std::result::Result<AssemblyIdentity, String> {
    let mut name = String::new();
    let mut culture = normalize_culture("");
    let mut token = None;
    for attr in tag.attributes().flatten() {
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let value = attr
            .unescape_value()
            .map_err(|e| e.to_string())?
            .to_string();
        match key.to_ascii_lowercase().as_str() {
            "name" => name = value,
            "culture" => culture = normalize_culture(&value),
            "publickeytoken" => {
                if !value.eq_ignore_ascii_case("null") {
                    token = Some(
                        value
                            .to_ascii_lowercase()
                            .parse()
                            .map_err(|e: Error| e.to_string())?,
                    );
                }
            }
            _ => {}
        }
    }
    if name.is_empty() {
        return Err("assemblyIdentity is missing the name attribute".to_string());
    }
    Ok(AssemblyIdentity {
        simple_name: name,
        version: None,
        culture,
        public_key_token: token,
        processor_architecture: ProcessorArchitecture::None,
    })
}

fn parse_binding_redirect(
    tag: &BytesStart<'_>,
) -> std::result::Result<(VersionRange, AssemblyVersion), String> {
    let mut old_versions = None;
    let mut new_version = None;
    for attr in tag.attributes().flatten() {
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let value = attr
            .unescape_value()
            .map_err(|e| e.to_string())?
            .to_string();
        match key.to_ascii_lowercase().as_str() {
            "oldversion" => {
                old_versions = Some(VersionRange::parse(&value).map_err(|e| e.to_string())?)
            }
            "newversion" => {
                new_version = Some(
                    value
                        .parse::<AssemblyVersion>()
                        .map_err(|e| e.to_string())?,
                )
            }
            _ => {}
        }
    }
    match (old_versions, new_version) {
        (Some(old), Some(new)) => Ok((old, new)),
        (None, _) => Err("bindingRedirect is missing oldVersion".to_string()),
        (_, None) => Err("bindingRedirect is missing newVersion".to_string()),
    }
}
