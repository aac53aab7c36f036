//! # Assembly Identity
//!
//! Value types for assembly identities and the two equality modes the
//! resolver uses throughout:
//!
//! - **Strict** equality compares every field, including the version.
//! - **Simple** equality ignores the version and processor architecture and
//!   is the bucket used for conflict detection.
//!
//! A textual identity (a *fusion name*) has the shape
//! `Name, Version=1.2.3.4, Culture=neutral, PublicKeyToken=b03f5f7f11d50a3a`,
//! optionally followed by `ProcessorArchitecture=...`. All fields except the
//! simple name may be missing. Parsing tolerates missing fields but rejects
//! malformed ones.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// Canonical spelling for the invariant culture.
///
/// Fusion names write it as `neutral`; `""` and a missing `Culture` attribute
/// normalize to this value.
pub const NEUTRAL_CULTURE: &str = "neutral";

/// Four-part assembly version, ordered lexicographically by
/// `(major, minor, build, revision)`.
///
/// Missing trailing components parse as 0, so `"2.1"` equals `"2.1.0.0"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct AssemblyVersion {
    pub major: u16,
    pub minor: u16,
    pub build: u16,
    pub revision: u16,
}

impl AssemblyVersion {
    pub const ZERO: AssemblyVersion = AssemblyVersion {
        major: 0,
        minor: 0,
        build: 0,
        revision: 0,
    };

    pub fn new(major: u16, minor: u16, build: u16, revision: u16) -> Self {
        Self {
            major,
            minor,
            build,
            revision,
        }
    }
}

impl fmt::Display for AssemblyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.build, self.revision
        )
    }
}

impl FromStr for AssemblyVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let text = s.trim();
        if text.is_empty() {
            return Err(Error::FusionName {
                text: s.to_string(),
                message: "empty version".to_string(),
            });
        }
        let mut parts = [0u16; 4];
        let mut count = 0;
        for piece in text.split('.') {
            if count == 4 {
                return Err(Error::FusionName {
                    text: s.to_string(),
                    message: "version has more than four components".to_string(),
                });
            }
            parts[count] = piece.trim().parse::<u16>().map_err(|_| Error::FusionName {
                text: s.to_string(),
                message: format!("invalid version component '{piece}'"),
            })?;
            count += 1;
        }
        Ok(AssemblyVersion {
            major: parts[0],
            minor: parts[1],
            build: parts[2],
            revision: parts[3],
        })
    }
}

impl Serialize for AssemblyVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AssemblyVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(D::Error::custom)
    }
}

/// Processor architecture an assembly was built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProcessorArchitecture {
    /// No architecture constraint (also the parse result for an absent field).
    #[default]
    None,
    /// Architecture-neutral managed code.
    Msil,
    X86,
    Amd64,
    Ia64,
    Arm,
}

impl ProcessorArchitecture {
    /// True when a file of architecture `self` satisfies a build targeting
    /// `target`. MSIL images run anywhere; everything else must match.
    pub fn compatible_with(self, target: ProcessorArchitecture) -> bool {
        matches!(
            (self, target),
            (ProcessorArchitecture::None, _)
                | (ProcessorArchitecture::Msil, _)
                | (_, ProcessorArchitecture::None)
                | (_, ProcessorArchitecture::Msil)
        ) || self == target
    }
}

impl fmt::Display for ProcessorArchitecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcessorArchitecture::None => "None",
            ProcessorArchitecture::Msil => "MSIL",
            ProcessorArchitecture::X86 => "x86",
            ProcessorArchitecture::Amd64 => "AMD64",
            ProcessorArchitecture::Ia64 => "IA64",
            ProcessorArchitecture::Arm => "ARM",
        };
        f.write_str(name)
    }
}

impl FromStr for ProcessorArchitecture {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(ProcessorArchitecture::None),
            "msil" => Ok(ProcessorArchitecture::Msil),
            "x86" => Ok(ProcessorArchitecture::X86),
            "amd64" => Ok(ProcessorArchitecture::Amd64),
            "ia64" => Ok(ProcessorArchitecture::Ia64),
            "arm" => Ok(ProcessorArchitecture::Arm),
            other => Err(Error::FusionName {
                text: s.to_string(),
                message: format!("unknown processor architecture '{other}'"),
            }),
        }
    }
}

/// Eight-byte public key token, rendered as 16 lowercase hex characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKeyToken([u8; 8]);

impl PublicKeyToken {
    pub fn new(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

impl fmt::Display for PublicKeyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for PublicKeyToken {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let text = s.trim();
        if text.len() != 16 || !text.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::FusionName {
                text: s.to_string(),
                message: "public key token must be 16 hex characters".to_string(),
            });
        }
        let mut bytes = [0u8; 8];
        for (i, chunk) in text.as_bytes().chunks(2).enumerate() {
            let hex = std::str::from_utf8(chunk).expect("hex digits are ASCII");
            bytes[i] = u8::from_str_radix(hex, 16).expect("validated hex digits");
        }
        Ok(PublicKeyToken(bytes))
    }
}

impl Serialize for PublicKeyToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PublicKeyToken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(D::Error::custom)
    }
}

/// Which fields participate in an identity comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// All fields, including version.
    Strict,
    /// Simple name + culture + public key token; versions ignored.
    Simple,
}

/// The tuple identifying a versioned library build.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssemblyIdentity {
    /// Case-insensitive ASCII-safe simple name, stored as given.
    pub simple_name: String,
    /// Absent in weak references ("any version").
    pub version: Option<AssemblyVersion>,
    /// Normalized culture; [`NEUTRAL_CULTURE`] for the invariant culture.
    pub culture: String,
    /// Absent for simply-named assemblies.
    pub public_key_token: Option<PublicKeyToken>,
    pub processor_architecture: ProcessorArchitecture,
}

impl AssemblyIdentity {
    /// Identity with just a simple name; everything else defaulted.
    pub fn named(simple_name: impl Into<String>) -> Self {
        Self {
            simple_name: simple_name.into(),
            version: None,
            culture: NEUTRAL_CULTURE.to_string(),
            public_key_token: None,
            processor_architecture: ProcessorArchitecture::None,
        }
    }

    /// A strong-named identity carries a public key token.
    pub fn is_strong_named(&self) -> bool {
        self.public_key_token.is_some()
    }

    /// Version, with "missing" comparing as zero per the ordering contract.
    pub fn version_or_zero(&self) -> AssemblyVersion {
        self.version.unwrap_or(AssemblyVersion::ZERO)
    }

    /// Compare against `other` under the given mode.
    ///
    /// Simple-name comparison is case-insensitive. Under strict mode an
    /// absent version compares as `0.0.0.0`.
    pub fn matches(&self, other: &AssemblyIdentity, mode: MatchMode) -> bool {
        if !self.simple_name.eq_ignore_ascii_case(&other.simple_name) {
            return false;
        }
        if !self.culture.eq_ignore_ascii_case(&other.culture) {
            return false;
        }
        if self.public_key_token != other.public_key_token {
            return false;
        }
        match mode {
            MatchMode::Simple => true,
            MatchMode::Strict => self.version_or_zero() == other.version_or_zero(),
        }
    }

    /// Bucket key for simple-equality lookups.
    pub fn simple_key(&self) -> SimpleKey {
        SimpleKey {
            name: self.simple_name.to_ascii_lowercase(),
            culture: self.culture.to_ascii_lowercase(),
            public_key_token: self.public_key_token,
        }
    }

    /// Identity with the version replaced, used when a redirect fires.
    pub fn with_version(&self, version: AssemblyVersion) -> AssemblyIdentity {
        AssemblyIdentity {
            version: Some(version),
            ..self.clone()
        }
    }

    /// Partial identity (name, culture, PKT) with no version, as used in
    /// suggested binding redirects.
    pub fn partial(&self) -> AssemblyIdentity {
        AssemblyIdentity {
            version: None,
            processor_architecture: ProcessorArchitecture::None,
            ..self.clone()
        }
    }
}

impl Ord for AssemblyIdentity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.simple_name
            .to_ascii_lowercase()
            .cmp(&other.simple_name.to_ascii_lowercase())
            .then_with(|| self.version_or_zero().cmp(&other.version_or_zero()))
            .then_with(|| self.culture.cmp(&other.culture))
            .then_with(|| {
                self.public_key_token
                    .map(|t| *t.as_bytes())
                    .cmp(&other.public_key_token.map(|t| *t.as_bytes()))
            })
    }
}

impl PartialOrd for AssemblyIdentity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for AssemblyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.simple_name)?;
        if let Some(version) = self.version {
            write!(f, ", Version={version}")?;
        }
        write!(f, ", Culture={}", self.culture)?;
        match self.public_key_token {
            Some(token) => write!(f, ", PublicKeyToken={token}")?,
            None => f.write_str(", PublicKeyToken=null")?,
        }
        if self.processor_architecture != ProcessorArchitecture::None {
            write!(
                f,
                ", ProcessorArchitecture={}",
                self.processor_architecture
            )?;
        }
        Ok(())
    }
}

impl FromStr for AssemblyIdentity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut pieces = s.split(',');
        let name = pieces.next().unwrap_or("").trim();
        if name.is_empty() {
            return Err(Error::FusionName {
                text: s.to_string(),
                message: "missing simple name".to_string(),
            });
        }
        if name.contains('=') {
            return Err(Error::FusionName {
                text: s.to_string(),
                message: "simple name must come before attributes".to_string(),
            });
        }
        if !name.is_ascii() {
            return Err(Error::FusionName {
                text: s.to_string(),
                message: "simple name must be ASCII".to_string(),
            });
        }

        let mut identity = AssemblyIdentity::named(name);
        for piece in pieces {
            let (key, value) = piece.split_once('=').ok_or_else(|| Error::FusionName {
                text: s.to_string(),
                message: format!("attribute '{}' is not Key=Value", piece.trim()),
            })?;
            let value = value.trim();
            match key.trim().to_ascii_lowercase().as_str() {
                "version" => identity.version = Some(value.parse()?),
                "culture" => {
                    identity.culture = normalize_culture(value);
                }
                "publickeytoken" => {
                    identity.public_key_token = if value.eq_ignore_ascii_case("null") {
                        None
                    } else {
                        Some(value.to_ascii_lowercase().parse()?)
                    };
                }
                "processorarchitecture" => {
                    identity.processor_architecture = value.parse()?;
                }
                // Unknown attributes (Custom, ContentType, ...) are tolerated.
                _ => {}
            }
        }
        Ok(identity)
    }
}

impl Serialize for AssemblyIdentity {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AssemblyIdentity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(D::Error::custom)
    }
}

/// Normalize a culture attribute value: `""` and `neutral` (any case) become
/// [`NEUTRAL_CULTURE`]; anything else is lowercased.
pub fn normalize_culture(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(NEUTRAL_CULTURE) {
        NEUTRAL_CULTURE.to_string()
    } else {
        trimmed.to_ascii_lowercase()
    }
}

/// Simple-equality bucket: lowercased name + culture + public key token.
///
/// Used as the conflict-detection key and for redist list lookups. Handles
/// into the reference table are built from these rather than from owning
/// pointers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SimpleKey {
    name: String,
    culture: String,
    public_key_token: Option<PublicKeyToken>,
}

impl SimpleKey {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl PartialOrd for PublicKeyToken {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PublicKeyToken {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl fmt::Display for SimpleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, Culture={}", self.name, self.culture)?;
        match self.public_key_token {
            Some(token) => write!(f, ", PublicKeyToken={token}"),
            None => f.write_str(", PublicKeyToken=null"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_fusion_name() {
        let id: AssemblyIdentity =
            "System.Xml, Version=4.0.0.0, Culture=neutral, PublicKeyToken=b77a5c561934e089"
                .parse()
                .unwrap();
        assert_eq!(id.simple_name, "System.Xml");
        assert_eq!(id.version, Some(AssemblyVersion::new(4, 0, 0, 0)));
        assert_eq!(id.culture, NEUTRAL_CULTURE);
        assert!(id.is_strong_named());
    }

    #[test]
    fn test_parse_name_only() {
        let id: AssemblyIdentity = "MyLib".parse().unwrap();
        assert_eq!(id.simple_name, "MyLib");
        assert_eq!(id.version, None);
        assert_eq!(id.culture, NEUTRAL_CULTURE);
        assert!(!id.is_strong_named());
    }

    #[test]
    fn test_parse_null_token_means_absent() {
        let id: AssemblyIdentity = "A, PublicKeyToken=null".parse().unwrap();
        assert_eq!(id.public_key_token, None);
    }

    #[test]
    fn test_parse_uppercase_token_normalizes() {
        let id: AssemblyIdentity = "A, PublicKeyToken=B77A5C561934E089".parse().unwrap();
        assert_eq!(
            id.public_key_token.unwrap().to_string(),
            "b77a5c561934e089"
        );
    }

    #[test]
    fn test_parse_rejects_bad_token() {
        assert!("A, PublicKeyToken=xyz".parse::<AssemblyIdentity>().is_err());
        assert!("A, PublicKeyToken=b77a".parse::<AssemblyIdentity>().is_err());
    }

    #[test]
    fn test_parse_rejects_missing_name() {
        assert!("".parse::<AssemblyIdentity>().is_err());
        assert!(", Version=1.0.0.0".parse::<AssemblyIdentity>().is_err());
    }

    #[test]
    fn test_parse_ignores_unknown_attributes() {
        let id: AssemblyIdentity = "A, Version=1.0, Custom=null".parse().unwrap();
        assert_eq!(id.version, Some(AssemblyVersion::new(1, 0, 0, 0)));
    }

    #[test]
    fn test_version_missing_components_default_to_zero() {
        let v: AssemblyVersion = "2.1".parse().unwrap();
        assert_eq!(v, AssemblyVersion::new(2, 1, 0, 0));
    }

    #[test]
    fn test_version_ordering_is_lexicographic() {
        let low: AssemblyVersion = "1.9.9.9".parse().unwrap();
        let high: AssemblyVersion = "2.0.0.0".parse().unwrap();
        assert!(low < high);
        assert!(AssemblyVersion::new(1, 0, 0, 1) > AssemblyVersion::new(1, 0, 0, 0));
    }

    #[test]
    fn test_version_rejects_garbage() {
        assert!("1.2.3.4.5".parse::<AssemblyVersion>().is_err());
        assert!("a.b".parse::<AssemblyVersion>().is_err());
        assert!("".parse::<AssemblyVersion>().is_err());
    }

    #[test]
    fn test_simple_match_ignores_version() {
        let a: AssemblyIdentity = "Lib, Version=1.0.0.0, PublicKeyToken=b77a5c561934e089"
            .parse()
            .unwrap();
        let b: AssemblyIdentity = "lib, Version=2.0.0.0, PublicKeyToken=b77a5c561934e089"
            .parse()
            .unwrap();
        assert!(a.matches(&b, MatchMode::Simple));
        assert!(!a.matches(&b, MatchMode::Strict));
    }

    #[test]
    fn test_strict_match_requires_equal_version() {
        let a: AssemblyIdentity = "Lib, Version=1.0.0.0".parse().unwrap();
        let b: AssemblyIdentity = "Lib, Version=1.0.0.0".parse().unwrap();
        assert!(a.matches(&b, MatchMode::Strict));
    }

    #[test]
    fn test_match_distinguishes_culture() {
        let neutral: AssemblyIdentity = "Lib".parse().unwrap();
        let german: AssemblyIdentity = "Lib, Culture=de".parse().unwrap();
        assert!(!neutral.matches(&german, MatchMode::Simple));
    }

    #[test]
    fn test_simple_key_is_case_insensitive() {
        let a: AssemblyIdentity = "LibOne, Version=1.0.0.0".parse().unwrap();
        let b: AssemblyIdentity = "libone, Version=9.0.0.0".parse().unwrap();
        assert_eq!(a.simple_key(), b.simple_key());
    }

    #[test]
    fn test_display_round_trip() {
        let text = "System.Xml, Version=4.0.0.0, Culture=neutral, PublicKeyToken=b77a5c561934e089";
        let id: AssemblyIdentity = text.parse().unwrap();
        assert_eq!(id.to_string(), text);
        let reparsed: AssemblyIdentity = id.to_string().parse().unwrap();
        assert_eq!(id, reparsed);
    }

    #[test]
    fn test_display_weak_name_has_null_token() {
        let id = AssemblyIdentity::named("MyLib");
        assert_eq!(id.to_string(), "MyLib, Culture=neutral, PublicKeyToken=null");
    }

    #[test]
    fn test_arch_compatibility() {
        use ProcessorArchitecture::*;
        assert!(Msil.compatible_with(X86));
        assert!(X86.compatible_with(X86));
        assert!(!Amd64.compatible_with(X86));
        assert!(Amd64.compatible_with(None));
    }

    #[test]
    fn test_partial_identity_drops_version_and_arch() {
        let id: AssemblyIdentity =
            "Lib, Version=2.0.0.0, PublicKeyToken=b77a5c561934e089, ProcessorArchitecture=AMD64"
                .parse()
                .unwrap();
        let partial = id.partial();
        assert_eq!(partial.version, None);
        assert_eq!(partial.processor_architecture, ProcessorArchitecture::None);
        assert_eq!(partial.public_key_token, id.public_key_token);
    }
}
