use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;

/// Granularity at which targets are identified in the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum InputTarget {
    File,
    Sequence,
}

impl fmt::Display for InputTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputTarget::File => write!(f, "file"),
            InputTarget::Sequence => write!(f, "sequence"),
        }
    }
}

impl FromStr for InputTarget {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "file" => Ok(InputTarget::File),
            "sequence" => Ok(InputTarget::Sequence),
            _ => Err(KiraError::InvalidInputTarget(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TaxonomySource {
    Ncbi,
    Gtdb,
    Skip,
}

impl TaxonomySource {
    pub fn is_skip(&self) -> bool {
        matches!(self, TaxonomySource::Skip)
    }
}

impl fmt::Display for TaxonomySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaxonomySource::Ncbi => write!(f, "ncbi"),
            TaxonomySource::Gtdb => write!(f, "gtdb"),
            TaxonomySource::Skip => write!(f, "skip"),
        }
    }
}

impl FromStr for TaxonomySource {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "ncbi" => Ok(TaxonomySource::Ncbi),
            "gtdb" => Ok(TaxonomySource::Gtdb),
            "skip" => Ok(TaxonomySource::Skip),
            _ => Err(KiraError::InvalidTaxonomy(value.to_string())),
        }
    }
}

/// Which column of the metadata table becomes the database bin.
///
/// `Assembly` and `Custom` group by specialization, `Leaves` keeps the
/// resolved taxonomic node, and any other value is a taxonomic rank the
/// nodes are projected to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Level {
    Leaves,
    Assembly,
    Custom,
    Rank(String),
}

impl Level {
    pub fn is_specialization(&self) -> bool {
        matches!(self, Level::Assembly | Level::Custom)
    }

    pub fn rank(&self) -> Option<&str> {
        match self {
            Level::Rank(rank) => Some(rank.as_str()),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Level::Leaves => "leaves",
            Level::Assembly => "assembly",
            Level::Custom => "custom",
            Level::Rank(rank) => rank.as_str(),
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Level {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        if normalized.is_empty() || normalized.chars().any(char::is_whitespace) {
            return Err(KiraError::InvalidLevel(value.to_string()));
        }
        Ok(match normalized {
            "leaves" => Level::Leaves,
            "assembly" => Level::Assembly,
            "custom" => Level::Custom,
            rank => Level::Rank(rank.to_string()),
        })
    }
}

impl TryFrom<String> for Level {
    type Error = KiraError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Level> for String {
    fn from(value: Level) -> Self {
        value.as_str().to_string()
    }
}

/// Column of a metadata row used as the externally visible bin identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinColumn {
    Target,
    Node,
    Specialization,
}

impl BinColumn {
    pub fn for_level(level: Option<&Level>) -> Self {
        match level {
            Some(level) if level.is_specialization() => BinColumn::Specialization,
            Some(_) => BinColumn::Node,
            None => BinColumn::Target,
        }
    }
}

/// Workflow owning a set of phase markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Build,
    Update,
    BuildCustom,
}

impl Call {
    pub fn as_str(&self) -> &'static str {
        match self {
            Call::Build => "build",
            Call::Update => "update",
            Call::BuildCustom => "build_custom",
        }
    }
}

impl fmt::Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Download,
    Parse,
    Run,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Download, Phase::Parse, Phase::Run];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Download => "download",
            Phase::Parse => "parse",
            Phase::Run => "run",
        }
    }

    pub fn marker_name(&self, call: Call) -> String {
        format!("{}_{}", call.as_str(), self.as_str())
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_level_reserved_and_rank() {
        assert_eq!("leaves".parse::<Level>().unwrap(), Level::Leaves);
        assert_eq!("assembly".parse::<Level>().unwrap(), Level::Assembly);
        assert_eq!("custom".parse::<Level>().unwrap(), Level::Custom);
        assert_eq!(
            "genus".parse::<Level>().unwrap(),
            Level::Rank("genus".to_string())
        );
    }

    #[test]
    fn parse_level_invalid() {
        let err = "".parse::<Level>().unwrap_err();
        assert_matches!(err, KiraError::InvalidLevel(_));
    }

    #[test]
    fn bin_column_routing() {
        assert_eq!(BinColumn::for_level(None), BinColumn::Target);
        assert_eq!(
            BinColumn::for_level(Some(&Level::Assembly)),
            BinColumn::Specialization
        );
        assert_eq!(BinColumn::for_level(Some(&Level::Leaves)), BinColumn::Node);
        assert_eq!(
            BinColumn::for_level(Some(&Level::Rank("species".to_string()))),
            BinColumn::Node
        );
    }

    #[test]
    fn marker_names() {
        assert_eq!(Phase::Parse.marker_name(Call::BuildCustom), "build_custom_parse");
        assert_eq!(Phase::Download.marker_name(Call::Update), "update_download");
    }
}
