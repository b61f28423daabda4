//! Shared primitive types used across the entire engine.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One calendar day. The engine never works below daily granularity.
pub type ScoreDate = NaiveDate;

/// The canonical run identifier. Every persisted row carries one.
pub type RunId = String;

/// Date format used for every TEXT date column and every JSON payload.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// One of the four independent operational dimensions.
/// NEVER reorder: `index()` feeds the synthetic collector's seed derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pillar {
    Finance,
    Health,
    Ai,
    Menu,
}

impl Pillar {
    pub const ALL: [Pillar; 4] = [Pillar::Finance, Pillar::Health, Pillar::Ai, Pillar::Menu];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Finance => "finance",
            Self::Health  => "health",
            Self::Ai      => "ai",
            Self::Menu    => "menu",
        }
    }

    pub fn index(&self) -> u64 {
        match self {
            Self::Finance => 0,
            Self::Health  => 1,
            Self::Ai      => 2,
            Self::Menu    => 3,
        }
    }
}

impl fmt::Display for Pillar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Pillar {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "finance" => Ok(Self::Finance),
            "health"  => Ok(Self::Health),
            "ai"      => Ok(Self::Ai),
            "menu"    => Ok(Self::Menu),
            other     => Err(format!("unknown pillar '{other}'")),
        }
    }
}

/// Anything with a persisted trend: a single pillar or the composite.
/// Serialized as its name: "finance", ..., "composite".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Series {
    Pillar(Pillar),
    Composite,
}

impl Series {
    pub const ALL: [Series; 5] = [
        Series::Pillar(Pillar::Finance),
        Series::Pillar(Pillar::Health),
        Series::Pillar(Pillar::Ai),
        Series::Pillar(Pillar::Menu),
        Series::Composite,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Pillar(p) => p.name(),
            Self::Composite => "composite",
        }
    }
}

impl fmt::Display for Series {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Series {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "composite" {
            return Ok(Self::Composite);
        }
        s.parse::<Pillar>().map(Self::Pillar)
    }
}

impl TryFrom<String> for Series {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Series> for String {
    fn from(s: Series) -> Self {
        s.name().to_string()
    }
}

impl From<Pillar> for Series {
    fn from(p: Pillar) -> Self {
        Self::Pillar(p)
    }
}

/// Locales the insight generator renders. The engine is bilingual.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Locale {
    #[default]
    En,
    Es,
}

impl Locale {
    pub const ALL: [Locale; 2] = [Locale::En, Locale::Es];

    pub fn code(&self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Es => "es",
        }
    }
}

impl FromStr for Locale {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "en" => Ok(Self::En),
            "es" => Ok(Self::Es),
            other => Err(format!("unsupported locale '{other}'")),
        }
    }
}

pub fn format_date(date: ScoreDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn parse_date(s: &str) -> Result<ScoreDate, chrono::ParseError> {
    NaiveDate::parse_from_str(s, DATE_FORMAT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn series_names_round_trip() {
        for series in Series::ALL {
            assert_eq!(series.name().parse::<Series>().unwrap(), series);
        }
    }

    #[test]
    fn unknown_pillar_is_rejected() {
        assert!("inventory".parse::<Pillar>().is_err());
    }
}
