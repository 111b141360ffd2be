#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Incident records, time-of-day buckets, and incident filters.
//!
//! Incidents are stored with the shift label of the source dataset
//! (`nuit`, `jour`, `soir`). The API speaks a different vocabulary
//! (`morning`, `day`, `evening`); [`translate`] maps between the two and
//! [`FilterSignature`] is the normalized form every filter is reduced to
//! before it touches a store or a cache.

use chrono::{DateTime, Utc};
use envwatch_geography_models::Coordinate;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Time-of-day bucket an incident was recorded in.
///
/// The `strum` representation is the stored label used by the source
/// dataset; the `serde` representation is the external API vocabulary.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
pub enum TimeBucket {
    /// 00:00 to 08:00
    #[strum(serialize = "nuit")]
    Morning,
    /// 08:00 to 16:00
    #[strum(serialize = "jour")]
    Day,
    /// 16:00 to 24:00
    #[strum(serialize = "soir")]
    Evening,
}

impl TimeBucket {
    /// The external name of this bucket (`morning`, `day`, `evening`).
    #[must_use]
    pub const fn external_name(self) -> &'static str {
        match self {
            Self::Morning => "morning",
            Self::Day => "day",
            Self::Evening => "evening",
        }
    }

    /// Parses a stored label as written by the ingestion step.
    ///
    /// # Errors
    ///
    /// Returns [`UnrecognizedTimeBucket`] if the label is not one of the
    /// stored labels.
    pub fn from_stored_label(label: &str) -> Result<Self, UnrecognizedTimeBucket> {
        label
            .trim()
            .parse()
            .map_err(|_| UnrecognizedTimeBucket::new(label))
    }
}

/// Error returned when a time-of-day token matches no bucket.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized time bucket {token:?}: expected one of morning, day, evening")]
pub struct UnrecognizedTimeBucket {
    /// The token as supplied by the caller.
    pub token: String,
}

impl UnrecognizedTimeBucket {
    fn new(token: &str) -> Self {
        Self {
            token: token.to_string(),
        }
    }
}

/// Translates an external time-of-day token into a [`TimeBucket`].
///
/// Accepts `morning`, `day` and `evening` (case-insensitive, surrounding
/// whitespace ignored). The stored labels `nuit`, `jour` and `soir` are
/// accepted too, since older clients filter on the raw label.
///
/// # Errors
///
/// Returns [`UnrecognizedTimeBucket`] for any other token. Callers must
/// surface this; an unknown token never degrades to "no filter".
pub fn translate(external: &str) -> Result<TimeBucket, UnrecognizedTimeBucket> {
    let token = external.trim().to_ascii_lowercase();
    match token.as_str() {
        "morning" => Ok(TimeBucket::Morning),
        "day" => Ok(TimeBucket::Day),
        "evening" => Ok(TimeBucket::Evening),
        other => other
            .parse()
            .map_err(|_| UnrecognizedTimeBucket::new(external)),
    }
}

/// A geolocated incident record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    /// Source category label, matched exactly by filters.
    pub category: String,
    /// When the incident occurred.
    pub occurred_at: DateTime<Utc>,
    /// Time-of-day bucket assigned at ingestion.
    pub time_bucket: TimeBucket,
    /// Where the incident occurred.
    pub location: Coordinate,
}

/// Normalized incident filter.
///
/// Two signatures are equal iff both the bucket and the category are equal.
/// The unfiltered signature is the default value.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSignature {
    /// Restrict to incidents in this bucket.
    pub time_bucket: Option<TimeBucket>,
    /// Restrict to incidents with exactly this category (case-sensitive).
    pub category: Option<String>,
}

impl FilterSignature {
    /// The signature that matches every incident.
    #[must_use]
    pub const fn unfiltered() -> Self {
        Self {
            time_bucket: None,
            category: None,
        }
    }

    /// Builds a signature from raw request tokens.
    ///
    /// Empty or whitespace-only tokens are treated as absent. The category
    /// is otherwise kept verbatim.
    ///
    /// # Errors
    ///
    /// Returns [`UnrecognizedTimeBucket`] if the bucket token does not
    /// translate.
    pub fn from_tokens(
        bucket: Option<&str>,
        category: Option<&str>,
    ) -> Result<Self, UnrecognizedTimeBucket> {
        let time_bucket = bucket
            .filter(|b| !b.trim().is_empty())
            .map(translate)
            .transpose()?;
        let category = category
            .filter(|c| !c.trim().is_empty())
            .map(str::to_string);

        Ok(Self {
            time_bucket,
            category,
        })
    }

    /// Whether this is the unfiltered signature.
    #[must_use]
    pub const fn is_unfiltered(&self) -> bool {
        self.time_bucket.is_none() && self.category.is_none()
    }

    /// Whether `incident` passes this filter.
    #[must_use]
    pub fn matches(&self, incident: &Incident) -> bool {
        self.time_bucket.is_none_or(|b| b == incident.time_bucket)
            && self
                .category
                .as_deref()
                .is_none_or(|c| c == incident.category)
    }
}

impl std::fmt::Display for FilterSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bucket = self.time_bucket.map_or("*", TimeBucket::external_name);
        let category = self.category.as_deref().unwrap_or("*");
        write!(f, "bucket={bucket} category={category}")
    }
}
