// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Export configuration.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::source::Category;

/// How source groups are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupMode {
    /// A plain group; members keep their spatial container.
    #[default]
    Collection,
    /// An element assembly that owns its members.
    Aggregate,
}

impl std::str::FromStr for GroupMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "collection" => Ok(GroupMode::Collection),
            "aggregate" => Ok(GroupMode::Aggregate),
            other => Err(format!("unknown group mode: {other}")),
        }
    }
}

/// Export configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Categories that are never exported.
    pub excluded_categories: Vec<Category>,
    /// Export elements hidden in the export view.
    pub export_hidden: bool,
    /// Elevation tolerance when matching levels, in model units.
    pub level_tolerance: f64,
    /// Create a building even if the model has no storey-bearing level.
    pub building_without_storeys: bool,
    /// Parameter naming a target entity kind, or `DontExport`.
    pub export_as_parameter: String,
    /// Parameter holding the system name of MEP and cable elements.
    pub system_parameter: String,
    /// Parameter holding the story count of stacked stairs and ramps.
    pub number_of_stories_parameter: String,
    /// Parameter holding the height of one stacked flight.
    pub flight_height_parameter: String,
    pub group_mode: GroupMode,
    /// Project name used when the model has none.
    pub project_name: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            excluded_categories: Vec::new(),
            export_hidden: false,
            level_tolerance: 1e-3,
            building_without_storeys: true,
            export_as_parameter: "IfcExportAs".into(),
            system_parameter: "System Name".into(),
            number_of_stories_parameter: "NumberOfStories".into(),
            flight_height_parameter: "FlightHeight".into(),
            group_mode: GroupMode::Collection,
            project_name: "Project".into(),
        }
    }
}

impl ExportConfig {
    /// Load configuration from `IFC_EXPORT_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            excluded_categories: var("IFC_EXPORT_EXCLUDED_CATEGORIES")
                .map(|list| {
                    list.split(',')
                        .filter(|s| !s.trim().is_empty())
                        .filter_map(|s| match s.parse() {
                            Ok(category) => Some(category),
                            Err(err) => {
                                tracing::warn!(error = %err, "Ignoring excluded category");
                                None
                            }
                        })
                        .collect()
                })
                .unwrap_or(defaults.excluded_categories),
            export_hidden: var("IFC_EXPORT_HIDDEN")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.export_hidden),
            level_tolerance: var("IFC_EXPORT_LEVEL_TOLERANCE")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.level_tolerance),
            building_without_storeys: var("IFC_EXPORT_BUILDING_WITHOUT_STOREYS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.building_without_storeys),
            export_as_parameter: var("IFC_EXPORT_EXPORT_AS_PARAMETER")
                .unwrap_or(defaults.export_as_parameter),
            system_parameter: var("IFC_EXPORT_SYSTEM_PARAMETER")
                .unwrap_or(defaults.system_parameter),
            number_of_stories_parameter: var("IFC_EXPORT_NUMBER_OF_STORIES_PARAMETER")
                .unwrap_or(defaults.number_of_stories_parameter),
            flight_height_parameter: var("IFC_EXPORT_FLIGHT_HEIGHT_PARAMETER")
                .unwrap_or(defaults.flight_height_parameter),
            group_mode: var("IFC_EXPORT_GROUP_MODE")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.group_mode),
            project_name: var("IFC_EXPORT_PROJECT_NAME").unwrap_or(defaults.project_name),
        }
    }

    /// Parses a JSON configuration; absent fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn is_excluded(&self, category: Category) -> bool {
        self.excluded_categories.contains(&category)
    }
}
