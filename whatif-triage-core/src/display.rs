// display configuration - resource-type display names and report filtering

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Default, Deserialize)]
struct DisplayConfigFile {
    #[serde(default)]
    resource_type_display_names: BTreeMap<String, String>,
    #[serde(default)]
    filtered_resource_types: Vec<String>,
}

/// display names and the resource-type exclusion set for compact reports
///
/// a missing or malformed file degrades to an empty configuration; the run
/// continues with raw type names and no filtering.
#[derive(Debug, Default)]
pub struct DisplayConfig {
    display_names: BTreeMap<String, String>,
    filtered_types: BTreeSet<String>,
}

impl DisplayConfig {
    /// load the display configuration; never fails
    pub fn load(config_file: &Path) -> Self {
        let raw: DisplayConfigFile = match fs::read_to_string(config_file) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(data) => data,
                Err(e) => {
                    warn!("failed to parse display config {}: {e}", config_file.display());
                    DisplayConfigFile::default()
                }
            },
            Err(e) => {
                warn!("failed to load display config {}: {e}", config_file.display());
                DisplayConfigFile::default()
            }
        };

        DisplayConfig {
            display_names: raw.resource_type_display_names,
            // the file stores lower-cased type strings; normalize anyway
            filtered_types: raw
                .filtered_resource_types
                .iter()
                .map(|t| t.to_lowercase())
                .collect(),
        }
    }

    /// display name for a resource type, falling back to the raw type
    pub fn display_name<'a>(&'a self, resource_type: &'a str) -> &'a str {
        self.display_names
            .get(resource_type)
            .map(String::as_str)
            .unwrap_or(resource_type)
    }

    /// whether a resource type is excluded from compact reports
    pub fn is_filtered(&self, resource_type: &str) -> bool {
        self.filtered_types.contains(&resource_type.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_empty_config() {
        let config = DisplayConfig::load(Path::new("/nonexistent/display_config.json"));
        assert_eq!(config.display_name("Microsoft.KeyVault/vaults"), "Microsoft.KeyVault/vaults");
        assert!(!config.is_filtered("microsoft.authorization/roleassignments"));
    }

    #[test]
    fn loads_names_and_filters() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("display_config.json");
        std::fs::write(
            &path,
            r#"{
                "resource_type_display_names": {
                    "Microsoft.ContainerService/managedClusters": "AKS Managed Cluster"
                },
                "filtered_resource_types": ["microsoft.authorization/roleassignments"]
            }"#,
        )
        .unwrap();

        let config = DisplayConfig::load(&path);
        assert_eq!(
            config.display_name("Microsoft.ContainerService/managedClusters"),
            "AKS Managed Cluster"
        );
        assert!(config.is_filtered("Microsoft.Authorization/roleAssignments"));
        assert!(!config.is_filtered("Microsoft.KeyVault/vaults"));
    }
}
