//! Dataset and config files
//!
//! Two dataset shapes are accepted:
//!
//! ```json
//! { "ids": ["a", "b"], "features": [[0.0, 1.0], [2.0, 3.0]] }
//! { "triples": [["a", "b", 1.5]], "mirror": true }
//! ```
//!
//! `ids` is optional in both. Without it feature rows are named by their
//! index, and a distance table takes its ids from the triples in order of
//! first appearance.

use crate::error::{CliError, Result};
use embedview_core::{DistanceTable, DistanceTriple, EmbeddingInput, Entity, TsneConfig};
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};

/// Dataset file contents.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Dataset {
    Features {
        #[serde(default)]
        ids: Option<Vec<String>>,
        features: Vec<Vec<f64>>,
    },
    Distances {
        #[serde(default)]
        ids: Option<Vec<String>>,
        triples: Vec<(String, String, f64)>,
        #[serde(default = "default_mirror")]
        mirror: bool,
    },
}

fn default_mirror() -> bool {
    true
}

impl Dataset {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let dataset = Self::from_json(&json)?;
        info!("Loaded {} from {}", dataset.describe(), path.display());
        Ok(dataset)
    }

    fn describe(&self) -> String {
        match self {
            Self::Features { features, .. } => format!("{} feature rows", features.len()),
            Self::Distances { triples, .. } => format!("{} distance triples", triples.len()),
        }
    }

    /// Convert into engine input. Entity-level validation is left to the engine.
    pub fn into_input(self) -> Result<EmbeddingInput> {
        match self {
            Self::Features { ids, features } => {
                let ids = match ids {
                    Some(ids) if ids.len() != features.len() => {
                        return Err(CliError::Dataset(format!(
                            "{} ids for {} feature rows",
                            ids.len(),
                            features.len()
                        )))
                    }
                    Some(ids) => ids,
                    None => (0..features.len()).map(|i| i.to_string()).collect(),
                };
                Ok(EmbeddingInput::Features(
                    ids.into_iter()
                        .zip(features)
                        .map(|(id, row)| Entity::new(id, row))
                        .collect(),
                ))
            }
            Self::Distances {
                ids,
                triples,
                mirror,
            } => Ok(EmbeddingInput::Distances(DistanceTable {
                ids,
                triples: triples
                    .into_iter()
                    .map(|(first, second, distance)| DistanceTriple::new(first, second, distance))
                    .collect(),
                mirror,
            })),
        }
    }
}

/// Command-line overrides applied on top of the config file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub perplexity: Option<f64>,
    pub learning_rate: Option<f64>,
    pub max_iterations: Option<u64>,
    pub seed: Option<u64>,
}

impl ConfigOverrides {
    pub fn apply(&self, config: &mut TsneConfig) {
        if let Some(perplexity) = self.perplexity {
            config.perplexity = perplexity;
        }
        if let Some(learning_rate) = self.learning_rate {
            config.learning_rate = learning_rate;
        }
        if let Some(max_iterations) = self.max_iterations {
            config.max_iterations = max_iterations;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
    }
}

/// Read the config file (defaults when absent) and apply overrides.
pub fn load_config(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<TsneConfig> {
    let mut config = match path {
        Some(path) => {
            let json = std::fs::read_to_string(path)?;
            debug!("Read config from {}", path.display());
            serde_json::from_str(&json)?
        }
        None => TsneConfig::default(),
    };
    overrides.apply(&mut config);
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn features_with_ids() {
        let dataset =
            Dataset::from_json(r#"{"ids": ["a", "b"], "features": [[0, 1], [2, 3.5]]}"#).unwrap();
        let EmbeddingInput::Features(entities) = dataset.into_input().unwrap() else {
            panic!("expected features");
        };
        assert_eq!(
            entities,
            vec![Entity::new("a", vec![0.0, 1.0]), Entity::new("b", vec![2.0, 3.5])]
        );
    }

    #[test]
    fn features_without_ids_use_row_index() {
        let dataset = Dataset::from_json(r#"{"features": [[0], [1], [2]]}"#).unwrap();
        let EmbeddingInput::Features(entities) = dataset.into_input().unwrap() else {
            panic!("expected features");
        };
        let ids: Vec<&str> = entities.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["0", "1", "2"]);
    }

    #[test]
    fn id_count_must_match_rows() {
        let dataset = Dataset::from_json(r#"{"ids": ["a"], "features": [[0], [1]]}"#).unwrap();
        assert!(matches!(dataset.into_input(), Err(CliError::Dataset(_))));
    }

    #[test]
    fn triples_default_to_mirrored() {
        let dataset = Dataset::from_json(r#"{"triples": [["a", "b", 1.5], ["b", "c", 2]]}"#).unwrap();
        let EmbeddingInput::Distances(table) = dataset.into_input().unwrap() else {
            panic!("expected distances");
        };
        assert!(table.mirror);
        assert_eq!(table.ids, None);
        assert_eq!(table.triples[1], DistanceTriple::new("b", "c", 2.0));
    }

    #[test]
    fn triples_with_ids_and_no_mirror() {
        let dataset = Dataset::from_json(
            r#"{"ids": ["x", "y"], "triples": [["x", "y", 1], ["y", "x", 1]], "mirror": false}"#,
        )
        .unwrap();
        assert_eq!(
            dataset,
            Dataset::Distances {
                ids: Some(vec!["x".into(), "y".into()]),
                triples: vec![("x".into(), "y".into(), 1.0), ("y".into(), "x".into(), 1.0)],
                mirror: false,
            }
        );
    }

    #[test]
    fn unknown_shape_is_rejected() {
        assert!(matches!(
            Dataset::from_json(r#"{"points": []}"#),
            Err(CliError::Serialization(_))
        ));
    }

    #[test]
    fn overrides_win_over_defaults() {
        let overrides = ConfigOverrides {
            perplexity: Some(12.0),
            seed: Some(9),
            ..Default::default()
        };
        let config = load_config(None, &overrides).unwrap();
        assert_eq!(config.perplexity, 12.0);
        assert_eq!(config.seed, Some(9));
        assert_eq!(config.learning_rate, TsneConfig::default().learning_rate);
    }

    #[test]
    fn invalid_override_is_rejected() {
        let overrides = ConfigOverrides {
            learning_rate: Some(0.0),
            ..Default::default()
        };
        assert!(matches!(
            load_config(None, &overrides),
            Err(CliError::Engine(_))
        ));
    }
}
