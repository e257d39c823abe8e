//! Distance resolution
//!
//! Normalizes the two supported inputs into one dense symmetric matrix:
//!
//! - feature vectors, compared by Euclidean distance
//! - a table of `(entity, entity, distance)` rows
//!
//! All validation happens here, before any affinity or optimizer state exists.

use crate::error::{EmbedError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Smallest dataset the engine accepts.
pub const MIN_ENTITIES: usize = 4;

/// An entity with its feature vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub features: Vec<f64>,
}

impl Entity {
    pub fn new(id: impl Into<String>, features: Vec<f64>) -> Self {
        Self {
            id: id.into(),
            features,
        }
    }
}

/// One row of a distance table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistanceTriple {
    pub first: String,
    pub second: String,
    pub distance: f64,
}

impl DistanceTriple {
    pub fn new(first: impl Into<String>, second: impl Into<String>, distance: f64) -> Self {
        Self {
            first: first.into(),
            second: second.into(),
            distance,
        }
    }
}

/// Pairwise distances supplied directly by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistanceTable {
    /// Optional row order; ids not listed here follow in order of first appearance
    #[serde(default)]
    pub ids: Option<Vec<String>>,
    pub triples: Vec<DistanceTriple>,
    /// When true a single row covers both directions of its pair.
    /// When false every ordered pair must be present.
    #[serde(default = "default_mirror")]
    pub mirror: bool,
}

fn default_mirror() -> bool {
    true
}

impl DistanceTable {
    pub fn new(triples: Vec<DistanceTriple>) -> Self {
        Self {
            ids: None,
            triples,
            mirror: true,
        }
    }
}

/// Input accepted by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingInput {
    Features(Vec<Entity>),
    Distances(DistanceTable),
}

/// Mean and variance of the off-diagonal distances in one row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RowStats {
    pub mean: f64,
    pub variance: f64,
}

/// Dense symmetric distance matrix with zero diagonal.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceMatrix {
    ids: Vec<String>,
    values: Vec<f64>,
}

impl DistanceMatrix {
    /// Resolve any supported input into a distance matrix.
    pub fn resolve(input: &EmbeddingInput, tolerance: f64) -> Result<Self> {
        match input {
            EmbeddingInput::Features(entities) => Self::from_features(entities),
            EmbeddingInput::Distances(table) => Self::from_table(table, tolerance),
        }
    }

    /// Pairwise Euclidean distances between feature vectors.
    pub fn from_features(entities: &[Entity]) -> Result<Self> {
        check_count(entities.len())?;

        let mut seen = HashMap::with_capacity(entities.len());
        for (i, entity) in entities.iter().enumerate() {
            if seen.insert(entity.id.as_str(), i).is_some() {
                return Err(EmbedError::DuplicateEntity(entity.id.clone()));
            }
        }

        let dims = entities[0].features.len();
        for entity in entities {
            if entity.features.len() != dims || dims == 0 {
                return Err(EmbedError::DimensionMismatch {
                    entity: entity.id.clone(),
                    expected: dims.max(1),
                    found: entity.features.len(),
                });
            }
            if entity.features.iter().any(|v| !v.is_finite()) {
                return Err(EmbedError::NonFiniteDistance {
                    first: entity.id.clone(),
                    second: entity.id.clone(),
                });
            }
        }

        let n = entities.len();
        let mut values = vec![0.0; n * n];
        for i in 0..n {
            for j in (i + 1)..n {
                let sq: f64 = entities[i]
                    .features
                    .iter()
                    .zip(&entities[j].features)
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum();
                let d = sq.sqrt();
                if !d.is_finite() {
                    return Err(EmbedError::NonFiniteDistance {
                        first: entities[i].id.clone(),
                        second: entities[j].id.clone(),
                    });
                }
                values[i * n + j] = d;
                values[j * n + i] = d;
            }
        }

        Ok(Self {
            ids: entities.iter().map(|e| e.id.clone()).collect(),
            values,
        })
    }

    /// Complete and validate a table of distance rows.
    pub fn from_table(table: &DistanceTable, tolerance: f64) -> Result<Self> {
        let mut ids: Vec<String> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        if let Some(listed) = &table.ids {
            for id in listed {
                if index.contains_key(id) {
                    return Err(EmbedError::DuplicateEntity(id.clone()));
                }
                index.insert(id.clone(), ids.len());
                ids.push(id.clone());
            }
        }
        for triple in &table.triples {
            for id in [&triple.first, &triple.second] {
                if !index.contains_key(id) {
                    index.insert(id.clone(), ids.len());
                    ids.push(id.clone());
                }
            }
        }

        let n = ids.len();
        check_count(n)?;

        // Ordered-pair slots as supplied; completed below.
        let mut supplied: Vec<Option<f64>> = vec![None; n * n];
        for triple in &table.triples {
            let i = index[&triple.first];
            let j = index[&triple.second];
            let d = triple.distance;

            if !d.is_finite() {
                return Err(EmbedError::NonFiniteDistance {
                    first: triple.first.clone(),
                    second: triple.second.clone(),
                });
            }
            if d < 0.0 {
                return Err(EmbedError::NegativeDistance {
                    first: triple.first.clone(),
                    second: triple.second.clone(),
                    distance: d,
                });
            }
            if i == j {
                if !within(d, 0.0, tolerance) {
                    return Err(EmbedError::InconsistentDistance {
                        first: triple.first.clone(),
                        second: triple.second.clone(),
                        forward: d,
                        backward: 0.0,
                    });
                }
                continue;
            }

            let slot = &mut supplied[i * n + j];
            *slot = match *slot {
                None => Some(d),
                Some(prev) if within(prev, d, tolerance) => Some((prev + d) / 2.0),
                Some(prev) => {
                    return Err(EmbedError::InconsistentDistance {
                        first: triple.first.clone(),
                        second: triple.second.clone(),
                        forward: prev,
                        backward: d,
                    })
                }
            };
        }

        let mut values = vec![0.0; n * n];
        for i in 0..n {
            for j in (i + 1)..n {
                let d = match (supplied[i * n + j], supplied[j * n + i]) {
                    (Some(forward), Some(backward)) => {
                        if !within(forward, backward, tolerance) {
                            return Err(EmbedError::InconsistentDistance {
                                first: ids[i].clone(),
                                second: ids[j].clone(),
                                forward,
                                backward,
                            });
                        }
                        (forward + backward) / 2.0
                    }
                    (Some(d), None) | (None, Some(d)) if table.mirror => d,
                    _ => {
                        return Err(EmbedError::IncompleteDistanceTable {
                            first: ids[i].clone(),
                            second: ids[j].clone(),
                        })
                    }
                };
                values[i * n + j] = d;
                values[j * n + i] = d;
            }
        }

        Ok(Self { ids, values })
    }

    /// Number of entities.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Entity ids in row order.
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[i * self.len() + j]
    }

    pub fn row(&self, i: usize) -> &[f64] {
        let n = self.len();
        &self.values[i * n..(i + 1) * n]
    }

    /// Mean and variance of row `i`, excluding the diagonal.
    pub fn row_stats(&self, i: usize) -> RowStats {
        let others = self
            .row(i)
            .iter()
            .enumerate()
            .filter(|&(j, _)| j != i)
            .map(|(_, &d)| d);
        let count = (self.len() - 1) as f64;
        let mean = others.clone().sum::<f64>() / count;
        let variance = others.map(|d| (d - mean) * (d - mean)).sum::<f64>() / count;
        RowStats { mean, variance }
    }
}

fn check_count(found: usize) -> Result<()> {
    if found < MIN_ENTITIES {
        return Err(EmbedError::InsufficientData {
            required: MIN_ENTITIES,
            found,
        });
    }
    Ok(())
}

fn within(a: f64, b: f64, tolerance: f64) -> bool {
    (a - b).abs() <= tolerance * a.abs().max(b.abs()).max(1.0)
}
