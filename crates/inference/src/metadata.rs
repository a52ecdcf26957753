//! Metadata feature encoding
//!
//! Turns a [`MetadataRecord`] into the feature vector the metadata branch of
//! the network was trained on: one-hot columns for the categorical fields,
//! followed by the raw age, passed through the fitted scaler.
//!
//! The encoder and scaler are fitted offline and exported as JSON:
//!
//! ```json
//! {"columns": ["sex", "dx_type", "localization"],
//!  "categories": [["female", "male", "unknown"], ["confocal", "histo"], ["back", "face"]]}
//! ```
//!
//! ```json
//! {"kind": "standard", "mean": [0.4, 0.6, ...], "scale": [0.49, 0.49, ...]}
//! ```

use candle_core::{Device, Tensor};
use serde::{Deserialize, Serialize};
use skinlens_shared::{Result, SkinlensError};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Categorical columns in the order the encoder was fitted on
pub const CATEGORICAL_COLUMNS: [&str; 3] = ["sex", "dx_type", "localization"];

/// Name of the numeric column appended after the one-hot block
pub const AGE_COLUMN: &str = "age";

/// Structured patient metadata submitted with an image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    /// Patient sex
    pub sex: String,
    /// How the diagnosis was established
    pub dx_type: String,
    /// Body site of the lesion
    pub localization: String,
    /// Patient age in years
    pub age: f64,
}

impl MetadataRecord {
    /// Builds a record, rejecting ages that are negative or not finite
    pub fn new(
        sex: impl Into<String>,
        dx_type: impl Into<String>,
        localization: impl Into<String>,
        age: f64,
    ) -> Result<Self> {
        if !age.is_finite() || age < 0.0 {
            return Err(SkinlensError::validation(format!(
                "`age` must be a non-negative number, got {}",
                age
            )));
        }

        Ok(Self {
            sex: sex.into(),
            dx_type: dx_type.into(),
            localization: localization.into(),
            age,
        })
    }

    fn categorical_values(&self) -> [&str; 3] {
        [
            self.sex.as_str(),
            self.dx_type.as_str(),
            self.localization.as_str(),
        ]
    }
}

/// Parses the textual `age` form field
///
/// Surrounding whitespace is ignored. Range checks happen in
/// [`MetadataRecord::new`].
pub fn parse_age(raw: &str) -> Result<f64> {
    raw.trim().parse::<f64>().map_err(|_| {
        SkinlensError::validation(format!("could not convert `age` to a number: '{}'", raw))
    })
}

/// Fitted one-hot encoder for the three categorical columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OneHotEncoder {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    columns: Option<Vec<String>>,
    categories: Vec<Vec<String>>,
}

impl OneHotEncoder {
    /// Creates an encoder from per-column category lists in fitted order
    pub fn new(categories: Vec<Vec<String>>) -> Result<Self> {
        let encoder = Self {
            columns: None,
            categories,
        };
        encoder.validate()?;
        Ok(encoder)
    }

    /// Loads an encoder exported as JSON
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            SkinlensError::configuration(
                format!("Failed to read encoder file {}", path.display()),
                Some(Box::new(e)),
            )
        })?;

        let encoder: Self = serde_json::from_str(&content).map_err(|e| {
            SkinlensError::model(
                format!("Failed to parse encoder file {}", path.display()),
                Some(Box::new(e)),
            )
        })?;
        encoder.validate()?;
        Ok(encoder)
    }

    fn validate(&self) -> Result<()> {
        if let Some(columns) = &self.columns {
            if columns.iter().map(String::as_str).ne(CATEGORICAL_COLUMNS) {
                return Err(SkinlensError::model(
                    format!(
                        "Encoder columns {:?} do not match expected {:?}",
                        columns, CATEGORICAL_COLUMNS
                    ),
                    None,
                ));
            }
        }

        if self.categories.len() != CATEGORICAL_COLUMNS.len() {
            return Err(SkinlensError::model(
                format!(
                    "Encoder has {} category lists, expected {}",
                    self.categories.len(),
                    CATEGORICAL_COLUMNS.len()
                ),
                None,
            ));
        }

        for (column, categories) in CATEGORICAL_COLUMNS.iter().zip(&self.categories) {
            if categories.is_empty() {
                return Err(SkinlensError::model(
                    format!("Encoder column `{}` has no categories", column),
                    None,
                ));
            }
            let mut seen = HashSet::new();
            if let Some(duplicate) = categories.iter().find(|c| !seen.insert(c.as_str())) {
                return Err(SkinlensError::model(
                    format!(
                        "Encoder column `{}` lists category `{}` twice",
                        column, duplicate
                    ),
                    None,
                ));
            }
        }
        Ok(())
    }

    /// Number of one-hot columns produced
    pub fn width(&self) -> usize {
        self.categories.iter().map(Vec::len).sum()
    }

    /// Known categories of one column, in fitted order
    pub fn categories(&self, column: usize) -> Option<&[String]> {
        self.categories.get(column).map(Vec::as_slice)
    }

    /// Output column names such as `sex_male`
    pub fn feature_names(&self) -> Vec<String> {
        CATEGORICAL_COLUMNS
            .iter()
            .zip(&self.categories)
            .flat_map(|(column, categories)| {
                categories
                    .iter()
                    .map(move |category| format!("{}_{}", column, category))
            })
            .collect()
    }

    /// Appends the one-hot encoding of `record` to `out`
    ///
    /// Matching is exact and case-sensitive. `out` is left untouched when a
    /// value is unknown.
    pub fn transform_into(&self, record: &MetadataRecord, out: &mut Vec<f64>) -> Result<()> {
        let mut hot = [0usize; 3];
        for (slot, ((column, value), categories)) in hot.iter_mut().zip(
            CATEGORICAL_COLUMNS
                .iter()
                .zip(record.categorical_values())
                .zip(&self.categories),
        ) {
            *slot = categories
                .iter()
                .position(|category| category == value)
                .ok_or_else(|| {
                    SkinlensError::validation(format!(
                        "Found unknown category '{}' in column `{}` during transform",
                        value, column
                    ))
                })?;
        }

        for (index, categories) in hot.iter().zip(&self.categories) {
            out.extend((0..categories.len()).map(|i| if i == *index { 1.0 } else { 0.0 }));
        }
        Ok(())
    }
}

/// Fitted numeric scaler applied to the concatenated feature vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeatureScaler {
    /// `(x - mean) / scale`; either part may be absent
    Standard {
        /// Per-feature mean, absent when fitted without centering
        #[serde(default)]
        mean: Option<Vec<f64>>,
        /// Per-feature scale, absent when fitted without scaling
        #[serde(default)]
        scale: Option<Vec<f64>>,
    },
    /// `x * scale + min`
    MinMax {
        /// Per-feature offset
        min: Vec<f64>,
        /// Per-feature multiplier
        scale: Vec<f64>,
    },
    /// Passes values through unchanged
    Identity,
}

impl FeatureScaler {
    /// Loads a scaler exported as JSON
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            SkinlensError::configuration(
                format!("Failed to read scaler file {}", path.display()),
                Some(Box::new(e)),
            )
        })?;

        serde_json::from_str(&content).map_err(|e| {
            SkinlensError::model(
                format!("Failed to parse scaler file {}", path.display()),
                Some(Box::new(e)),
            )
        })
    }

    /// Checks that every stored vector covers exactly `width` features
    pub fn check_width(&self, width: usize) -> Result<()> {
        let vectors: Vec<(&str, &Vec<f64>)> = match self {
            Self::Standard { mean, scale } => mean
                .iter()
                .map(|m| ("mean", m))
                .chain(scale.iter().map(|s| ("scale", s)))
                .collect(),
            Self::MinMax { min, scale } => vec![("min", min), ("scale", scale)],
            Self::Identity => Vec::new(),
        };

        for (name, values) in vectors {
            if values.len() != width {
                return Err(SkinlensError::model(
                    format!(
                        "Scaler `{}` has {} entries but the encoder produces {} features",
                        name,
                        values.len(),
                        width
                    ),
                    None,
                ));
            }
        }

        if let Self::Standard {
            scale: Some(scale), ..
        } = self
        {
            if scale.iter().any(|s| *s == 0.0 || !s.is_finite()) {
                return Err(SkinlensError::model(
                    "Scaler `scale` contains zero or non-finite entries",
                    None,
                ));
            }
        }
        Ok(())
    }

    /// Scales `values` in place
    pub fn transform(&self, values: &mut [f64]) {
        match self {
            Self::Standard { mean, scale } => {
                if let Some(mean) = mean {
                    values.iter_mut().zip(mean).for_each(|(v, m)| *v -= m);
                }
                if let Some(scale) = scale {
                    values.iter_mut().zip(scale).for_each(|(v, s)| *v /= s);
                }
            }
            Self::MinMax { min, scale } => {
                values
                    .iter_mut()
                    .zip(min.iter().zip(scale))
                    .for_each(|(v, (m, s))| *v = *v * s + m);
            }
            Self::Identity => {}
        }
    }
}

/// Encoder + scaler pair producing the metadata tensor
#[derive(Debug, Clone)]
pub struct MetadataEncoder {
    encoder: OneHotEncoder,
    scaler: FeatureScaler,
    device: Device,
}

impl MetadataEncoder {
    /// Pairs an encoder with its scaler, checking that their widths agree
    pub fn new(encoder: OneHotEncoder, scaler: FeatureScaler, device: Device) -> Result<Self> {
        scaler.check_width(encoder.width() + 1)?;
        Ok(Self {
            encoder,
            scaler,
            device,
        })
    }

    /// Length of the encoded feature vector
    pub fn output_width(&self) -> usize {
        self.encoder.width() + 1
    }

    /// Output column names, ending with `age`
    pub fn feature_names(&self) -> Vec<String> {
        let mut names = self.encoder.feature_names();
        names.push(AGE_COLUMN.to_string());
        names
    }

    /// Encodes and scales a record into a plain feature vector
    pub fn encode_values(&self, record: &MetadataRecord) -> Result<Vec<f32>> {
        if !record.age.is_finite() || record.age < 0.0 {
            return Err(SkinlensError::validation(format!(
                "`age` must be a non-negative number, got {}",
                record.age
            )));
        }

        let mut features = Vec::with_capacity(self.output_width());
        self.encoder.transform_into(record, &mut features)?;
        features.push(record.age);
        self.scaler.transform(&mut features);

        debug!(width = features.len(), "Encoded metadata record");
        Ok(features.into_iter().map(|v| v as f32).collect())
    }

    /// Encodes a record into a `(1, N)` tensor on the selected device
    pub fn encode(&self, record: &MetadataRecord) -> Result<Tensor> {
        let features = self.encode_values(record)?;
        let width = features.len();
        Tensor::from_vec(features, (1, width), &self.device)
            .map_err(|e| crate::inference_error("building metadata tensor", e))
    }
}
