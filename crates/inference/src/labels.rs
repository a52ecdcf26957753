//! Ordered class label set
//!
//! Position `i` names output unit `i` of the classifier head, so the file
//! must list labels in exactly the order used when the head was trained.

use skinlens_shared::{Result, SkinlensError};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Class labels indexed by model output position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassLabels {
    labels: Vec<String>,
}

impl ClassLabels {
    /// Creates a label set; it must be non-empty with unique, non-blank labels
    pub fn new(labels: Vec<String>) -> Result<Self> {
        if labels.is_empty() {
            return Err(SkinlensError::model("Label set is empty", None));
        }

        let mut seen = HashSet::new();
        for label in &labels {
            if label.trim().is_empty() {
                return Err(SkinlensError::model("Label set contains a blank label", None));
            }
            if !seen.insert(label.as_str()) {
                return Err(SkinlensError::model(
                    format!("Label `{}` appears more than once", label),
                    None,
                ));
            }
        }

        Ok(Self { labels })
    }

    /// Loads labels from a JSON array or a text file with one label per line
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            SkinlensError::configuration(
                format!("Failed to read label file {}", path.display()),
                Some(Box::new(e)),
            )
        })?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let labels = if is_json {
            serde_json::from_str::<Vec<String>>(&content).map_err(|e| {
                SkinlensError::model(
                    format!("Failed to parse label file {}", path.display()),
                    Some(Box::new(e)),
                )
            })?
        } else {
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect()
        };

        Self::new(labels)
    }

    /// Number of classes
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Always false for a constructed label set
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Label for output index `index`
    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    /// Labels in model output order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_rejects_duplicates_and_empty() {
        assert!(ClassLabels::new(Vec::new()).is_err());
        assert!(ClassLabels::new(vec!["mel".into(), "mel".into()]).is_err());
        assert!(ClassLabels::new(vec!["mel".into(), " ".into()]).is_err());
    }

    #[test]
    fn test_order_is_preserved() {
        let labels = ClassLabels::new(vec!["nv".into(), "mel".into(), "bkl".into()]).unwrap();
        assert_eq!(labels.get(0), Some("nv"));
        assert_eq!(labels.get(2), Some("bkl"));
        assert_eq!(labels.get(3), None);
        assert_eq!(labels.iter().collect::<Vec<_>>(), ["nv", "mel", "bkl"]);
    }

    #[test]
    fn test_text_file() {
        let mut file = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        writeln!(file, "akiec\nbcc\n\nmel").unwrap();
        let labels = ClassLabels::from_file(file.path()).unwrap();
        assert_eq!(labels.len(), 3);
        assert_eq!(labels.get(2), Some("mel"));
    }

    #[test]
    fn test_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"["akiec", "bcc", "bkl"]"#).unwrap();
        let labels = ClassLabels::from_file(file.path()).unwrap();
        assert_eq!(labels.get(1), Some("bcc"));
    }
}
