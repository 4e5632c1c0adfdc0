use std::path::Path;

use tracing::info;

use crate::AssetError;

/// Ordered class names; the class id is the line index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelTable {
    labels: Vec<String>,
}

impl LabelTable {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AssetError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| AssetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let table = Self::parse(&text, path)?;
        info!("labels: loaded {} classes from {}", table.len(), path.display());
        Ok(table)
    }

    /// One label per line. Trailing blank lines are ignored, any other blank
    /// line would shift every later class id and is rejected.
    pub fn parse(text: &str, origin: &Path) -> Result<Self, AssetError> {
        let lines: Vec<&str> = text.lines().map(str::trim).collect();
        let used = lines.iter().rposition(|l| !l.is_empty()).map_or(0, |i| i + 1);
        if used == 0 {
            return Err(AssetError::NoLabels {
                path: origin.to_path_buf(),
            });
        }
        if let Some(i) = lines[..used].iter().position(|l| l.is_empty()) {
            return Err(AssetError::BlankLabel {
                path: origin.to_path_buf(),
                line: i + 1,
            });
        }
        Ok(Self {
            labels: lines[..used].iter().map(|l| l.to_string()).collect(),
        })
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            labels: names.into_iter().map(|s| s.as_ref().to_string()).collect(),
        }
    }

    pub fn get(&self, class_id: usize) -> Option<&str> {
        self.labels.get(class_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Cheap startup check that the model asset is present and non-empty.
/// Parsing is left to the engine that loads it.
pub fn check_model_file(path: impl AsRef<Path>) -> Result<u64, AssetError> {
    let path = path.as_ref();
    let meta = std::fs::metadata(path).map_err(|source| AssetError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if meta.len() == 0 {
        return Err(AssetError::EmptyModel {
            path: path.to_path_buf(),
        });
    }
    Ok(meta.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_labels_in_file_order() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "person\r\nbicycle\ncar\n\n\n").unwrap();
        let table = LabelTable::load(f.path()).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.get(0), Some("person"));
        assert_eq!(table.get(2), Some("car"));
        assert!(table.get(3).is_none());
    }

    #[test]
    fn blank_line_in_the_middle_is_rejected() {
        let err = LabelTable::parse("person\n\ncar\n", Path::new("labels.txt")).unwrap_err();
        assert!(matches!(err, AssetError::BlankLabel { line: 2, .. }));
    }

    #[test]
    fn empty_or_missing_file_fails_to_load() {
        assert!(matches!(
            LabelTable::parse("\n \n", Path::new("labels.txt")),
            Err(AssetError::NoLabels { .. })
        ));
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            LabelTable::load(dir.path().join("absent.txt")),
            Err(AssetError::Io { .. })
        ));
    }

    #[test]
    fn model_file_must_exist_and_be_non_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.tflite");
        assert!(matches!(check_model_file(&path), Err(AssetError::Io { .. })));
        std::fs::write(&path, b"").unwrap();
        assert!(matches!(check_model_file(&path), Err(AssetError::EmptyModel { .. })));
        std::fs::write(&path, b"TFL3").unwrap();
        assert_eq!(check_model_file(&path).unwrap(), 4);
    }
}
