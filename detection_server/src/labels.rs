use std::{
    fs::File,
    io::{self, BufRead},
    path::Path,
    sync::Arc,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LabelsError {
    #[error("Failed to read labels file: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid line {line}: {content}")]
    InvalidLine { line: usize, content: String },
    #[error("Labels file contains no labels")]
    Empty,
}

/// Class index to label name mapping of the loaded detector.
///
/// Cheap to clone; the names are shared and never mutated after load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSet {
    names: Arc<[String]>,
}

impl LabelSet {
    pub fn from_names<I, S>(names: I) -> Result<Self, LabelsError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(LabelsError::Empty);
        }
        Ok(Self {
            names: names.into(),
        })
    }

    /// Reads one label per line. A trailing `,r,g,b` colour is accepted
    /// and dropped; blank lines are skipped.
    pub fn load(filepath: &Path) -> Result<Self, LabelsError> {
        let file = File::open(filepath)?;
        let reader = io::BufReader::new(file);
        let mut names = Vec::new();

        for (index, line_result) in reader.lines().enumerate() {
            let line = line_result?;
            if line.trim().is_empty() {
                continue;
            }
            let parts: Vec<&str> = line.split(',').collect();

            let label = match parts.len() {
                1 => parts[0].trim(),
                4 if parts[1..].iter().all(|c| c.trim().parse::<u8>().is_ok()) => parts[0].trim(),
                _ => {
                    return Err(LabelsError::InvalidLine {
                        line: index + 1,
                        content: line,
                    })
                }
            };
            if label.is_empty() {
                return Err(LabelsError::InvalidLine {
                    line: index + 1,
                    content: line,
                });
            }
            names.push(label.to_string());
        }

        Self::from_names(names)
    }

    pub fn get(&self, class_id: usize) -> Option<&str> {
        self.names.get(class_id).map(String::as_str)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
