//! Exercise plan: which reference motions to run, in order, and for how many
//! repetitions each.

use serde::Deserialize;
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse plan: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("plan lists no exercises")]
    Empty,
    #[error("exercise '{0}' needs at least one repetition")]
    ZeroReps(String),
    #[error("exercise name '{0}' appears twice")]
    DuplicateName(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Exercise {
    pub name: String,
    /// Locator handed to the motion source.
    pub reference: String,
    pub reps: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct PlanFile {
    #[serde(default, rename = "exercise")]
    exercises: Vec<Exercise>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExercisePlan {
    exercises: Vec<Exercise>,
}

impl ExercisePlan {
    pub fn new(exercises: Vec<Exercise>) -> Result<Self, PlanError> {
        if exercises.is_empty() {
            return Err(PlanError::Empty);
        }
        for (i, e) in exercises.iter().enumerate() {
            if e.reps == 0 {
                return Err(PlanError::ZeroReps(e.name.clone()));
            }
            if exercises[..i].iter().any(|p| p.name == e.name) {
                return Err(PlanError::DuplicateName(e.name.clone()));
            }
        }
        Ok(Self { exercises })
    }

    pub fn from_toml(text: &str) -> Result<Self, PlanError> {
        let file: PlanFile = toml::from_str(text)?;
        Self::new(file.exercises)
    }

    pub fn load(path: &Path) -> Result<Self, PlanError> {
        let text = fs::read_to_string(path).map_err(|source| PlanError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn exercises(&self) -> &[Exercise] {
        &self.exercises
    }

    pub fn get(&self, idx: usize) -> Option<&Exercise> {
        self.exercises.get(idx)
    }

    pub fn len(&self) -> usize {
        self.exercises.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exercises.is_empty()
    }
}
