//! Hand-off of final decisions to the submission writer.

use std::path::{Path, PathBuf};

use ndarray::Array2;

use crate::error::Result;
use crate::utils::write_json_atomic;

/// Receives the binary samples × labels decisions of one aggregation
/// variant. Formatting the competition file is up to the implementor.
pub trait SubmissionWriter {
    fn write(&self, name: &str, decisions: &Array2<f32>) -> Result<()>;
}

/// Keeps decisions as `<dir>/<name>.json` for later inspection.
#[derive(Debug, Clone)]
pub struct JsonDecisionWriter {
    dir: PathBuf,
}

impl JsonDecisionWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl SubmissionWriter for JsonDecisionWriter {
    fn write(&self, name: &str, decisions: &Array2<f32>) -> Result<()> {
        let path = self.path(name);
        write_json_atomic(&path, decisions)?;
        tracing::info!(path = %path.display(), rows = decisions.nrows(), "wrote decisions");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::read_json;

    #[test]
    fn writes_named_json() {
        let dir = tempfile::tempdir().unwrap();
        let writer = JsonDecisionWriter::new(dir.path());
        let decisions = Array2::<f32>::eye(3);
        writer.write("gbdt_x", &decisions).unwrap();
        let back: Array2<f32> = read_json(&writer.path("gbdt_x")).unwrap();
        assert_eq!(back, decisions);
    }
}
