use std::{fs::File, io::BufReader, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    optimizer::OptimizerConfig,
    scf::ScfConfig,
    vibrations::VibrationConfig,
};

/// Settings for one run of the command line tool. Every section is optional in the file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobConfig {
    pub scf: ScfConfig,
    pub optimizer: OptimizerConfig,
    pub vibrations: VibrationConfig,
    /// Worker threads sharing the Fock and gradient work.
    pub workers: usize,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            scf: ScfConfig::default(),
            optimizer: OptimizerConfig::default(),
            vibrations: VibrationConfig::default(),
            workers: 1,
        }
    }
}

impl JobConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let config: JobConfig = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| Error::InvalidConfig(format!("job: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::InvalidConfig("at least one worker is needed".into()));
        }
        self.optimizer.validate()?;
        self.vibrations.validate()
    }
}
