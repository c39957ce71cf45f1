//! Restart files for SCF and optimizer state.
//!
//! Layout, little endian:
//!
//! | bytes | content |
//! |-------|---------|
//! | 8     | magic `QCHMCKPT` |
//! | 4     | format version |
//! | 8     | system fingerprint (elements, charge, multiplicity, basis set) |
//! | 8     | geometry fingerprint |
//! | 8     | body checksum |
//! | 8     | SCF cycle |
//! | 8     | optimizer step |
//! | 8     | body length |
//! | ...   | `bincode` body |
//!
//! Fingerprints and the checksum are FNV-1a hashes.
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::{PoisonError, RwLock},
};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::{
    basis::BasisSet,
    error::{Error, Result},
    molecule::Molecule,
    optimizer::OptimizerState,
    scf::ScfState,
};

const MAGIC: [u8; 8] = *b"QCHMCKPT";
pub const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 8 + 4 + 6 * 8;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Incremental 64 bit FNV-1a.
#[derive(Copy, Clone, Debug)]
struct Fnv1a(u64);

impl Fnv1a {
    fn new() -> Self {
        Self(FNV_OFFSET)
    }

    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.0 ^= byte as u64;
            self.0 = self.0.wrapping_mul(FNV_PRIME);
        }
    }

    fn write_u64(&mut self, value: u64) {
        self.write(&value.to_le_bytes());
    }

    fn write_f64(&mut self, value: f64) {
        self.write_u64(value.to_bits());
    }

    fn finish(self) -> u64 {
        self.0
    }
}

pub fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = Fnv1a::new();
    hash.write(bytes);
    hash.finish()
}

/// Identifies the chemical system independent of its geometry: which atoms, which electronic
/// state and which basis functions sit on them.
pub fn system_fingerprint(molecule: &Molecule, basis_set: &BasisSet) -> u64 {
    let mut hash = Fnv1a::new();
    hash.write(basis_set.name().as_bytes());
    hash.write_u64(molecule.charge() as i64 as u64);
    hash.write_u64(molecule.multiplicity() as u64);
    hash.write_u64(molecule.n_atoms() as u64);

    for atom in molecule.atoms() {
        hash.write_u64(atom.element_type().atomic_number() as u64);
        let Some(atomic_basis) = basis_set.for_atom(atom) else {
            continue;
        };
        for shell in atomic_basis.shells() {
            hash.write_u64(shell.angular_magnitude as u64);
            shell.exponents.iter().for_each(|&x| hash.write_f64(x));
            shell.coefficients.iter().for_each(|&x| hash.write_f64(x));
        }
    }
    hash.finish()
}

pub fn geometry_fingerprint(molecule: &Molecule) -> u64 {
    let mut hash = Fnv1a::new();
    for atom in molecule.atoms() {
        atom.position().iter().for_each(|&x| hash.write_f64(x));
    }
    hash.finish()
}

/// Everything needed to pick up a calculation where it stopped.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub molecule: Molecule,
    pub basis_set: String,
    pub system_fingerprint: u64,
    pub scf: Option<ScfState>,
    pub optimizer: Option<OptimizerState>,
}

impl Checkpoint {
    pub fn new(molecule: &Molecule, basis_set: &BasisSet) -> Self {
        Self {
            molecule: molecule.clone(),
            basis_set: basis_set.name().to_string(),
            system_fingerprint: system_fingerprint(molecule, basis_set),
            scf: None,
            optimizer: None,
        }
    }

    pub fn with_scf(mut self, state: ScfState) -> Self {
        self.scf = Some(state);
        self
    }

    pub fn with_optimizer(mut self, state: OptimizerState) -> Self {
        self.optimizer = Some(state);
        self
    }

    fn scf_cycle(&self) -> u64 {
        self.scf.as_ref().map_or(0, |state| state.cycle as u64)
    }

    fn optimizer_step(&self) -> u64 {
        self.optimizer.as_ref().map_or(0, |state| state.step as u64)
    }
}

/// The fixed-size part in front of every checkpoint body.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CheckpointHeader {
    pub version: u32,
    pub system_fingerprint: u64,
    pub geometry_fingerprint: u64,
    pub checksum: u64,
    pub scf_cycle: u64,
    pub optimizer_step: u64,
    pub body_length: u64,
}

impl CheckpointHeader {
    fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN);
        bytes.extend_from_slice(&MAGIC);
        bytes.extend_from_slice(&self.version.to_le_bytes());
        for value in [
            self.system_fingerprint,
            self.geometry_fingerprint,
            self.checksum,
            self.scf_cycle,
            self.optimizer_step,
            self.body_length,
        ] {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes
    }

    /// Checks magic and version; everything else is verified against the body.
    fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::CheckpointCorrupt(format!(
                "{} bytes is too short for a header",
                bytes.len()
            )));
        }
        if bytes[..8] != MAGIC {
            return Err(Error::CheckpointCorrupt("not a checkpoint file".into()));
        }

        let mut version = [0; 4];
        version.copy_from_slice(&bytes[8..12]);
        let version = u32::from_le_bytes(version);
        if version != FORMAT_VERSION {
            return Err(Error::CheckpointVersionMismatch {
                found: version,
                expected: FORMAT_VERSION,
            });
        }

        let word = |index: usize| {
            let start = 12 + 8 * index;
            let mut value = [0; 8];
            value.copy_from_slice(&bytes[start..start + 8]);
            u64::from_le_bytes(value)
        };

        Ok(Self {
            version,
            system_fingerprint: word(0),
            geometry_fingerprint: word(1),
            checksum: word(2),
            scf_cycle: word(3),
            optimizer_step: word(4),
            body_length: word(5),
        })
    }
}

/// One checkpoint file. Saves replace the file atomically and exclude concurrent loads through
/// the same store.
#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    lock: RwLock<()>,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: RwLock::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Writes a temporary file next to the target, syncs it and renames it over the target. A
    /// crash at any point leaves either the old checkpoint or the new one.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<CheckpointHeader> {
        let body = bincode::serialize(checkpoint)
            .map_err(|e| Error::CheckpointCorrupt(format!("cannot encode checkpoint: {e}")))?;
        let header = CheckpointHeader {
            version: FORMAT_VERSION,
            system_fingerprint: checkpoint.system_fingerprint,
            geometry_fingerprint: geometry_fingerprint(&checkpoint.molecule),
            checksum: fnv1a(&body),
            scf_cycle: checkpoint.scf_cycle(),
            optimizer_step: checkpoint.optimizer_step(),
            body_length: body.len() as u64,
        };

        let _guard = self.lock.write().unwrap_or_else(PoisonError::into_inner);

        let directory = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut file = NamedTempFile::new_in(&directory)?;
        file.write_all(&header.encode())?;
        file.write_all(&body)?;
        file.as_file().sync_all()?;
        file.persist(&self.path).map_err(|e| Error::Io(e.error))?;

        log::debug!(
            "checkpoint saved to {} (cycle {}, step {})",
            self.path.display(),
            header.scf_cycle,
            header.optimizer_step
        );
        Ok(header)
    }

    /// Reads and verifies the whole checkpoint. Nothing is returned unless every check passes.
    /// With `expected_system`, a checkpoint of a different system is refused.
    pub fn load(&self, expected_system: Option<u64>) -> Result<Checkpoint> {
        let bytes = {
            let _guard = self.lock.read().unwrap_or_else(PoisonError::into_inner);
            fs::read(&self.path)?
        };

        let header = CheckpointHeader::decode(&bytes)?;
        let body = &bytes[HEADER_LEN..];
        if body.len() as u64 != header.body_length {
            return Err(Error::CheckpointCorrupt(format!(
                "body has {} bytes, header says {}",
                body.len(),
                header.body_length
            )));
        }
        if fnv1a(body) != header.checksum {
            return Err(Error::CheckpointCorrupt("body checksum does not match".into()));
        }
        if let Some(expected) = expected_system {
            if header.system_fingerprint != expected {
                return Err(Error::CheckpointFingerprintMismatch {
                    expected,
                    found: header.system_fingerprint,
                });
            }
        }

        let checkpoint: Checkpoint = bincode::deserialize(body)
            .map_err(|e| Error::CheckpointCorrupt(format!("cannot decode body: {e}")))?;

        if checkpoint.system_fingerprint != header.system_fingerprint
            || geometry_fingerprint(&checkpoint.molecule) != header.geometry_fingerprint
            || checkpoint.scf_cycle() != header.scf_cycle
            || checkpoint.optimizer_step() != header.optimizer_step
        {
            return Err(Error::CheckpointCorrupt(
                "header does not describe the stored body".into(),
            ));
        }

        Ok(checkpoint)
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, sync::Arc, thread};

    use super::{
        fnv1a, geometry_fingerprint, system_fingerprint, Checkpoint, CheckpointStore,
        FORMAT_VERSION, HEADER_LEN,
    };
    use crate::{
        error::Error,
        molecule,
        molecule::Molecule,
        optimizer::{OptimizerConfig, OptimizerState},
        parallel::SerialCommunicator,
        scf::{ScfConfig, ScfDriver},
        testing,
    };

    fn water() -> Molecule {
        molecule! {
            O => (0.0, 0.0, 0.0),
            H => (0.0, 1.43, 1.1),
            H => (0.0, -1.43, 1.1)
        }
    }

    fn checkpoint() -> Checkpoint {
        let molecule = water();
        let basis_set = testing::basis_set("STO-3G");
        let mut driver =
            ScfDriver::new(&SerialCommunicator, &molecule, &basis_set, &ScfConfig::default())
                .unwrap();
        driver.step().unwrap();
        driver.step().unwrap();

        Checkpoint::new(&molecule, &basis_set)
            .with_scf(driver.into_state())
            .with_optimizer(OptimizerState::new(&molecule, &OptimizerConfig::default()))
    }

    #[test]
    fn fnv1a_reference_values() {
        assert_eq!(fnv1a(b""), 0xcbf29ce484222325);
        assert_eq!(fnv1a(b"a"), 0xaf63dc4c8601ec8c);
        assert_eq!(fnv1a(b"foobar"), 0x85944171f73967e8);
    }

    #[test]
    fn fingerprints_separate_systems_and_geometries() {
        let molecule = water();
        let sto = testing::basis_set("STO-3G");
        let split = testing::basis_set("6-31G");

        assert_ne!(system_fingerprint(&molecule, &sto), system_fingerprint(&molecule, &split));
        let cation = molecule.clone().with_state(1, 2).unwrap();
        assert_ne!(system_fingerprint(&molecule, &sto), system_fingerprint(&cation, &sto));

        let mut coordinates = molecule.coordinates();
        coordinates[4] += 1e-12;
        let moved = molecule.with_coordinates(&coordinates);
        assert_eq!(system_fingerprint(&molecule, &sto), system_fingerprint(&moved, &sto));
        assert_ne!(geometry_fingerprint(&molecule), geometry_fingerprint(&moved));
    }

    #[test]
    fn round_trip_is_bit_identical() {
        let directory = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(directory.path().join("water.chk"));
        let saved = checkpoint();

        let header = store.save(&saved).unwrap();
        assert_eq!(header.version, FORMAT_VERSION);
        assert_eq!(header.scf_cycle, 2);

        let loaded = store.load(Some(saved.system_fingerprint)).unwrap();
        assert_eq!(loaded, saved);
        let (before, after) = (saved.scf.unwrap(), loaded.scf.unwrap());
        for (a, b) in before.densities.iter().zip(&after.densities) {
            assert!(a.iter().zip(b.iter()).all(|(x, y)| x.to_bits() == y.to_bits()));
        }

        // only the checkpoint itself is left behind
        assert_eq!(fs::read_dir(directory.path()).unwrap().count(), 1);
    }

    #[test]
    fn rejects_other_versions() {
        let directory = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(directory.path().join("state.chk"));
        store.save(&checkpoint()).unwrap();

        let mut bytes = fs::read(store.path()).unwrap();
        bytes[8..12].copy_from_slice(&99u32.to_le_bytes());
        fs::write(store.path(), &bytes).unwrap();

        assert!(matches!(
            store.load(None),
            Err(Error::CheckpointVersionMismatch {
                found: 99,
                expected: FORMAT_VERSION
            })
        ));
    }

    #[test]
    fn rejects_damaged_files() {
        let directory = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(directory.path().join("state.chk"));
        store.save(&checkpoint()).unwrap();
        let original = fs::read(store.path()).unwrap();

        let mut flipped = original.clone();
        flipped[HEADER_LEN + 17] ^= 0x40;
        fs::write(store.path(), &flipped).unwrap();
        assert!(matches!(store.load(None), Err(Error::CheckpointCorrupt(_))));

        fs::write(store.path(), &original[..original.len() - 3]).unwrap();
        assert!(matches!(store.load(None), Err(Error::CheckpointCorrupt(_))));

        fs::write(store.path(), &original[..20]).unwrap();
        assert!(matches!(store.load(None), Err(Error::CheckpointCorrupt(_))));

        let mut foreign = original.clone();
        foreign[..8].copy_from_slice(b"NOTACKPT");
        fs::write(store.path(), &foreign).unwrap();
        assert!(matches!(store.load(None), Err(Error::CheckpointCorrupt(_))));

        // a consistent body under a header describing another geometry
        let mut moved = original.clone();
        moved[20] ^= 0x01;
        fs::write(store.path(), &moved).unwrap();
        assert!(matches!(store.load(None), Err(Error::CheckpointCorrupt(_))));

        fs::write(store.path(), &original).unwrap();
        assert!(store.load(None).is_ok());
    }

    #[test]
    fn refuses_another_system() {
        let directory = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(directory.path().join("state.chk"));
        let saved = checkpoint();
        store.save(&saved).unwrap();

        let expected = saved.system_fingerprint ^ 1;
        match store.load(Some(expected)) {
            Err(Error::CheckpointFingerprintMismatch { expected: e, found }) => {
                assert_eq!(e, expected);
                assert_eq!(found, saved.system_fingerprint);
            }
            other => panic!("expected a fingerprint mismatch, got {other:?}"),
        }
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let directory = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(directory.path().join("absent.chk"));
        assert!(!store.exists());
        assert!(matches!(store.load(None), Err(Error::Io(_))));
    }

    #[test]
    fn loads_never_see_partial_saves() {
        let directory = tempfile::tempdir().unwrap();
        let store = Arc::new(CheckpointStore::new(directory.path().join("shared.chk")));
        let first = checkpoint();
        let mut second = first.clone();
        if let Some(optimizer) = &mut second.optimizer {
            optimizer.step = 7;
        }
        store.save(&first).unwrap();

        let writer = {
            let store = Arc::clone(&store);
            let (first, second) = (first.clone(), second.clone());
            thread::spawn(move || {
                for round in 0..20 {
                    let checkpoint = if round % 2 == 0 { &second } else { &first };
                    store.save(checkpoint).unwrap();
                }
            })
        };

        for _ in 0..20 {
            let loaded = store.load(Some(first.system_fingerprint)).unwrap();
            assert!(loaded == first || loaded == second);
        }
        writer.join().unwrap();
    }
}
