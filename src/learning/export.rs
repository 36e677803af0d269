//! Password-gated model export
//!
//! Copies the current artifact into the local exports directory under a
//! timestamped name. The password is checked before the filesystem is
//! touched.

use chrono::Local;
use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use crate::error::ExportError;

/// Password accepted when the configuration does not override it
pub const DEFAULT_EXPORT_PASSWORD: &str = "2B4D5G";

/// Lowercase hex SHA-256 of a password
pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

/// Export gate bound to a password hash and an exports directory
#[derive(Debug, Clone)]
pub struct ModelExporter {
    password_sha256: String,
    exports_dir: PathBuf,
}

impl ModelExporter {
    pub fn new(password_sha256: &str, exports_dir: PathBuf) -> Self {
        Self {
            password_sha256: password_sha256.trim().to_ascii_lowercase(),
            exports_dir,
        }
    }

    pub fn exports_dir(&self) -> &Path {
        &self.exports_dir
    }

    /// Constant-time comparison of the supplied password against the hash
    pub fn verify(&self, password: &str) -> bool {
        let supplied = hash_password(password);
        supplied.as_bytes().ct_eq(self.password_sha256.as_bytes()).into()
    }

    /// Copy `model` into the exports directory and return the new path
    pub fn export(&self, password: &str, model: Option<&Path>) -> Result<PathBuf, ExportError> {
        if !self.verify(password) {
            warn!("Rejected model export: invalid password");
            return Err(ExportError::InvalidPassword);
        }

        let source = match model {
            Some(path) if path.is_file() => path,
            _ => return Err(ExportError::ModelNotFound),
        };

        std::fs::create_dir_all(&self.exports_dir).map_err(ExportError::ExportFailed)?;
        let name = format!("exported_model_{}.model", Local::now().format("%Y%m%d_%H%M%S"));
        let target = self.exports_dir.join(name);
        copy_new(source, &target).map_err(ExportError::ExportFailed)?;

        info!("Exported model to {}", target.display());
        Ok(target)
    }
}

/// Copy `source` to `target`, which must not exist yet
fn copy_new(source: &Path, target: &Path) -> io::Result<u64> {
    let mut input = File::open(source)?;
    let mut output = OpenOptions::new().write(true).create_new(true).open(target)?;
    io::copy(&mut input, &mut output).map_err(|e| {
        let _ = std::fs::remove_file(target);
        e
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exporter(dir: &Path) -> ModelExporter {
        ModelExporter::new(&hash_password(DEFAULT_EXPORT_PASSWORD), dir.join("exports"))
    }

    #[test]
    fn test_hash_is_hex_sha256() {
        assert_eq!(
            hash_password("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_wrong_password_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("model_1.0.1.model");
        std::fs::write(&model, b"weights").unwrap();

        let err = exporter(dir.path()).export("wrong", Some(&model)).unwrap_err();
        assert!(matches!(err, ExportError::InvalidPassword));
        assert!(!dir.path().join("exports").exists());
    }

    #[test]
    fn test_missing_model() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = exporter(dir.path());

        assert!(matches!(
            exporter.export(DEFAULT_EXPORT_PASSWORD, None).unwrap_err(),
            ExportError::ModelNotFound
        ));
        assert!(matches!(
            exporter
                .export(DEFAULT_EXPORT_PASSWORD, Some(&dir.path().join("gone.model")))
                .unwrap_err(),
            ExportError::ModelNotFound
        ));
    }

    #[test]
    fn test_export_copies_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("model_1.0.1.model");
        std::fs::write(&model, b"weights").unwrap();

        let exported = exporter(dir.path()).export(DEFAULT_EXPORT_PASSWORD, Some(&model)).unwrap();
        let name = exported.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("exported_model_"));
        assert!(name.ends_with(".model"));
        assert_eq!(std::fs::read(&exported).unwrap(), b"weights");
        assert!(model.exists());
    }

    #[test]
    fn test_configured_hash_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = ModelExporter::new(&hash_password("secret").to_uppercase(), dir.path().to_path_buf());
        assert!(exporter.verify("secret"));
        assert!(!exporter.verify("Secret"));
    }

    #[test]
    fn test_io_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("model_1.0.1.model");
        std::fs::write(&model, b"weights").unwrap();
        // A regular file where the exports directory should be
        std::fs::write(dir.path().join("exports"), b"").unwrap();

        let err = exporter(dir.path()).export(DEFAULT_EXPORT_PASSWORD, Some(&model)).unwrap_err();
        assert!(matches!(err, ExportError::ExportFailed(_)));
        assert_eq!(std::fs::read(&model).unwrap(), b"weights");
    }

    #[test]
    fn test_existing_export_is_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("model_1.0.2.model");
        std::fs::write(&model, b"new weights").unwrap();
        let target = dir.path().join("exported_model_20260101_120000.model");
        std::fs::write(&target, b"earlier export").unwrap();

        let err = copy_new(&model, &target).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(std::fs::read(&target).unwrap(), b"earlier export");

        let fresh = dir.path().join("exported_model_20260101_120001.model");
        assert_eq!(copy_new(&model, &fresh).unwrap(), 11);
        assert_eq!(std::fs::read(&fresh).unwrap(), b"new weights");
    }
}
