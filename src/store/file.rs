//! Encrypted credential file
//!
//! All providers share one file holding an AES-256-GCM sealed JSON map. Each
//! write replaces the whole file through a temporary sibling and a rename, so
//! a reader never observes a half-written record.

use crate::models::{Credential, Provider, StoreError};
use crate::store::CredentialBackend;
use crate::utils::crypto::{decrypt_data, derive_encryption_key, encrypt_data, ENCRYPTION_KEY_SIZE};
use log::debug;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

type Records = BTreeMap<Provider, Credential>;

pub struct EncryptedFileBackend {
    path: PathBuf,
    key: [u8; ENCRYPTION_KEY_SIZE],
    io_lock: Mutex<()>,
}

impl EncryptedFileBackend {
    #[must_use]
    pub fn new(path: PathBuf, secret: &[u8]) -> Self {
        Self {
            path,
            key: derive_encryption_key(secret),
            io_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check that an existing file opens with this key
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or decrypted
    pub fn verify(&self) -> Result<(), StoreError> {
        self.read_records().map(|_| ())
    }

    fn read_records(&self) -> Result<Records, StoreError> {
        let sealed = match fs::read_to_string(&self.path) {
            Ok(sealed) => sealed,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Records::new()),
            Err(e) => return Err(e.into()),
        };
        if sealed.trim().is_empty() {
            return Ok(Records::new());
        }
        decrypt_data(&sealed, &self.key).map_err(|e| StoreError::Crypto(format!("{e:#}")))
    }

    fn write_records(&self, records: &Records) -> Result<(), StoreError> {
        let sealed =
            encrypt_data(records, &self.key).map_err(|e| StoreError::Crypto(format!("{e:#}")))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let staging = self.path.with_extension("tmp");
        fs::write(&staging, sealed)?;
        fs::rename(&staging, &self.path)?;
        debug!(
            "Wrote {} credential record(s) to {}",
            records.len(),
            self.path.display()
        );
        Ok(())
    }

    fn update<T>(&self, apply: impl FnOnce(&mut Records) -> T) -> Result<T, StoreError> {
        let _guard = self.io_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut records = self.read_records()?;
        let result = apply(&mut records);
        self.write_records(&records)?;
        Ok(result)
    }
}

impl CredentialBackend for EncryptedFileBackend {
    fn load(&self, provider: Provider) -> Result<Option<Credential>, StoreError> {
        let _guard = self.io_lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.read_records()?.remove(&provider))
    }

    fn save(&self, credential: &Credential) -> Result<(), StoreError> {
        self.update(|records| {
            records.insert(credential.provider, credential.clone());
        })
    }

    fn remove(&self, provider: Provider) -> Result<bool, StoreError> {
        self.update(|records| records.remove(&provider).is_some())
    }

    fn remove_all(&self) -> Result<(), StoreError> {
        self.update(Records::clear)
    }

    fn name(&self) -> &'static str {
        "encrypted-file"
    }
}
