use crate::models::{Credential, Provider, StoreError};
use crate::store::CredentialBackend;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Process-local credential records
#[derive(Default)]
pub struct MemoryBackend {
    records: Mutex<HashMap<Provider, Credential>>,
}

impl CredentialBackend for MemoryBackend {
    fn load(&self, provider: Provider) -> Result<Option<Credential>, StoreError> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records.get(&provider).cloned())
    }

    fn save(&self, credential: &Credential) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.insert(credential.provider, credential.clone());
        Ok(())
    }

    fn remove(&self, provider: Provider) -> Result<bool, StoreError> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records.remove(&provider).is_some())
    }

    fn remove_all(&self) -> Result<(), StoreError> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
