pub mod audit;
pub mod import;
pub mod maintenance;
pub mod patch;
pub mod verify;

use std::path::PathBuf;

use anyhow::Result;
use tracing::info;

use crate::content::memory::MemoryStore;
use crate::content::rest::RestStore;
use crate::content::store::{
    ContentStore, StoreConfig, ANON_KEYS, DEFAULT_BATCH_SIZE, ENDPOINT_KEYS, SERVICE_KEYS,
};
use crate::util::env::{load_env_file, preflight_snapshot};

/// Options shared by every subcommand.
#[derive(Debug, Clone)]
pub struct GlobalOpts {
    pub env_file: PathBuf,
    /// Run against an in-memory table; nothing leaves the process.
    pub dry_run: bool,
}

impl Default for GlobalOpts {
    fn default() -> Self {
        Self {
            env_file: PathBuf::from(".env"),
            dry_run: false,
        }
    }
}

/// Resolved configuration plus the store every runner talks to.
pub struct Session {
    pub config: Option<StoreConfig>,
    pub dry_run: bool,
    store: Box<dyn ContentStore>,
}

impl Session {
    /// Load configuration and connect. Fails before any remote call when the
    /// endpoint or key is missing; in dry-run mode configuration is optional.
    pub fn open(opts: &GlobalOpts) -> Result<Self> {
        let file = load_env_file(&opts.env_file);
        let keys: Vec<&str> = ENDPOINT_KEYS
            .iter()
            .chain(SERVICE_KEYS.iter())
            .chain(ANON_KEYS.iter())
            .copied()
            .collect();
        preflight_snapshot("qsync", &file, &keys);

        if opts.dry_run {
            info!(target = "qsync", "dry run: using in-memory store");
            return Ok(Self {
                config: StoreConfig::resolve(&file).ok(),
                dry_run: true,
                store: Box::new(MemoryStore::new()),
            });
        }

        let config = StoreConfig::resolve(&file)?;
        let store = RestStore::new(&config)?;
        info!(target = "qsync", store = store.name(), "connected");
        Ok(Self {
            config: Some(config),
            dry_run: false,
            store: Box::new(store),
        })
    }

    pub fn from_store(store: Box<dyn ContentStore>) -> Self {
        Self {
            config: None,
            dry_run: true,
            store,
        }
    }

    pub fn store(&self) -> &dyn ContentStore {
        self.store.as_ref()
    }

    pub fn batch_size(&self, requested: Option<usize>) -> usize {
        requested
            .or_else(|| self.config.as_ref().map(|c| c.batch_size))
            .unwrap_or(DEFAULT_BATCH_SIZE)
    }

    /// A second view of the table through the anon key, when one is configured.
    pub fn anon_store(&self) -> Result<Option<Box<dyn ContentStore>>> {
        if self.dry_run {
            return Ok(None);
        }
        match self.config.as_ref().and_then(StoreConfig::as_anon) {
            Some(cfg) => Ok(Some(Box::new(RestStore::new(&cfg)?))),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dry_run_needs_no_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let opts = GlobalOpts {
            env_file: dir.path().join("missing.env"),
            dry_run: true,
        };
        let session = Session::open(&opts).unwrap();
        assert_eq!(session.store().name(), "memory");
        assert_eq!(session.batch_size(Some(7)), 7);
        assert!(session.anon_store().unwrap().is_none());
    }

    #[test]
    fn env_file_drives_rest_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(
            &path,
            "ENDPOINT_URL=http://127.0.0.1:9\nSERVICE_KEY=svc\nANON_KEY=anon\nSYNC_BATCH_SIZE=25\n",
        )
        .unwrap();
        let session = Session::open(&GlobalOpts { env_file: path, dry_run: false }).unwrap();
        assert_eq!(session.store().name(), "rest:questions(service)");
        assert_eq!(session.batch_size(None), 25);
        let anon = session.anon_store().unwrap().unwrap();
        assert_eq!(anon.name(), "rest:questions(anon)");
    }
}
