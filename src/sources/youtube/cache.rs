use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use dashmap::DashMap;
use regex::Regex;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::{
    common::errors::{Error, Result},
    sources::youtube::{
        cipher::{DecipherProcedure, SignatureDecipherDeriver},
        fetcher::PlayerProgramSource,
    },
};

/// Raw text of one player program release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerProgram {
    pub version: String,
    pub text: String,
    /// Sent with structured player requests so the platform hands out
    /// ciphertexts matching this program.
    pub signature_timestamp: Option<u32>,
}

impl PlayerProgram {
    pub fn new(version: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            version: version.into(),
            signature_timestamp: extract_signature_timestamp(&text),
            text,
        }
    }
}

pub fn extract_signature_timestamp(text: &str) -> Option<u32> {
    let re = Regex::new(r"(?:signatureTimestamp|sts)\s*:\s*(\d+)").ok()?;
    re.captures(text)?.get(1)?.as_str().parse().ok()
}

#[derive(Default)]
struct Entry {
    program: OnceCell<Arc<PlayerProgram>>,
    procedure: OnceCell<Arc<DecipherProcedure>>,
}

/// Player programs and their decipher procedures, keyed by version.
///
/// Each version has its own cells, so concurrent callers asking for the same
/// unseen version share one fetch and one derivation while other versions
/// proceed independently. A failed fetch or derivation leaves the cell empty
/// and the next caller tries again. Entries never expire.
pub struct PlayerProgramCache {
    source: Arc<dyn PlayerProgramSource>,
    deriver: SignatureDecipherDeriver,
    entries: DashMap<String, Arc<Entry>>,
    fetches: AtomicUsize,
    derivations: AtomicUsize,
}

impl PlayerProgramCache {
    pub fn new(source: Arc<dyn PlayerProgramSource>) -> Result<Self> {
        Ok(Self {
            source,
            deriver: SignatureDecipherDeriver::new()?,
            entries: DashMap::new(),
            fetches: AtomicUsize::new(0),
            derivations: AtomicUsize::new(0),
        })
    }

    fn entry(&self, version: &str) -> Arc<Entry> {
        self.entries.entry(version.to_string()).or_default().clone()
    }

    pub async fn get_or_fetch(&self, version: &str) -> Result<Arc<PlayerProgram>> {
        let entry = self.entry(version);
        let program = entry
            .program
            .get_or_try_init(|| async {
                self.fetches.fetch_add(1, Ordering::SeqCst);
                debug!("Fetching player program {}", version);
                let program = self.source.fetch_program(version).await?;
                info!(
                    "Loaded player program {} ({} bytes, sts {:?})",
                    version,
                    program.text.len(),
                    program.signature_timestamp
                );
                Ok::<_, Error>(Arc::new(program))
            })
            .await?;
        Ok(program.clone())
    }

    pub async fn get_decipher(&self, version: &str) -> Result<Arc<DecipherProcedure>> {
        let entry = self.entry(version);
        let procedure = entry
            .procedure
            .get_or_try_init(|| async {
                let program = self.get_or_fetch(version).await?;
                self.derivations.fetch_add(1, Ordering::SeqCst);
                let procedure = self.deriver.derive_versioned(&program.version, &program.text)?;
                Ok::<_, Error>(Arc::new(procedure))
            })
            .await?;
        Ok(procedure.clone())
    }

    pub fn seed_program(&self, program: PlayerProgram) {
        let entry = self.entry(&program.version);
        let _ = entry.program.set(Arc::new(program));
    }

    pub fn seed_procedure(&self, version: &str, procedure: DecipherProcedure) {
        let entry = self.entry(version);
        let _ = entry.procedure.set(Arc::new(procedure));
    }

    pub fn contains(&self, version: &str) -> bool {
        self.entries
            .get(version)
            .is_some_and(|e| e.program.initialized() || e.procedure.initialized())
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of program fetches issued so far.
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Number of derivations run so far.
    pub fn derivations(&self) -> usize {
        self.derivations.load(Ordering::SeqCst)
    }
}
