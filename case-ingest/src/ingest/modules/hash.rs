//! File hashing module.

use async_trait::async_trait;
use md5::{Digest, Md5};
use process_utils::{ProcessTerminator, TerminationCode};
use serde_json::json;
use sha2::Sha256;
use tokio::io::AsyncReadExt;
use tracing::{debug, trace};

use crate::case::Content;
use crate::error::{Error, Result};
use crate::ingest::context::IngestJobContext;
use crate::ingest::module::FileIngestModule;

const CHUNK_SIZE: usize = 64 * 1024;

/// Computes MD5 and SHA-256 digests of files with a local backing file.
pub struct HashCalculationModule {
    /// Recompute even when the file already carries an MD5 hash.
    rehash: bool,
}

impl HashCalculationModule {
    pub const NAME: &'static str = "hash";

    pub fn new() -> Self {
        Self { rehash: false }
    }

    pub fn with_rehash(mut self, rehash: bool) -> Self {
        self.rehash = rehash;
        self
    }

    pub fn from_config(config: &serde_json::Value) -> Result<Self> {
        let rehash = match config.get("rehash") {
            None | Some(serde_json::Value::Null) => false,
            Some(value) => value
                .as_bool()
                .ok_or_else(|| Error::config("hash: 'rehash' must be a boolean"))?,
        };
        Ok(Self::new().with_rehash(rehash))
    }
}

impl Default for HashCalculationModule {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileIngestModule for HashCalculationModule {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn process(&self, ctx: &IngestJobContext, file: &Content) -> Result<TerminationCode> {
        let Some(path) = file.local_path.as_deref() else {
            trace!(file_id = file.id, "No local file to hash");
            return Ok(TerminationCode::None);
        };
        if file.md5_hash.is_some() && !self.rehash {
            return Ok(TerminationCode::None);
        }

        let terminator = ctx.process_terminator();
        let mut reader = tokio::fs::File::open(path)
            .await
            .map_err(|e| Error::module(Self::NAME, format!("{}: {e}", path.display())))?;

        let mut md5 = Md5::new();
        let mut sha256 = Sha256::new();
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut total = 0u64;
        loop {
            if terminator.should_terminate() {
                return Ok(terminator.termination_code());
            }
            let n = reader
                .read(&mut buf)
                .await
                .map_err(|e| Error::module(Self::NAME, format!("{}: {e}", path.display())))?;
            if n == 0 {
                break;
            }
            md5.update(&buf[..n]);
            sha256.update(&buf[..n]);
            total += n as u64;
        }

        let md5 = hex::encode(md5.finalize());
        let sha256 = hex::encode(sha256.finalize());
        debug!(file_id = file.id, bytes = total, %md5, "Hashed file");
        ctx.post_content_changed(file.id, Self::NAME, json!({ "md5": md5, "sha256": sha256 }));
        Ok(TerminationCode::None)
    }
}
