//! Download tokens: capability-style access to merged artifacts.
//!
//! Tokens are unguessable random strings with a fixed TTL. Resolving a
//! token distinguishes "expired" from "never existed", and the reaper
//! deletes expired outputs together with their backing blobs.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;

use crate::db::output_repo::{self, OutputRow};
use crate::db::Database;
use crate::error::{Result, TokenError};
use crate::storage::BlobStore;

const TOKEN_BYTES: usize = 32;

/// Generates a url-safe random download token.
pub fn generate_token() -> Result<String> {
    let mut buf = [0u8; TOKEN_BYTES];
    getrandom::fill(&mut buf).map_err(TokenError::Generation)?;
    Ok(URL_SAFE_NO_PAD.encode(buf))
}

/// Resolves tokens to outputs and reclaims expired ones.
#[derive(Clone)]
pub struct TokenService {
    db: Database,
    blob: Arc<dyn BlobStore>,
}

impl TokenService {
    pub fn new(db: Database, blob: Arc<dyn BlobStore>) -> Self {
        Self { db, blob }
    }

    /// Resolves a token to its output row and counts the download.
    ///
    /// A token for an output past its TTL yields `Expired` until the
    /// reaper removes the row, after which it yields `NotFound` like
    /// any token that never existed.
    pub fn resolve(&self, token: &str) -> Result<OutputRow> {
        let now = Utc::now().to_rfc3339();
        let resolved = self.db.with_conn(|conn| {
            let output = match output_repo::find_by_token(conn, token)? {
                Some(o) => o,
                None => return Ok(Err(TokenError::NotFound)),
            };
            if output.expires_at <= now {
                return Ok(Err(TokenError::Expired));
            }
            output_repo::increment_download_count(conn, &output.id)?;
            Ok(Ok(output))
        })?;
        Ok(resolved?)
    }

    /// Resolves a token and returns the artifact bytes.
    pub fn download(&self, token: &str) -> Result<(OutputRow, Vec<u8>)> {
        let output = self.resolve(token)?;
        let bytes = self.blob.get(&output.storage_ref)?;
        Ok((output, bytes))
    }

    /// Deletes all expired outputs and their blobs. Returns how many
    /// were reaped. Safe to run repeatedly and concurrently with
    /// downloads: resolution already refuses expired tokens.
    pub fn reap_expired(&self) -> Result<u64> {
        let now = Utc::now().to_rfc3339();
        let expired = self
            .db
            .with_conn(|conn| output_repo::list_expired(conn, &now))?;

        let mut reaped = 0;
        for output in expired {
            // Blob first: if the row delete then fails, the next sweep
            // retries and blob deletion is a no-op for missing blobs.
            self.blob.delete(&output.storage_ref)?;
            let deleted = self
                .db
                .with_conn(|conn| output_repo::delete(conn, &output.id))?;
            if deleted {
                reaped += 1;
                log::debug!(
                    "Reaped expired output {} of job {}",
                    output.id,
                    output.job_id
                );
            }
        }
        if reaped > 0 {
            log::info!("Reaped {} expired output(s)", reaped);
        }
        Ok(reaped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::job_repo;
    use crate::db::output_repo::tests::sample_output;
    use crate::error::DocbatchError;
    use crate::storage::MemoryBlobStore;
    use chrono::Duration;

    fn setup() -> (TokenService, Database, Arc<MemoryBlobStore>) {
        let db = Database::open_in_memory().unwrap();
        let blob = Arc::new(MemoryBlobStore::new());
        db.with_conn(|conn| job_repo::insert(conn, &job_repo::tests::sample_job("j1")))
            .unwrap();
        (TokenService::new(db.clone(), blob.clone()), db, blob)
    }

    fn insert_output(db: &Database, blob: &MemoryBlobStore, token: &str, ttl: Duration) -> String {
        let storage_ref = blob.put(b"merged text").unwrap();
        let mut output = sample_output(token, "j1", token);
        output.storage_ref = storage_ref.clone();
        output.expires_at = (Utc::now() + ttl).to_rfc3339();
        db.with_conn(|conn| output_repo::insert(conn, &output))
            .unwrap();
        storage_ref
    }

    #[test]
    fn test_generate_token_is_unique_and_url_safe() {
        let a = generate_token().unwrap();
        let b = generate_token().unwrap();
        assert_ne!(a, b);
        assert!(a.len() >= 40);
        assert!(a
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_resolve_counts_downloads() {
        let (service, db, blob) = setup();
        insert_output(&db, &blob, "tok-1", Duration::hours(1));

        let first = service.resolve("tok-1").unwrap();
        let second = service.resolve("tok-1").unwrap();
        assert_eq!(first.download_count, 0);
        assert_eq!(second.download_count, 1);
    }

    #[test]
    fn test_download_returns_bytes() {
        let (service, db, blob) = setup();
        insert_output(&db, &blob, "tok-1", Duration::hours(1));

        let (output, bytes) = service.download("tok-1").unwrap();
        assert_eq!(output.job_id, "j1");
        assert_eq!(bytes, b"merged text");
    }

    #[test]
    fn test_unknown_token_not_found() {
        let (service, _, _) = setup();
        let err = service.resolve("no-such-token").unwrap_err();
        assert!(matches!(err, DocbatchError::Token(TokenError::NotFound)));
    }

    #[test]
    fn test_expired_token_then_reaped_token() {
        let (service, db, blob) = setup();
        insert_output(&db, &blob, "tok-1", Duration::hours(-1));

        let err = service.resolve("tok-1").unwrap_err();
        assert!(matches!(err, DocbatchError::Token(TokenError::Expired)));

        assert_eq!(service.reap_expired().unwrap(), 1);
        assert!(blob.is_empty());

        // Once reaped the token is indistinguishable from a bad one.
        let err = service.resolve("tok-1").unwrap_err();
        assert!(matches!(err, DocbatchError::Token(TokenError::NotFound)));
    }

    #[test]
    fn test_reap_leaves_live_outputs() {
        let (service, db, blob) = setup();
        insert_output(&db, &blob, "tok-old", Duration::hours(-1));
        insert_output(&db, &blob, "tok-live", Duration::hours(1));

        assert_eq!(service.reap_expired().unwrap(), 1);
        assert_eq!(service.reap_expired().unwrap(), 0);
        assert!(service.resolve("tok-live").is_ok());
        assert_eq!(blob.len(), 1);
    }
}
