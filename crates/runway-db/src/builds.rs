//! Build records, their secondary indices and status transitions.

use std::collections::BTreeSet;
use std::ops::ControlFlow;

use chrono::Utc;
use runway_core::{Build, BuildId, BuildStatus, BuildType};

use crate::schema::{Bucket, Namespace, key_seq, ref_name_from_key, ref_type_prefix, seq_key};
use crate::store::{Order, ReadTx, WriteTx};
use crate::{Db, DbError, DbResult};

/// Check a `[start, end)` range where `end == -1` means unbounded.
pub fn validate_range(start: i64, end: i64) -> DbResult<()> {
    if start < 0 {
        return Err(DbError::InvalidRange(format!(
            "invalid argument start: {}",
            start
        )));
    }
    if end < -1 {
        return Err(DbError::InvalidRange(format!("invalid argument end: {}", end)));
    }
    if end >= 0 && start > end {
        return Err(DbError::InvalidRange(format!(
            "invalid argument start: {}, end: {}",
            start, end
        )));
    }
    Ok(())
}

fn encode(build: &Build) -> DbResult<Vec<u8>> {
    Ok(serde_json::to_vec(build)?)
}

fn decode(bytes: &[u8]) -> DbResult<Build> {
    Ok(serde_json::from_slice(bytes)?)
}

fn not_found(id: BuildId) -> DbError {
    DbError::NotFound(format!("build {} does not exist", id))
}

pub(crate) fn read_build(tx: &mut ReadTx, id: BuildId) -> DbResult<Build> {
    let bytes = tx.get(&Bucket::Builds, id.get())?.ok_or_else(|| not_found(id))?;
    decode(&bytes)
}

fn load_build(tx: &mut WriteTx, id: BuildId) -> DbResult<Build> {
    let bytes = tx.get(&Bucket::Builds, id.get())?.ok_or_else(|| not_found(id))?;
    decode(&bytes)
}

fn read_builds(tx: &mut ReadTx, ids: &[BuildId]) -> DbResult<Vec<Build>> {
    ids.iter().map(|id| read_build(tx, *id)).collect()
}

/// Collect the build IDs stored as values of an index bucket.
fn index_ids(
    tx: &mut ReadTx,
    bucket: &Bucket<'_>,
    order: Order,
    skip: usize,
    limit: Option<usize>,
) -> DbResult<Vec<BuildId>> {
    let mut ids = Vec::new();
    if limit == Some(0) {
        return Ok(ids);
    }
    let mut skipped = 0;
    tx.cursor(bucket, .., order, |_, value| {
        if skipped < skip {
            skipped += 1;
            return Ok(ControlFlow::Continue(()));
        }
        ids.push(BuildId::new(key_seq(value)?));
        if limit.is_some_and(|limit| ids.len() >= limit) {
            Ok(ControlFlow::Break(()))
        } else {
            Ok(ControlFlow::Continue(()))
        }
    })?;
    Ok(ids)
}

impl Db {
    /// Queue a new build.
    ///
    /// The record, its SHA and ref index entries and its pending marker are
    /// written in one transaction.
    pub fn create_build(
        &self,
        build_type: BuildType,
        clone_url: &str,
        ref_name: &str,
        commit_sha: &str,
    ) -> DbResult<Build> {
        self.create_repository_build(build_type, None, clone_url, ref_name, commit_sha)
    }

    /// Queue a new build whose statuses belong to `repository`
    /// (`owner/name`) rather than to the repository it clones.
    pub fn create_repository_build(
        &self,
        build_type: BuildType,
        repository: Option<&str>,
        clone_url: &str,
        ref_name: &str,
        commit_sha: &str,
    ) -> DbResult<Build> {
        self.store().update(|tx| {
            let id = BuildId::new(tx.next_sequence(&Bucket::Builds)?);
            let build = Build::queued(id, build_type, clone_url, ref_name, commit_sha)
                .with_repository(repository.map(str::to_string));
            tx.put(&Bucket::Builds, id.get(), &encode(&build)?)?;

            let sha_bucket = Bucket::Sha(commit_sha);
            let sha_seq = tx.next_sequence(&sha_bucket)?;
            tx.put(&sha_bucket, sha_seq, &seq_key(id.get()))?;

            let ref_bucket = Bucket::Ref(build_type, ref_name);
            let ref_seq = tx.next_sequence(&ref_bucket)?;
            tx.put(&ref_bucket, ref_seq, &seq_key(id.get()))?;

            tx.put(&Bucket::Pending, id.get(), &[])?;
            Ok(build)
        })
    }

    /// Look up one build.
    pub fn build(&self, id: BuildId) -> DbResult<Build> {
        self.store().view(|tx| read_build(tx, id))
    }

    /// Builds that are queued or running, oldest first.
    pub fn pending_builds(&self) -> DbResult<Vec<Build>> {
        self.store().view(|tx| {
            let mut ids = Vec::new();
            tx.cursor(&Bucket::Pending, .., Order::Ascending, |seq, _| {
                ids.push(BuildId::new(seq));
                Ok(ControlFlow::Continue(()))
            })?;
            read_builds(tx, &ids)
        })
    }

    /// Ref names that have builds of `build_type`, sorted.
    pub fn refs(&self, build_type: BuildType) -> DbResult<Vec<String>> {
        self.store().view(|tx| {
            let mut refs = BTreeSet::new();
            tx.cursor_prefix(
                Namespace::Ref,
                &ref_type_prefix(build_type),
                Order::Ascending,
                |key, _| {
                    refs.insert(ref_name_from_key(key)?);
                    Ok(ControlFlow::Continue(()))
                },
            )?;
            Ok(refs.into_iter().collect())
        })
    }

    /// Builds of a ref, newest first.
    ///
    /// `start` counts back from the newest build (0 is the newest) and
    /// `end` is exclusive; `end == -1` returns everything from `start` to
    /// the oldest build.
    pub fn ref_builds(
        &self,
        build_type: BuildType,
        ref_name: &str,
        start: i64,
        end: i64,
    ) -> DbResult<Vec<Build>> {
        validate_range(start, end)?;
        if start == end {
            return Ok(Vec::new());
        }

        let limit = (end >= 0).then(|| (end - start) as usize);
        self.store().view(|tx| {
            let ids = index_ids(
                tx,
                &Bucket::Ref(build_type, ref_name),
                Order::Descending,
                start as usize,
                limit,
            )?;
            read_builds(tx, &ids)
        })
    }

    /// Every build recorded for a commit, oldest first.
    pub fn sha_builds(&self, commit_sha: &str) -> DbResult<Vec<Build>> {
        self.store().view(|tx| {
            let ids = index_ids(tx, &Bucket::Sha(commit_sha), Order::Ascending, 0, None)?;
            read_builds(tx, &ids)
        })
    }

    /// The most recently created builds across all refs, newest first.
    pub fn recent_builds(&self, limit: usize) -> DbResult<Vec<Build>> {
        self.store().view(|tx| {
            let mut builds = Vec::new();
            if limit == 0 {
                return Ok(builds);
            }
            tx.cursor(&Bucket::Builds, .., Order::Descending, |_, value| {
                builds.push(decode(value)?);
                Ok(if builds.len() >= limit {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                })
            })?;
            Ok(builds)
        })
    }

    /// Move a queued build to running.
    ///
    /// Returns `None` if the build is not queued, so of several concurrent
    /// callers exactly one gets the build.
    pub fn claim(&self, id: BuildId) -> DbResult<Option<Build>> {
        self.store().update(|tx| {
            let mut build = load_build(tx, id)?;
            if build.status != BuildStatus::Queued {
                return Ok(None);
            }
            build.status = BuildStatus::Running;
            build.started_at = Some(Utc::now());
            tx.put(&Bucket::Builds, id.get(), &encode(&build)?)?;
            Ok(Some(build))
        })
    }

    /// Take over a build left running by a previous server process.
    ///
    /// Only startup recovery may call this, before any worker runs.
    pub fn resume(&self, id: BuildId) -> DbResult<Option<Build>> {
        self.store().view(|tx| {
            let build = read_build(tx, id)?;
            Ok((build.status == BuildStatus::Running).then_some(build))
        })
    }

    /// Move a running build to a terminal status and drop it from the
    /// pending queue.
    pub fn finish(&self, id: BuildId, status: BuildStatus) -> DbResult<Build> {
        self.store().update(|tx| {
            let mut build = load_build(tx, id)?;
            if !build.status.can_transition_to(status) || !status.is_terminal() {
                return Err(DbError::InvalidTransition {
                    id,
                    from: build.status,
                    to: status,
                });
            }
            build.status = status;
            build.finished_at = Some(Utc::now());
            tx.put(&Bucket::Builds, id.get(), &encode(&build)?)?;
            tx.delete(&Bucket::Pending, id.get())?;
            Ok(build)
        })
    }
}
