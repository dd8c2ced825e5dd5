use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

use super::messages::{PullOutcome, PullRequest, PullStrategy, PushRequest, PushResponse};
use super::remote::SyncRemote;
use super::SyncError;
use crate::path::SyncablePath;
use crate::store::SyncableStore;

/// What one direction of a sync did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub rounds: usize,
    /// Items created on the receiving side by top level pushes
    pub replicated: usize,
}

impl SyncReport {
    fn merge(self, other: SyncReport) -> SyncReport {
        SyncReport {
            rounds: self.rounds + other.rounds,
            replicated: self.replicated + other.replicated,
        }
    }
}

/// Outcome of walking one subtree
#[derive(Debug, Clone, Copy, Default)]
struct Pass {
    in_sync: bool,
    replicated: usize,
}

/// Brings a local store and a remote replica to the same tree
///
/// Each direction walks down from the root comparing hashes and only
/// descends into children whose hashes differ. A direction is done once the
/// root hashes match, or once a full round replicates nothing (the other
/// side has items this side will never send).
pub struct SyncDriver {
    local: SyncableStore,
    remote: Arc<dyn SyncRemote>,
    strategy: PullStrategy,
}

impl SyncDriver {
    pub fn new(local: SyncableStore, remote: impl SyncRemote + 'static) -> Self {
        Self {
            local,
            remote: Arc::new(remote),
            strategy: PullStrategy::Default,
        }
    }

    pub fn with_strategy(mut self, strategy: PullStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn local(&self) -> &SyncableStore {
        &self.local
    }

    /// Pull everything the remote has, then push everything it lacks
    pub async fn sync(&self) -> Result<SyncReport, SyncError> {
        let pulled = self.pull_from_remote().await?;
        let pushed = self.push_to_remote().await?;
        Ok(pulled.merge(pushed))
    }

    pub async fn pull_from_remote(&self) -> Result<SyncReport, SyncError> {
        let root = self.local.root_path();
        let max_rounds = self.local.config().max_sync_rounds;
        let mut report = SyncReport::default();
        for round in 1..=max_rounds {
            report.rounds = round;
            let pass = self.pull_path(&root).await?;
            report.replicated += pass.replicated;
            tracing::debug!("pull round {}: {} replicated", round, pass.replicated);
            if pass.in_sync || pass.replicated == 0 {
                tracing::info!(
                    "pulled {} items from remote in {} rounds",
                    report.replicated,
                    report.rounds
                );
                return Ok(report);
            }
        }
        Err(SyncError::NotConverged { rounds: max_rounds })
    }

    pub async fn push_to_remote(&self) -> Result<SyncReport, SyncError> {
        let root = self.local.root_path();
        let max_rounds = self.local.config().max_sync_rounds;
        let mut report = SyncReport::default();
        for round in 1..=max_rounds {
            report.rounds = round;
            let pass = self.push_path(&root).await?;
            report.replicated += pass.replicated;
            tracing::debug!("push round {}: {} replicated", round, pass.replicated);
            if pass.in_sync || pass.replicated == 0 {
                tracing::info!(
                    "pushed {} items to remote in {} rounds",
                    report.replicated,
                    report.rounds
                );
                return Ok(report);
            }
        }
        Err(SyncError::NotConverged { rounds: max_rounds })
    }

    fn pull_path<'a>(&'a self, path: &'a SyncablePath) -> BoxFuture<'a, Result<Pass, SyncError>> {
        async move {
            let local_exists = self.local.backing().exists_at_path(path).await?;
            let hash = if local_exists {
                Some(self.local.get_hash(path).await?)
            } else {
                None
            };
            let request = PullRequest::new(path.clone(), hash, self.strategy);
            let response = match self.remote.pull(request).await {
                Ok(response) => response,
                Err(e) if e.is_not_found() => {
                    tracing::debug!("remote has no {}", path);
                    return Ok(Pass::default());
                }
                Err(e) => return Err(e),
            };
            let item_type = response.item_type();
            let PullOutcome::OutOfSync(payload) = response.into_outcome() else {
                return Ok(Pass {
                    in_sync: true,
                    replicated: 0,
                });
            };

            let mut pass = Pass::default();
            let hashes_by_id = payload.hashes_by_id.clone();
            if local_exists {
                // the remote inlined the subtree, so take it before walking
                if let Some(contents) = payload.batch_contents {
                    pass.replicated += self.local.push_batch_contents(contents).await?;
                }
            } else {
                let request = PushRequest::from_pull(path.clone(), item_type, payload);
                match self.local.push(request).await? {
                    PushResponse::Ok => pass.replicated += 1,
                    PushResponse::NotFound => {
                        tracing::debug!("cannot replicate {} yet", path);
                        return Ok(pass);
                    }
                }
            }

            for (id, remote_hash) in hashes_by_id {
                let child = path.append(id);
                if self.local.backing().exists_at_path(&child).await?
                    && self.local.get_hash(&child).await? == remote_hash
                {
                    continue;
                }
                pass.replicated += self.pull_path(&child).await?.replicated;
            }
            Ok(pass)
        }
        .boxed()
    }

    fn push_path<'a>(&'a self, path: &'a SyncablePath) -> BoxFuture<'a, Result<Pass, SyncError>> {
        async move {
            let hash = self.local.get_hash(path).await?;
            let request = PullRequest::new(path.clone(), Some(hash), PullStrategy::Default);
            let mut pass = Pass::default();
            let remote_hashes = match self.remote.pull(request).await {
                Ok(response) => match response.into_outcome() {
                    PullOutcome::InSync => {
                        return Ok(Pass {
                            in_sync: true,
                            replicated: 0,
                        })
                    }
                    PullOutcome::OutOfSync(payload) => payload.hashes_by_id,
                },
                Err(e) if e.is_not_found() => {
                    let request = self.push_request_for(path).await?;
                    let inlined = request.batch_contents.is_some();
                    match self.remote.push(request).await? {
                        PushResponse::Ok => pass.replicated += 1,
                        PushResponse::NotFound => {
                            tracing::debug!("remote cannot take {} yet", path);
                            return Ok(pass);
                        }
                    }
                    if inlined {
                        return Ok(pass);
                    }
                    // the remote now has the item but none of its children
                    Default::default()
                }
                Err(e) => return Err(e),
            };

            if !path.item_type().is_container() {
                return Ok(pass);
            }
            for id in self.local.backing().get_ids_in_path(path, None).await? {
                let child = path.append(id.clone());
                let child_hash = self.local.get_hash(&child).await?;
                if remote_hashes.get(&id) == Some(&child_hash) {
                    continue;
                }
                pass.replicated += self.push_path(&child).await?.replicated;
            }
            Ok(pass)
        }
        .boxed()
    }

    async fn push_request_for(&self, path: &SyncablePath) -> Result<PushRequest, SyncError> {
        let stored = self.local.backing().get_at_path(path, None).await?;
        let (data, batch_contents) = if stored.item_type.is_container() {
            let batch = match self.strategy {
                PullStrategy::Batch => Some(self.local.batch_contents(path).await?),
                PullStrategy::Default => None,
            };
            (None, batch)
        } else {
            (Some(self.local.backing().get_data_at_path(path).await?), None)
        };
        Ok(PushRequest {
            item_type: stored.item_type,
            path: path.clone(),
            metadata: stored.item,
            data,
            batch_contents,
        })
    }
}
