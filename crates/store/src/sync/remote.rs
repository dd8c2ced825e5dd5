use async_trait::async_trait;

use super::messages::{Message, PullRequest, PullResponse, PushRequest, PushResponse, Reply};
use super::SyncError;
use crate::linked_data::CodecError;
use crate::store::SyncableStore;

/// The other side of a sync, as seen by the driver
///
/// The transport is up to the implementation; failures on the replica come
/// back as [`SyncError::Remote`] carrying the replica's error code.
#[async_trait]
pub trait SyncRemote: Send + Sync {
    async fn pull(&self, request: PullRequest) -> Result<PullResponse, SyncError>;

    async fn push(&self, request: PushRequest) -> Result<PushResponse, SyncError>;
}

/// A remote living in the same process
///
/// Every request and reply still goes through the bincode wire encoding,
/// so it behaves like a networked replica minus the network.
#[derive(Debug, Clone)]
pub struct LocalRemote {
    store: SyncableStore,
}

impl LocalRemote {
    pub fn new(store: SyncableStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &SyncableStore {
        &self.store
    }

    /// Decode a request, run it against the store and encode the reply
    pub async fn handle(&self, message_bytes: &[u8]) -> Result<Vec<u8>, SyncError> {
        let message: Message = bincode::deserialize(message_bytes).map_err(CodecError::from)?;
        let reply = match message {
            Message::Pull(request) => match self.store.pull(&request).await {
                Ok(response) => Reply::Pull(response),
                Err(e) => Reply::Error {
                    code: e.code(),
                    message: e.to_string(),
                },
            },
            Message::Push(request) => match self.store.push(request).await {
                Ok(response) => Reply::Push(response),
                Err(e) => Reply::Error {
                    code: e.code(),
                    message: e.to_string(),
                },
            },
        };
        Ok(bincode::serialize(&reply).map_err(CodecError::from)?)
    }

    async fn round_trip(&self, message: Message) -> Result<Reply, SyncError> {
        let request = bincode::serialize(&message).map_err(CodecError::from)?;
        let reply = self.handle(&request).await?;
        Ok(bincode::deserialize(&reply).map_err(CodecError::from)?)
    }
}

#[async_trait]
impl SyncRemote for LocalRemote {
    async fn pull(&self, request: PullRequest) -> Result<PullResponse, SyncError> {
        match self.round_trip(Message::Pull(request)).await? {
            Reply::Pull(response) => Ok(response),
            Reply::Error { code, message } => Err(SyncError::Remote { code, message }),
            other => Err(SyncError::UnexpectedReply(format!("{other:?}"))),
        }
    }

    async fn push(&self, request: PushRequest) -> Result<PushResponse, SyncError> {
        match self.round_trip(Message::Push(request)).await? {
            Reply::Push(response) => Ok(response),
            Reply::Error { code, message } => Err(SyncError::Remote { code, message }),
            other => Err(SyncError::UnexpectedReply(format!("{other:?}"))),
        }
    }
}
