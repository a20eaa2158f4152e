use std::collections::HashMap;

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::pos::Pos;

/// Opens a replication stream to a primary. The byte stream produced is the
/// framed protocol described in [`crate::protocol`].
#[async_trait]
pub trait Client: Send + Sync {
    type Stream: AsyncRead + Send + Unpin;

    /// Honours `cancel`: connection attempts should abort promptly if the
    /// store is closing.
    async fn stream(
        &self,
        cancel: &CancellationToken,
        url: &str,
        node_id: u64,
        pos_map: HashMap<String, Pos>,
    ) -> Result<Self::Stream>;
}
