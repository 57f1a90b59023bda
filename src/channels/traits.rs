use crate::controller::{InboundEvent, Reply};
use async_trait::async_trait;

/// A messaging transport the conversation loop can drive.
#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;

    /// Render one reply in its language and deliver every prompt, in order.
    async fn send(&self, reply: &Reply) -> anyhow::Result<()>;

    /// Feed inbound events into `tx` until the transport closes.
    async fn listen(&self, tx: tokio::sync::mpsc::Sender<InboundEvent>) -> anyhow::Result<()>;

    async fn health_check(&self) -> bool {
        true
    }
}
