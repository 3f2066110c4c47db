//! Dialogue storage backed by the session cache.
//!
//! The dispatcher and the flow runners share one [`MemorySessionStore`], so a
//! state written by a background flow is what the next update of the chat
//! sees.

use crate::session::{MemorySessionStore, SessionStore};
use futures_util::future::BoxFuture;
use std::convert::Infallible;
use std::sync::Arc;
use teloxide::dispatching::dialogue::Storage;
use teloxide::types::ChatId;

impl<D> Storage<D> for MemorySessionStore<D>
where
    D: Clone + Send + Sync + 'static,
{
    type Error = Infallible;

    fn remove_dialogue(self: Arc<Self>, chat_id: ChatId) -> BoxFuture<'static, Result<(), Self::Error>>
    where
        D: Send + 'static,
    {
        Box::pin(async move {
            self.clear(chat_id.0).await;
            Ok(())
        })
    }

    fn update_dialogue(
        self: Arc<Self>,
        chat_id: ChatId,
        dialogue: D,
    ) -> BoxFuture<'static, Result<(), Self::Error>>
    where
        D: Send + 'static,
    {
        Box::pin(async move {
            self.set(chat_id.0, dialogue).await;
            Ok(())
        })
    }

    fn get_dialogue(self: Arc<Self>, chat_id: ChatId) -> BoxFuture<'static, Result<Option<D>, Self::Error>> {
        Box::pin(async move { Ok(self.get(chat_id.0).await) })
    }
}
