//! Messaging-channel bridge
//!
//! Inbound channel messages are mapped to an assistant by sender address and
//! run through the same turn runtime as HTTP chat. Replies go back out through
//! a [`ChannelSender`].

pub mod whatsapp;

pub use whatsapp::{parse_inbound, verify_signature, verify_subscription, WebhookPayload, WhatsAppSender};

use crate::db::{Database, DbError};
use crate::runtime::{
    CompletionClient, ConversationStore, Transcriber, TurnError, TurnOutcome, TurnRequest, TurnRuntime,
    TurnTarget,
};
use crate::state_machine::TurnErrorKind;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Sent instead of a reply when the provider fails
pub const APOLOGY_REPLY: &str = "Sorry, I'm having trouble processing your request right now.";

/// One inbound text message from a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub sender_address: String,
    pub text: String,
}

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Channel not configured: {0}")]
    NotConfigured(String),
    #[error("Channel delivery failed: {0}")]
    Delivery(String),
    #[error(transparent)]
    Turn(#[from] TurnError),
    #[error(transparent)]
    Storage(#[from] DbError),
}

/// Outbound side of a messaging channel
#[async_trait]
pub trait ChannelSender: Send + Sync {
    async fn send_message(&self, address: &str, text: &str) -> Result<(), ChannelError>;
}

#[async_trait]
impl<T: ChannelSender + ?Sized> ChannelSender for Arc<T> {
    async fn send_message(&self, address: &str, text: &str) -> Result<(), ChannelError> {
        (**self).send_message(address, text).await
    }
}

/// What the bridge did with an inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeOutcome {
    /// No assistant is linked to the sender
    Ignored,
    Replied { conversation_id: String },
    /// The provider failed and the apology text was sent
    Apologized,
}

pub struct ChannelBridge {
    db: Database,
    sender: Arc<dyn ChannelSender>,
    reuse_conversations: bool,
}

impl ChannelBridge {
    pub fn new(db: Database, sender: Arc<dyn ChannelSender>, reuse_conversations: bool) -> Self {
        Self {
            db,
            sender,
            reuse_conversations,
        }
    }

    /// Answer one inbound message through `runtime`
    pub async fn handle_inbound<S, C, T>(
        &self,
        runtime: &TurnRuntime<S, C, T>,
        inbound: &InboundMessage,
    ) -> Result<BridgeOutcome, ChannelError>
    where
        S: ConversationStore,
        C: CompletionClient,
        T: Transcriber,
    {
        let address = inbound.sender_address.as_str();
        let Some(assistant) = self.db.find_assistant_by_channel_address(address)? else {
            tracing::info!(sender = %address, "No assistant linked to channel address");
            return Ok(BridgeOutcome::Ignored);
        };

        let target = if self.reuse_conversations {
            TurnTarget::Conversation(self.bound_conversation(address, &assistant.id)?)
        } else {
            TurnTarget::Assistant(assistant.id.clone())
        };

        match runtime.run_turn(TurnRequest::text(target, inbound.text.clone())).await {
            Ok(outcome) => {
                let conversation_id = outcome.conversation_id().to_string();
                if let TurnOutcome::Replied { reply, .. } = outcome {
                    self.sender.send_message(address, &reply).await?;
                }
                tracing::info!(sender = %address, conv_id = %conversation_id, "Channel message answered");
                Ok(BridgeOutcome::Replied { conversation_id })
            }
            Err(e) if e.kind == TurnErrorKind::ProviderError => {
                tracing::warn!(sender = %address, error = %e, "Provider failed, sending apology");
                self.sender.send_message(address, APOLOGY_REPLY).await?;
                Ok(BridgeOutcome::Apologized)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn bound_conversation(&self, address: &str, assistant_id: &str) -> Result<String, DbError> {
        let (id, created) = self.db.bound_channel_conversation(address, assistant_id)?;
        if created {
            tracing::info!(sender = %address, conv_id = %id, "Bound channel conversation");
        }
        Ok(id)
    }
}
