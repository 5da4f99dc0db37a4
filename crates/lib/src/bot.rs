//! The bot service: holds its dependencies (responder, engine, cluster
//! settings) and implements the per-event-kind business logic.
//!
//! Message events run the external command engine and send the reply back to
//! the conversation the command came from. Welcome events greet newly added
//! users in their group chat.

use crate::config::Settings;
use crate::engine::{CommandEngine, CommandRequest, PLATFORM_LARK};
use crate::events::{ConversationTarget, EventKind, InboundEvent, MessageEvent, WelcomeEvent};
use crate::lark::{AddressMode, DeliveryError, Responder};
use crate::router::{EventHandler, EventRouter};
use async_trait::async_trait;
use std::sync::Arc;

/// Fixed greeting appended to every welcome message.
const GREETING: &str = "Hello from botkube~ Play with me by at botkube <commands>";

/// The bot instance: one per process, constructed with its dependencies and
/// shared (via Arc) by the event handlers. Holds no mutable state.
pub struct LarkBot {
    allow_kubectl: bool,
    restrict_access: bool,
    cluster_name: String,
    default_namespace: String,
    responder: Arc<dyn Responder>,
    engine: Arc<dyn CommandEngine>,
}

impl LarkBot {
    pub fn new(
        settings: &Settings,
        responder: Arc<dyn Responder>,
        engine: Arc<dyn CommandEngine>,
    ) -> Self {
        Self {
            allow_kubectl: settings.kubectl.enabled,
            restrict_access: settings.kubectl.restrict_access,
            cluster_name: settings.cluster_name.clone(),
            default_namespace: settings.kubectl.default_namespace.clone(),
            responder,
            engine,
        }
    }

    /// Build the dispatch table: the message handler for `message`, the
    /// welcome handler for the three welcome-class kinds.
    pub fn router(self: Arc<Self>) -> EventRouter {
        let mut router = EventRouter::new();
        router.register(EventKind::Message, Arc::new(MessageHandler { bot: self.clone() }));
        let welcome = Arc::new(WelcomeHandler { bot: self });
        for kind in [
            EventKind::AddBot,
            EventKind::P2pChatCreate,
            EventKind::AddUserToChat,
        ] {
            router.register(kind, welcome.clone());
        }
        router
    }

    /// Run the command through the engine and send the reply to the
    /// conversation the command came from. The engine contract is
    /// synchronous, so it runs on the blocking pool.
    pub async fn handle_message(&self, message: MessageEvent) -> Result<(), DeliveryError> {
        let request = CommandRequest {
            text: message.text,
            kubectl_enabled: self.allow_kubectl,
            restrict_access: self.restrict_access,
            default_namespace: self.default_namespace.clone(),
            cluster_name: self.cluster_name.clone(),
            platform: PLATFORM_LARK,
            rich_formatting: true,
        };
        let engine = self.engine.clone();
        let reply = match tokio::task::spawn_blocking(move || engine.execute(&request)).await {
            Ok(reply) => reply,
            Err(e) => {
                log::warn!("executor task failed: {}", e);
                return Ok(());
            }
        };
        let (mode, target) = match &message.target {
            ConversationTarget::Group(chat_id) => (AddressMode::ChatId, chat_id.as_str()),
            ConversationTarget::Direct(open_id) => (AddressMode::OpenId, open_id.as_str()),
        };
        self.responder.send_text(mode, target, &reply).await
    }

    /// Greet newly added users in their group chat: one at-mention segment
    /// per user, then the fixed greeting, space-joined. With no users only
    /// the greeting is sent.
    pub async fn say_hello(&self, welcome: WelcomeEvent) -> Result<(), DeliveryError> {
        let mut segments: Vec<String> = welcome
            .users
            .iter()
            .map(|user| format!("<at user_id=\"{}\">{}</at>", user.open_id, user.user_id))
            .collect();
        segments.push(GREETING.to_string());
        self.responder
            .send_text(AddressMode::ChatId, &welcome.chat_id, &segments.join(" "))
            .await
    }
}

struct MessageHandler {
    bot: Arc<LarkBot>,
}

#[async_trait]
impl EventHandler for MessageHandler {
    async fn handle(&self, event: InboundEvent) -> Result<(), DeliveryError> {
        match event {
            InboundEvent::Message(message) => self.bot.handle_message(message).await,
            InboundEvent::Welcome(_) => {
                log::debug!("message handler received a welcome event, ignoring");
                Ok(())
            }
        }
    }
}

struct WelcomeHandler {
    bot: Arc<LarkBot>,
}

#[async_trait]
impl EventHandler for WelcomeHandler {
    async fn handle(&self, event: InboundEvent) -> Result<(), DeliveryError> {
        match event {
            InboundEvent::Welcome(welcome) => self.bot.say_hello(welcome).await,
            InboundEvent::Message(_) => {
                log::debug!("welcome handler received a message event, ignoring");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::WelcomeUser;
    use std::sync::Mutex;

    /// Records every send so tests can assert addressing and text.
    #[derive(Default)]
    struct RecordingResponder {
        sent: Mutex<Vec<(AddressMode, String, String)>>,
    }

    #[async_trait]
    impl Responder for RecordingResponder {
        async fn send_text(
            &self,
            mode: AddressMode,
            target: &str,
            text: &str,
        ) -> Result<(), DeliveryError> {
            self.sent
                .lock()
                .expect("lock")
                .push((mode, target.to_string(), text.to_string()));
            Ok(())
        }
    }

    /// Records the request and returns a fixed reply.
    struct FixedReplyEngine {
        reply: &'static str,
        requests: Mutex<Vec<CommandRequest>>,
    }

    impl FixedReplyEngine {
        fn new(reply: &'static str) -> Self {
            Self {
                reply,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    impl CommandEngine for FixedReplyEngine {
        fn execute(&self, request: &CommandRequest) -> String {
            self.requests.lock().expect("lock").push(request.clone());
            self.reply.to_string()
        }
    }

    fn bot_with_probes(
        reply: &'static str,
    ) -> (Arc<LarkBot>, Arc<RecordingResponder>, Arc<FixedReplyEngine>) {
        let mut settings = Settings::default();
        settings.cluster_name = "test-cluster".to_string();
        settings.kubectl.enabled = true;
        let responder = Arc::new(RecordingResponder::default());
        let engine = Arc::new(FixedReplyEngine::new(reply));
        let bot = Arc::new(LarkBot::new(&settings, responder.clone(), engine.clone()));
        (bot, responder, engine)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn group_message_replies_by_chat_id() {
        let (bot, responder, engine) = bot_with_probes("R");
        bot.handle_message(MessageEvent {
            text: "get pods".to_string(),
            target: ConversationTarget::Group("G1".to_string()),
        })
        .await
        .expect("handle");

        let requests = engine.requests.lock().expect("lock");
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].text, "get pods");
        assert!(requests[0].kubectl_enabled);
        assert_eq!(requests[0].cluster_name, "test-cluster");
        assert_eq!(requests[0].platform, "lark");
        assert!(requests[0].rich_formatting);

        let sent = responder.sent.lock().expect("lock");
        assert_eq!(
            *sent,
            vec![(AddressMode::ChatId, "G1".to_string(), "R".to_string())]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn direct_message_replies_by_open_id() {
        let (bot, responder, _engine) = bot_with_probes("R");
        bot.handle_message(MessageEvent {
            text: "get svc".to_string(),
            target: ConversationTarget::Direct("U7".to_string()),
        })
        .await
        .expect("handle");

        let sent = responder.sent.lock().expect("lock");
        assert_eq!(
            *sent,
            vec![(AddressMode::OpenId, "U7".to_string(), "R".to_string())]
        );
    }

    #[tokio::test]
    async fn welcome_with_one_user_mentions_then_greets() {
        let (bot, responder, _engine) = bot_with_probes("R");
        bot.say_hello(WelcomeEvent {
            chat_id: "G2".to_string(),
            users: vec![WelcomeUser {
                open_id: "U1".to_string(),
                user_id: "alice".to_string(),
            }],
        })
        .await
        .expect("say hello");

        let sent = responder.sent.lock().expect("lock");
        assert_eq!(
            *sent,
            vec![(
                AddressMode::ChatId,
                "G2".to_string(),
                "<at user_id=\"U1\">alice</at> Hello from botkube~ Play with me by at botkube <commands>"
                    .to_string()
            )]
        );
    }

    #[tokio::test]
    async fn welcome_with_no_users_sends_only_the_greeting() {
        let (bot, responder, _engine) = bot_with_probes("R");
        bot.say_hello(WelcomeEvent {
            chat_id: "G3".to_string(),
            users: Vec::new(),
        })
        .await
        .expect("say hello");

        let sent = responder.sent.lock().expect("lock");
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].2,
            "Hello from botkube~ Play with me by at botkube <commands>"
        );
    }

    #[tokio::test]
    async fn welcome_preserves_user_order() {
        let (bot, responder, _engine) = bot_with_probes("R");
        let users = vec![
            WelcomeUser {
                open_id: "U1".to_string(),
                user_id: "alice".to_string(),
            },
            WelcomeUser {
                open_id: "U2".to_string(),
                user_id: "bob".to_string(),
            },
            WelcomeUser {
                open_id: "U3".to_string(),
                user_id: "carol".to_string(),
            },
        ];
        bot.say_hello(WelcomeEvent {
            chat_id: "G4".to_string(),
            users,
        })
        .await
        .expect("say hello");

        let sent = responder.sent.lock().expect("lock");
        assert_eq!(
            sent[0].2,
            "<at user_id=\"U1\">alice</at> <at user_id=\"U2\">bob</at> <at user_id=\"U3\">carol</at> \
             Hello from botkube~ Play with me by at botkube <commands>"
        );
    }

    /// Responder that always fails, to check the error reaches the caller
    /// (the router logs it; no retry happens).
    struct FailingResponder;

    #[async_trait]
    impl Responder for FailingResponder {
        async fn send_text(
            &self,
            _mode: AddressMode,
            _target: &str,
            _text: &str,
        ) -> Result<(), DeliveryError> {
            Err(DeliveryError::Api("boom".to_string()))
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delivery_failure_is_surfaced_once_without_retry() {
        let mut settings = Settings::default();
        settings.cluster_name = "c".to_string();
        let engine = Arc::new(FixedReplyEngine::new("R"));
        let bot = LarkBot::new(&settings, Arc::new(FailingResponder), engine.clone());
        let result = bot
            .handle_message(MessageEvent {
                text: "get pods".to_string(),
                target: ConversationTarget::Group("G1".to_string()),
            })
            .await;
        assert!(result.is_err());
        assert_eq!(engine.requests.lock().expect("lock").len(), 1);
    }
}
