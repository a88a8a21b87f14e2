//! Chat service: user messages, summoned bot replies and presence changes.
//!
//! Every write goes to the [`Store`] first and is then published on the
//! [`Hub`], so WebSocket clients see exactly what was persisted.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::agents::AgentId;
use crate::completion::Completer;
use crate::error::{ChatError, Result};
use crate::hub::{self, Hub};
use crate::mention::parse_mention;
use crate::store::{Message, MessageKind, Store, User, MAX_MESSAGE_CHARS};

/// Result of [`ChatService::send_message`].
pub struct Posted {
    pub message: Message,
    pub summoned: Option<AgentId>,
    /// The pending bot reply, when the message summoned one.
    pub reply: Option<JoinHandle<Option<Message>>>,
}

pub struct ChatService {
    store: Arc<Store>,
    hub: Hub,
    completer: Arc<dyn Completer>,
    model: String,
}

impl ChatService {
    pub fn new(store: Arc<Store>, hub: Hub, completer: Arc<dyn Completer>, model: impl Into<String>) -> Self {
        Self { store, hub, completer, model: model.into() }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    // -- Presence ------------------------------------------------------------

    pub fn login(&self, username: &str) -> Result<User> {
        let user = self.store.login(username)?;
        self.hub.publish_all(hub::presence_event(&user, true));
        info!(user = %user.username, "login");
        Ok(user)
    }

    pub fn logout(&self, user_id: &str) -> Result<User> {
        let user = self.store.mark_offline(user_id)?;
        if !user.is_ai {
            self.hub.publish_all(hub::presence_event(&user, false));
            info!(user = %user.username, "logout");
        }
        Ok(user)
    }

    pub fn heartbeat(&self, user_id: &str) -> Result<()> {
        self.store.heartbeat(user_id)
    }

    // -- Messages ------------------------------------------------------------

    /// Post `text` from a human into `room_id`.
    ///
    /// A leading `@handle` schedules that bot's reply after its mention delay.
    pub fn send_message(self: &Arc<Self>, user_id: &str, room_id: &str, text: &str) -> Result<Posted> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::BadRequest("message is empty".into()));
        }
        if text.chars().count() > MAX_MESSAGE_CHARS {
            return Err(ChatError::BadRequest(format!(
                "message longer than {} characters",
                MAX_MESSAGE_CHARS
            )));
        }
        let user = self.store.user(user_id)?;
        if user.is_ai {
            return Err(ChatError::Forbidden);
        }
        let room = self.store.room(room_id)?;

        let message = self.store.insert_message(&room.id, &user.id, text, MessageKind::User)?;
        self.store.heartbeat(&user.id)?;
        self.hub.publish_message(&message);

        let mention = parse_mention(text);
        let summoned = mention.as_ref().map(|m| m.agent);
        let reply = mention.map(|m| {
            let this = Arc::clone(self);
            let room_id = room.id.clone();
            let author = user.username.clone();
            tokio::spawn(async move {
                tokio::time::sleep(m.agent.agent().mention_delay).await;
                match this.invoke_agent(m.agent, &room_id, &m.body, &author).await {
                    Ok(reply) => Some(reply),
                    Err(err) => {
                        warn!(%err, agent = %m.agent, "summoned reply lost");
                        None
                    }
                }
            })
        });

        Ok(Posted { message, summoned, reply })
    }

    /// Ask `agent` to answer `body` from `author` and post the answer.
    ///
    /// A failed completion posts the bot's fallback line instead; only a
    /// failure to write that line is returned as an error.
    pub async fn invoke_agent(&self, agent: AgentId, room_id: &str, body: &str, author: &str) -> Result<Message> {
        let profile = agent.agent();
        let bot = self.store.agent_user(agent)?;

        let reply = async {
            let budget = profile.budget_for(body);
            let mut history = self.store.recent_messages(room_id, budget.context_limit + 1)?;
            // The summoning line is quoted in the prompt, not repeated as context.
            if history.last().is_some_and(|m| m.username == author) {
                history.pop();
            }
            let prompt = profile.user_prompt(body, author, &history, budget);
            self.completer
                .complete(profile.completion_request(&self.model, prompt, budget.max_tokens))
                .await
        }
        .await;

        let text = match reply {
            Ok(text) => text,
            Err(err) => {
                warn!(%err, %agent, "completion failed, posting fallback");
                profile.fallback.to_string()
            }
        };
        let message = self.store.insert_message(room_id, &bot.id, &text, MessageKind::Ai)?;
        self.hub.publish_message(&message);
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::ScriptedCompleter;

    fn service(completer: ScriptedCompleter) -> (Arc<ChatService>, Arc<ScriptedCompleter>) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let completer = Arc::new(completer);
        let svc = ChatService::new(store, Hub::new(), completer.clone(), "m");
        (Arc::new(svc), completer)
    }

    #[tokio::test]
    async fn test_blank_message_rejected() {
        let (svc, _) = service(ScriptedCompleter::new());
        let user = svc.login("ana").unwrap();
        let room = svc.store().general_room().unwrap();
        assert!(matches!(svc.send_message(&user.id, &room.id, "   "), Err(ChatError::BadRequest(_))));
        assert!(svc.store().messages(&room.id, None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_room_or_user() {
        let (svc, _) = service(ScriptedCompleter::new());
        let user = svc.login("ana").unwrap();
        let room = svc.store().general_room().unwrap();
        assert!(matches!(svc.send_message(&user.id, "nope", "hola"), Err(ChatError::NotFound(_))));
        assert!(matches!(svc.send_message("ghost", &room.id, "hola"), Err(ChatError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_bots_cannot_post_as_users() {
        let (svc, _) = service(ScriptedCompleter::new());
        let neo = svc.store().agent_user(AgentId::Neo).unwrap();
        let room = svc.store().general_room().unwrap();
        assert!(matches!(svc.send_message(&neo.id, &room.id, "hola"), Err(ChatError::Forbidden)));
    }

    #[tokio::test]
    async fn test_plain_message_summons_nobody() {
        let (svc, completer) = service(ScriptedCompleter::always("x"));
        let user = svc.login("ana").unwrap();
        let room = svc.store().general_room().unwrap();
        let posted = svc.send_message(&user.id, &room.id, "  hola a todos ").unwrap();
        assert_eq!(posted.message.body, "hola a todos");
        assert!(posted.summoned.is_none());
        assert!(posted.reply.is_none());
        assert_eq!(completer.call_count(), 0);
    }

    #[tokio::test]
    async fn test_mention_posts_reply_after_delay() {
        let (svc, completer) = service(ScriptedCompleter::always("Correcto."));
        let user = svc.login("ana").unwrap();
        let room = svc.store().general_room().unwrap();
        let posted = svc.send_message(&user.id, &room.id, "@neo ¿qué ves en el futuro?").unwrap();
        assert_eq!(posted.summoned, Some(AgentId::Neo));
        let reply = posted.reply.unwrap().await.unwrap().unwrap();
        assert_eq!(reply.body, "Correcto.");
        assert_eq!(reply.username, "NEO");
        assert_eq!(reply.kind, MessageKind::Ai);

        let req = &completer.requests()[0];
        assert!(req.user.contains("MENSAJE PARA NEO: ¿qué ves en el futuro?"));
        // the summoning line is not duplicated in the context block
        assert!(req.user.contains("No hay conversación previa."));

        let msgs = svc.store().messages(&room.id, None).unwrap();
        assert_eq!(msgs.len(), 2);
    }

    #[tokio::test]
    async fn test_invoke_agent_failure_posts_fallback() {
        let (svc, _) = service(ScriptedCompleter::failing());
        let room = svc.store().general_room().unwrap();
        let msg = svc.invoke_agent(AgentId::Latamara, &room.id, "hola", "ana").await.unwrap();
        assert_eq!(msg.body, AgentId::Latamara.agent().fallback);
        assert_eq!(svc.store().messages(&room.id, None).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invoke_agent_uses_budget() {
        let (svc, completer) = service(ScriptedCompleter::always("¡Flipas!"));
        let room = svc.store().general_room().unwrap();
        svc.invoke_agent(AgentId::Latamara, &room.id, "qué tal", "ana").await.unwrap();
        assert_eq!(completer.requests()[0].max_tokens, 30);
    }

    #[tokio::test]
    async fn test_login_logout_publish_presence() {
        let (svc, _) = service(ScriptedCompleter::new());
        let room = svc.store().general_room().unwrap();
        let mut rx = svc.hub().subscribe(&room.id).unwrap();
        let user = svc.login("ana").unwrap();
        let on = rx.try_recv().unwrap();
        assert_eq!(on["notice"], "🟢 ana se conectó");
        svc.logout(&user.id).unwrap();
        let off = rx.try_recv().unwrap();
        assert_eq!(off["online"], false);
        assert_eq!(off["notice"], "🔴 ana se desconectó");
    }
}
