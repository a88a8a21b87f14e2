//! Lounge administration: start/stop, topic, speed, agent toggles, purge.
//!
//! Every action needs an acting user id (401 without one) that belongs to an
//! admin (403 otherwise).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use crate::agents::AgentId;
use crate::error::{ChatError, Result};
use crate::hub::{self, Hub};
use crate::lounge::{enabled_agents, LoungeScheduler};
use crate::store::{ConversationStatus, NewTopic, StatusPatch, Store, Topic, User};

/// Body of `POST /api/admin/ai-control`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ControlRequest {
    #[serde(rename = "userId", default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub speed: Option<i64>,
    #[serde(default)]
    pub neo_enabled: Option<bool>,
    #[serde(default)]
    pub latamara_enabled: Option<bool>,
    #[serde(default)]
    pub barrilinter_enabled: Option<bool>,
    #[serde(default)]
    pub laconchita_enabled: Option<bool>,
    #[serde(default)]
    pub marktukemberg_enabled: Option<bool>,
    #[serde(default)]
    pub robertthecoach_enabled: Option<bool>,
}

impl ControlRequest {
    /// Agent flags present in the request.
    pub fn flags(&self) -> BTreeMap<AgentId, bool> {
        [
            (AgentId::Neo, self.neo_enabled),
            (AgentId::Latamara, self.latamara_enabled),
            (AgentId::Barrilinter, self.barrilinter_enabled),
            (AgentId::Laconchita, self.laconchita_enabled),
            (AgentId::Marktukemberg, self.marktukemberg_enabled),
            (AgentId::Robertthecoach, self.robertthecoach_enabled),
        ]
        .into_iter()
        .filter_map(|(agent, flag)| flag.map(|on| (agent, on)))
        .collect()
    }
}

/// Body of `PUT /api/admin/ai-control`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TopicRequest {
    #[serde(rename = "userId", default)]
    pub user_id: Option<String>,
    #[serde(flatten)]
    pub topic: NewTopic,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AdminAction {
    Start { topic: Option<String> },
    Stop,
    Pause,
    Resume,
    SetTopic(String),
    SetSpeed(u8),
    ToggleAgents(BTreeMap<AgentId, bool>),
    ClearChat,
}

impl AdminAction {
    pub fn from_request(req: &ControlRequest) -> Result<Self> {
        let topic = req
            .topic
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        match req.action.as_str() {
            "start" => Ok(AdminAction::Start { topic }),
            "stop" => Ok(AdminAction::Stop),
            "pause" => Ok(AdminAction::Pause),
            "resume" => Ok(AdminAction::Resume),
            "set_topic" => topic
                .map(AdminAction::SetTopic)
                .ok_or_else(|| ChatError::BadRequest("topic required".into())),
            "set_speed" => match req.speed {
                Some(s @ 1..=3) => Ok(AdminAction::SetSpeed(s as u8)),
                Some(s) => Err(ChatError::BadRequest(format!("speed must be 1..=3, got {}", s))),
                None => Err(ChatError::BadRequest("speed required".into())),
            },
            "toggle_agents" => Ok(AdminAction::ToggleAgents(req.flags())),
            "clear_chat" => Ok(AdminAction::ClearChat),
            other => Err(ChatError::BadRequest(format!("unknown action '{}'", other))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AdminAction::Start { .. } => "start",
            AdminAction::Stop => "stop",
            AdminAction::Pause => "pause",
            AdminAction::Resume => "resume",
            AdminAction::SetTopic(_) => "set_topic",
            AdminAction::SetSpeed(_) => "set_speed",
            AdminAction::ToggleAgents(_) => "toggle_agents",
            AdminAction::ClearChat => "clear_chat",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ControlOutcome {
    pub success: bool,
    pub action: &'static str,
    pub status: ConversationStatus,
    pub scheduler_running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleared: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Overview {
    pub status: ConversationStatus,
    pub topics: Vec<Topic>,
    pub scheduler_running: bool,
}

pub struct Admin {
    store: Arc<Store>,
    hub: Hub,
    scheduler: Arc<LoungeScheduler>,
}

impl Admin {
    pub fn new(store: Arc<Store>, hub: Hub, scheduler: Arc<LoungeScheduler>) -> Self {
        Self { store, hub, scheduler }
    }

    pub fn scheduler(&self) -> &Arc<LoungeScheduler> {
        &self.scheduler
    }

    /// Resolve the acting user and check admin rights.
    pub fn authorize(&self, user_id: Option<&str>) -> Result<User> {
        let user_id = user_id.map(str::trim).filter(|s| !s.is_empty()).ok_or(ChatError::Unauthorized)?;
        if !self.store.is_admin(user_id)? {
            return Err(ChatError::Forbidden);
        }
        self.store.user(user_id)
    }

    pub fn overview(&self) -> Result<Overview> {
        Ok(Overview {
            status: self.store.conversation_status()?,
            topics: self.store.topics()?,
            scheduler_running: self.scheduler.is_running(),
        })
    }

    /// Authorize, parse and apply a control request.
    pub fn control(&self, req: &ControlRequest) -> Result<ControlOutcome> {
        let actor = self.authorize(req.user_id.as_deref())?;
        let action = AdminAction::from_request(req)?;
        self.apply(&actor, action)
    }

    pub fn apply(&self, actor: &User, action: AdminAction) -> Result<ControlOutcome> {
        let name = action.name();
        info!(admin = %actor.username, action = name, "admin action");

        let mut cleared = None;
        let status = match action {
            AdminAction::Start { topic } => {
                let patch = StatusPatch { is_active: Some(true), current_topic: topic, ..StatusPatch::default() };
                let status = self.store.update_status(&patch)?;
                self.store.log_session_start(
                    &status.current_topic,
                    &enabled_agents(&status),
                    Some(&actor.id),
                )?;
                self.scheduler.start();
                status
            }
            AdminAction::Resume => {
                let status = self.set_active(true)?;
                self.scheduler.start();
                status
            }
            AdminAction::Stop | AdminAction::Pause => {
                let status = self.set_active(false)?;
                self.scheduler.stop();
                status
            }
            AdminAction::SetTopic(topic) => self
                .store
                .update_status(&StatusPatch { current_topic: Some(topic), ..StatusPatch::default() })?,
            AdminAction::SetSpeed(speed) => self
                .store
                .update_status(&StatusPatch { speed: Some(speed), ..StatusPatch::default() })?,
            AdminAction::ToggleAgents(enabled) => self
                .store
                .update_status(&StatusPatch { enabled, ..StatusPatch::default() })?,
            AdminAction::ClearChat => {
                let room = self.store.lounge_room()?;
                let removed = self.store.clear_room(&room.id)?;
                self.hub.publish(&room.id, hub::cleared_event(&room.id, removed));
                cleared = Some(removed);
                self.store.conversation_status()?
            }
        };

        self.hub.publish_all(hub::status_event(&status));
        Ok(ControlOutcome {
            success: true,
            action: name,
            status,
            scheduler_running: self.scheduler.is_running(),
            cleared,
        })
    }

    fn set_active(&self, active: bool) -> Result<ConversationStatus> {
        self.store
            .update_status(&StatusPatch { is_active: Some(active), ..StatusPatch::default() })
    }

    /// Authorize and create a custom topic.
    pub fn create_topic(&self, req: &TopicRequest) -> Result<Topic> {
        let actor = self.authorize(req.user_id.as_deref())?;
        let topic = self.store.create_topic(&req.topic)?;
        info!(admin = %actor.username, title = %topic.title, "topic created");
        Ok(topic)
    }
}
