//! AI Lounge: bots talking among themselves, one turn per tick.
//!
//! ## Tick
//! 1. Read the control row; stop if the lounge is inactive or no bot is
//!    enabled.
//! 2. Pick a speaker uniformly from the enabled bots, excluding whoever spoke
//!    last (unless that leaves nobody).
//! 3. Load the last [`HISTORY_WINDOW`] lounge messages and build the prompt:
//!    an opening prompt on an empty room, otherwise the recent transcript plus
//!    a redirect block if the last [`DRIFT_WINDOW`] messages lost the topic.
//! 4. Ask the model. A reply is posted and becomes `last_speaker`; any failure
//!    posts the bot's fallback line instead and leaves `last_speaker` alone.
//!
//! Ticks never return an error. [`TickOutcome`] says what happened.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::agents::{render_history, AgentId};
use crate::completion::Completer;
use crate::error::Result;
use crate::hub::Hub;
use crate::store::{ConversationStatus, Message, MessageKind, Room, Store};

/// Lounge messages shown to the speaker.
pub const HISTORY_WINDOW: usize = 8;
/// Trailing messages checked for topic drift.
pub const DRIFT_WINDOW: usize = 3;
/// Completion cap for a lounge turn (roughly 50-200 words).
pub const LOUNGE_MAX_TOKENS: u32 = 300;

/// Wait between ticks for a speed tier.
pub fn delay_for_speed(speed: u8) -> Duration {
    match speed {
        1 => Duration::from_secs(45),
        3 => Duration::from_secs(8),
        _ => Duration::from_secs(20),
    }
}

/// Enabled bots in catalogue order.
pub fn enabled_agents(status: &ConversationStatus) -> Vec<AgentId> {
    AgentId::all()
        .into_iter()
        .filter(|a| status.is_enabled(*a))
        .collect()
}

/// Next speaker, never repeating `last` while another bot is available.
pub fn select_next_speaker<R: Rng + ?Sized>(
    enabled: &[AgentId],
    last: Option<AgentId>,
    rng: &mut R,
) -> Option<AgentId> {
    if enabled.len() <= 1 {
        return enabled.first().copied();
    }
    let others: Vec<AgentId> = enabled
        .iter()
        .copied()
        .filter(|a| Some(*a) != last)
        .collect();
    let pool = if others.is_empty() { enabled } else { &others[..] };
    pool.choose(rng).copied()
}

/// Lowercased topic words longer than three characters.
pub fn topic_keywords(topic: &str) -> Vec<String> {
    topic
        .split_whitespace()
        .map(str::to_lowercase)
        .filter(|w| w.chars().count() > 3)
        .collect()
}

/// True when none of the topic keywords occur in the last [`DRIFT_WINDOW`]
/// messages. A topic without keywords never counts as drifted.
pub fn is_off_topic(topic: &str, recent: &[Message]) -> bool {
    let keywords = topic_keywords(topic);
    if keywords.is_empty() || recent.is_empty() {
        return false;
    }
    let start = recent.len().saturating_sub(DRIFT_WINDOW);
    let text = recent[start..]
        .iter()
        .map(|m| m.body.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");
    !keywords.iter().any(|k| text.contains(k.as_str()))
}

/// User prompt for a lounge turn. `history` is chronological.
pub fn build_prompt(speaker: AgentId, topic: &str, enabled: &[AgentId], history: &[Message]) -> String {
    let participants = enabled.iter().map(|a| a.handle()).collect::<Vec<_>>().join(", ");

    let Some(last) = history.last() else {
        return format!(
            "Estás iniciando una conversación en la sala \"IA Lounge\" con otros agentes IA.\n\
             Tema inicial: {topic}\n\
             Agentes participando: {participants}\n\n\
             Responde de forma natural presentándote y comenzando la conversación sobre el tema propuesto.\n\n\
             MENSAJE: {topic}\n"
        );
    };

    let drifted = is_off_topic(topic, history);
    let redirect = if drifted {
        format!(
            "⚠️ ALERTA: La conversación se ha DESVIADO del tema original.\n\
             🔄 REDIRIGE la conversación hacia el tema: \"{topic}\"\n\n"
        )
    } else {
        String::new()
    };
    let first_rule = if drifted {
        "RECONOCE brevemente el último mensaje pero REDIRIGE al tema original"
    } else {
        "Responde al último mensaje manteniendo el enfoque en el tema central"
    };

    format!(
        "Estás conversando en la sala \"IA Lounge\" con otros agentes IA.\n\
         🎯 TEMA ORIGINAL: {topic}\n\
         Agentes participando: {participants}\n\n\
         Conversación reciente (orden cronológico):\n{transcript}\n\n\
         {redirect}\
         INSTRUCCIONES PRIORITARIAS:\n\
         - {first_rule}\n\
         - Mantén tu personalidad única ({speaker}) pero ENFÓCATE en el tema: \"{topic}\"\n\
         - Aporta valor específico al tema principal de la conversación\n\
         - No te pierdas en tangentes que no contribuyan al tema\n\
         - Respuesta entre 50 y 200 palabras, SIEMPRE relacionada con el tema central\n\n\
         Conversación en curso. Último mensaje de {last_user}: \"{last_body}\"\n",
        transcript = render_history(history),
        speaker = speaker.handle(),
        last_user = last.username,
        last_body = last.body,
    )
}

// ---------------------------------------------------------------------------
// Tick
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TickOutcome {
    /// The lounge is switched off.
    Inactive,
    /// Active, but every bot is disabled.
    NoAgents,
    /// The speaker answered.
    Spoke { speaker: AgentId, message: Message },
    /// The speaker failed and its fallback line was posted.
    FellBack { speaker: AgentId, message: Message, reason: String },
    /// Nothing could be read or written.
    Unavailable { reason: String },
}

impl TickOutcome {
    /// The message this tick added to the lounge, if any.
    pub fn message(&self) -> Option<&Message> {
        match self {
            TickOutcome::Spoke { message, .. } | TickOutcome::FellBack { message, .. } => Some(message),
            _ => None,
        }
    }
}

pub struct Lounge {
    store: Arc<Store>,
    completer: Arc<dyn Completer>,
    hub: Hub,
    model: String,
}

impl Lounge {
    pub fn new(store: Arc<Store>, completer: Arc<dyn Completer>, hub: Hub, model: impl Into<String>) -> Self {
        Self { store, completer, hub, model: model.into() }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Run one turn with a fresh thread RNG.
    pub async fn tick(&self) -> TickOutcome {
        self.run_tick(|enabled, last| select_next_speaker(enabled, last, &mut rand::thread_rng()))
            .await
    }

    /// Run one turn with a reproducible speaker choice.
    pub async fn tick_seeded(&self, seed: u64) -> TickOutcome {
        let mut rng = StdRng::seed_from_u64(seed);
        self.run_tick(move |enabled, last| select_next_speaker(enabled, last, &mut rng))
            .await
    }

    async fn run_tick<F>(&self, pick: F) -> TickOutcome
    where
        F: FnOnce(&[AgentId], Option<AgentId>) -> Option<AgentId>,
    {
        let status = match self.store.conversation_status() {
            Ok(s) => s,
            Err(err) => {
                error!(%err, "lounge status unavailable");
                return TickOutcome::Unavailable { reason: err.to_string() };
            }
        };
        if !status.is_active {
            return TickOutcome::Inactive;
        }

        let enabled = enabled_agents(&status);
        let Some(speaker) = pick(&enabled, status.last_speaker) else {
            debug!("lounge active but no agent enabled");
            return TickOutcome::NoAgents;
        };

        let room = match self.store.lounge_room() {
            Ok(r) => r,
            Err(err) => {
                error!(%err, "lounge room unavailable");
                return TickOutcome::Unavailable { reason: err.to_string() };
            }
        };

        match self.speak(speaker, &room, &status, &enabled).await {
            Ok(message) => {
                if let Err(err) = self.store.set_last_speaker(speaker) {
                    warn!(%err, %speaker, "could not record last speaker");
                }
                self.hub.publish_message(&message);
                info!(%speaker, "lounge turn");
                TickOutcome::Spoke { speaker, message }
            }
            Err(err) => {
                warn!(%err, %speaker, "lounge turn failed, posting fallback");
                let reason = err.to_string();
                match self.post_fallback(speaker, &room) {
                    Ok(message) => {
                        self.hub.publish_message(&message);
                        TickOutcome::FellBack { speaker, message, reason }
                    }
                    Err(err) => {
                        error!(%err, %speaker, "fallback insert failed");
                        TickOutcome::Unavailable { reason: err.to_string() }
                    }
                }
            }
        }
    }

    async fn speak(
        &self,
        speaker: AgentId,
        room: &Room,
        status: &ConversationStatus,
        enabled: &[AgentId],
    ) -> Result<Message> {
        let history = self.store.recent_messages(&room.id, HISTORY_WINDOW)?;
        let prompt = build_prompt(speaker, &status.current_topic, enabled, &history);
        let agent = speaker.agent();
        let reply = self
            .completer
            .complete(agent.completion_request(&self.model, prompt, LOUNGE_MAX_TOKENS))
            .await?;
        let user = self.store.agent_user(speaker)?;
        self.store.insert_message(&room.id, &user.id, &reply, MessageKind::Ai)
    }

    fn post_fallback(&self, speaker: AgentId, room: &Room) -> Result<Message> {
        let user = self.store.agent_user(speaker)?;
        self.store
            .insert_message(&room.id, &user.id, speaker.agent().fallback, MessageKind::Ai)
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Owns the recurring tick task. At most one runs at a time.
pub struct LoungeScheduler {
    lounge: Arc<Lounge>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LoungeScheduler {
    pub fn new(lounge: Arc<Lounge>) -> Self {
        Self { lounge, task: Mutex::new(None) }
    }

    pub fn lounge(&self) -> &Arc<Lounge> {
        &self.lounge
    }

    /// Tick now, then after every speed-derived delay until the lounge goes
    /// inactive or [`LoungeScheduler::stop`] is called.
    ///
    /// Returns `false` if a timer is already running.
    pub fn start(&self) -> bool {
        let Ok(mut guard) = self.task.lock() else {
            return false;
        };
        if guard.as_ref().is_some_and(|h| !h.is_finished()) {
            return false;
        }
        let lounge = Arc::clone(&self.lounge);
        *guard = Some(tokio::spawn(async move {
            loop {
                if let TickOutcome::Inactive = lounge.tick().await {
                    info!("lounge inactive, scheduler exiting");
                    break;
                }
                let speed = lounge.store().conversation_status().map(|s| s.speed).unwrap_or(2);
                tokio::time::sleep(delay_for_speed(speed)).await;
            }
        }));
        info!("lounge scheduler started");
        true
    }

    /// Abort the timer. Returns whether one was running.
    pub fn stop(&self) -> bool {
        let handle = match self.task.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        match handle {
            Some(h) => {
                let was_running = !h.is_finished();
                h.abort();
                if was_running {
                    info!("lounge scheduler stopped");
                }
                was_running
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .map(|g| g.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }
}

impl Drop for LoungeScheduler {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.task.lock() {
            if let Some(h) = guard.take() {
                h.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::ScriptedCompleter;
    use crate::store::StatusPatch;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn msg(username: &str, body: &str) -> Message {
        Message {
            seq: 0,
            id: uuid::Uuid::new_v4().to_string(),
            room_id: "lounge".into(),
            user_id: "u".into(),
            username: username.into(),
            avatar_color: "#00ffff".into(),
            body: body.into(),
            kind: MessageKind::Ai,
            created_at_ms: 0,
        }
    }

    fn status(enabled: &[AgentId], last: Option<AgentId>) -> ConversationStatus {
        ConversationStatus {
            is_active: true,
            current_topic: "gatos".into(),
            speed: 2,
            enabled: AgentId::all().into_iter().map(|a| (a, enabled.contains(&a))).collect(),
            last_speaker: last,
        }
    }

    #[test]
    fn test_delay_for_speed() {
        assert_eq!(delay_for_speed(1), Duration::from_secs(45));
        assert_eq!(delay_for_speed(2), Duration::from_secs(20));
        assert_eq!(delay_for_speed(3), Duration::from_secs(8));
        assert_eq!(delay_for_speed(0), Duration::from_secs(20));
        assert_eq!(delay_for_speed(9), Duration::from_secs(20));
    }

    #[test]
    fn test_enabled_agents_keeps_catalogue_order() {
        let st = status(&[AgentId::Robertthecoach, AgentId::Neo], None);
        assert_eq!(enabled_agents(&st), vec![AgentId::Neo, AgentId::Robertthecoach]);
        assert!(enabled_agents(&status(&[], None)).is_empty());
    }

    #[test]
    fn test_select_empty_is_none() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(select_next_speaker(&[], None, &mut rng), None);
    }

    #[test]
    fn test_select_single_even_if_it_spoke_last() {
        let mut rng = StdRng::seed_from_u64(1);
        let got = select_next_speaker(&[AgentId::Laconchita], Some(AgentId::Laconchita), &mut rng);
        assert_eq!(got, Some(AgentId::Laconchita));
    }

    #[test]
    fn test_select_two_alternates() {
        let mut rng = StdRng::seed_from_u64(7);
        let pair = [AgentId::Neo, AgentId::Latamara];
        let mut last = None;
        for _ in 0..20 {
            let next = select_next_speaker(&pair, last, &mut rng).unwrap();
            assert_ne!(Some(next), last);
            last = Some(next);
        }
    }

    #[test]
    fn test_select_first_turn_covers_everyone() {
        let mut rng = StdRng::seed_from_u64(3);
        let all = AgentId::all();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..500 {
            seen.insert(select_next_speaker(&all, None, &mut rng).unwrap());
        }
        assert_eq!(seen.len(), AgentId::COUNT);
    }

    #[test]
    fn test_topic_keywords() {
        assert_eq!(
            topic_keywords("El futuro de la Inteligencia artificial"),
            vec!["futuro", "inteligencia", "artificial"]
        );
        // four characters counted as chars, not bytes
        assert_eq!(topic_keywords("año más café"), vec!["café"]);
        assert!(topic_keywords("el sol y la mar").is_empty());
    }

    #[test]
    fn test_off_topic_only_looks_at_last_three() {
        let history = vec![
            msg("NEO", "hablemos de gatos"),
            msg("LATAMARA", "pues yo de fútbol"),
            msg("BARRILINTER", "y la liga"),
            msg("LACONCHITA", "qué calor hace"),
        ];
        assert!(is_off_topic("los gatos domésticos", &history));
        assert!(!is_off_topic("los gatos domésticos", &history[..3]));
    }

    #[test]
    fn test_off_topic_is_case_insensitive_substring() {
        let history = vec![msg("NEO", "Los GATOS del futuro")];
        assert!(!is_off_topic("gatos", &history));
        assert!(!is_off_topic("Gato", &history));
    }

    #[test]
    fn test_off_topic_without_keywords_or_history() {
        assert!(!is_off_topic("el sol", &[msg("NEO", "nada que ver")]));
        assert!(!is_off_topic("gatos domésticos", &[]));
    }

    #[test]
    fn test_opening_prompt() {
        let p = build_prompt(AgentId::Neo, "gatos", &[AgentId::Neo, AgentId::Latamara], &[]);
        assert!(p.contains("Estás iniciando una conversación"));
        assert!(p.contains("Tema inicial: gatos"));
        assert!(p.contains("Agentes participando: NEO, LATAMARA"));
    }

    #[test]
    fn test_ongoing_prompt_with_redirect() {
        let history = vec![msg("NEO", "el fútbol es lo mejor"), msg("LATAMARA", "¡Hostia!")];
        let p = build_prompt(AgentId::Barrilinter, "gatos domésticos", &AgentId::all(), &history);
        assert!(p.contains("NEO: el fútbol es lo mejor\nLATAMARA: ¡Hostia!"));
        assert!(p.contains("DESVIADO"));
        assert!(p.contains("REDIRIGE al tema original"));
        assert!(p.contains("(BARRILINTER)"));
        assert!(p.contains("Último mensaje de LATAMARA: \"¡Hostia!\""));
    }

    #[test]
    fn test_ongoing_prompt_on_topic() {
        let history = vec![msg("NEO", "los gatos dominarán el futuro")];
        let p = build_prompt(AgentId::Latamara, "gatos", &AgentId::all(), &history);
        assert!(!p.contains("DESVIADO"));
        assert!(p.contains("manteniendo el enfoque"));
    }

    proptest! {
        #[test]
        fn prop_speaker_is_enabled_and_not_last(
            enabled in proptest::sample::subsequence(AgentId::all().to_vec(), 0..=AgentId::COUNT),
            last in proptest::option::of(0usize..AgentId::COUNT),
            seed in any::<u64>(),
        ) {
            let last = last.map(|i| AgentId::all()[i]);
            let mut rng = StdRng::seed_from_u64(seed);
            let picked = select_next_speaker(&enabled, last, &mut rng);
            match enabled.len() {
                0 => prop_assert!(picked.is_none()),
                1 => prop_assert_eq!(picked, Some(enabled[0])),
                _ => {
                    let p = picked.unwrap();
                    prop_assert!(enabled.contains(&p));
                    prop_assert_ne!(Some(p), last);
                }
            }
        }

        #[test]
        fn prop_keywords_are_long_and_lowercase(topic in "[A-Za-zÁÉÍÓÚáéíóúñ ]{0,60}") {
            for k in topic_keywords(&topic) {
                prop_assert!(k.chars().count() > 3);
                prop_assert_eq!(k.clone(), k.to_lowercase());
            }
        }
    }

    // -- Lounge::tick ----------------------------------------------------------

    fn lounge_with(completer: ScriptedCompleter) -> (Lounge, Arc<Store>, Arc<ScriptedCompleter>) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let completer = Arc::new(completer);
        let lounge = Lounge::new(Arc::clone(&store), completer.clone(), Hub::new(), "test-model");
        (lounge, store, completer)
    }

    fn activate(store: &Store, enabled: &[AgentId]) {
        let patch = StatusPatch {
            is_active: Some(true),
            current_topic: Some("gatos".into()),
            enabled: AgentId::all().into_iter().map(|a| (a, enabled.contains(&a))).collect::<BTreeMap<_, _>>(),
            ..StatusPatch::default()
        };
        store.update_status(&patch).unwrap();
    }

    #[tokio::test]
    async fn test_tick_inactive_is_noop() {
        let (lounge, store, completer) = lounge_with(ScriptedCompleter::always("hola"));
        assert!(matches!(lounge.tick().await, TickOutcome::Inactive));
        let room = store.lounge_room().unwrap();
        assert!(store.messages(&room.id, None).unwrap().is_empty());
        assert_eq!(completer.call_count(), 0);
    }

    #[tokio::test]
    async fn test_tick_no_agents_is_noop() {
        let (lounge, store, completer) = lounge_with(ScriptedCompleter::always("hola"));
        activate(&store, &[]);
        assert!(matches!(lounge.tick().await, TickOutcome::NoAgents));
        assert_eq!(completer.call_count(), 0);
    }

    #[tokio::test]
    async fn test_tick_success_posts_and_records_speaker() {
        let (lounge, store, completer) = lounge_with(ScriptedCompleter::always("Fascinante."));
        activate(&store, &[AgentId::Neo]);
        let (speaker, message) = match lounge.tick_seeded(1).await {
            TickOutcome::Spoke { speaker, message } => (speaker, message),
            other => panic!("expected a spoken turn, got {:?}", other),
        };
        assert_eq!(speaker, AgentId::Neo);
        assert_eq!(message.body, "Fascinante.");
        assert_eq!(message.kind, MessageKind::Ai);
        assert_eq!(message.username, "NEO");
        assert_eq!(store.conversation_status().unwrap().last_speaker, Some(AgentId::Neo));

        let req = &completer.requests()[0];
        assert_eq!(req.model, "test-model");
        assert_eq!(req.max_tokens, LOUNGE_MAX_TOKENS);
        assert!(req.user.contains("Estás iniciando"));
    }

    #[tokio::test]
    async fn test_tick_failure_posts_single_fallback() {
        let (lounge, store, _) = lounge_with(ScriptedCompleter::failing());
        activate(&store, &[AgentId::Laconchita]);
        store.set_last_speaker(AgentId::Neo).unwrap();
        let outcome = lounge.tick().await;
        assert!(matches!(outcome, TickOutcome::FellBack { speaker: AgentId::Laconchita, .. }));
        let room = store.lounge_room().unwrap();
        let msgs = store.messages(&room.id, None).unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].body, AgentId::Laconchita.agent().fallback);
        // last speaker untouched
        assert_eq!(store.conversation_status().unwrap().last_speaker, Some(AgentId::Neo));
    }

    #[tokio::test]
    async fn test_second_tick_sees_history() {
        let (lounge, store, completer) = lounge_with(ScriptedCompleter::new());
        completer.push_ok("Hablemos de gatos.").push_ok("¡Flipas con los gatos!");
        activate(&store, &[AgentId::Neo, AgentId::Latamara]);
        let first = lounge.tick_seeded(11).await;
        let second = lounge.tick_seeded(12).await;
        let a = first.message().unwrap();
        let b = second.message().unwrap();
        assert_ne!(a.username, b.username);
        assert!(completer.requests()[1].user.contains("Hablemos de gatos."));
    }

    #[tokio::test]
    async fn test_tick_publishes_to_lounge_room() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let hub = Hub::new();
        let room = store.lounge_room().unwrap();
        let mut rx = hub.subscribe(&room.id).unwrap();
        let lounge = Lounge::new(Arc::clone(&store), Arc::new(ScriptedCompleter::always("ok")), hub, "m");
        activate(&store, &[AgentId::Marktukemberg]);
        lounge.tick().await;
        let event = rx.try_recv().unwrap();
        assert_eq!(event["type"], "message");
        assert_eq!(event["message"]["username"], "MARKTUKEMBERG");
    }

    // -- Scheduler -------------------------------------------------------------

    #[tokio::test]
    async fn test_scheduler_refuses_double_start() {
        let (lounge, store, _) = lounge_with(ScriptedCompleter::always("ok"));
        activate(&store, &[AgentId::Neo]);
        let scheduler = LoungeScheduler::new(Arc::new(lounge));
        assert!(scheduler.start());
        assert!(!scheduler.start());
        assert!(scheduler.is_running());
        assert!(scheduler.stop());
        assert!(!scheduler.is_running());
        assert!(!scheduler.stop());
    }

    #[tokio::test]
    async fn test_scheduler_ticks_immediately_then_exits_when_inactive() {
        let (lounge, store, completer) = lounge_with(ScriptedCompleter::always("ok"));
        activate(&store, &[AgentId::Neo]);
        let scheduler = LoungeScheduler::new(Arc::new(lounge));
        assert!(scheduler.start());
        for _ in 0..50 {
            if completer.call_count() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(completer.call_count(), 1);
        scheduler.stop();

        store.update_status(&StatusPatch { is_active: Some(false), ..StatusPatch::default() }).unwrap();
        assert!(scheduler.start());
        for _ in 0..50 {
            if !scheduler.is_running() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn test_history_read_failure_posts_single_fallback() {
        let (lounge, store, completer) = lounge_with(ScriptedCompleter::always("no debería salir"));
        activate(&store, &[AgentId::Barrilinter]);
        store.set_last_speaker(AgentId::Neo).unwrap();
        let room = store.lounge_room().unwrap();
        let neo = store.agent_user(AgentId::Neo).unwrap();
        store.plant_unreadable_message(&room.id, &neo.id).unwrap();

        let outcome = lounge.tick().await;
        match &outcome {
            TickOutcome::FellBack { speaker, message, .. } => {
                assert_eq!(*speaker, AgentId::Barrilinter);
                assert_eq!(message.body, AgentId::Barrilinter.agent().fallback);
            }
            other => panic!("expected a fallback, got {:?}", other),
        }
        assert_eq!(completer.call_count(), 0);
        assert_eq!(store.message_count(&room.id).unwrap(), 2);
        assert_eq!(store.conversation_status().unwrap().last_speaker, Some(AgentId::Neo));
    }

    async fn settle() {
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_scheduler_rereads_speed_between_ticks() {
        tokio::time::pause();
        let (lounge, store, completer) = lounge_with(ScriptedCompleter::always("ok"));
        activate(&store, &[AgentId::Neo]);
        store.update_status(&StatusPatch { speed: Some(3), ..StatusPatch::default() }).unwrap();

        let scheduler = LoungeScheduler::new(Arc::new(lounge));
        assert!(scheduler.start());
        settle().await;
        assert_eq!(completer.call_count(), 1);

        // The 8 s wait is already armed; slowing down applies to the next one.
        store.update_status(&StatusPatch { speed: Some(1), ..StatusPatch::default() }).unwrap();

        tokio::time::advance(Duration::from_secs(7)).await;
        settle().await;
        assert_eq!(completer.call_count(), 1);

        tokio::time::advance(Duration::from_millis(1_100)).await;
        settle().await;
        assert_eq!(completer.call_count(), 2);

        tokio::time::advance(Duration::from_secs(20)).await;
        settle().await;
        assert_eq!(completer.call_count(), 2);

        tokio::time::advance(Duration::from_secs(26)).await;
        settle().await;
        assert_eq!(completer.call_count(), 3);
        scheduler.stop();
    }
}
