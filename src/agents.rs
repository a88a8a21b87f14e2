//! The six AI personalities: identity, sampling knobs, reply budgets and
//! canned fallback lines.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::completion::CompletionRequest;
use crate::prompts;
use crate::store::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AgentId {
    Neo,
    Latamara,
    Barrilinter,
    Laconchita,
    Marktukemberg,
    Robertthecoach,
}

impl AgentId {
    pub const COUNT: usize = 6;

    /// Every personality, in catalogue order.
    pub fn all() -> [AgentId; Self::COUNT] {
        [
            AgentId::Neo,
            AgentId::Latamara,
            AgentId::Barrilinter,
            AgentId::Laconchita,
            AgentId::Marktukemberg,
            AgentId::Robertthecoach,
        ]
    }

    /// Chat username, e.g. `NEO`.
    pub fn handle(self) -> &'static str {
        match self {
            AgentId::Neo => "NEO",
            AgentId::Latamara => "LATAMARA",
            AgentId::Barrilinter => "BARRILINTER",
            AgentId::Laconchita => "LACONCHITA",
            AgentId::Marktukemberg => "MARKTUKEMBERG",
            AgentId::Robertthecoach => "ROBERTTHECOACH",
        }
    }

    /// Lowercase handle used after `@` in a mention.
    pub fn mention(self) -> String {
        self.handle().to_ascii_lowercase()
    }

    /// Column in the lounge control table holding this agent's enable flag.
    pub fn flag_column(self) -> &'static str {
        match self {
            AgentId::Neo => "neo_enabled",
            AgentId::Latamara => "latamara_enabled",
            AgentId::Barrilinter => "barrilinter_enabled",
            AgentId::Laconchita => "laconchita_enabled",
            AgentId::Marktukemberg => "marktukemberg_enabled",
            AgentId::Robertthecoach => "robertthecoach_enabled",
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_handle(s: &str) -> Option<AgentId> {
        let s = s.trim();
        Self::all().into_iter().find(|a| a.handle().eq_ignore_ascii_case(s))
    }

    pub fn agent(self) -> &'static Agent {
        &AGENTS[self.index()]
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.handle())
    }
}

/// How much history to show the model and how long it may answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyBudget {
    pub context_limit: usize,
    pub max_tokens: u32,
}

impl ReplyBudget {
    const fn new(context_limit: usize, max_tokens: u32) -> Self {
        Self { context_limit, max_tokens }
    }
}

pub struct Agent {
    pub id: AgentId,
    pub color: &'static str,
    /// One-word hint shown in the UI help line.
    pub tagline: &'static str,
    pub system_prompt: &'static str,
    pub instructions: &'static str,
    pub temperature: f32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
    /// Posted in character when the completion fails.
    pub fallback: &'static str,
    /// Pause before a summoned reply so the user's own line lands first.
    pub mention_delay: Duration,
}

static AGENTS: [Agent; AgentId::COUNT] = [
    Agent {
        id: AgentId::Neo,
        color: "#00ffff",
        tagline: "futuro",
        system_prompt: prompts::NEO,
        instructions: prompts::NEO_INSTRUCTIONS,
        temperature: 0.7,
        presence_penalty: 0.5,
        frequency_penalty: 0.4,
        fallback: "ERROR: No pude procesar tu solicitud. Mis sistemas temporales están experimentando interferencias.",
        mention_delay: Duration::from_millis(500),
    },
    Agent {
        id: AgentId::Latamara,
        color: "#ff69b4",
        tagline: "barrio",
        system_prompt: prompts::LATAMARA,
        instructions: prompts::LATAMARA_INSTRUCTIONS,
        temperature: 0.9,
        presence_penalty: 0.5,
        frequency_penalty: 0.4,
        fallback: "Joder tío, que se me ha petao el móvil y no puedo contestar, ¿me escribes otra vez?",
        mention_delay: Duration::from_millis(800),
    },
    Agent {
        id: AgentId::Barrilinter,
        color: "#ff8c00",
        tagline: "culto",
        system_prompt: prompts::BARRILINTER,
        instructions: prompts::BARRILINTER_INSTRUCTIONS,
        temperature: 0.8,
        presence_penalty: 0.5,
        frequency_penalty: 0.4,
        fallback: "Joder chaval, que se me ha cascado el sistema y no puedo contestar. Como diría Murphy: \"Si algo puede salir mal, saldrá mal\". Inténtalo otra vez.",
        mention_delay: Duration::from_millis(1000),
    },
    Agent {
        id: AgentId::Laconchita,
        color: "#da70d6",
        tagline: "abuela",
        system_prompt: prompts::LACONCHITA,
        instructions: prompts::LACONCHITA_INSTRUCTIONS,
        temperature: 0.8,
        presence_penalty: 0.3,
        frequency_penalty: 0.4,
        fallback: "Ay, hijo mío, que este aparato no me deja contestarte. Espera que venga mi nieto a arreglarlo y me lo vuelves a decir.",
        mention_delay: Duration::from_millis(1200),
    },
    Agent {
        id: AgentId::Marktukemberg,
        color: "#00ff7f",
        tagline: "dev",
        system_prompt: prompts::MARKTUKEMBERG,
        instructions: prompts::MARKTUKEMBERG_INSTRUCTIONS,
        temperature: 0.9,
        presence_penalty: 0.4,
        frequency_penalty: 0.5,
        fallback: "Bro, 500 Internal Server Error. Literally no puedo responder ahora mismo, haz un retry.",
        mention_delay: Duration::from_millis(1200),
    },
    Agent {
        id: AgentId::Robertthecoach,
        color: "#ffd700",
        tagline: "coach",
        system_prompt: prompts::ROBERTTHECOACH,
        instructions: prompts::ROBERTTHECOACH_INSTRUCTIONS,
        temperature: 0.9,
        presence_penalty: 0.3,
        frequency_penalty: 0.4,
        fallback: "¡UN FALLO TÉCNICO NO NOS PARA, CAMPEÓN! Dame un segundo y vuelve a intentarlo. ¡SIN EXCUSAS!",
        mention_delay: Duration::from_millis(1200),
    },
];

// ---------------------------------------------------------------------------
// Reply-length heuristics
// ---------------------------------------------------------------------------

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static reply-policy regex")
}

static NEO_GREETING: Lazy<Regex> = Lazy::new(|| re(r"(?i)^(hola|hi|hey)$"));
static GREETING: Lazy<Regex> =
    Lazy::new(|| re(r"(?i)^(hola|hi|hey|¿?cómo estás|qué tal|buenas|saludos)$"));
static COACH_GREETING: Lazy<Regex> =
    Lazy::new(|| re(r"(?i)^(hola|hi|hey|¿?cómo estás|qué tal|buenas)$"));
static GEEK_GREETING: Lazy<Regex> =
    Lazy::new(|| re(r"(?i)^(hola|hi|hey|sup|¿?cómo estás|qué tal)$"));
static DEEP_REQUEST: Lazy<Regex> = Lazy::new(|| {
    re(r"(?i)\b(explica en detalle|analiza profundamente|cuéntame todo sobre|filosofía completa|dime todo lo que sepas|análisis completo)\b")
});
static DEEP_TOPIC: Lazy<Regex> =
    Lazy::new(|| re(r"(?i)\b(futuro|tecnología|filosofía|ciencia|tiempo|historia)\b"));
static STORY: Lazy<Regex> = Lazy::new(|| re(r"(?i)\b(cuéntame|explica|historia|cómo pasó)\b"));
static ANALYSIS: Lazy<Regex> =
    Lazy::new(|| re(r"(?i)\b(explica|analiza|compara|diferencia|historia|filosofía|ciencia)\b"));
static CORRECTION: Lazy<Regex> =
    Lazy::new(|| re(r"(?i)\b(no|falso|error|incorrecto|equivocas)\b"));
static ADVICE: Lazy<Regex> = Lazy::new(|| re(r"(?i)\b(problema|ayuda|consejo|qué hago|no sé)\b"));
static WORRY: Lazy<Regex> = Lazy::new(|| re(r"(?i)\b(peligro|miedo|riesgo|malo|terrible)\b"));
static TECH: Lazy<Regex> = Lazy::new(|| {
    re(r"(?i)\b(código|programar|tech|digital|app|web|software|bug|error)\b")
});
static MOTIVATION: Lazy<Regex> = Lazy::new(|| {
    re(r"(?i)\b(problema|difícil|no puedo|imposible|cansado|triste|mal)\b")
});
static SUCCESS: Lazy<Regex> =
    Lazy::new(|| re(r"(?i)\b(logré|conseguí|bien|genial|increíble|éxito)\b"));

impl Agent {
    /// Classify `message` and pick this personality's budget for it.
    pub fn budget_for(&self, message: &str) -> ReplyBudget {
        let trimmed = message.trim();
        let len = message.chars().count();
        let asks = message.contains('?');

        match self.id {
            AgentId::Neo => {
                let greeting = NEO_GREETING.is_match(trimmed) && len < 8;
                let short_reaction = len < 8 && !asks;
                let deep = DEEP_REQUEST.is_match(message)
                    || (len > 100 && DEEP_TOPIC.is_match(message));
                if greeting || short_reaction {
                    ReplyBudget::new(2, 60)
                } else if deep {
                    ReplyBudget::new(6, 200)
                } else {
                    ReplyBudget::new(4, 120)
                }
            }
            AgentId::Latamara => {
                if GREETING.is_match(trimmed) || len < 10 {
                    ReplyBudget::new(1, 30)
                } else if len > 40 || STORY.is_match(message) {
                    ReplyBudget::new(4, 200)
                } else {
                    ReplyBudget::new(2, 80)
                }
            }
            AgentId::Barrilinter => {
                if GREETING.is_match(trimmed) || len < 15 {
                    ReplyBudget::new(1, 60)
                } else if len > 50 || ANALYSIS.is_match(message) {
                    ReplyBudget::new(6, 300)
                } else if CORRECTION.is_match(message) {
                    ReplyBudget::new(3, 120)
                } else {
                    ReplyBudget::new(4, 150)
                }
            }
            AgentId::Laconchita => {
                if GREETING.is_match(trimmed) {
                    ReplyBudget::new(1, 80)
                } else if len > 30 || ADVICE.is_match(message) || WORRY.is_match(message) {
                    ReplyBudget::new(4, 200)
                } else {
                    ReplyBudget::new(3, 120)
                }
            }
            AgentId::Marktukemberg => {
                if GEEK_GREETING.is_match(trimmed) || (len < 20 && !asks) {
                    ReplyBudget::new(1, 60)
                } else if TECH.is_match(message) {
                    ReplyBudget::new(5, 250)
                } else {
                    ReplyBudget::new(3, 150)
                }
            }
            AgentId::Robertthecoach => {
                if COACH_GREETING.is_match(trimmed) {
                    ReplyBudget::new(1, 80)
                } else if MOTIVATION.is_match(message) || SUCCESS.is_match(message) {
                    ReplyBudget::new(4, 220)
                } else {
                    ReplyBudget::new(3, 140)
                }
            }
        }
    }

    /// User prompt for a summoned reply: trailing history plus the message.
    pub fn user_prompt(&self, message: &str, author: &str, history: &[Message], budget: ReplyBudget) -> String {
        let start = history.len().saturating_sub(budget.context_limit);
        let context = render_history(&history[start..]);
        let context_block = if context.is_empty() {
            "No hay conversación previa.\n".to_string()
        } else {
            format!("Últimos mensajes:\n{}\n", context)
        };
        format!(
            "CONTEXTO CONVERSACIONAL:\n{}\nUSUARIO: {}\nMENSAJE PARA {}: {}\n\n{}\n",
            context_block,
            author,
            self.id.handle(),
            message,
            self.instructions,
        )
    }

    pub fn completion_request(&self, model: &str, user: String, max_tokens: u32) -> CompletionRequest {
        CompletionRequest {
            model: model.to_string(),
            system: self.system_prompt.to_string(),
            user,
            max_tokens,
            temperature: self.temperature,
            presence_penalty: self.presence_penalty,
            frequency_penalty: self.frequency_penalty,
        }
    }
}

/// `username: body` lines, oldest first.
pub fn render_history(history: &[Message]) -> String {
    history
        .iter()
        .map(|m| format!("{}: {}", m.username, m.body))
        .collect::<Vec<_>>()
        .join("\n")
}
