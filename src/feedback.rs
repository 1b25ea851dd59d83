use reqwest::Client;
use serde::{Deserialize, Serialize};
use anyhow::Result;
use log::info;
use rand::seq::SliceRandom;

use crate::config::Settings;
use crate::trainer::classifier::CORRECT_MARKER;

/// The text-completion boundary. The engine hands over the scenario, the
/// conversation so far (`(user_response, feedback)` pairs, oldest first)
/// and the new input, and gets back one feedback string. Failures surface
/// to the caller as-is; the core never retries.
pub trait FeedbackSource {
    fn generate_feedback(
        &self,
        scenario_text: &str,
        history: &[(String, String)],
        user_input: &str,
    ) -> impl std::future::Future<Output = Result<String>> + Send;
}

const SYSTEM_PROMPT: &str = "Eres un chatbot especializado en entrenar a usuarios para detectar \
     ataques de phishing. Tu tarea es evaluar la respuesta del usuario en el siguiente escenario. \
     Si el usuario da una respuesta acertada, comienza tu mensaje exactamente con \"¡Correcto!\", \
     confirma su decisión con una breve retroalimentación positiva y luego sugiere un paso \
     adicional. Si la respuesta es equivocada, explica brevemente por qué sin usar esa palabra \
     inicial. No hagas más de 3 preguntas por escenario.";

const POSITIVE_PHRASES: [&str; 4] = [
    "¡Buena decisión!",
    "Eso es correcto.",
    "Bien pensado.",
    "Esa es una excelente estrategia.",
];

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f64,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

/// OpenAI-compatible chat-completions client producing scenario feedback.
#[derive(Clone)]
pub struct OpenAiFeedback {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f64,
}

impl OpenAiFeedback {
    pub fn new(api_key: String, settings: &Settings) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: "https://api.openai.com/v1".to_string(),
            model: settings.model_name.clone(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let api_key = settings
            .openai_api_key
            .clone()
            .ok_or_else(|| anyhow::anyhow!("OPENAI_API_KEY is not set"))?;
        Ok(Self::new(api_key, settings))
    }

    fn build_messages(
        &self,
        scenario_text: &str,
        history: &[(String, String)],
        user_input: &str,
    ) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage {
            role: "system".to_string(),
            content: format!("{}\n\n📌 **Escenario:** {}", SYSTEM_PROMPT, scenario_text),
        }];
        for (response, feedback) in history {
            messages.push(ChatMessage {
                role: "user".to_string(),
                content: response.clone(),
            });
            messages.push(ChatMessage {
                role: "assistant".to_string(),
                content: feedback.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: user_input.to_string(),
        });
        messages
    }

    /// Light post-processing carried over from the original trainer:
    /// reinforce correct answers with a varied opener, and nudge wrong
    /// ones toward asking for more detail. The correctness marker prefix
    /// is left untouched either way.
    fn embellish(reply: String) -> String {
        if reply.starts_with(CORRECT_MARKER) {
            let phrase = POSITIVE_PHRASES
                .choose(&mut rand::thread_rng())
                .copied()
                .unwrap_or(POSITIVE_PHRASES[0]);
            let rest = reply[CORRECT_MARKER.len()..].trim_start();
            format!("{} {} {}", CORRECT_MARKER, phrase, rest)
        } else if reply.contains('?') {
            reply
        } else {
            format!(
                "{} ¿Te gustaría que te diera más detalles sobre cómo identificar phishing?",
                reply
            )
        }
    }
}

impl FeedbackSource for OpenAiFeedback {
    async fn generate_feedback(
        &self,
        scenario_text: &str,
        history: &[(String, String)],
        user_input: &str,
    ) -> Result<String> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: self.build_messages(scenario_text, history, user_input),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        info!("Requesting feedback from model {}", self.model);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("feedback request failed with {}: {}", status, body);
        }

        let parsed: ChatResponse = response.json().await?;
        let reply = parsed
            .choices
            .first()
            .map(|c| c.message.content.trim().to_string())
            .ok_or_else(|| anyhow::anyhow!("feedback response contained no choices"))?;

        Ok(Self::embellish(reply))
    }
}
