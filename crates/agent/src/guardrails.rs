use leadflow_core::domain::lead::LeadFlag;
use leadflow_core::flows::FlowAction;
use leadflow_core::vocabulary::normalize_text;

const PRICE_PHRASES: [&str; 12] = [
    "precio",
    "precios",
    "cuanto sale",
    "cuanto cuesta",
    "cuanto vale",
    "cuanto me sale",
    "cotizacion",
    "cotizar",
    "presupuesto",
    "costo",
    "lista de precios",
    "valor",
];

const HUMAN_PHRASES: [&str; 9] = [
    "hablar con alguien",
    "hablar con una persona",
    "hablar con un vendedor",
    "hablar con un asesor",
    "hablar con un humano",
    "persona real",
    "llamame",
    "llamenme",
    "me pueden llamar",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GuardrailIntent {
    PriceRequest,
    HumanRequest,
}

impl GuardrailIntent {
    pub fn action_key(&self) -> &'static str {
        match self {
            Self::PriceRequest => "policy.price_request",
            Self::HumanRequest => "policy.human_request",
        }
    }

    pub fn flag(&self) -> LeadFlag {
        match self {
            Self::PriceRequest => LeadFlag::PriceRequested,
            Self::HumanRequest => LeadFlag::HumanRequested,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Allow,
    Degrade { reason_code: &'static str, user_message: String, fallback_path: &'static str },
    Escalate { reason_code: &'static str, user_message: String, fallback_path: &'static str },
}

impl GuardrailDecision {
    pub fn user_message(&self) -> Option<&str> {
        match self {
            Self::Allow => None,
            Self::Degrade { user_message, .. } | Self::Escalate { user_message, .. } => {
                Some(user_message)
            }
        }
    }

    /// Every non-allow decision hands the lead to a salesperson.
    pub fn actions(&self) -> &'static [FlowAction] {
        match self {
            Self::Allow => &[],
            Self::Degrade { .. } | Self::Escalate { .. } => &[FlowAction::EscalateHuman],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardrailPolicy {
    pub assistant_can_quote_prices: bool,
    pub human_handoff_enabled: bool,
}

impl Default for GuardrailPolicy {
    fn default() -> Self {
        Self { assistant_can_quote_prices: false, human_handoff_enabled: true }
    }
}

impl GuardrailPolicy {
    pub fn detect(&self, text: &str) -> Vec<GuardrailIntent> {
        let padded = format!(" {} ", normalize_text(text));
        let mentions = |phrases: &[&str]| {
            phrases.iter().any(|phrase| padded.contains(&format!(" {phrase} ")))
        };

        let mut intents = Vec::new();
        if mentions(&PRICE_PHRASES) {
            intents.push(GuardrailIntent::PriceRequest);
        }
        if mentions(&HUMAN_PHRASES) {
            intents.push(GuardrailIntent::HumanRequest);
        }
        intents
    }

    pub fn evaluate(&self, intent: &GuardrailIntent) -> GuardrailDecision {
        match intent {
            GuardrailIntent::PriceRequest => GuardrailDecision::Degrade {
                reason_code: if self.assistant_can_quote_prices {
                    "price_quote_policy_conflict"
                } else {
                    "price_quote_disallowed"
                },
                user_message:
                    "No puedo pasarte precios por este medio; un asesor comercial te va a enviar la cotización."
                        .to_string(),
                fallback_path: "sales_quote",
            },
            GuardrailIntent::HumanRequest if self.human_handoff_enabled => {
                GuardrailDecision::Escalate {
                    reason_code: "human_requested",
                    user_message: "Te derivo con un asesor para que se comunique con vos."
                        .to_string(),
                    fallback_path: "human_handoff",
                }
            }
            GuardrailIntent::HumanRequest => GuardrailDecision::Degrade {
                reason_code: "human_handoff_disabled",
                user_message:
                    "En este momento no hay asesores disponibles; dejame tus datos y te contactamos."
                        .to_string(),
                fallback_path: "collect_contact_data",
            },
        }
    }

    pub fn review(&self, text: &str) -> Vec<(GuardrailIntent, GuardrailDecision)> {
        self.detect(text).into_iter().map(|intent| (intent, self.evaluate(&intent))).collect()
    }
}
