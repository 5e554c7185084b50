use leadflow_core::domain::lead::{LeadField, LeadRecord};
use leadflow_core::flows::LeadState;

const MAX_QUESTIONS: usize = 3;

/// Questions for the fields still missing, required ones first.
pub fn next_questions(record: &LeadRecord) -> Vec<String> {
    if record.is_qualified() {
        return Vec::new();
    }

    let data = &record.data;
    let mut questions: Vec<String> =
        record.missing_required_fields().into_iter().map(question_for).collect();

    if let (Some(brand), None) = (&data.machine.brand, &data.machine.model) {
        questions.push(format!("¿Qué modelo es tu {brand}?"));
    }
    if data.machine.usage.is_none() {
        questions.push(question_for(LeadField::MachineUsage));
    }
    if data.urgency.is_none() {
        questions.push(question_for(LeadField::Urgency));
    }

    questions.truncate(MAX_QUESTIONS);
    questions
}

fn question_for(field: LeadField) -> String {
    match field {
        LeadField::Name => "¿Cuál es tu nombre?",
        LeadField::Zone => "¿En qué zona o provincia estás?",
        LeadField::MachineBrand => "¿Qué marca y modelo de minicargadora tenés?",
        LeadField::MachineModel => "¿Qué modelo es tu minicargadora?",
        LeadField::MachineUsage => "¿La usás en obra, en el campo o en industria?",
        LeadField::ImplementOfInterest => {
            "¿Qué implemento estás buscando (balde, martillo, horquilla, etc.)?"
        }
        LeadField::Urgency => "¿Para cuándo lo necesitás?",
    }
    .to_owned()
}

/// Spanish reply for the lead. `notices` come first (guardrail messages), then a
/// state-specific body, then the first pending question.
pub fn compose_reply(
    record: &LeadRecord,
    notices: &[String],
    knowledge_note: Option<&str>,
    questions: &[String],
) -> String {
    let mut parts: Vec<String> = notices.to_vec();
    let data = &record.data;
    let greeting = match &data.name {
        Some(name) => format!("¡Gracias, {name}!"),
        None => "¡Gracias por escribirnos!".to_owned(),
    };

    match record.state() {
        LeadState::New | LeadState::CollectingTechData => {
            parts.push(greeting);
            if let Some(captured) = captured_summary(record) {
                parts.push(captured);
            }
        }
        LeadState::Qualified => {
            parts.push(format!("{greeting} Ya tenemos todos los datos de tu consulta."));
        }
        LeadState::Assigned => {
            let salesperson = record
                .assigned_salesperson
                .as_ref()
                .map(|salesperson| salesperson.name.as_str())
                .unwrap_or("Un asesor");
            let zone = data.zone.as_deref().unwrap_or("tu zona");
            parts.push(format!(
                "{greeting} Tu consulta quedó registrada. {salesperson}, asesor de {zone}, se va a comunicar con vos a la brevedad."
            ));
        }
        LeadState::FollowUp => {
            if record.is_qualified() {
                parts.push(format!(
                    "{greeting} Por ahora no tenemos un asesor asignado para tu zona; te vamos a contactar para coordinar."
                ));
            } else {
                parts.push(format!(
                    "{greeting} Para poder ayudarte necesitamos algunos datos más."
                ));
            }
        }
    }

    if let Some(note) = knowledge_note {
        parts.push(note.to_owned());
    }
    if let Some(question) = questions.first() {
        parts.push(question.clone());
    }

    parts.join(" ")
}

fn captured_summary(record: &LeadRecord) -> Option<String> {
    let data = &record.data;
    let machine = match (&data.machine.brand, &data.machine.model) {
        (Some(brand), Some(model)) => Some(format!("{brand} {model}")),
        (Some(brand), None) => Some(brand.clone()),
        _ => None,
    };

    match (&data.implement_of_interest, machine) {
        (Some(implement), Some(machine)) => {
            Some(format!("Anotamos que buscás un {implement} para tu {machine}."))
        }
        (Some(implement), None) => Some(format!("Anotamos que buscás un {implement}.")),
        (None, Some(machine)) => Some(format!("Anotamos que tenés una {machine}.")),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use leadflow_core::domain::lead::{Channel, ContactId, LeadRecord, MachineUsage, Urgency};

    use super::{compose_reply, next_questions};

    fn record() -> LeadRecord {
        LeadRecord::new(ContactId("c-1".to_owned()), Channel::Whatsapp)
    }

    #[test]
    fn questions_follow_missing_required_fields() {
        let mut lead = record();
        lead.data.implement_of_interest = Some("balde".to_owned());
        lead.data.machine.brand = Some("Bobcat".to_owned());

        let questions = next_questions(&lead);
        assert_eq!(questions.len(), 3);
        assert_eq!(questions[0], "¿Cuál es tu nombre?");
        assert_eq!(questions[1], "¿En qué zona o provincia estás?");
        assert_eq!(questions[2], "¿Qué modelo es tu Bobcat?");
    }

    #[test]
    fn complete_record_has_no_questions() {
        let mut lead = record();
        lead.data.name = Some("Juan".to_owned());
        lead.data.zone = Some("Córdoba".to_owned());
        lead.data.machine.brand = Some("Bobcat".to_owned());
        lead.data.machine.usage = Some(MachineUsage::Obra);
        lead.data.implement_of_interest = Some("balde".to_owned());
        lead.data.urgency = Some(Urgency::Media);

        assert!(next_questions(&lead).is_empty());
    }

    #[test]
    fn reply_mentions_captured_data_and_asks_next() {
        let mut lead = record();
        lead.data.implement_of_interest = Some("balde".to_owned());
        lead.data.machine.brand = Some("Bobcat".to_owned());
        lead.data.machine.model = Some("S70".to_owned());
        let questions = next_questions(&lead);

        let reply = compose_reply(&lead, &[], None, &questions);
        assert!(reply.contains("balde para tu Bobcat S70"));
        assert!(reply.ends_with("¿Cuál es tu nombre?"));
    }
}
