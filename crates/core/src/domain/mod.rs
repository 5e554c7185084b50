pub mod lead;

pub use lead::{
    Channel, ContactId, ConversationRole, ConversationTurn, ExtractedData, LeadField, LeadFlag,
    LeadRecord, LeadScore, MachineInfo, MachineUsage, Urgency, REQUIRED_FIELDS,
};
