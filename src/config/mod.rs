pub mod settings;
pub mod verification;

pub use settings::BotSettings;
pub use verification::{
    parse_answer_list, GlobalVerificationConfig, GuildVerificationConfig, Question,
    VerifierConfig, MIN_SECRET_LENGTH,
};
