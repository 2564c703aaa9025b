// src/messages.rs

pub const FORBIDDEN_HELP: &str = "please enable direct messages from server members to complete the verification process.\n\
    On desktop: click the server name, then \"Privacy Settings\", and turn on \"Direct Messages\"\n\
    On Mobile: click the server name, then scroll down and turn on \"Allow Direct Messages\"";

pub fn forbidden_help(mention: &str) -> String {
    format!("{}, {}", mention, FORBIDDEN_HELP)
}

pub fn welcome_message(timeout_secs: u64) -> String {
    format!(
        "👋 **Welcome!**\n\n\
        Please answer the following question correctly to gain access to the server. \
        You have {} seconds to answer.",
        timeout_secs
    )
}

pub fn question_message(prompt: &str) -> String {
    format!("**{}**", prompt)
}

pub fn verification_link_message(link: &str) -> String {
    format!(
        "✅ **Correct!**\n\n\
        Now visit this link to complete verification:\n\
        {}\n\n\
        This link will expire in 30 minutes.",
        link
    )
}

pub fn incorrect_kicked_message() -> &'static str {
    "❌ Incorrect answer. You have been removed from the server."
}

pub fn incorrect_contact_admin_message() -> &'static str {
    "❌ Incorrect answer. Please contact an admin if you believe this is a mistake."
}

pub fn timeout_message(restart_command: &str) -> String {
    format!(
        "⏰ You took too long to respond. To restart this process run the command `{}` in the server.",
        restart_command
    )
}

pub fn no_role_message() -> &'static str {
    "The admins of this server have enabled verification but have not set the role granted on a correct answer. \
    Please contact them to have this corrected."
}

pub fn no_question_message() -> &'static str {
    "The admins of this server have enabled verification but have not set a verification question. \
    Please contact them to have this corrected."
}

pub fn not_configured_message() -> &'static str {
    "The verification system is not properly configured. Please contact an admin."
}

pub fn verified_message(member_id: &str) -> String {
    format!(
        "🎉 **Congratulations!** You have been verified with member ID: {}",
        member_id
    )
}

pub fn already_pending_message() -> &'static str {
    "You already have a verification in progress. Please check your direct messages."
}
