//! Completion notice sent to a freshly linked identity.

use crate::config::ClientVersion;

/// Human-readable notice that follows the credential artifact.
pub fn completion_notice(target: &str, identity: &str, version: ClientVersion) -> String {
    format!(
        "*DEVICE PAIRING SUCCESSFUL*\n\
         \n\
         Creds.json generated successfully\n\
         Number: {target}\n\
         User ID: {identity}\n\
         \n\
         *Next Steps:*\n\
         1. Copy the creds.json above\n\
         2. Use it in your bot deployment\n\
         3. Bot is now ready to use\n\
         \n\
         System ID: PAIRGATE-v{version}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notice_mentions_target_identity_and_version() {
        let text = completion_notice(
            "+263714757857",
            "263714757857:1@s.whatsapp.net",
            ClientVersion::default(),
        );
        assert!(text.contains("Number: +263714757857"));
        assert!(text.contains("User ID: 263714757857:1@s.whatsapp.net"));
        assert!(text.ends_with("System ID: PAIRGATE-v2.3000.1015901307"));
        assert!(text.contains("\n1. Copy the creds.json above\n"));
    }
}
