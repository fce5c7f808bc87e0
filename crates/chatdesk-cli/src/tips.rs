//! Contextual help shown once per page

pub struct Tip {
    pub title: &'static str,
    pub content: &'static str,
    pages: &'static [&'static str],
}

const TIPS: &[Tip] = &[
    Tip {
        title: "Theme",
        content: "Run `chatdesk theme toggle` to switch between light and dark output.",
        pages: &["login", "register", "dashboard"],
    },
    Tip {
        title: "Your account",
        content: "`chatdesk profile` shows who you are signed in as; `chatdesk logout` ends the session.",
        pages: &["dashboard"],
    },
    Tip {
        title: "AI assistant",
        content: "Ask about products, shipping, returns or any store policy.",
        pages: &["dashboard"],
    },
    Tip {
        title: "Connection status",
        content: "Type /status at any time; /reconnect forces a fresh connection.",
        pages: &["dashboard"],
    },
    Tip {
        title: "Response details",
        content: "Assistant replies show confidence and timing, and are marked when served from cache.",
        pages: &["dashboard"],
    },
    Tip {
        title: "Rooms",
        content: "Use /join <room> to talk in a room and /leave to return to the main channel.",
        pages: &["dashboard"],
    },
    Tip {
        title: "Passwords",
        content: "Set CHATDESK_PASSWORD to keep your password out of shell history.",
        pages: &["login", "register"],
    },
];

/// Tips relevant to a page, in display order
pub fn tips_for(page: &str) -> impl Iterator<Item = &'static Tip> + '_ {
    TIPS.iter().filter(move |tip| tip.pages.contains(&page))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tips_are_filtered_by_page() {
        assert_eq!(tips_for("dashboard").count(), 6);
        assert_eq!(tips_for("login").count(), 2);
        assert_eq!(tips_for("settings").count(), 0);
    }
}
